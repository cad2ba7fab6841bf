use std::io::{Read, Write};

use super::ssh::ssh_connect;
use super::{ConfigFormat, Connector, DeviceError, DeviceSession};
use crate::config::SessionConfig;

/// NETCONF 1.0 end-of-message marker
const DELIMITER: &str = "]]>]]>";

const CLIENT_HELLO: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>"#;

/// Opens NETCONF-over-SSH sessions to Junos devices
#[derive(Debug, Clone, Copy, Default)]
pub struct NetconfConnector;

impl Connector for NetconfConnector {
    type Session = NetconfSession;

    fn connect(
        &self,
        address: &str,
        config: &SessionConfig,
    ) -> Result<NetconfSession, DeviceError> {
        let ssh = ssh_connect(address, config)?;
        NetconfSession::open(ssh, address)
    }
}

/// A NETCONF session on the `netconf` SSH subsystem.
/// Blocking; run it from a spawn_blocking context.
pub struct NetconfSession {
    address: String,
    channel: ssh2::Channel,
    message_id: u64,
    // Keeps the transport alive for as long as the channel is in use
    _ssh: ssh2::Session,
}

impl NetconfSession {
    fn open(ssh: ssh2::Session, address: &str) -> Result<Self, DeviceError> {
        let mut channel = ssh.channel_session()?;
        channel.subsystem("netconf")?;

        let mut session = Self {
            address: address.to_string(),
            channel,
            message_id: 0,
            _ssh: ssh,
        };

        let hello = session.read_message()?;
        if !hello.contains("<hello") {
            return Err(DeviceError::Protocol(format!(
                "{} did not send a NETCONF hello",
                address
            )));
        }
        session.write_message(CLIENT_HELLO)?;
        tracing::debug!("NETCONF session established with {}", address);

        Ok(session)
    }

    fn write_message(&mut self, message: &str) -> Result<(), DeviceError> {
        self.channel.write_all(message.as_bytes())?;
        self.channel.write_all(DELIMITER.as_bytes())?;
        self.channel.flush()?;
        Ok(())
    }

    fn read_message(&mut self) -> Result<String, DeviceError> {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 8192];

        loop {
            let n = self.channel.read(&mut chunk)?;
            if n == 0 {
                return Err(DeviceError::Protocol(format!(
                    "{} closed the session mid-message",
                    self.address
                )));
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = find_delimiter(&buf) {
                buf.truncate(end);
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
        }
    }

    fn rpc(&mut self, operation: &'static str, body: &str) -> Result<String, DeviceError> {
        self.message_id += 1;
        let request = format!(
            r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="{}">{}</rpc>"#,
            self.message_id, body
        );
        tracing::debug!("NETCONF {} -> {}", operation, self.address);

        self.write_message(&request)?;
        let reply = self.read_message()?;
        check_reply(operation, &reply)?;
        Ok(reply)
    }
}

impl DeviceSession for NetconfSession {
    fn lock(&mut self) -> Result<(), DeviceError> {
        self.rpc("lock", "<lock><target><candidate/></target></lock>")
            .map(|_| ())
    }

    fn load_config(
        &mut self,
        fragments: &[String],
        format: ConfigFormat,
        merge: bool,
    ) -> Result<(), DeviceError> {
        self.rpc("load-configuration", &load_config_body(fragments, format, merge))
            .map(|_| ())
    }

    fn diff(&mut self, rollback: u32) -> Result<String, DeviceError> {
        let body = format!(
            r#"<get-configuration compare="rollback" rollback="{}" format="text"/>"#,
            rollback
        );
        let reply = self.rpc("get-configuration", &body)?;
        element_text(&reply, "configuration-output").ok_or_else(|| {
            DeviceError::Protocol("diff reply carried no configuration-output".to_string())
        })
    }

    fn commit(&mut self) -> Result<(), DeviceError> {
        self.rpc("commit-configuration", "<commit-configuration/>")
            .map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), DeviceError> {
        self.rpc("load-configuration", r#"<load-configuration rollback="0"/>"#)
            .map(|_| ())
    }

    fn unlock(&mut self) -> Result<(), DeviceError> {
        self.rpc("unlock", "<unlock><target><candidate/></target></unlock>")
            .map(|_| ())
    }

    fn close(&mut self) {
        if let Err(e) = self.rpc("close-session", "<close-session/>") {
            tracing::debug!("close-session on {} failed: {}", self.address, e);
        }
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
        let _ = self.channel.wait_close();
        tracing::debug!("NETCONF session with {} closed", self.address);
    }
}

fn load_config_body(fragments: &[String], format: ConfigFormat, merge: bool) -> String {
    let text = escape_xml(&fragments.join("\n"));
    match format {
        ConfigFormat::Text => {
            let action = if merge { "merge" } else { "replace" };
            format!(
                r#"<load-configuration action="{}" format="text"><configuration-text>{}</configuration-text></load-configuration>"#,
                action, text
            )
        }
        ConfigFormat::Set => format!(
            r#"<load-configuration action="set" format="text"><configuration-set>{}</configuration-set></load-configuration>"#,
            text
        ),
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    let delim = DELIMITER.as_bytes();
    buf.windows(delim.len()).position(|w| w == delim)
}

/// Fail when the reply carries an `<rpc-error>` of severity error. Warnings pass.
fn check_reply(operation: &'static str, reply: &str) -> Result<(), DeviceError> {
    let mut rest = reply;
    let mut messages = Vec::new();

    while let Some(start) = rest.find("<rpc-error>") {
        let block_start = start + "<rpc-error>".len();
        let block_end = rest[block_start..]
            .find("</rpc-error>")
            .map(|e| block_start + e)
            .unwrap_or(rest.len());
        let block = &rest[block_start..block_end];

        let severity = element_text(block, "error-severity").unwrap_or_else(|| "error".to_string());
        if severity.trim() == "error" {
            let message = element_text(block, "error-message")
                .map(|m| m.trim().to_string())
                .unwrap_or_else(|| "unspecified error".to_string());
            messages.push(message);
        }

        rest = &rest[block_end..];
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(DeviceError::Rpc {
            operation,
            message: messages.join("; "),
        })
    }
}

/// Unescaped text of the first `<tag>` element, ignoring attributes
fn element_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);

    let mut search = 0;
    while let Some(pos) = xml[search..].find(&open) {
        let after_name = search + pos + open.len();
        let next = xml[after_name..].chars().next()?;
        if next == '>' || next == '/' || next.is_whitespace() {
            let content_start = after_name + xml[after_name..].find('>')? + 1;
            if xml[..content_start].ends_with("/>") {
                return Some(String::new());
            }
            let content_end = content_start + xml[content_start..].find(&close)?;
            return Some(unescape_xml(&xml[content_start..content_end]));
        }
        search = after_name;
    }
    None
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
