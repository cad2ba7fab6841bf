use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::DeviceError;
use crate::config::SessionConfig;

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Create an SSH session and authenticate with the configured key file, then
/// password, then keyboard-interactive. Uses the ssh2 crate (libssh2).
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(host: &str, config: &SessionConfig) -> Result<ssh2::Session, DeviceError> {
    let connect_err = |reason: String| DeviceError::Connect {
        address: host.to_string(),
        reason,
    };
    let timeout = Duration::from_secs(config.timeout_secs);

    let addr = (host, config.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(format!("Invalid address {}:{}: {}", host, config.port, e)))?
        .next()
        .ok_or_else(|| connect_err(format!("No address found for {}", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| connect_err(format!("TCP connection failed: {}", e)))?;

    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(config.timeout_millis());
    session
        .handshake()
        .map_err(|e| connect_err(format!("SSH handshake failed: {}", e)))?;

    let user = config.username.as_str();

    if let Some(key_file) = &config.key_file {
        match session.userauth_pubkey_file(user, None, key_file, None) {
            Ok(_) if session.authenticated() => return Ok(session),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Key authentication with {} failed: {}", key_file.display(), e)
            }
        }
    }

    if let Some(pass) = &config.password {
        match session.userauth_password(user, pass) {
            Ok(_) if session.authenticated() => return Ok(session),
            _ => {}
        }

        // Try keyboard-interactive auth (needed for some Junos AAA setups)
        let mut prompter = PasswordPrompt {
            password: pass.clone(),
        };
        let _ = session.userauth_keyboard_interactive(user, &mut prompter);
    }

    if session.authenticated() {
        Ok(session)
    } else {
        Err(DeviceError::Auth {
            user: user.to_string(),
            reason: "all methods exhausted".to_string(),
        })
    }
}
