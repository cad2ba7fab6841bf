mod netconf;
mod ssh;

pub use netconf::{NetconfConnector, NetconfSession};

use crate::config::SessionConfig;

/// Errors raised by a device session
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("device rejected {operation}: {message}")]
    Rpc { operation: &'static str, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Format of configuration text pushed to a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    /// Curly-brace configuration text
    #[default]
    Text,
    /// `set` commands, one per line
    Set,
}

/// An open, transactional configuration session on one device
pub trait DeviceSession {
    /// Take the exclusive edit lock on the candidate configuration
    fn lock(&mut self) -> Result<(), DeviceError>;

    /// Load configuration fragments into the candidate. `merge` selects merge
    /// over replace semantics.
    fn load_config(
        &mut self,
        fragments: &[String],
        format: ConfigFormat,
        merge: bool,
    ) -> Result<(), DeviceError>;

    /// Candidate compared against rollback `rollback` (0 = active configuration)
    fn diff(&mut self, rollback: u32) -> Result<String, DeviceError>;

    fn commit(&mut self) -> Result<(), DeviceError>;

    /// Discard uncommitted candidate changes
    fn rollback(&mut self) -> Result<(), DeviceError>;

    fn unlock(&mut self) -> Result<(), DeviceError>;

    /// Close the session. Must tolerate being called on a broken session.
    fn close(&mut self);
}

/// Opens device sessions
pub trait Connector {
    type Session: DeviceSession;

    fn connect(&self, address: &str, config: &SessionConfig) -> Result<Self::Session, DeviceError>;
}

/// Owns a connected session and closes it exactly once, on `close()` or on drop
pub struct SessionGuard<S: DeviceSession> {
    session: S,
    closed: bool,
}

impl<S: DeviceSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// Close now rather than at end of scope
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
        }
    }
}

impl<S: DeviceSession> std::ops::Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: DeviceSession> std::ops::DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: DeviceSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A diff is worth acting on when it contains more than whitespace
pub fn is_trivial_diff(diff: &str) -> bool {
    diff.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingSession {
        closes: Rc<Cell<u32>>,
    }

    impl DeviceSession for CountingSession {
        fn lock(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn load_config(
            &mut self,
            _: &[String],
            _: ConfigFormat,
            _: bool,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        fn diff(&mut self, _: u32) -> Result<String, DeviceError> {
            Ok(String::new())
        }
        fn commit(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn unlock(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    #[test]
    fn test_guard_closes_once_on_explicit_close() {
        let closes = Rc::new(Cell::new(0));
        let guard = SessionGuard::new(CountingSession { closes: closes.clone() });
        guard.close();
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let closes = Rc::new(Cell::new(0));
        {
            let mut guard = SessionGuard::new(CountingSession { closes: closes.clone() });
            assert!(guard.lock().is_ok());
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_guard_closes_on_unwind() {
        let closes = Rc::new(Cell::new(0));
        let c = closes.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = SessionGuard::new(CountingSession { closes: c });
            panic!("stage blew up");
        }));
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_trivial_diff() {
        assert!(is_trivial_diff(""));
        assert!(is_trivial_diff("\n"));
        assert!(!is_trivial_diff("[edit system]\n-  host-name old;\n+  host-name r1;\n"));
    }
}
