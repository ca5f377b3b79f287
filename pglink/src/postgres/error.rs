//! Protocol error
use std::fmt;

use super::BackendMessage;

/// An error when translating buffer from postgres
pub enum ProtocolError {
    /// Backend sent a message that is not expected in the current exchange.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Backend requested an authentication method code that is not known.
    UnknownAuth {
        auth: u32,
    },
    /// Message body does not follow the documented layout.
    Malformed {
        reason: &'static str,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found}`",
                            BackendMessage::message_name(m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => {
                write!(f, "Unknown authentication method code `{auth}`")
            },
            ProtocolError::Malformed { reason } => {
                write!(f, "Malformed message: {reason}")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { reason }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_names() {
        let err = ProtocolError::unexpected(b'1', b'T');
        assert_eq!(err.to_string(), "Expected message `ParseComplete` found `RowDescription`");

        let err = ProtocolError::unexpected_phase(b'D', "startup");
        assert_eq!(err.to_string(), "Unexpected message `DataRow` in `startup`");
    }
}
