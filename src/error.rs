#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use snafu::prelude::*;

use crate::proto::StatusCode;

/// The sunset-sftp error type.
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out, a packet was truncated
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Error in received SFTP protocol. Ends the session.
    SftpProtoError,

    /// Received packet at a disallowed time, or of the wrong type.
    PacketWrong,

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    #[snafu(display("Packet size {size} too large"))]
    BigPacket { size: usize },

    /// The peer negotiated a version older than 3
    #[snafu(display("Incompatible SFTP version: {version}"))]
    Incompatible { version: u32 },

    /// Pending requests are failed with this when the session is torn
    /// down while the peer could still be heard.
    #[snafu(display("SFTP session ended early"))]
    SessionEnded,

    /// The session is closed, or the transport went away.
    #[snafu(display("SFTP session is closed"))]
    SessionClosed,

    /// The peer replied with a STATUS other than OK.
    ///
    /// Only the request that received it fails, the session carries on.
    #[snafu(display("{msg}"))]
    Status {
        code: StatusCode,
        msg: String,
        lang: String,
    },

    /// A vendor extension the server didn't advertise. No packet was sent.
    #[snafu(display("Server does not support this extended request ({name})"))]
    ExtensionUnsupported { name: &'static str },

    #[snafu(display("Unknown flags string: {flags}"))]
    UnknownFlags { flags: String },

    /// Bad application usage
    #[snafu(display("Bad usage: {msg}"))]
    BadUsage { msg: &'static str },

    /// Source ended before its reported size was read
    #[snafu(display("Short read at offset {offset}"))]
    ShortRead { offset: u64 },

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    /// IO Error
    IoError { source: std::io::Error },

    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    /// A STATUS error. An empty message is replaced by the
    /// standard text for `code`.
    pub fn status(code: StatusCode, msg: &str, lang: &str) -> Error {
        let msg = if msg.is_empty() {
            code.description().into()
        } else {
            msg.into()
        };
        Error::Status { code, msg, lang: lang.into() }
    }

    /// The status code of a STATUS error
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether this is a STATUS error with `code`
    pub fn is_status(&self, code: StatusCode) -> bool {
        self.code() == Some(code)
    }

    /// The status code to report to a peer for this error.
    pub fn to_status(&self) -> StatusCode {
        match self {
            Error::Status { code, .. } => *code,
            Error::IoError { source } => StatusCode::from_io(source),
            Error::SessionClosed | Error::SessionEnded => {
                StatusCode::SSH_FX_CONNECTION_LOST
            }
            Error::BadUsage { .. } | Error::UnknownFlags { .. } => {
                StatusCode::SSH_FX_BAD_MESSAGE
            }
            _ => StatusCode::SSH_FX_FAILURE,
        }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }
}

impl embedded_io_async::Error for Error {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        use embedded_io_async::ErrorKind;
        match self {
            Error::Status { code: StatusCode::SSH_FX_NO_SUCH_FILE, .. } => ErrorKind::NotFound,
            Error::Status { code: StatusCode::SSH_FX_PERMISSION_DENIED, .. } => {
                ErrorKind::PermissionDenied
            }
            Error::Status { code: StatusCode::SSH_FX_OP_UNSUPPORTED, .. }
            | Error::ExtensionUnsupported { .. } => ErrorKind::Unsupported,
            Error::BadUsage { .. } | Error::UnknownFlags { .. } => ErrorKind::InvalidInput,
            Error::SessionClosed | Error::SessionEnded => ErrorKind::NotConnected,
            _ => ErrorKind::Other,
        }
    }
}

/// A sunset-sftp Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Turns a failure that would mean a logic error here into [`Error::bug()`].
pub trait TrapBug<T> {
    fn trap(self) -> Result<T>;
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(Error::bug()),
        }
    }
}

impl<T, E> TrapBug<T> for Result<T, E> {
    #[track_caller]
    fn trap(self) -> Result<T> {
        self.ok().trap()
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IoError { source: value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_fallback() {
        let e = Error::status(StatusCode::SSH_FX_NO_SUCH_FILE, "", "");
        assert_eq!(e.to_string(), "No such file or directory");
        assert!(e.is_status(StatusCode::SSH_FX_NO_SUCH_FILE));

        let e = Error::status(StatusCode::SSH_FX_FAILURE, "disk on fire", "en");
        assert_eq!(e.to_string(), "disk on fire");
        assert_eq!(e.code(), Some(StatusCode::SSH_FX_FAILURE));
    }

    #[test]
    fn io_errors_map_to_status() {
        let e: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(e.to_status(), StatusCode::SSH_FX_NO_SUCH_FILE);
        let e: Error =
            std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(e.to_status(), StatusCode::SSH_FX_PERMISSION_DENIED);
        assert_eq!(Error::RanOut.to_status(), StatusCode::SSH_FX_FAILURE);
        assert!(Error::SessionEnded.code().is_none());
    }

    #[test]
    fn io_error_kinds() {
        use embedded_io_async::{Error as _, ErrorKind};
        let e = Error::status(StatusCode::SSH_FX_NO_SUCH_FILE, "", "");
        assert_eq!(e.kind(), ErrorKind::NotFound);
        let e = Error::BadUsage { msg: "x" };
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::SessionClosed.kind(), ErrorKind::NotConnected);
        assert_eq!(Error::RanOut.kind(), ErrorKind::Other);
    }
}
