//! SSH_FXF_* open flags and their POSIX `fopen()` style mode strings.

use core::fmt;
use core::ops::BitOr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    pub const CREAT: OpenFlags = OpenFlags(0x08);
    pub const TRUNC: OpenFlags = OpenFlags(0x10);
    pub const EXCL: OpenFlags = OpenFlags(0x20);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parses a mode string such as `"r+"` or `"wx"`.
    pub fn from_mode(mode: &str) -> Result<Self> {
        let f = match mode {
            "r" => Self::READ,
            "r+" => Self::READ | Self::WRITE,
            "w" => Self::TRUNC | Self::CREAT | Self::WRITE,
            "wx" | "xw" => Self::TRUNC | Self::CREAT | Self::WRITE | Self::EXCL,
            "w+" => Self::TRUNC | Self::CREAT | Self::READ | Self::WRITE,
            "wx+" | "xw+" => {
                Self::TRUNC | Self::CREAT | Self::READ | Self::WRITE | Self::EXCL
            }
            "a" => Self::APPEND | Self::CREAT | Self::WRITE,
            "ax" | "xa" => Self::APPEND | Self::CREAT | Self::WRITE | Self::EXCL,
            "a+" => Self::APPEND | Self::CREAT | Self::READ | Self::WRITE,
            "ax+" | "xa+" => {
                Self::APPEND | Self::CREAT | Self::READ | Self::WRITE | Self::EXCL
            }
            _ => return Err(Error::UnknownFlags { flags: mode.into() }),
        };
        Ok(f)
    }

    /// The canonical mode string for these flags, if there is one.
    pub fn to_mode(self) -> Option<&'static str> {
        MODES
            .iter()
            .find(|m| OpenFlags::from_mode(m).is_ok_and(|f| f == self))
            .copied()
    }
}

// canonical spellings, the reverse mapping of from_mode()
const MODES: [&str; 10] = ["r", "r+", "w", "wx", "w+", "wx+", "a", "ax", "a+", "ax+"];

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl From<u32> for OpenFlags {
    fn from(v: u32) -> Self {
        OpenFlags(v)
    }
}

impl TryFrom<&str> for OpenFlags {
    type Error = Error;

    fn try_from(mode: &str) -> Result<Self> {
        OpenFlags::from_mode(mode)
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_mode() {
            Some(m) => write!(f, "OpenFlags({m:?})"),
            None => write!(f, "OpenFlags({:#x})", self.0),
        }
    }
}
