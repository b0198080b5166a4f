//! SSH wire format reading/writing, as used by SFTP packets.
//! Used in conjunction with `sunset_sftpwire_derive` and the
//! packet definitions in [`proto`](crate::proto).
//!
//! Decoding never panics on short input. Reading past the end of a buffer
//! returns [`WireError::RanOut`], which propagates with `?` up to the
//! session so that a truncated packet is handled in one place.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt::{self, Debug};
use pretty_hex::PrettyHex;

/// A generic destination for serializing, used similarly to `serde::Serializer`
pub trait SSHSink {
    fn push(&mut self, v: &[u8]) -> WireResult<()>;
}

/// A generic source for a packet, used similarly to `serde::Deserializer`
pub trait SSHSource<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]>;

    /// Cursor position from the start of the input
    fn pos(&self) -> usize;

    /// Bytes left to read
    fn remaining(&self) -> usize;
}

/// Encodes the type in SSH wire format
pub trait SSHEncode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink;
}

/// Decodes a type from SSH wire format
pub trait SSHDecode<'de>: Sized {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>;
}

/// A subset of [`Error`] for `SSHEncode` and `SSHDecode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    NoRoom,

    /// Input was truncated
    RanOut,

    BadString,

    PacketWrong,

    SftpProtoError,

    UnknownPacket { number: u8 },
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        match w {
            WireError::NoRoom => Error::NoRoom,
            WireError::RanOut => Error::RanOut,
            WireError::BadString => Error::BadString,
            WireError::PacketWrong => Error::PacketWrong,
            WireError::SftpProtoError => Error::SftpProtoError,
            WireError::UnknownPacket { number } => Error::UnknownPacket { number },
        }
    }
}

pub type WireResult<T> = core::result::Result<T, WireError>;

///////////////////////////////////////////////

/// Decodes a `T` from the start of `b`. Trailing bytes are ignored.
pub fn read_ssh<'a, T: SSHDecode<'a>>(b: &'a [u8]) -> Result<T> {
    let mut s = DecodeBytes::new(b);
    Ok(T::dec(&mut s)?)
}

/// Encodes `value` into `target`, returning the length written
pub fn write_ssh<T>(target: &mut [u8], value: &T) -> Result<usize>
where
    T: SSHEncode,
{
    let mut s = EncodeBytes { target, pos: 0 };
    value.enc(&mut s)?;
    Ok(s.pos)
}

/// Appends the encoded `value` to `v`
pub fn write_ssh_vec<T>(v: &mut Vec<u8>, value: &T) -> Result<usize>
where
    T: SSHEncode,
{
    let start = v.len();
    value.enc(v)?;
    Ok(v.len() - start)
}

/// Returns `WireError::NoRoom` if larger than `u32`
pub fn length_enc<T>(value: &T) -> WireResult<u32>
where
    T: SSHEncode,
{
    let mut s = EncodeLen { pos: 0 };
    value.enc(&mut s)?;
    s.pos.try_into().map_err(|_| WireError::NoRoom)
}

struct EncodeBytes<'a> {
    target: &'a mut [u8],
    pos: usize,
}

impl SSHSink for EncodeBytes<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        if self.pos + v.len() > self.target.len() {
            return Err(WireError::NoRoom);
        }
        self.target[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
        Ok(())
    }
}

struct EncodeLen {
    pos: usize,
}

impl SSHSink for EncodeLen {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.pos += v.len();
        Ok(())
    }
}

impl SSHSink for Vec<u8> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.extend_from_slice(v);
        Ok(())
    }
}

/// A [`SSHSource`] over a borrowed buffer with an explicit cursor.
#[derive(Debug)]
pub struct DecodeBytes<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DecodeBytes<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }
}

impl<'de> SSHSource<'de> for DecodeBytes<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]> {
        if len > self.input.len() {
            return Err(WireError::RanOut);
        }
        let t;
        (t, self.input) = self.input.split_at(len);
        self.pos += len;
        Ok(t)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.input.len()
    }
}

///////////////////////////////////////////////

/// A SSH style binary string. Serialized as `u32` length followed by the bytes
/// of the slice.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BinString<'a>(pub &'a [u8]);

impl Debug for BinString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinString(len={})", self.0.len())
    }
}

impl SSHEncode for BinString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let len: u32 = self.0.len().try_into().map_err(|_| WireError::NoRoom)?;
        len.enc(s)?;
        self.0.enc(s)
    }
}

impl<'de> SSHDecode<'de> for BinString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        Ok(BinString(s.take(len)?))
    }
}

/// A text string such as a filename or status message.
///
/// SFTP v3 doesn't define an encoding for filenames, later versions
/// use UTF-8 so that is assumed. The bytes are kept as-is until
/// [`as_str()`](Self::as_str) is called.
#[derive(Clone, PartialEq, Eq, Copy)]
pub struct TextString<'a>(pub &'a [u8]);

impl<'a> TextString<'a> {
    /// Returns the UTF-8 decoded string
    pub fn as_str(&self) -> Result<&'a str> {
        core::str::from_utf8(self.0).map_err(|_| Error::BadString)
    }

    /// Returns an owned string, replacing invalid UTF-8 sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.0).into_owned()
    }
}

impl<'a> From<&'a str> for TextString<'a> {
    fn from(s: &'a str) -> Self {
        TextString(s.as_bytes())
    }
}

impl Debug for TextString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = core::str::from_utf8(self.0);
        if let Ok(s) = s {
            write!(f, "TextString(\"{}\")", s.escape_default())
        } else {
            write!(f, "TextString(not utf8!, {:#?})", self.0.hex_dump())
        }
    }
}

impl SSHEncode for TextString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.0).enc(s)
    }
}

impl<'de> SSHDecode<'de> for TextString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        Ok(TextString(b.0))
    }
}

/// The remainder of a packet, without a length prefix.
///
/// Used for extension payloads whose layout depends on the extension name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Rest<'a>(pub &'a [u8]);

impl Debug for Rest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rest(len={})", self.0.len())
    }
}

impl SSHEncode for Rest<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(self.0)
    }
}

impl<'de> SSHDecode<'de> for Rest<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = s.remaining();
        Ok(Rest(s.take(len)?))
    }
}

///////////////////////////////////////////////

// Integers are big endian, fixed width
macro_rules! wire_int {
    ($($t:ty),*) => {
        $(
            impl SSHEncode for $t {
                fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
                    s.push(&self.to_be_bytes())
                }
            }

            impl<'de> SSHDecode<'de> for $t {
                #[inline]
                fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
                    Ok(<$t>::from_be_bytes(s.dec_array()?))
                }
            }
        )*
    };
}

wire_int!(u8, u32, u64);

// no length prefix
impl SSHEncode for &[u8] {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        s.push(self)
    }
}

/// Fixed size reads for any [`SSHSource`]
trait DecArray<'de> {
    fn dec_array<const N: usize>(&mut self) -> WireResult<[u8; N]>;
}

impl<'de, S: SSHSource<'de>> DecArray<'de> for S {
    fn dec_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut l = [0u8; N];
        l.copy_from_slice(self.take(N)?);
        Ok(l)
    }
}
