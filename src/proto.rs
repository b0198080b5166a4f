//! SFTP v3 packet definitions, see
//! [draft-ietf-secsh-filexfer-02](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use num_enum::FromPrimitive;
use paste::paste;
use sunset_sftpwire_derive::{SSHDecode, SSHEncode};

use crate::attrs::Attrs;
use crate::error::Result;
use crate::sshwire::{
    BinString, Rest, SSHDecode, SSHEncode, SSHSink, SSHSource, TextString,
    WireError, WireResult,
};

/// A path. Assumed to be UTF-8, as later SFTP versions specify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SSHEncode, SSHDecode)]
pub struct Filename<'a>(pub TextString<'a>);

impl<'a> From<&'a str> for Filename<'a> {
    fn from(s: &'a str) -> Self {
        Filename(TextString(s.as_bytes()))
    }
}

impl<'a> Filename<'a> {
    pub fn as_str(&self) -> Result<&'a str> {
        self.0.as_str()
    }
}

/// An opaque handle issued by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, SSHEncode, SSHDecode)]
pub struct FileHandle<'a>(pub BinString<'a>);

impl<'a> From<&'a [u8]> for FileHandle<'a> {
    fn from(s: &'a [u8]) -> Self {
        FileHandle(BinString(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SSHEncode, SSHDecode)]
pub struct ReqId(pub u32);

// Requests

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Open<'a> {
    pub filename: Filename<'a>,
    pub pflags: u32,
    pub attrs: Attrs,
}

/// CLOSE, FSTAT, READDIR requests and the HANDLE response
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct HandleArg<'a> {
    pub handle: FileHandle<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Read<'a> {
    pub handle: FileHandle<'a>,
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Write<'a> {
    pub handle: FileHandle<'a>,
    pub offset: u64,
    pub data: BinString<'a>,
}

/// Requests taking a single path
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct PathArg<'a> {
    pub path: Filename<'a>,
}

/// SETSTAT and MKDIR
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct PathAttrs<'a> {
    pub path: Filename<'a>,
    pub attrs: Attrs,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct HandleAttrs<'a> {
    pub handle: FileHandle<'a>,
    pub attrs: Attrs,
}

/// RENAME, also the payload of `posix-rename@openssh.com`
/// and `hardlink@openssh.com`
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct TwoPaths<'a> {
    pub oldpath: Filename<'a>,
    pub newpath: Filename<'a>,
}

/// SYMLINK in the order of the draft. OpenSSH swaps the fields.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Symlink<'a> {
    pub linkpath: Filename<'a>,
    pub targetpath: Filename<'a>,
}

impl<'a> Symlink<'a> {
    /// Exchanges the two paths, for OpenSSH peers
    pub fn swapped(self) -> Self {
        Symlink { linkpath: self.targetpath, targetpath: self.linkpath }
    }
}

/// A vendor extension request. `data` layout depends on `name`.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Extended<'a> {
    pub name: TextString<'a>,
    pub data: Rest<'a>,
}

// Responses

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum StatusCode {
    SSH_FX_OK = 0,
    SSH_FX_EOF = 1,
    SSH_FX_NO_SUCH_FILE = 2,
    SSH_FX_PERMISSION_DENIED = 3,
    SSH_FX_FAILURE = 4,
    SSH_FX_BAD_MESSAGE = 5,
    SSH_FX_NO_CONNECTION = 6,
    SSH_FX_CONNECTION_LOST = 7,
    SSH_FX_OP_UNSUPPORTED = 8,
    #[num_enum(catch_all)]
    Other(u32),
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> u32 {
        match c {
            StatusCode::SSH_FX_OK => 0,
            StatusCode::SSH_FX_EOF => 1,
            StatusCode::SSH_FX_NO_SUCH_FILE => 2,
            StatusCode::SSH_FX_PERMISSION_DENIED => 3,
            StatusCode::SSH_FX_FAILURE => 4,
            StatusCode::SSH_FX_BAD_MESSAGE => 5,
            StatusCode::SSH_FX_NO_CONNECTION => 6,
            StatusCode::SSH_FX_CONNECTION_LOST => 7,
            StatusCode::SSH_FX_OP_UNSUPPORTED => 8,
            StatusCode::Other(n) => n,
        }
    }
}

impl StatusCode {
    /// Standard text, used when a STATUS has no message
    pub fn description(&self) -> &'static str {
        match self {
            StatusCode::SSH_FX_OK => "No error",
            StatusCode::SSH_FX_EOF => "End of file",
            StatusCode::SSH_FX_NO_SUCH_FILE => "No such file or directory",
            StatusCode::SSH_FX_PERMISSION_DENIED => "Permission denied",
            StatusCode::SSH_FX_FAILURE => "Failure",
            StatusCode::SSH_FX_BAD_MESSAGE => "Bad message",
            StatusCode::SSH_FX_NO_CONNECTION => "No connection",
            StatusCode::SSH_FX_CONNECTION_LOST => "Connection lost",
            StatusCode::SSH_FX_OP_UNSUPPORTED => "Operation unsupported",
            StatusCode::Other(_) => "Unknown status",
        }
    }

    /// Maps a local filesystem error
    pub fn from_io(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StatusCode::SSH_FX_NO_SUCH_FILE,
            std::io::ErrorKind::PermissionDenied => {
                StatusCode::SSH_FX_PERMISSION_DENIED
            }
            std::io::ErrorKind::Unsupported => StatusCode::SSH_FX_OP_UNSUPPORTED,
            _ => StatusCode::SSH_FX_FAILURE,
        }
    }
}

impl SSHEncode for StatusCode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        u32::from(*self).enc(s)
    }
}

impl<'de> SSHDecode<'de> for StatusCode {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(StatusCode::from(u32::dec(s)?))
    }
}

/// STATUS response.
#[derive(Debug, SSHEncode)]
pub struct Status<'a> {
    pub code: StatusCode,
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}

// Some servers omit the message and language tag, as does OpenSSH's
// client, so they are optional here.
impl<'de: 'a, 'a> SSHDecode<'de> for Status<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let code = StatusCode::dec(s)?;
        let mut message = TextString(&[]);
        let mut lang = TextString(&[]);
        if s.remaining() >= 4 {
            message = TextString::dec(s)?;
            // a bare length prefix with nothing after it is ignored
            if s.remaining() > 4 {
                lang = TextString::dec(s)?;
            }
        }
        Ok(Status { code, message, lang })
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Data<'a> {
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct NameEntry<'a> {
    pub filename: Filename<'a>,
    /// An `ls -l` style line, not meant to be parsed
    pub longname: Filename<'a>,
    pub attrs: Attrs,
}

#[derive(Debug)]
pub struct Name<'a>(pub Vec<NameEntry<'a>>);

impl<'de: 'a, 'a> SSHDecode<'de> for Name<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let count = u32::dec(s)? as usize;
        // each entry is at least 12 bytes, don't trust count for allocation
        let mut names = Vec::with_capacity(count.min(s.remaining() / 12));
        for _ in 0..count {
            names.push(NameEntry::dec(s)?);
        }
        Ok(Name(names))
    }
}

impl SSHEncode for Name<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let count: u32 = self.0.len().try_into().map_err(|_| WireError::NoRoom)?;
        count.enc(s)?;
        for e in self.0.iter() {
            e.enc(s)?;
        }
        Ok(())
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct AttrsReply {
    pub attrs: Attrs,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExtendedReply<'a> {
    pub data: Rest<'a>,
}

/// Reply to `statvfs@openssh.com` and `fstatvfs@openssh.com`
#[derive(Debug, Clone, Default, PartialEq, Eq, SSHEncode, SSHDecode)]
pub struct StatVfs {
    /// file system block size
    pub bsize: u64,
    /// fundamental fs block size
    pub frsize: u64,
    /// number of blocks (unit f_frsize)
    pub blocks: u64,
    /// free blocks in file system
    pub bfree: u64,
    /// free blocks for non-root
    pub bavail: u64,
    /// total file inodes
    pub files: u64,
    /// free file inodes
    pub ffree: u64,
    /// free file inodes for to non-root
    pub favail: u64,
    /// file system id
    pub fsid: u64,
    /// bit mask of f_flag values
    pub flag: u64,
    /// maximum filename length
    pub namemax: u64,
}

/// INIT and VERSION body. Neither carries a request id.
#[derive(Debug)]
pub struct VersionInfo<'a> {
    pub version: u32,
    pub extensions: Vec<ExtPair<'a>>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExtPair<'a> {
    pub name: TextString<'a>,
    pub data: TextString<'a>,
}

impl<'de: 'a, 'a> SSHDecode<'de> for VersionInfo<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let version = u32::dec(s)?;
        let mut extensions = Vec::new();
        while s.remaining() > 0 {
            extensions.push(ExtPair::dec(s)?);
        }
        Ok(VersionInfo { version, extensions })
    }
}

impl SSHEncode for VersionInfo<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.version.enc(s)?;
        for e in self.extensions.iter() {
            e.enc(s)?;
        }
        Ok(())
    }
}

macro_rules! sftpmessages {
    (
        init: {
            $( ( $init_num:tt, $init_name:literal ), )*
        },
        request: {
            $( ( $req_num:tt,
                $req_variant:ident,
                $req_type:ty,
                $req_name:literal
                ),
            )*
        },
        response: {
            $( ( $resp_num:tt,
                $resp_variant:ident,
                $resp_type:ty,
                $resp_name:literal
                ),
            )*
        },
    ) => {
        paste! {
            /// SFTP packet type numbers
            #[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
            #[repr(u8)]
            #[allow(non_camel_case_types)]
            pub enum SftpNum {
                $( [<$init_name:upper>] = $init_num, )*
                $( [<$req_name:upper>] = $req_num, )*
                $( [<$resp_name:upper>] = $resp_num, )*
                #[num_enum(catch_all)]
                Other(u8),
            }

            impl From<SftpNum> for u8 {
                fn from(num: SftpNum) -> u8 {
                    match num {
                        $( SftpNum::[<$init_name:upper>] => $init_num, )*
                        $( SftpNum::[<$req_name:upper>] => $req_num, )*
                        $( SftpNum::[<$resp_name:upper>] => $resp_num, )*
                        SftpNum::Other(number) => number,
                    }
                }
            }

            impl SftpNum {
                /// INIT or VERSION
                pub fn is_init(self) -> bool {
                    matches!(self, $( SftpNum::[<$init_name:upper>] )|* )
                }

                pub fn is_request(self) -> bool {
                    matches!(self, $( SftpNum::[<$req_name:upper>] )|* )
                }

                pub fn is_response(self) -> bool {
                    matches!(self, $( SftpNum::[<$resp_name:upper>] )|* )
                }
            }

            /// A client request, sent to the server
            #[derive(Debug)]
            pub enum Request<'a> {
                $( $req_variant($req_type), )*
            }

            impl<'a> Request<'a> {
                pub fn sftp_num(&self) -> SftpNum {
                    match self {
                        $( Request::$req_variant(_) => SftpNum::[<$req_name:upper>], )*
                    }
                }

                /// Encodes the type, request id and body.
                /// Does not include the length field.
                pub fn encode<S: SSHSink>(&self, id: ReqId, s: &mut S) -> WireResult<()> {
                    u8::from(self.sftp_num()).enc(s)?;
                    id.enc(s)?;
                    match self {
                        $( Request::$req_variant(p) => p.enc(s), )*
                    }
                }

                /// Decodes the body following the type byte
                pub fn decode<S>(num: SftpNum, s: &mut S) -> WireResult<(ReqId, Self)>
                where
                    S: SSHSource<'a>,
                {
                    if !num.is_request() {
                        return Err(WireError::UnknownPacket { number: num.into() });
                    }
                    let id = ReqId::dec(s)?;
                    let r = match num {
                        $( SftpNum::[<$req_name:upper>] => {
                            Request::$req_variant(<$req_type>::dec(s)?)
                        } )*
                        _ => return Err(WireError::PacketWrong),
                    };
                    Ok((id, r))
                }
            }

            /// A server response
            #[derive(Debug)]
            pub enum Response<'a> {
                $( $resp_variant($resp_type), )*
            }

            impl<'a> Response<'a> {
                pub fn sftp_num(&self) -> SftpNum {
                    match self {
                        $( Response::$resp_variant(_) => SftpNum::[<$resp_name:upper>], )*
                    }
                }

                /// Encodes the type, request id and body.
                /// Does not include the length field.
                pub fn encode<S: SSHSink>(&self, id: ReqId, s: &mut S) -> WireResult<()> {
                    u8::from(self.sftp_num()).enc(s)?;
                    id.enc(s)?;
                    match self {
                        $( Response::$resp_variant(p) => p.enc(s), )*
                    }
                }

                /// Decodes the body of a response, after the request id
                pub fn decode<S>(num: SftpNum, s: &mut S) -> WireResult<Self>
                where
                    S: SSHSource<'a>,
                {
                    let r = match num {
                        $( SftpNum::[<$resp_name:upper>] => {
                            Response::$resp_variant(<$resp_type>::dec(s)?)
                        } )*
                        _ => return Err(WireError::UnknownPacket { number: num.into() }),
                    };
                    Ok(r)
                }
            }
        } // paste
    };
}

sftpmessages! {
    init: {
        (1, "ssh_fxp_init"),
        (2, "ssh_fxp_version"),
    },

    request: {
        (3, Open, Open<'a>, "ssh_fxp_open"),
        (4, Close, HandleArg<'a>, "ssh_fxp_close"),
        (5, Read, Read<'a>, "ssh_fxp_read"),
        (6, Write, Write<'a>, "ssh_fxp_write"),
        (7, Lstat, PathArg<'a>, "ssh_fxp_lstat"),
        (8, Fstat, HandleArg<'a>, "ssh_fxp_fstat"),
        (9, SetStat, PathAttrs<'a>, "ssh_fxp_setstat"),
        (10, FSetStat, HandleAttrs<'a>, "ssh_fxp_fsetstat"),
        (11, OpenDir, PathArg<'a>, "ssh_fxp_opendir"),
        (12, ReadDir, HandleArg<'a>, "ssh_fxp_readdir"),
        (13, Remove, PathArg<'a>, "ssh_fxp_remove"),
        (14, Mkdir, PathAttrs<'a>, "ssh_fxp_mkdir"),
        (15, Rmdir, PathArg<'a>, "ssh_fxp_rmdir"),
        (16, RealPath, PathArg<'a>, "ssh_fxp_realpath"),
        (17, Stat, PathArg<'a>, "ssh_fxp_stat"),
        (18, Rename, TwoPaths<'a>, "ssh_fxp_rename"),
        (19, ReadLink, PathArg<'a>, "ssh_fxp_readlink"),
        (20, Symlink, Symlink<'a>, "ssh_fxp_symlink"),
        (200, Extended, Extended<'a>, "ssh_fxp_extended"),
    },

    response: {
        (101, Status, Status<'a>, "ssh_fxp_status"),
        (102, Handle, HandleArg<'a>, "ssh_fxp_handle"),
        (103, Data, Data<'a>, "ssh_fxp_data"),
        (104, Name, Name<'a>, "ssh_fxp_name"),
        (105, Attrs, AttrsReply, "ssh_fxp_attrs"),
        (201, ExtendedReply, ExtendedReply<'a>, "ssh_fxp_extended_reply"),
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;
    use crate::sshwire::{read_ssh, write_ssh_vec, DecodeBytes};

    #[test]
    fn numbers() {
        assert_eq!(u8::from(SftpNum::SSH_FXP_EXTENDED), 200);
        assert_eq!(SftpNum::from(104u8), SftpNum::SSH_FXP_NAME);
        assert_eq!(SftpNum::from(99u8), SftpNum::Other(99));
        assert!(SftpNum::SSH_FXP_SYMLINK.is_request());
        assert!(!SftpNum::SSH_FXP_INIT.is_request());
        assert!(SftpNum::SSH_FXP_VERSION.is_init());
        assert!(SftpNum::SSH_FXP_EXTENDED_REPLY.is_response());
        assert_eq!(StatusCode::from(8u32), StatusCode::SSH_FX_OP_UNSUPPORTED);
        assert_eq!(u32::from(StatusCode::from(77u32)), 77);
    }

    #[test]
    fn open_request_bytes() {
        init_test_log();
        let r = Request::Open(Open {
            filename: "/f".into(),
            pflags: 1,
            attrs: Attrs::default(),
        });
        let mut v = vec![];
        r.encode(ReqId(7), &mut v).unwrap();
        assert_eq!(
            v,
            [3, 0, 0, 0, 7, 0, 0, 0, 2, b'/', b'f', 0, 0, 0, 1, 0, 0, 0, 0]
        );

        let mut s = DecodeBytes::new(&v[1..]);
        let (id, r2) = Request::decode(SftpNum::from(v[0]), &mut s).unwrap();
        assert_eq!(id, ReqId(7));
        match r2 {
            Request::Open(o) => {
                assert_eq!(o.filename.as_str().unwrap(), "/f");
                assert_eq!(o.pflags, 1);
            }
            _ => panic!("wrong request {r2:?}"),
        }
    }

    #[test]
    fn status_optional_fields() {
        // code only, as sent by some servers
        let b = [0, 0, 0, 4];
        let st: Status = read_ssh(&b).unwrap();
        assert_eq!(st.code, StatusCode::SSH_FX_FAILURE);
        assert!(st.message.0.is_empty());

        // message but no language tag
        let b = [0, 0, 0, 2, 0, 0, 0, 2, b'n', b'o'];
        let st: Status = read_ssh(&b).unwrap();
        assert_eq!(st.message.as_str().unwrap(), "no");
        assert!(st.lang.0.is_empty());

        // full
        let mut v = vec![];
        let full = Status {
            code: StatusCode::SSH_FX_EOF,
            message: "done".into(),
            lang: "en".into(),
        };
        write_ssh_vec(&mut v, &full).unwrap();
        let st: Status = read_ssh(&v).unwrap();
        assert_eq!(st.lang.as_str().unwrap(), "en");
        assert_eq!(st.code, StatusCode::SSH_FX_EOF);

        // dangling language length, tolerated
        let b = [0, 0, 0, 2, 0, 0, 0, 2, b'n', b'o', 0, 0, 0, 7];
        let st: Status = read_ssh(&b).unwrap();
        assert_eq!(st.message.as_str().unwrap(), "no");
        assert!(st.lang.0.is_empty());

        // a message length that runs past the end is truncation
        let b = [0, 0, 0, 2, 0, 0, 0, 9, b'n'];
        assert!(read_ssh::<Status>(&b).is_err());
    }

    #[test]
    fn version_extensions() {
        let info = VersionInfo {
            version: 3,
            extensions: vec![
                ExtPair { name: "statvfs@openssh.com".into(), data: "2".into() },
                ExtPair { name: "fsync@openssh.com".into(), data: "1".into() },
            ],
        };
        let mut v = vec![];
        write_ssh_vec(&mut v, &info).unwrap();
        let back: VersionInfo = read_ssh(&v).unwrap();
        assert_eq!(back.version, 3);
        assert_eq!(back.extensions.len(), 2);
        assert_eq!(back.extensions[1].data.as_str().unwrap(), "1");

        // a dangling extension name is truncation
        assert!(read_ssh::<VersionInfo>(&v[..v.len() - 2]).is_err());
    }

    #[test]
    fn unknown_response() {
        let b = [0u8; 8];
        let mut s = DecodeBytes::new(&b);
        assert!(matches!(
            Response::decode(SftpNum::SSH_FXP_OPEN, &mut s),
            Err(WireError::UnknownPacket { number: 3 })
        ));
    }
}
