//! File attributes, the flag-prefixed ATTRS structure.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use crate::sshwire::{BinString, SSHDecode, SSHEncode, SSHSink, SSHSource, WireResult};

// File type bits of `permissions`, as st_mode
const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy)]
pub enum AttrsFlags {
    SSH_FILEXFER_ATTR_SIZE = 0x01,
    SSH_FILEXFER_ATTR_UIDGID = 0x02,
    SSH_FILEXFER_ATTR_PERMISSIONS = 0x04,
    SSH_FILEXFER_ATTR_ACMODTIME = 0x08,
    SSH_FILEXFER_ATTR_EXTENDED = 0x80000000,
}

impl core::ops::BitOrAssign<AttrsFlags> for u32 {
    fn bitor_assign(&mut self, other: AttrsFlags) {
        *self |= other as u32;
    }
}

impl core::ops::BitAnd<AttrsFlags> for u32 {
    type Output = bool;

    fn bitand(self, rhs: AttrsFlags) -> bool {
        self & rhs as u32 != 0
    }
}

/// A vendor specific attribute, kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedAttr {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

/// File attributes. Absent fields are omitted from the wire form.
///
/// `uid`/`gid` and `atime`/`mtime` travel as pairs, each pair is only
/// encoded when both halves are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<ExtendedAttr>,
}

impl Attrs {
    pub fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrsFlags::SSH_FILEXFER_ATTR_SIZE
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrsFlags::SSH_FILEXFER_ATTR_UIDGID
        }
        if self.permissions.is_some() {
            flags |= AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME
        }
        if !self.extended.is_empty() {
            flags |= AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED
        }
        flags
    }

    /// Same as `permissions`
    pub fn mode(&self) -> Option<u32> {
        self.permissions
    }

    pub fn with_mode(mode: u32) -> Self {
        Self { permissions: Some(mode), ..Default::default() }
    }

    pub fn with_times(atime: u32, mtime: u32) -> Self {
        Self { atime: Some(atime), mtime: Some(mtime), ..Default::default() }
    }

    pub fn with_owner(uid: u32, gid: u32) -> Self {
        Self { uid: Some(uid), gid: Some(gid), ..Default::default() }
    }

    fn file_type(&self) -> Option<u32> {
        self.permissions.map(|p| p & S_IFMT)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(S_IFDIR)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(S_IFREG)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type() == Some(S_IFBLK)
    }

    pub fn is_char_device(&self) -> bool {
        self.file_type() == Some(S_IFCHR)
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == Some(S_IFIFO)
    }

    pub fn is_socket(&self) -> bool {
        self.file_type() == Some(S_IFSOCK)
    }
}

#[cfg(unix)]
impl From<&std::fs::Metadata> for Attrs {
    fn from(m: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Attrs {
            size: Some(m.size()),
            uid: Some(m.uid()),
            gid: Some(m.gid()),
            permissions: Some(m.mode()),
            // SFTP v3 times are 32 bit
            atime: Some(m.atime() as u32),
            mtime: Some(m.mtime() as u32),
            extended: Vec::new(),
        }
    }
}

impl SSHEncode for Attrs {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let flags = self.flags();
        flags.enc(s)?;

        // Order matters, the decoder reads fields according to the flags
        if let Some(size) = self.size {
            size.enc(s)?;
        }
        if let (true, Some(uid), Some(gid)) =
            (flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID, self.uid, self.gid)
        {
            uid.enc(s)?;
            gid.enc(s)?;
        }
        if let Some(perm) = self.permissions {
            perm.enc(s)?;
        }
        if let (true, Some(atime), Some(mtime)) =
            (flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME, self.atime, self.mtime)
        {
            atime.enc(s)?;
            mtime.enc(s)?;
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED {
            (self.extended.len() as u32).enc(s)?;
            for e in self.extended.iter() {
                BinString(&e.name).enc(s)?;
                BinString(&e.data).enc(s)?;
            }
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for Attrs {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let mut attrs = Attrs::default();
        let flags = u32::dec(s)?;
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_SIZE {
            attrs.size = Some(u64::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_UIDGID {
            attrs.uid = Some(u32::dec(s)?);
            attrs.gid = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_PERMISSIONS {
            attrs.permissions = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_ACMODTIME {
            attrs.atime = Some(u32::dec(s)?);
            attrs.mtime = Some(u32::dec(s)?);
        }
        if flags & AttrsFlags::SSH_FILEXFER_ATTR_EXTENDED {
            let count = u32::dec(s)?;
            for _ in 0..count {
                // contents are opaque, only lengths are checked
                let name = BinString::dec(s)?;
                let data = BinString::dec(s)?;
                attrs.extended.push(ExtendedAttr {
                    name: name.0.to_vec(),
                    data: data.0.to_vec(),
                });
            }
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;
    use crate::sshwire::*;

    fn roundtrip(a: &Attrs) -> Attrs {
        let mut v = vec![];
        let l = write_ssh_vec(&mut v, a).unwrap();
        assert_eq!(l as u32, length_enc(a).unwrap());
        let mut s = DecodeBytes::new(&v);
        let b = Attrs::dec(&mut s).unwrap();
        assert_eq!(s.remaining(), 0, "decode consumed whole encoding");
        b
    }

    #[test]
    fn absent_fields_stay_absent() {
        init_test_log();
        let a = Attrs::default();
        let mut v = vec![];
        write_ssh_vec(&mut v, &a).unwrap();
        assert_eq!(v, [0, 0, 0, 0]);
        assert_eq!(roundtrip(&a), a);

        let a = Attrs { size: Some(1 << 40), ..Default::default() };
        assert_eq!(roundtrip(&a), a);

        let a = Attrs::with_mode(0o100644);
        assert_eq!(roundtrip(&a), a);
        assert!(roundtrip(&a).is_file());
    }

    #[test]
    fn all_fields() {
        let a = Attrs {
            size: Some(u64::MAX - 3),
            uid: Some(1000),
            gid: Some(100),
            permissions: Some(0o040755),
            atime: Some(1_700_000_000),
            mtime: Some(1_700_000_001),
            extended: vec![ExtendedAttr { name: b"x@y".to_vec(), data: vec![1, 2] }],
        };
        let b = roundtrip(&a);
        assert_eq!(b, a);
        assert!(b.is_dir());
        assert_eq!(b.mode(), a.permissions);
    }

    #[test]
    fn fixed_order_and_length() {
        let a = Attrs {
            size: Some(0x0102),
            permissions: Some(0o644),
            atime: Some(7),
            mtime: Some(8),
            ..Default::default()
        };
        let mut v = vec![];
        write_ssh_vec(&mut v, &a).unwrap();
        let perm = 0o644u32.to_be_bytes();
        assert_eq!(v, [
            0, 0, 0, 0x0d,
            0, 0, 0, 0, 0, 0, 1, 2,
            perm[0], perm[1], perm[2], perm[3],
            0, 0, 0, 7,
            0, 0, 0, 8,
        ]);
    }

    #[test]
    fn half_pair_not_encoded() {
        let a = Attrs { uid: Some(5), atime: Some(3), ..Default::default() };
        assert_eq!(a.flags(), 0);
        assert_eq!(roundtrip(&a), Attrs::default());
    }

    #[test]
    fn extended_pairs_skipped_by_length() {
        // flags EXTENDED|SIZE, size, 2 pairs, then a trailing marker byte
        let mut v = vec![];
        write_ssh_vec(&mut v, &0x80000001u32).unwrap();
        write_ssh_vec(&mut v, &9u64).unwrap();
        write_ssh_vec(&mut v, &2u32).unwrap();
        for (n, d) in [("a@b", &b"\x00\xff"[..]), ("c@d", &b""[..])] {
            write_ssh_vec(&mut v, &TextString::from(n)).unwrap();
            write_ssh_vec(&mut v, &BinString(d)).unwrap();
        }
        v.push(0xaa);

        let mut s = DecodeBytes::new(&v);
        let a = Attrs::dec(&mut s).unwrap();
        assert_eq!(a.size, Some(9));
        assert_eq!(a.extended.len(), 2);
        assert_eq!(a.extended[0].data, [0, 0xff]);
        assert_eq!(s.remaining(), 1);
    }

    #[test]
    fn truncated_attrs() {
        // claims SIZE but has 4 bytes of it
        let v = [0, 0, 0, 1, 0, 0, 0, 0];
        let mut s = DecodeBytes::new(&v);
        assert_eq!(Attrs::dec(&mut s).unwrap_err(), WireError::RanOut);
    }
}
