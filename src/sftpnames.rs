//! Named SFTP extensions, and the versions of them this crate speaks.
//!
//! The extensions are described in OpenSSH's
//! [PROTOCOL](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL?annotate=HEAD)
//! file, section 4.

/// RENAME with POSIX semantics, replacing an existing target
pub const SFTP_EXT_POSIX_RENAME: &str = "posix-rename@openssh.com";
pub const SFTP_EXT_POSIX_RENAME_VER: &str = "1";

/// Filesystem statistics for a path
pub const SFTP_EXT_STATVFS: &str = "statvfs@openssh.com";
pub const SFTP_EXT_STATVFS_VER: &str = "2";

/// Filesystem statistics for an open handle
pub const SFTP_EXT_FSTATVFS: &str = "fstatvfs@openssh.com";
pub const SFTP_EXT_FSTATVFS_VER: &str = "2";

pub const SFTP_EXT_HARDLINK: &str = "hardlink@openssh.com";
pub const SFTP_EXT_HARDLINK_VER: &str = "1";

pub const SFTP_EXT_FSYNC: &str = "fsync@openssh.com";
pub const SFTP_EXT_FSYNC_VER: &str = "1";
