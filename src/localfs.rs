//! Local files as a transfer [`Endpoint`].
//!
//! Calls block the executor, which is acceptable for the file sizes
//! and thread models this is used with.

use std::fs::{self, File, OpenOptions, Permissions};
use std::os::unix::fs::{FileExt, PermissionsExt};

use crate::attrs::Attrs;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::flags::OpenFlags;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    /// `OpenOptions` for SFTP open flags. `EXCL` takes precedence
    /// over `CREAT` and `TRUNC`.
    pub fn open_options(flags: OpenFlags) -> OpenOptions {
        let mut o = OpenOptions::new();
        o.read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .append(flags.contains(OpenFlags::APPEND));
        if flags.contains(OpenFlags::EXCL) {
            o.create_new(true);
        } else {
            o.create(flags.contains(OpenFlags::CREAT))
                .truncate(flags.contains(OpenFlags::TRUNC));
        }
        o
    }
}

impl Endpoint for LocalFs {
    type Handle = File;

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<File> {
        Ok(Self::open_options(flags).open(path)?)
    }

    async fn close(&self, handle: File) -> Result<()> {
        drop(handle);
        Ok(())
    }

    async fn read(&self, handle: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(handle.read_at(buf, offset)?)
    }

    async fn write(&self, handle: &File, offset: u64, data: &[u8]) -> Result<()> {
        Ok(handle.write_all_at(data, offset)?)
    }

    async fn fstat(&self, handle: &File) -> Result<Attrs> {
        Ok((&handle.metadata()?).into())
    }

    async fn stat(&self, path: &str) -> Result<Attrs> {
        Ok((&fs::metadata(path)?).into())
    }

    async fn fchmod(&self, handle: &File, mode: u32) -> Result<()> {
        Ok(handle.set_permissions(Permissions::from_mode(mode))?)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        Ok(fs::set_permissions(path, Permissions::from_mode(mode))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_at() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        let p = p.to_str().unwrap();
        let fs = LocalFs;

        let h = fs.open(p, OpenFlags::from_mode("w+").unwrap()).await.unwrap();
        fs.write(&h, 4, b"tail").await.unwrap();
        fs.write(&h, 0, b"head").await.unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read(&h, 2, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"adtail");
        assert_eq!(fs.read(&h, 8, &mut buf).await.unwrap(), 0);
        assert_eq!(fs.fstat(&h).await.unwrap().size, Some(8));
        fs.close(h).await.unwrap();

        let e = fs.open(p, OpenFlags::from_mode("wx").unwrap()).await.unwrap_err();
        assert_eq!(e.to_status(), crate::proto::StatusCode::SSH_FX_FAILURE);
        let e = fs.stat("/nonexistent/path").await.unwrap_err();
        assert_eq!(e.to_status(), crate::proto::StatusCode::SSH_FX_NO_SUCH_FILE);
    }

    #[test]
    fn open_flag_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("g");

        // "r" doesn't create
        let r = OpenFlags::from_mode("r").unwrap();
        assert!(LocalFs::open_options(r).open(&p).is_err());

        let a = OpenFlags::from_mode("a").unwrap();
        LocalFs::open_options(a).open(&p).unwrap().write_all_at(b"one", 0).unwrap();
        // "w" truncates, "wx" refuses an existing file
        let w = OpenFlags::from_mode("w").unwrap();
        LocalFs::open_options(w).open(&p).unwrap();
        assert_eq!(fs::metadata(&p).unwrap().len(), 0);
        let wx = OpenFlags::from_mode("wx").unwrap();
        assert!(LocalFs::open_options(wx).open(&p).is_err());
    }
}
