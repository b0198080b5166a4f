//! File access common to local files and an SFTP server, so that
//! [`transfer()`](crate::xfer::transfer) can copy in either direction.

use crate::attrs::Attrs;
use crate::error::Result;
use crate::flags::OpenFlags;
use crate::sftpclient::{OwnedHandle, SftpClient};

pub trait Endpoint {
    type Handle;

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Self::Handle>;

    async fn close(&self, handle: Self::Handle) -> Result<()>;

    /// Reads into `buf` at `offset`. May read less than `buf.len()`,
    /// returns 0 at end of file.
    async fn read(&self, handle: &Self::Handle, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `data` at `offset`
    async fn write(&self, handle: &Self::Handle, offset: u64, data: &[u8]) -> Result<()>;

    async fn fstat(&self, handle: &Self::Handle) -> Result<Attrs>;

    async fn stat(&self, path: &str) -> Result<Attrs>;

    async fn fchmod(&self, handle: &Self::Handle, mode: u32) -> Result<()>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;
}

impl Endpoint for SftpClient {
    type Handle = OwnedHandle;

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<OwnedHandle> {
        self.open_with(path, flags, &Attrs::default()).await
    }

    async fn close(&self, handle: OwnedHandle) -> Result<()> {
        SftpClient::close(self, &handle).await
    }

    async fn read(&self, handle: &OwnedHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.read_data(handle, buf, offset).await
    }

    async fn write(&self, handle: &OwnedHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.write_data(handle, data, offset).await.map(|_| ())
    }

    async fn fstat(&self, handle: &OwnedHandle) -> Result<Attrs> {
        SftpClient::fstat(self, handle).await
    }

    async fn stat(&self, path: &str) -> Result<Attrs> {
        SftpClient::stat(self, path).await
    }

    async fn fchmod(&self, handle: &OwnedHandle, mode: u32) -> Result<()> {
        SftpClient::fchmod(self, handle, mode).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        SftpClient::chmod(self, path, mode).await
    }
}
