//! Async SFTP client.
//!
//! [`SftpClient::run()`] pumps the transport. Operations may be called
//! concurrently from other futures, each waits for its own reply.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::future::{poll_fn, Future};
use core::task::{Context, Poll};

use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
#[allow(unused_imports)]
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::{MultiWakerRegistration, WakerRegistration};
use embedded_io_async::{ErrorType, Read, Seek, SeekFrom, Write};
use futures::channel::oneshot;
use pin_utils::pin_mut;

use crate::attrs::Attrs;
use crate::client::{ClientSession, DirEntry, Expect, Reply};
use crate::config::SessionConfig;
use crate::error::{Error, Result, TrapBug};
use crate::extensions::Extensions;
use crate::flags::OpenFlags;
use crate::proto::{
    Extended, FileHandle, HandleArg, HandleAttrs, Open, PathArg, PathAttrs, Read as ReadReq,
    Request, StatVfs, StatusCode, Symlink, TwoPaths, Write as WriteReq,
};
use crate::sftpnames::*;
use crate::sshwire::{write_ssh_vec, BinString, Rest, SSHEncode};
#[cfg(unix)]
use crate::{
    localfs::LocalFs,
    xfer::{transfer, TransferOptions},
};

#[cfg(feature = "multi-thread")]
pub type SftpRawMutex = CriticalSectionRawMutex;
#[cfg(not(feature = "multi-thread"))]
pub type SftpRawMutex = NoopRawMutex;

pub type SftpMutex<T> = Mutex<SftpRawMutex, T>;

/// Tasks waiting for negotiation or output space. Further waiters
/// cause a spurious wakeup of the existing ones.
const MAX_WAITERS: usize = 16;

/// Transport buffer sizes
const IO_BUF: usize = 8192;

struct Wakers {
    /// The `run()` writer, waiting for output
    output: WakerRegistration,

    /// Requests waiting for VERSION or for output to drain below the
    /// high water mark
    space: MultiWakerRegistration<MAX_WAITERS>,
}

struct Inner {
    sess: ClientSession,
    wakers: Wakers,
}

/// A handle returned by [`SftpClient::open()`] or
/// [`SftpClient::opendir()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedHandle(pub Vec<u8>);

impl OwnedHandle {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn arg(&self) -> FileHandle<'_> {
        FileHandle(BinString(&self.0))
    }
}

pub struct SftpClient {
    inner: SftpMutex<Inner>,
}

impl core::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut d = f.debug_struct("SftpClient");
        if let Ok(i) = self.inner.try_lock() {
            d.field("sess", &i.sess);
        } else {
            d.field("inner", &"(locked)");
        }
        d.finish_non_exhaustive()
    }
}

impl SftpClient {
    /// Creates a client. INIT is sent once `run()` is called.
    pub fn new(config: SessionConfig) -> Self {
        let wakers =
            Wakers { output: WakerRegistration::new(), space: MultiWakerRegistration::new() };
        let inner = Inner { sess: ClientSession::new(config), wakers };
        Self { inner: Mutex::new(inner) }
    }

    /// Runs the session until the transport closes or the session ends.
    ///
    /// Returns the error that ended the session, such as
    /// [`Error::Incompatible`].
    pub async fn run(&self, rsock: &mut impl Read, wsock: &mut impl Write) -> Result<()> {
        // tx finishing (session closed, or write failure) stops rx.
        // rx finishing closes the session, which finishes tx.
        let rx_stop = Signal::<SftpRawMutex, ()>::new();

        let tx = async {
            let mut buf = [0u8; IO_BUF];
            let r = loop {
                let l = self.output(&mut buf).await;
                if l == 0 {
                    break Ok(());
                }
                let w = async {
                    wsock.write_all(&buf[..l]).await?;
                    wsock.flush().await
                };
                if w.await.is_err() {
                    info!("socket write error");
                    self.with_session(|s| s.close_input()).await;
                    break Err(Error::SessionClosed);
                }
            };
            trace!("tx complete {r:?}");
            rx_stop.signal(());
            r
        };

        let rx = async {
            let mut buf = [0u8; IO_BUF];
            let r = loop {
                let l = match rsock.read(&mut buf).await {
                    Ok(0) => {
                        debug!("transport EOF");
                        self.with_session(|s| s.close_input()).await;
                        break Ok(());
                    }
                    Ok(l) => l,
                    Err(_) => {
                        info!("socket read error");
                        self.with_session(|s| s.close_input()).await;
                        break Err(Error::SessionClosed);
                    }
                };
                if let Err(e) = self.input(&buf[..l]).await {
                    break Err(e);
                }
            };
            trace!("rx complete {r:?}");
            r
        };
        let rx = async {
            match select(rx, rx_stop.wait()).await {
                Either::First(r) => r,
                Either::Second(()) => Ok(()),
            }
        };

        let (rrx, rtx) = join(rx, tx).await;
        rrx.and(rtx)
    }

    /// helper to perform a function on the `inner`, returning a `Poll` value
    async fn poll_inner<F, T>(&self, mut f: F) -> T
    where
        F: FnMut(&mut Inner, &mut Context) -> Poll<T>,
    {
        poll_fn(|cx| {
            // Attempt to lock .inner
            let i = self.inner.lock();
            pin_mut!(i);
            match i.poll(cx) {
                Poll::Ready(mut inner) => f(&mut inner, cx),
                Poll::Pending => {
                    // .inner lock is busy
                    Poll::Pending
                }
            }
        })
        .await
    }

    async fn with_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ClientSession) -> R,
    {
        let mut inner = self.inner.lock().await;
        let r = f(&mut inner.sess);
        inner.wakers.output.wake();
        inner.wakers.space.wake();
        r
    }

    async fn input(&self, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let r = inner.sess.input(buf);
        // readiness or closed state may have changed
        inner.wakers.space.wake();
        inner.wakers.output.wake();
        r
    }

    /// Returns 0 once the session is closed and output is drained
    async fn output(&self, buf: &mut [u8]) -> usize {
        self.poll_inner(|inner, cx| {
            let l = inner.sess.output(buf);
            if l > 0 {
                if !inner.sess.is_paused() {
                    inner.wakers.space.wake();
                }
                Poll::Ready(l)
            } else if inner.sess.is_closed() {
                Poll::Ready(0)
            } else {
                inner.wakers.output.register(cx.waker());
                Poll::Pending
            }
        })
        .await
    }

    /// Waits for version negotiation to complete
    pub async fn ready(&self) -> Result<()> {
        self.poll_inner(|inner, cx| {
            if inner.sess.is_ready() {
                Poll::Ready(Ok(()))
            } else if inner.sess.is_closed() {
                Poll::Ready(Err(Error::SessionClosed))
            } else {
                inner.wakers.space.register(cx.waker());
                Poll::Pending
            }
        })
        .await
    }

    /// Ends the session. Outstanding requests fail with
    /// [`Error::SessionEnded`] and `run()` returns.
    pub async fn close_session(&self) {
        self.with_session(|s| s.close()).await
    }

    /// The server's version, once negotiated
    pub async fn server_version(&self) -> Option<u32> {
        self.with_session(|s| s.version()).await
    }

    /// Extensions advertised by the server
    pub async fn extensions(&self) -> Extensions {
        self.with_session(|s| s.extensions().clone()).await
    }

    pub async fn max_data_len(&self) -> usize {
        self.with_session(|s| s.max_data_len()).await
    }

    async fn is_openssh(&self) -> bool {
        self.with_session(|s| s.config().is_openssh()).await
    }

    /// Sends a request and waits for its reply.
    ///
    /// Waits while negotiation is incomplete or output is paused.
    /// `gate` is an extension name and version that must have been
    /// advertised, otherwise nothing is sent.
    async fn request(
        &self,
        req: &Request<'_>,
        expect: Expect,
        gate: Option<(&'static str, &'static str)>,
    ) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.poll_inner(|inner, cx| {
            let s = &mut inner.sess;
            if s.is_closed() {
                return Poll::Ready(Err(Error::SessionClosed));
            }
            if !s.is_ready() || s.is_paused() {
                inner.wakers.space.register(cx.waker());
                return Poll::Pending;
            }
            if let Some((name, ver)) = gate {
                if let Err(e) = s.extensions().check(name, ver) {
                    return Poll::Ready(Err(e));
                }
            }
            let Some(tx) = tx.take() else {
                return Poll::Ready(Err(Error::bug()));
            };
            let r = s.start(req, expect, tx).map(|_| ());
            inner.wakers.output.wake();
            Poll::Ready(r)
        })
        .await?;

        match rx.await {
            Ok(r) => r,
            // dropped at teardown after transport EOF
            Err(oneshot::Canceled) => Err(Error::SessionClosed),
        }
    }

    async fn request_status(&self, req: &Request<'_>) -> Result<()> {
        match self.request(req, Expect::Plain, None).await? {
            Reply::Ok => Ok(()),
            r => Err(unexpected(r)),
        }
    }

    async fn request_handle(&self, req: &Request<'_>) -> Result<OwnedHandle> {
        match self.request(req, Expect::Plain, None).await? {
            Reply::Handle(h) => Ok(OwnedHandle(h)),
            r => Err(unexpected(r)),
        }
    }

    async fn request_attrs(&self, req: &Request<'_>) -> Result<Attrs> {
        match self.request(req, Expect::Plain, None).await? {
            Reply::Attrs(a) => Ok(a),
            r => Err(unexpected(r)),
        }
    }

    async fn request_name(&self, req: &Request<'_>) -> Result<Vec<DirEntry>> {
        match self.request(req, Expect::Plain, None).await? {
            Reply::Name(n) => Ok(n),
            r => Err(unexpected(r)),
        }
    }

    /// Sends an extended request with an encoded payload
    async fn extended<T: SSHEncode>(
        &self,
        name: &'static str,
        version: &'static str,
        payload: &T,
    ) -> Result<Reply> {
        let mut data = vec![];
        write_ssh_vec(&mut data, payload)?;
        let req = Request::Extended(Extended { name: name.into(), data: Rest(&data) });
        self.request(&req, Expect::Extended { name }, Some((name, version))).await
    }

    /// Opens a file with a mode string such as `"r"`, `"w"` or `"a+"`
    pub async fn open(&self, path: &str, mode: &str) -> Result<OwnedHandle> {
        let flags = OpenFlags::from_mode(mode)?;
        self.open_with(path, flags, &Attrs::default()).await
    }

    pub async fn open_with(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> Result<OwnedHandle> {
        let req = Request::Open(Open {
            filename: path.into(),
            pflags: flags.bits(),
            attrs: attrs.clone(),
        });
        self.request_handle(&req).await
    }

    /// Closes a file or directory handle
    pub async fn close(&self, handle: &OwnedHandle) -> Result<()> {
        self.request_status(&Request::Close(HandleArg { handle: handle.arg() })).await
    }

    /// Reads into `buf` from `offset`, returning the length read.
    ///
    /// At most `max_data_len()` is requested. Returns 0 at end of file.
    pub async fn read_data(
        &self,
        handle: &OwnedHandle,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let len = buf.len().min(self.max_data_len().await);
        if len == 0 {
            return Ok(0);
        }
        let req = Request::Read(ReadReq {
            handle: handle.arg(),
            offset,
            len: len as u32,
        });
        match self.request(&req, Expect::Read { capacity: len }, None).await {
            Ok(Reply::Data { data, .. }) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Ok(r) => Err(unexpected(r)),
            Err(e) if e.is_status(StatusCode::SSH_FX_EOF) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Writes all of `data` at `offset`.
    ///
    /// Data longer than `max_data_len()` is sent as successive WRITE
    /// requests, each waiting for the previous to complete.
    pub async fn write_data(
        &self,
        handle: &OwnedHandle,
        data: &[u8],
        offset: u64,
    ) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let max = self.max_data_len().await;
        let mut pos = 0;
        for chunk in data.chunks(max) {
            let req = Request::Write(WriteReq {
                handle: handle.arg(),
                offset: offset + pos as u64,
                data: BinString(chunk),
            });
            self.request_status(&req).await?;
            pos += chunk.len();
        }
        Ok(pos)
    }

    pub async fn fstat(&self, handle: &OwnedHandle) -> Result<Attrs> {
        self.request_attrs(&Request::Fstat(HandleArg { handle: handle.arg() })).await
    }

    /// Follows symlinks
    pub async fn stat(&self, path: &str) -> Result<Attrs> {
        self.request_attrs(&Request::Stat(PathArg { path: path.into() })).await
    }

    /// Doesn't follow symlinks
    pub async fn lstat(&self, path: &str) -> Result<Attrs> {
        self.request_attrs(&Request::Lstat(PathArg { path: path.into() })).await
    }

    pub async fn setstat(&self, path: &str, attrs: &Attrs) -> Result<()> {
        let req = Request::SetStat(PathAttrs { path: path.into(), attrs: attrs.clone() });
        self.request_status(&req).await
    }

    pub async fn fsetstat(&self, handle: &OwnedHandle, attrs: &Attrs) -> Result<()> {
        let req =
            Request::FSetStat(HandleAttrs { handle: handle.arg(), attrs: attrs.clone() });
        self.request_status(&req).await
    }

    pub async fn utimes(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        self.setstat(path, &Attrs::with_times(atime, mtime)).await
    }

    pub async fn futimes(&self, handle: &OwnedHandle, atime: u32, mtime: u32) -> Result<()> {
        self.fsetstat(handle, &Attrs::with_times(atime, mtime)).await
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.setstat(path, &Attrs::with_owner(uid, gid)).await
    }

    pub async fn fchown(&self, handle: &OwnedHandle, uid: u32, gid: u32) -> Result<()> {
        self.fsetstat(handle, &Attrs::with_owner(uid, gid)).await
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.setstat(path, &Attrs::with_mode(mode)).await
    }

    pub async fn fchmod(&self, handle: &OwnedHandle, mode: u32) -> Result<()> {
        self.fsetstat(handle, &Attrs::with_mode(mode)).await
    }

    pub async fn opendir(&self, path: &str) -> Result<OwnedHandle> {
        self.request_handle(&Request::OpenDir(PathArg { path: path.into() })).await
    }

    /// Reads the next batch of directory entries, `None` at the end.
    ///
    /// `.` and `..` are omitted unless `full` is set.
    pub async fn readdir(
        &self,
        handle: &OwnedHandle,
        full: bool,
    ) -> Result<Option<Vec<DirEntry>>> {
        let req = Request::ReadDir(HandleArg { handle: handle.arg() });
        match self.request_name(&req).await {
            Ok(mut names) => {
                if !full {
                    names.retain(|n| n.filename != "." && n.filename != "..");
                }
                Ok(Some(names))
            }
            Err(e) if e.is_status(StatusCode::SSH_FX_EOF) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists a whole directory, without `.` and `..`
    pub async fn read_dir_all(&self, path: &str) -> Result<Vec<DirEntry>> {
        let h = self.opendir(path).await?;
        let mut all = vec![];
        let r = loop {
            match self.readdir(&h, false).await {
                Ok(Some(names)) => all.extend(names),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let c = self.close(&h).await;
        r?;
        c?;
        Ok(all)
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.request_status(&Request::Remove(PathArg { path: path.into() })).await
    }

    /// Same as [`remove()`](Self::remove)
    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.remove(path).await
    }

    pub async fn mkdir(&self, path: &str, attrs: &Attrs) -> Result<()> {
        let req = Request::Mkdir(PathAttrs { path: path.into(), attrs: attrs.clone() });
        self.request_status(&req).await
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.request_status(&Request::Rmdir(PathArg { path: path.into() })).await
    }

    /// Canonicalises a path on the server
    pub async fn realpath(&self, path: &str) -> Result<String> {
        let names = self.request_name(&Request::RealPath(PathArg { path: path.into() })).await?;
        names
            .into_iter()
            .next()
            .map(|n| n.filename)
            .ok_or(Error::msg("Response missing path info"))
    }

    pub async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let req = Request::Rename(TwoPaths { oldpath: oldpath.into(), newpath: newpath.into() });
        self.request_status(&req).await
    }

    pub async fn readlink(&self, path: &str) -> Result<String> {
        let names = self.request_name(&Request::ReadLink(PathArg { path: path.into() })).await?;
        names
            .into_iter()
            .next()
            .map(|n| n.filename)
            .ok_or(Error::msg("Response missing link info"))
    }

    /// Creates a symlink at `linkpath` pointing to `targetpath`
    pub async fn symlink(&self, targetpath: &str, linkpath: &str) -> Result<()> {
        let mut sl = Symlink { linkpath: linkpath.into(), targetpath: targetpath.into() };
        if self.is_openssh().await {
            sl = sl.swapped();
        }
        self.request_status(&Request::Symlink(sl)).await
    }

    /// Rename, replacing an existing `newpath`
    pub async fn ext_posix_rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let p = TwoPaths { oldpath: oldpath.into(), newpath: newpath.into() };
        match self.extended(SFTP_EXT_POSIX_RENAME, SFTP_EXT_POSIX_RENAME_VER, &p).await? {
            Reply::Ok => Ok(()),
            r => Err(unexpected(r)),
        }
    }

    pub async fn ext_statvfs(&self, path: &str) -> Result<StatVfs> {
        let p = PathArg { path: path.into() };
        match self.extended(SFTP_EXT_STATVFS, SFTP_EXT_STATVFS_VER, &p).await? {
            Reply::StatVfs(s) => Ok(s),
            r => Err(unexpected(r)),
        }
    }

    pub async fn ext_fstatvfs(&self, handle: &OwnedHandle) -> Result<StatVfs> {
        let p = HandleArg { handle: handle.arg() };
        match self.extended(SFTP_EXT_FSTATVFS, SFTP_EXT_FSTATVFS_VER, &p).await? {
            Reply::StatVfs(s) => Ok(s),
            r => Err(unexpected(r)),
        }
    }

    pub async fn ext_hardlink(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let p = TwoPaths { oldpath: oldpath.into(), newpath: newpath.into() };
        match self.extended(SFTP_EXT_HARDLINK, SFTP_EXT_HARDLINK_VER, &p).await? {
            Reply::Ok => Ok(()),
            r => Err(unexpected(r)),
        }
    }

    pub async fn ext_fsync(&self, handle: &OwnedHandle) -> Result<()> {
        let p = HandleArg { handle: handle.arg() };
        match self.extended(SFTP_EXT_FSYNC, SFTP_EXT_FSYNC_VER, &p).await? {
            Reply::Ok => Ok(()),
            r => Err(unexpected(r)),
        }
    }

    /// Whether `path` can be stat()ed. A STATUS error counts as missing.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.code().is_some() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// fstat, falling back to stat for servers without fstat.
    /// The fstat error is returned if both fail.
    pub(crate) async fn fstat_or_stat(&self, handle: &OwnedHandle, path: &str) -> Result<Attrs> {
        match self.fstat(handle).await {
            Ok(a) => Ok(a),
            Err(e) => {
                debug!("fstat failed ({e}), trying stat");
                self.stat(path).await.map_err(|_| e)
            }
        }
    }

    /// Reads a whole file
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let h = self.open(path, "r").await?;
        let r = self.read_all(&h, path).await;
        let c = self.close(&h).await;
        let data = r?;
        c?;
        Ok(data)
    }

    async fn read_all(&self, h: &OwnedHandle, path: &str) -> Result<Vec<u8>> {
        let size = self.fstat_or_stat(h, path).await?.size.unwrap_or(0);
        let mut data = Vec::with_capacity(size.min(1 << 24) as usize);
        let mut buf = vec![0u8; self.max_data_len().await];
        loop {
            let n = self.read_data(h, &mut buf, data.len() as u64).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        Ok(data)
    }

    /// Creates or truncates `path` with `data`
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let h = self.open(path, "w").await?;
        let r = self.write_data(&h, data, 0).await;
        let c = self.close(&h).await;
        r?;
        c
    }

    /// Appends `data` to `path`, creating it if needed
    pub async fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let h = self.open(path, "a").await?;
        let r = async {
            let size = self.fstat_or_stat(&h, path).await?.size.unwrap_or(0);
            self.write_data(&h, data, size).await
        }
        .await;
        let c = self.close(&h).await;
        r?;
        c
    }

    /// Opens `path` as a [`RemoteFile`] positioned by `opts`.
    ///
    /// Files opened for writing are given `opts.mode`, with a chmod
    /// fallback whose failure is ignored. Append modes start at the
    /// current end of the file, since SFTP writes take absolute offsets.
    pub async fn open_file(&self, path: &str, opts: FileOptions<'_>) -> Result<RemoteFile<'_>> {
        if let (Some(start), Some(end)) = (opts.start, opts.end) {
            if start > end {
                return Err(Error::BadUsage { msg: "start must be <= end" });
            }
        }
        let flags = OpenFlags::from_mode(opts.flags)?;
        let h = self.open_with(path, flags, &Attrs::with_mode(opts.mode)).await?;

        if flags.contains(OpenFlags::WRITE) {
            if let Err(e) = self.fchmod(&h, opts.mode).await {
                debug!("fchmod failed ({e}), trying chmod");
                let _ = self.chmod(path, opts.mode).await;
            }
        }

        let mut pos = opts.start.unwrap_or(0);
        if flags.contains(OpenFlags::APPEND) {
            match self.fstat_or_stat(&h, path).await {
                Ok(a) => pos = a.size.unwrap_or(0),
                Err(e) => {
                    let _ = self.close(&h).await;
                    return Err(e);
                }
            }
        }

        Ok(RemoteFile { client: self, handle: Some(h), path: path.into(), pos, end: opts.end })
    }

    /// Downloads `remote_path` to `local_path` with concurrent reads
    #[cfg(unix)]
    pub async fn fast_get(
        &self,
        remote_path: &str,
        local_path: &str,
        opts: TransferOptions<'_>,
    ) -> Result<u64> {
        transfer(self, &LocalFs, remote_path, local_path, opts).await
    }

    /// Uploads `local_path` to `remote_path` with concurrent writes
    #[cfg(unix)]
    pub async fn fast_put(
        &self,
        local_path: &str,
        remote_path: &str,
        opts: TransferOptions<'_>,
    ) -> Result<u64> {
        transfer(&LocalFs, self, local_path, remote_path, opts).await
    }
}

/// Options for [`SftpClient::open_file()`]
#[derive(Debug, Clone)]
pub struct FileOptions<'a> {
    /// Mode string as for [`SftpClient::open()`]
    pub flags: &'a str,
    /// Permissions for a created file, also applied when writing
    pub mode: u32,
    /// Initial offset
    pub start: Option<u64>,
    /// Last offset to read, inclusive
    pub end: Option<u64>,
}

impl FileOptions<'_> {
    pub fn read() -> Self {
        Self { flags: "r", mode: 0o666, start: None, end: None }
    }

    pub fn write() -> Self {
        Self { flags: "w", ..Self::read() }
    }
}

impl Default for FileOptions<'_> {
    fn default() -> Self {
        Self::read()
    }
}

/// An open remote file with its own offset, from [`SftpClient::open_file()`].
///
/// Each `read()` or `write()` is a request round trip. Use
/// [`close()`](Self::close) when done, a dropped `RemoteFile` leaves
/// its handle open on the server.
pub struct RemoteFile<'c> {
    client: &'c SftpClient,
    handle: Option<OwnedHandle>,
    path: String,
    pos: u64,
    end: Option<u64>,
}

impl RemoteFile<'_> {
    /// Offset of the next read or write
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handle(&self) -> Result<&OwnedHandle> {
        self.handle.as_ref().trap()
    }

    pub async fn close(mut self) -> Result<()> {
        let h = self.handle.take().trap()?;
        self.client.close(&h).await
    }
}

impl core::fmt::Debug for RemoteFile<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl Drop for RemoteFile<'_> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("{} dropped without close(), handle left open", self.path);
        }
    }
}

impl ErrorType for RemoteFile<'_> {
    type Error = Error;
}

impl Read for RemoteFile<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut len = buf.len();
        if let Some(end) = self.end {
            if self.pos > end {
                return Ok(0);
            }
            len = len.min(usize::try_from(end - self.pos + 1).unwrap_or(usize::MAX));
        }
        let h = self.handle.as_ref().trap()?;
        let n = self.client.read_data(h, &mut buf[..len], self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for RemoteFile<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let h = self.handle.as_ref().trap()?;
        let n = self.client.write_data(h, buf, self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    // each write has already waited for its STATUS
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Seek for RemoteFile<'_> {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(p) => (p, 0),
            SeekFrom::Current(d) => (self.pos, d),
            SeekFrom::End(d) => {
                let h = self.handle.as_ref().trap()?;
                let a = self.client.fstat_or_stat(h, &self.path).await?;
                (a.size.ok_or(Error::msg("File size unknown"))?, d)
            }
        };
        self.pos = base
            .checked_add_signed(delta)
            .ok_or(Error::BadUsage { msg: "seek before start of file" })?;
        Ok(self.pos)
    }
}

fn unexpected(r: Reply) -> Error {
    warn!("Unexpected response {r:?}");
    Error::PacketWrong
}
