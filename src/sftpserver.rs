//! Serving SFTP requests from an application filesystem.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use embedded_io_async::{Read, Write};

use crate::attrs::Attrs;
use crate::client::DirEntry;
use crate::config::{SessionConfig, MAX_HANDLE_LEN};
use crate::error::{Error, Result};
use crate::flags::OpenFlags;
use crate::proto::{ReqId, Request, StatusCode};
use crate::server::{RequestPacket, ServerSession};

pub type SftpOpResult<T> = core::result::Result<T, StatusCode>;

/// All trait functions are optional in the SFTP protocol.
/// Provided implementations return `SSH_FX_OP_UNSUPPORTED`.
///
/// Handles are opaque bytes chosen by the implementation, at most
/// 256 bytes long. Paths are passed as received, non-UTF-8 sequences
/// are replaced.
pub trait SftpServer {
    /// Opens a file, returning a handle
    async fn open(
        &mut self,
        filename: &str,
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> SftpOpResult<Vec<u8>> {
        let _ = (filename, flags, attrs);
        log::error!("SftpServer Open operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    /// Close either a file or directory handle
    async fn close(&mut self, handle: &[u8]) -> SftpOpResult<()> {
        let _ = handle;
        log::error!("SftpServer Close operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    /// Reads up to `len` bytes. Return `SSH_FX_EOF` at end of file.
    async fn read(&mut self, handle: &[u8], offset: u64, len: u32) -> SftpOpResult<Vec<u8>> {
        let _ = (handle, offset, len);
        log::error!("SftpServer Read operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn write(&mut self, handle: &[u8], offset: u64, data: &[u8]) -> SftpOpResult<()> {
        let _ = (handle, offset, data);
        log::error!("SftpServer Write operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn lstat(&mut self, path: &str) -> SftpOpResult<Attrs> {
        let _ = path;
        log::error!("SftpServer Lstat operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn fstat(&mut self, handle: &[u8]) -> SftpOpResult<Attrs> {
        let _ = handle;
        log::error!("SftpServer Fstat operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn setstat(&mut self, path: &str, attrs: &Attrs) -> SftpOpResult<()> {
        let _ = (path, attrs);
        log::error!("SftpServer SetStat operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn fsetstat(&mut self, handle: &[u8], attrs: &Attrs) -> SftpOpResult<()> {
        let _ = (handle, attrs);
        log::error!("SftpServer FSetStat operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn opendir(&mut self, dir: &str) -> SftpOpResult<Vec<u8>> {
        let _ = dir;
        log::error!("SftpServer OpenDir operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    /// Returns the next batch of entries. Return `SSH_FX_EOF` once
    /// all have been listed.
    async fn readdir(&mut self, handle: &[u8]) -> SftpOpResult<Vec<DirEntry>> {
        let _ = handle;
        log::error!("SftpServer ReadDir operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn remove(&mut self, path: &str) -> SftpOpResult<()> {
        let _ = path;
        log::error!("SftpServer Remove operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn mkdir(&mut self, path: &str, attrs: &Attrs) -> SftpOpResult<()> {
        let _ = (path, attrs);
        log::error!("SftpServer Mkdir operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn rmdir(&mut self, path: &str) -> SftpOpResult<()> {
        let _ = path;
        log::error!("SftpServer Rmdir operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    /// Provides the canonical absolute form of `path`
    async fn realpath(&mut self, path: &str) -> SftpOpResult<String> {
        let _ = path;
        log::error!("SftpServer RealPath operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn stat(&mut self, path: &str) -> SftpOpResult<Attrs> {
        let _ = path;
        log::error!("SftpServer Stat operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn rename(&mut self, oldpath: &str, newpath: &str) -> SftpOpResult<()> {
        let _ = (oldpath, newpath);
        log::error!("SftpServer Rename operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    async fn readlink(&mut self, path: &str) -> SftpOpResult<String> {
        let _ = path;
        log::error!("SftpServer ReadLink operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }

    /// Creates `linkpath` pointing at `targetpath`. The argument order
    /// is already corrected for OpenSSH clients.
    async fn symlink(&mut self, linkpath: &str, targetpath: &str) -> SftpOpResult<()> {
        let _ = (linkpath, targetpath);
        log::error!("SftpServer Symlink operation not defined");
        Err(StatusCode::SSH_FX_OP_UNSUPPORTED)
    }
}

/// Transport buffer size
const IO_BUF: usize = 8192;

/// Runs a server session until the client closes the transport.
///
/// Requests are handled one at a time, in the order received.
/// `config.remote_ident` selects OpenSSH compatibility for SYMLINK.
pub async fn serve<S: SftpServer>(
    server: &mut S,
    config: SessionConfig,
    rsock: &mut impl Read,
    wsock: &mut impl Write,
) -> Result<()> {
    let mut sess = ServerSession::new(config);
    let swap = sess.config().is_openssh();
    let mut rxbuf = [0u8; IO_BUF];
    let mut txbuf = [0u8; IO_BUF];
    // unconsumed input is rxbuf[pos..end]
    let mut pos = 0;
    let mut end = 0;
    let mut failed = None;
    let mut negotiated = false;

    loop {
        // Replies to pipelined requests are batched. Output is flushed
        // once it passes the high water mark, or before blocking on a read.
        if sess.is_paused() || failed.is_some() || pos == end {
            flush(&mut sess, wsock, &mut txbuf).await?;
        }

        if let Some(e) = failed {
            return Err(e);
        }

        if !negotiated {
            if let Some(v) = sess.client_version() {
                negotiated = true;
                info!("Client SFTP version {v}, extensions {:?}", sess.extensions());
            }
        }

        if let Some(p) = sess.take_request() {
            if let Err(e) = handle_request(server, &mut sess, &p, swap).await {
                // output such as a FAILURE status is flushed first
                failed = Some(e);
            }
            continue;
        }

        if pos == end {
            pos = 0;
            end = match rsock.read(&mut rxbuf).await {
                Ok(0) => {
                    debug!("client EOF");
                    sess.close();
                    return Ok(());
                }
                Ok(l) => l,
                Err(_) => {
                    info!("socket read error");
                    sess.close();
                    return Err(Error::SessionClosed);
                }
            };
        }

        match sess.input(&rxbuf[pos..end]) {
            Ok(l) => pos += l,
            Err(e) => failed = Some(e),
        }
    }
}

/// Writes all queued output to the transport
async fn flush(
    sess: &mut ServerSession,
    wsock: &mut impl Write,
    txbuf: &mut [u8],
) -> Result<()> {
    let mut wrote = false;
    loop {
        let l = sess.output(txbuf);
        if l == 0 {
            break;
        }
        wsock.write_all(&txbuf[..l]).await.map_err(|_| Error::SessionClosed)?;
        wrote = true;
    }
    if wrote {
        wsock.flush().await.map_err(|_| Error::SessionClosed)?;
    }
    Ok(())
}

/// Dispatches one request to `server` and queues the reply.
async fn handle_request<S: SftpServer>(
    server: &mut S,
    sess: &mut ServerSession,
    p: &RequestPacket,
    swap_symlink: bool,
) -> Result<()> {
    let (id, req) = match p.decode(swap_symlink) {
        Ok(r) => r,
        Err(e) => return Err(sess.bad_request(p, e)),
    };
    trace!("request {:?} id {}", req.sftp_num(), id.0);

    match req {
        Request::Open(o) => {
            let r = server
                .open(&o.filename.0.to_string_lossy(), OpenFlags(o.pflags), &o.attrs)
                .await;
            reply_handle(sess, id, r)
        }
        Request::Close(h) => {
            let r = server.close(h.handle.0 .0).await;
            reply_status(sess, id, r)
        }
        Request::Read(rd) => match server.read(rd.handle.0 .0, rd.offset, rd.len).await {
            Ok(data) => {
                // never more than was asked for
                let l = data.len().min(rd.len as usize);
                sess.data(id, &data[..l])
            }
            Err(code) => sess.status(id, code, ""),
        },
        Request::Write(w) => {
            let r = server.write(w.handle.0 .0, w.offset, w.data.0).await;
            reply_status(sess, id, r)
        }
        Request::Lstat(a) => {
            let r = server.lstat(&a.path.0.to_string_lossy()).await;
            reply_attrs(sess, id, r)
        }
        Request::Fstat(h) => {
            let r = server.fstat(h.handle.0 .0).await;
            reply_attrs(sess, id, r)
        }
        Request::SetStat(a) => {
            let r = server.setstat(&a.path.0.to_string_lossy(), &a.attrs).await;
            reply_status(sess, id, r)
        }
        Request::FSetStat(a) => {
            let r = server.fsetstat(a.handle.0 .0, &a.attrs).await;
            reply_status(sess, id, r)
        }
        Request::OpenDir(a) => {
            let r = server.opendir(&a.path.0.to_string_lossy()).await;
            reply_handle(sess, id, r)
        }
        Request::ReadDir(h) => match server.readdir(h.handle.0 .0).await {
            Ok(names) => sess.name(id, &names),
            Err(code) => sess.status(id, code, ""),
        },
        Request::Remove(a) => {
            let r = server.remove(&a.path.0.to_string_lossy()).await;
            reply_status(sess, id, r)
        }
        Request::Mkdir(a) => {
            let r = server.mkdir(&a.path.0.to_string_lossy(), &a.attrs).await;
            reply_status(sess, id, r)
        }
        Request::Rmdir(a) => {
            let r = server.rmdir(&a.path.0.to_string_lossy()).await;
            reply_status(sess, id, r)
        }
        Request::RealPath(a) => {
            let r = server.realpath(&a.path.0.to_string_lossy()).await;
            reply_path(sess, id, r)
        }
        Request::Stat(a) => {
            let r = server.stat(&a.path.0.to_string_lossy()).await;
            reply_attrs(sess, id, r)
        }
        Request::Rename(a) => {
            let r = server
                .rename(&a.oldpath.0.to_string_lossy(), &a.newpath.0.to_string_lossy())
                .await;
            reply_status(sess, id, r)
        }
        Request::ReadLink(a) => {
            let r = server.readlink(&a.path.0.to_string_lossy()).await;
            reply_path(sess, id, r)
        }
        Request::Symlink(a) => {
            let r = server
                .symlink(&a.linkpath.0.to_string_lossy(), &a.targetpath.0.to_string_lossy())
                .await;
            reply_status(sess, id, r)
        }
        // rejected while framing, not expected here
        Request::Extended(_) => sess.status(id, StatusCode::SSH_FX_OP_UNSUPPORTED, ""),
    }
}

fn reply_status(sess: &mut ServerSession, id: ReqId, r: SftpOpResult<()>) -> Result<()> {
    let code = match r {
        Ok(()) => StatusCode::SSH_FX_OK,
        Err(code) => code,
    };
    sess.status(id, code, "")
}

fn reply_handle(sess: &mut ServerSession, id: ReqId, r: SftpOpResult<Vec<u8>>) -> Result<()> {
    match r {
        Ok(h) if h.len() > MAX_HANDLE_LEN => {
            error!("Handle length {} exceeds {MAX_HANDLE_LEN}", h.len());
            sess.status(id, StatusCode::SSH_FX_FAILURE, "")
        }
        Ok(h) => sess.handle(id, &h),
        Err(code) => sess.status(id, code, ""),
    }
}

fn reply_attrs(sess: &mut ServerSession, id: ReqId, r: SftpOpResult<Attrs>) -> Result<()> {
    match r {
        Ok(a) => sess.attrs(id, &a),
        Err(code) => sess.status(id, code, ""),
    }
}

/// REALPATH and READLINK reply with a single NAME entry
fn reply_path(sess: &mut ServerSession, id: ReqId, r: SftpOpResult<String>) -> Result<()> {
    match r {
        Ok(path) => {
            let e =
                DirEntry { longname: path.clone(), filename: path, attrs: Attrs::default() };
            sess.name(id, &[e])
        }
        Err(code) => sess.status(id, code, ""),
    }
}
