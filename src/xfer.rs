//! Concurrent chunked file transfer between two [`Endpoint`]s.
//!
//! The file is copied in waves. Each wave fills a buffer of up to
//! `concurrency` chunks, with every chunk read then written by its own
//! future. A wave completes before the next begins.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use futures::stream::{FuturesUnordered, StreamExt};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::flags::OpenFlags;

pub const DEFAULT_CONCURRENCY: usize = 64;
pub const DEFAULT_CHUNK_SIZE: usize = 32768;

/// Progress callback, `(total_transferred, chunk_len, file_size)`
pub type StepFn<'a> = &'a mut dyn FnMut(u64, u64, u64);

pub struct TransferOptions<'a> {
    /// Chunks in flight at once
    pub concurrency: usize,
    pub chunk_size: usize,
    /// Permissions applied to the destination
    pub mode: Option<u32>,
    /// Called after each chunk is written
    pub step: Option<StepFn<'a>>,
}

impl Default for TransferOptions<'_> {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            mode: None,
            step: None,
        }
    }
}

impl core::fmt::Debug for TransferOptions<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("concurrency", &self.concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Returns `(buffer size, concurrency)` for a file of `fsize`.
///
/// Concurrency is reduced one chunk at a time while the buffer would
/// exceed the file. With a single chunk left the buffer is the file size.
pub(crate) fn plan(fsize: u64, chunk_size: usize, concurrency: usize) -> (usize, usize) {
    let chunk = chunk_size.max(1) as u64;
    let mut conc = concurrency.max(1);
    let mut bufsize = chunk * conc as u64;
    while bufsize > fsize {
        if conc == 1 {
            bufsize = fsize;
            break;
        }
        bufsize -= chunk;
        conc -= 1;
    }
    (bufsize as usize, conc)
}

/// Copies `src_path` on `src` to `dst_path` on `dst`, returning the
/// number of bytes copied.
///
/// The destination is created or truncated. Both handles are closed,
/// destination first, whatever the outcome. The first error is returned.
pub async fn transfer<S, D>(
    src: &S,
    dst: &D,
    src_path: &str,
    dst_path: &str,
    mut opts: TransferOptions<'_>,
) -> Result<u64>
where
    S: Endpoint,
    D: Endpoint,
{
    let sh = src.open(src_path, OpenFlags::READ).await?;

    let fsize = match source_size(src, &sh, src_path).await {
        Ok(s) => s,
        Err(e) => {
            let _ = src.close(sh).await;
            return Err(e);
        }
    };

    let dh = match dst.open(dst_path, OpenFlags::from_mode("w")?).await {
        Ok(h) => h,
        Err(e) => {
            let _ = src.close(sh).await;
            return Err(e);
        }
    };

    debug!("transfer {src_path} -> {dst_path}, {fsize} bytes");
    let r = copy(src, &sh, dst, &dh, dst_path, fsize, &mut opts).await;

    let rd = dst.close(dh).await;
    let rs = src.close(sh).await;
    r?;
    rd?;
    rs?;
    Ok(fsize)
}

/// fstat, falling back to stat. The fstat error wins if both fail.
async fn source_size<S: Endpoint>(src: &S, sh: &S::Handle, path: &str) -> Result<u64> {
    let attrs = match src.fstat(sh).await {
        Ok(a) => a,
        Err(e) => {
            debug!("fstat failed ({e}), trying stat");
            src.stat(path).await.map_err(|_| e)?
        }
    };
    attrs.size.ok_or(Error::msg("Source size unknown"))
}

#[allow(clippy::too_many_arguments)]
async fn copy<S: Endpoint, D: Endpoint>(
    src: &S,
    sh: &S::Handle,
    dst: &D,
    dh: &D::Handle,
    dst_path: &str,
    fsize: u64,
    opts: &mut TransferOptions<'_>,
) -> Result<()> {
    if let Some(mode) = opts.mode {
        if let Err(e) = dst.fchmod(dh, mode).await {
            debug!("fchmod failed ({e}), trying chmod");
            if let Err(e) = dst.chmod(dst_path, mode).await {
                // permissions are best effort
                warn!("chmod {dst_path} failed: {e}");
            }
        }
    }

    if fsize == 0 {
        return Ok(());
    }

    let chunk = opts.chunk_size.max(1);
    let (bufsize, conc) = plan(fsize, chunk, opts.concurrency);
    trace!("buffer {bufsize} concurrency {conc}");
    let mut buf = vec![0u8; bufsize];

    let mut total = 0u64;
    while total < fsize {
        let base = total;
        let wave = (fsize - base).min(bufsize as u64) as usize;

        let mut jobs = buf[..wave]
            .chunks_mut(chunk)
            .enumerate()
            .map(|(i, b)| copy_chunk(src, sh, dst, dh, base + (i * chunk) as u64, b))
            .collect::<FuturesUnordered<_>>();

        while let Some(r) = jobs.next().await {
            // remaining chunks of the wave are dropped on error
            let nb = r? as u64;
            total += nb;
            if let Some(step) = opts.step.as_deref_mut() {
                step(total, nb, fsize);
            }
        }
    }
    Ok(())
}

/// Fills `buf` from `offset` in the source then writes it to the
/// destination.
async fn copy_chunk<S: Endpoint, D: Endpoint>(
    src: &S,
    sh: &S::Handle,
    dst: &D,
    dh: &D::Handle,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        let n = src.read(sh, offset + got as u64, &mut buf[got..]).await?;
        if n == 0 {
            // source shrank after its size was read
            return Err(Error::ShortRead { offset: offset + got as u64 });
        }
        got += n;
    }
    dst.write(dh, offset, buf).await?;
    Ok(buf.len())
}
