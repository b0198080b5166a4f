use std::collections::HashMap;
use std::fs::{self, File, OpenOptions, Permissions, ReadDir};
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use sunset_sftp::{Attrs, DirEntry, LocalFs, OpenFlags, SftpOpResult, SftpServer, StatusCode};

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

/// Entries per READDIR reply
const DIR_BATCH: usize = 64;

enum Item {
    File(File),
    Dir { iter: ReadDir, sent_dots: bool },
}

/// Serves a local directory tree. Paths are confined below `root`.
pub struct FsServer {
    root: PathBuf,
    items: HashMap<u32, Item>,
    next: u32,
}

fn io_status(e: std::io::Error) -> StatusCode {
    debug!("io error: {e}");
    StatusCode::from_io(&e)
}

fn longname(name: &str, m: &fs::Metadata) -> String {
    format!("{:o} {:>4} {:>4} {:>10} {name}", m.mode(), m.uid(), m.gid(), m.size())
}

impl FsServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), items: HashMap::new(), next: 0 }
    }

    /// Client path to a canonical path relative to the root, `/` separated
    fn normalise(path: &str) -> SftpOpResult<String> {
        let mut parts: Vec<&str> = vec![];
        for c in Path::new(path).components() {
            match c {
                Component::Normal(p) => parts.push(p.to_str().ok_or(StatusCode::SSH_FX_BAD_MESSAGE)?),
                Component::ParentDir => {
                    parts.pop();
                }
                _ => (),
            }
        }
        Ok(format!("/{}", parts.join("/")))
    }

    fn local(&self, path: &str) -> SftpOpResult<PathBuf> {
        let n = Self::normalise(path)?;
        Ok(self.root.join(n.trim_start_matches('/')))
    }

    fn insert(&mut self, item: Item) -> Vec<u8> {
        self.next = self.next.wrapping_add(1);
        self.items.insert(self.next, item);
        self.next.to_be_bytes().to_vec()
    }

    fn key(handle: &[u8]) -> SftpOpResult<u32> {
        let b: [u8; 4] = handle.try_into().map_err(|_| StatusCode::SSH_FX_FAILURE)?;
        Ok(u32::from_be_bytes(b))
    }

    fn file(&self, handle: &[u8]) -> SftpOpResult<&File> {
        match self.items.get(&Self::key(handle)?) {
            Some(Item::File(f)) => Ok(f),
            _ => Err(StatusCode::SSH_FX_FAILURE),
        }
    }
}

fn set_attrs(path: &Path, attrs: &Attrs) -> SftpOpResult<()> {
    if let Some(size) = attrs.size {
        let f = OpenOptions::new().write(true).open(path).map_err(io_status)?;
        f.set_len(size).map_err(io_status)?;
    }
    if let Some(mode) = attrs.permissions {
        fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).map_err(io_status)?;
    }
    if attrs.uid.is_some() || attrs.atime.is_some() {
        // ownership and times are left unchanged
        debug!("ignoring owner or times for {path:?}");
    }
    Ok(())
}

impl SftpServer for FsServer {
    async fn open(
        &mut self,
        filename: &str,
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> SftpOpResult<Vec<u8>> {
        let p = self.local(filename)?;
        debug!("open {p:?} {flags:?}");
        let f = LocalFs::open_options(flags).open(&p).map_err(io_status)?;
        if let Some(mode) = attrs.permissions {
            let _ = f.set_permissions(Permissions::from_mode(mode & 0o7777));
        }
        Ok(self.insert(Item::File(f)))
    }

    async fn close(&mut self, handle: &[u8]) -> SftpOpResult<()> {
        self.items.remove(&Self::key(handle)?).map(|_| ()).ok_or(StatusCode::SSH_FX_FAILURE)
    }

    async fn read(&mut self, handle: &[u8], offset: u64, len: u32) -> SftpOpResult<Vec<u8>> {
        let f = self.file(handle)?;
        let mut buf = vec![0u8; len as usize];
        let n = f.read_at(&mut buf, offset).map_err(io_status)?;
        if n == 0 && len > 0 {
            return Err(StatusCode::SSH_FX_EOF);
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn write(&mut self, handle: &[u8], offset: u64, data: &[u8]) -> SftpOpResult<()> {
        self.file(handle)?.write_all_at(data, offset).map_err(io_status)
    }

    async fn lstat(&mut self, path: &str) -> SftpOpResult<Attrs> {
        let m = fs::symlink_metadata(self.local(path)?).map_err(io_status)?;
        Ok((&m).into())
    }

    async fn fstat(&mut self, handle: &[u8]) -> SftpOpResult<Attrs> {
        let m = self.file(handle)?.metadata().map_err(io_status)?;
        Ok((&m).into())
    }

    async fn setstat(&mut self, path: &str, attrs: &Attrs) -> SftpOpResult<()> {
        set_attrs(&self.local(path)?, attrs)
    }

    async fn fsetstat(&mut self, handle: &[u8], attrs: &Attrs) -> SftpOpResult<()> {
        let f = self.file(handle)?;
        if let Some(size) = attrs.size {
            f.set_len(size).map_err(io_status)?;
        }
        if let Some(mode) = attrs.permissions {
            f.set_permissions(Permissions::from_mode(mode & 0o7777)).map_err(io_status)?;
        }
        Ok(())
    }

    async fn opendir(&mut self, dir: &str) -> SftpOpResult<Vec<u8>> {
        let iter = fs::read_dir(self.local(dir)?).map_err(io_status)?;
        Ok(self.insert(Item::Dir { iter, sent_dots: false }))
    }

    async fn readdir(&mut self, handle: &[u8]) -> SftpOpResult<Vec<DirEntry>> {
        let Some(Item::Dir { iter, sent_dots }) = self.items.get_mut(&Self::key(handle)?)
        else {
            return Err(StatusCode::SSH_FX_FAILURE);
        };

        let mut names = vec![];
        if !*sent_dots {
            *sent_dots = true;
            for d in [".", ".."] {
                names.push(DirEntry {
                    filename: d.into(),
                    longname: d.into(),
                    attrs: Attrs::default(),
                });
            }
        }
        for e in iter.by_ref().take(DIR_BATCH) {
            let e = e.map_err(io_status)?;
            let filename = e.file_name().to_string_lossy().into_owned();
            let Ok(m) = e.metadata() else {
                continue;
            };
            names.push(DirEntry { longname: longname(&filename, &m), filename, attrs: (&m).into() });
        }
        if names.is_empty() {
            return Err(StatusCode::SSH_FX_EOF);
        }
        Ok(names)
    }

    async fn remove(&mut self, path: &str) -> SftpOpResult<()> {
        fs::remove_file(self.local(path)?).map_err(io_status)
    }

    async fn mkdir(&mut self, path: &str, attrs: &Attrs) -> SftpOpResult<()> {
        let p = self.local(path)?;
        fs::create_dir(&p).map_err(io_status)?;
        if let Some(mode) = attrs.permissions {
            let _ = fs::set_permissions(&p, Permissions::from_mode(mode & 0o7777));
        }
        Ok(())
    }

    async fn rmdir(&mut self, path: &str) -> SftpOpResult<()> {
        fs::remove_dir(self.local(path)?).map_err(io_status)
    }

    async fn realpath(&mut self, path: &str) -> SftpOpResult<String> {
        Self::normalise(path)
    }

    async fn stat(&mut self, path: &str) -> SftpOpResult<Attrs> {
        let m = fs::metadata(self.local(path)?).map_err(io_status)?;
        Ok((&m).into())
    }

    async fn rename(&mut self, oldpath: &str, newpath: &str) -> SftpOpResult<()> {
        let new = self.local(newpath)?;
        // SFTP rename doesn't replace
        if new.symlink_metadata().is_ok() {
            return Err(StatusCode::SSH_FX_FAILURE);
        }
        fs::rename(self.local(oldpath)?, new).map_err(io_status)
    }

    async fn readlink(&mut self, path: &str) -> SftpOpResult<String> {
        let t = fs::read_link(self.local(path)?).map_err(io_status)?;
        Ok(t.to_string_lossy().into_owned())
    }

    async fn symlink(&mut self, linkpath: &str, targetpath: &str) -> SftpOpResult<()> {
        // the target is stored as given
        std::os::unix::fs::symlink(targetpath, self.local(linkpath)?).map_err(io_status)
    }
}
