//! Client side of an SFTP session, without IO.
//!
//! Requests are queued with [`ClientSession::start()`], each with a
//! oneshot sender that receives the decoded reply. Bytes from the
//! transport are passed to [`input()`](ClientSession::input) and
//! outbound bytes are collected with [`output()`](ClientSession::output).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use futures::channel::oneshot;

use crate::attrs::Attrs;
use crate::config::{SessionConfig, SFTP_VERSION};
use crate::extensions::Extensions;
use crate::framer::{write_packet, Framed, Framer, Reject, Role};
use crate::proto::{
    NameEntry, ReqId, Request, Response, SftpNum, StatVfs, StatusCode, VersionInfo,
};
use crate::requests::RequestTable;
use crate::sftpnames::{SFTP_EXT_FSTATVFS, SFTP_EXT_STATVFS};
use crate::sshwire::{read_ssh, DecodeBytes, SSHDecode, WireResult};

/// Sent as the first packet, version 3 with no extensions
const INIT_PACKET: [u8; 9] = [0, 0, 0, 5, 1, 0, 0, 0, SFTP_VERSION as u8];

/// A directory entry from a NAME response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub filename: String,
    /// `ls -l` style, for display only
    pub longname: String,
    pub attrs: Attrs,
}

impl From<&NameEntry<'_>> for DirEntry {
    fn from(n: &NameEntry) -> Self {
        DirEntry {
            filename: n.filename.0.to_string_lossy(),
            longname: n.longname.0.to_string_lossy(),
            attrs: n.attrs.clone(),
        }
    }
}

/// How a response to a request should be interpreted
#[derive(Debug, Clone, Copy)]
pub(crate) enum Expect {
    Plain,
    /// DATA is clipped to `capacity`
    Read { capacity: usize },
    /// EXTENDED_REPLY is decoded according to the extension
    Extended { name: &'static str },
}

/// A decoded response
#[derive(Debug)]
pub(crate) enum Reply {
    /// STATUS with SSH_FX_OK
    Ok,
    Handle(Vec<u8>),
    Data {
        data: Vec<u8>,
        /// Length sent by the peer, before clipping
        claimed: usize,
    },
    Name(Vec<DirEntry>),
    Attrs(Attrs),
    StatVfs(StatVfs),
    /// EXTENDED_REPLY to a request with no reply format here
    Extended,
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply>>;

#[derive(Debug)]
struct Pending {
    expect: Expect,
    reply: ReplySender,
}

pub(crate) struct ClientSession {
    config: SessionConfig,
    framer: Framer,
    requests: RequestTable<Pending>,
    /// Outbound packets not yet taken by `output()`
    out: Vec<u8>,
    /// Negotiated server version
    version: Option<u32>,
    extensions: Extensions,
    closed: bool,
}

impl core::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientSession")
            .field("version", &self.version)
            .field("pending", &self.requests.len())
            .field("out", &self.out.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    pub fn new(config: SessionConfig) -> Self {
        // replies may carry a full DATA payload
        let limit = config.max_packet_len.max(config.max_data_len() + 1024);
        debug!("Outgoing: Writing INIT");
        Self {
            config,
            framer: Framer::new(Role::Client, limit),
            requests: RequestTable::new(),
            out: INIT_PACKET.to_vec(),
            version: None,
            extensions: Extensions::new(),
            closed: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_first_id(mut self, id: u32) -> Self {
        self.requests = RequestTable::with_first_id(id);
        self
    }

    /// Consumes transport input. Errors are fatal, the session is
    /// torn down before returning.
    pub fn input(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let mut r = buf;
        while !r.is_empty() {
            let (l, ev) = match self.framer.input(r) {
                Ok(x) => x,
                Err(e) => return Err(self.fail(e)),
            };
            r = &r[l..];
            if let Some(ev) = ev {
                if let Err(e) = self.dispatch(ev) {
                    return Err(self.fail(e));
                }
            }
            if self.closed {
                break;
            }
        }
        Ok(buf.len() - r.len())
    }

    /// Takes queued output into `buf`, returning the length written.
    pub fn output(&mut self, buf: &mut [u8]) -> usize {
        let l = self.out.len().min(buf.len());
        buf[..l].copy_from_slice(&self.out[..l]);
        self.out.drain(..l);
        l
    }

    /// New requests should wait until output drains
    pub fn is_paused(&self) -> bool {
        self.out.len() >= self.config.high_water
    }

    /// VERSION has been received
    pub fn is_ready(&self) -> bool {
        self.version.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn max_data_len(&self) -> usize {
        self.config.max_data_len()
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Queues a request. `reply` will receive exactly one result.
    pub fn start(
        &mut self,
        req: &Request,
        expect: Expect,
        reply: ReplySender,
    ) -> Result<ReqId> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if self.version.is_none() {
            return Err(Error::BadUsage { msg: "SFTP version not negotiated" });
        }
        let id = self.requests.allocate(Pending { expect, reply })?;
        debug!("Outgoing: Writing {:?} id {}", req.sftp_num(), id.0);
        if let Err(e) = write_packet(&mut self.out, |v| req.encode(id, v)) {
            self.requests.resolve(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Ends the session. Outstanding requests fail with
    /// [`Error::SessionEnded`].
    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing SFTP session");
            self.teardown(true)
        }
    }

    /// The transport has closed. Outstanding requests are dropped
    /// without a reply.
    pub fn close_input(&mut self) {
        if !self.closed {
            debug!("Transport EOF");
            self.teardown(false)
        }
    }

    fn fail(&mut self, e: Error) -> Error {
        error!("SFTP session failed: {e}");
        self.teardown(true);
        e
    }

    fn teardown(&mut self, readable: bool) {
        self.closed = true;
        self.out.clear();
        for (id, p) in self.requests.drain() {
            trace!("Ending request {}", id.0);
            if readable {
                let _ = p.reply.send(Err(Error::SessionEnded));
            }
            // otherwise the dropped sender cancels the receiver
        }
    }

    fn dispatch(&mut self, ev: Framed) -> Result<()> {
        match ev {
            Framed::Packet { num: SftpNum::SSH_FXP_VERSION, body } => {
                self.handle_version(&body)
            }
            Framed::Packet { num, body } => self.handle_response(num, &body),
            Framed::Rejected { num, id, reason } => {
                warn!("Rejected {num:?} for id {}: {reason:?}", id.0);
                if let Some(p) = self.requests.resolve(id) {
                    let e = match reason {
                        Reject::TooBig { size } => Error::BigPacket { size },
                        _ => Error::PacketWrong,
                    };
                    let _ = p.reply.send(Err(e));
                }
                Ok(())
            }
        }
    }

    fn handle_version(&mut self, body: &[u8]) -> Result<()> {
        let info: VersionInfo = read_ssh(body)?;
        if info.version < SFTP_VERSION {
            return Err(Error::Incompatible { version: info.version });
        }
        debug!("Server SFTP version {}", info.version);
        self.extensions.add_version_info(&info);
        self.version = Some(info.version);
        Ok(())
    }

    fn handle_response(&mut self, num: SftpNum, body: &[u8]) -> Result<()> {
        let mut s = DecodeBytes::new(body);
        let id = ReqId::dec(&mut s)?;
        let resp = Response::decode(num, &mut s)?;
        debug!("Incoming: {num:?} id {}", id.0);
        trace!("{resp:?}");

        let Some(expect) = self.requests.get(id).map(|p| p.expect) else {
            debug!("Response for unknown id {}", id.0);
            return Ok(());
        };
        // decode fully before resolving, a bad reply is fatal
        let result = Self::reply(resp, expect)?;
        let p = self.requests.resolve(id).trap()?;
        if p.reply.send(result).is_err() {
            trace!("Reply for {} unclaimed", id.0);
        }
        Ok(())
    }

    /// Converts a response. The outer error is a malformed response,
    /// the inner result is what the request receives.
    fn reply(resp: Response, expect: Expect) -> WireResult<Result<Reply>> {
        let r = match resp {
            Response::Status(st) => {
                if st.code == StatusCode::SSH_FX_OK {
                    Reply::Ok
                } else {
                    return Ok(Err(Error::status(
                        st.code,
                        &st.message.to_string_lossy(),
                        &st.lang.to_string_lossy(),
                    )));
                }
            }
            Response::Handle(h) => Reply::Handle(h.handle.0 .0.to_vec()),
            Response::Data(d) => {
                let claimed = d.data.0.len();
                let keep = match expect {
                    Expect::Read { capacity } => claimed.min(capacity),
                    _ => claimed,
                };
                if keep < claimed {
                    debug!("Clipping DATA of {claimed} to {keep}");
                }
                Reply::Data { data: d.data.0[..keep].to_vec(), claimed }
            }
            Response::Name(n) => Reply::Name(n.0.iter().map(DirEntry::from).collect()),
            Response::Attrs(a) => Reply::Attrs(a.attrs),
            Response::ExtendedReply(e) => match expect {
                Expect::Extended { name }
                    if name == SFTP_EXT_STATVFS || name == SFTP_EXT_FSTATVFS =>
                {
                    let mut s = DecodeBytes::new(e.data.0);
                    Reply::StatVfs(StatVfs::dec(&mut s)?)
                }
                _ => {
                    debug!("Ignoring {} byte extended reply", e.data.0.len());
                    Reply::Extended
                }
            },
        };
        Ok(Ok(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::*;
    use crate::sftplog::init_test_log;
    use crate::sshwire::{write_ssh_vec, BinString, SSHEncode};

    fn packet(num: u8, body: &[u8]) -> Vec<u8> {
        let mut v = ((body.len() + 1) as u32).to_be_bytes().to_vec();
        v.push(num);
        v.extend_from_slice(body);
        v
    }

    fn response(id: u32, r: &Response) -> Vec<u8> {
        let mut v = vec![];
        write_packet(&mut v, |v| r.encode(ReqId(id), v)).unwrap();
        v
    }

    fn status(id: u32, code: StatusCode) -> Vec<u8> {
        response(
            id,
            &Response::Status(Status { code, message: "".into(), lang: "".into() }),
        )
    }

    fn ready_session() -> ClientSession {
        let mut c = ClientSession::new(SessionConfig::default());
        let mut init = [0u8; 20];
        assert_eq!(c.output(&mut init), 9);
        assert_eq!(init[..9], [0, 0, 0, 5, 1, 0, 0, 0, 3]);
        c.input(&packet(2, &[0, 0, 0, 3])).unwrap();
        assert!(c.is_ready());
        c
    }

    fn stat(c: &mut ClientSession, path: &str) -> oneshot::Receiver<Result<Reply>> {
        let (tx, rx) = oneshot::channel();
        let req = Request::Stat(PathArg { path: path.into() });
        c.start(&req, Expect::Plain, tx).unwrap();
        rx
    }

    #[test]
    fn requests_need_version() {
        init_test_log();
        let mut c = ClientSession::new(SessionConfig::default());
        let (tx, _rx) = oneshot::channel();
        let req = Request::RealPath(PathArg { path: ".".into() });
        assert!(matches!(
            c.start(&req, Expect::Plain, tx),
            Err(Error::BadUsage { .. })
        ));
    }

    #[test]
    fn out_of_order_replies() {
        init_test_log();
        let mut c = ready_session();
        let mut rxs: Vec<_> = (0..5).map(|i| stat(&mut c, &format!("/{i}"))).collect();
        let mut buf = vec![0u8; 1000];
        assert!(c.output(&mut buf) > 0);

        // reply with size == id, in a scrambled order
        for id in [3u32, 0, 4, 2, 1] {
            let a = Attrs { size: Some(id as u64), ..Default::default() };
            c.input(&response(id, &Response::Attrs(AttrsReply { attrs: a })))
                .unwrap();
        }
        for (i, rx) in rxs.iter_mut().enumerate() {
            match rx.try_recv().unwrap().unwrap().unwrap() {
                Reply::Attrs(a) => assert_eq!(a.size, Some(i as u64)),
                r => panic!("unexpected {r:?}"),
            }
        }
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn status_codes() {
        let mut c = ready_session();
        let mut ok = stat(&mut c, "/a");
        let mut bad = stat(&mut c, "/b");
        c.input(&status(1, StatusCode::SSH_FX_NO_SUCH_FILE)).unwrap();
        c.input(&status(0, StatusCode::SSH_FX_OK)).unwrap();
        assert!(matches!(ok.try_recv().unwrap().unwrap(), Ok(Reply::Ok)));
        let e = bad.try_recv().unwrap().unwrap().unwrap_err();
        assert!(e.is_status(StatusCode::SSH_FX_NO_SUCH_FILE));
        assert_eq!(e.to_string(), "No such file or directory");

        // unknown ids are ignored
        c.input(&status(77, StatusCode::SSH_FX_OK)).unwrap();
        assert!(!c.is_closed());
    }

    #[test]
    fn data_clipped_to_capacity() {
        init_test_log();
        let mut c = ready_session();
        let (tx, mut rx) = oneshot::channel();
        let h = [1u8, 2];
        let req = Request::Read(Read { handle: FileHandle::from(&h[..]), offset: 0, len: 4 });
        c.start(&req, Expect::Read { capacity: 4 }, tx).unwrap();
        let payload = [7u8; 10];
        c.input(&response(0, &Response::Data(Data { data: BinString(&payload) })))
            .unwrap();
        match rx.try_recv().unwrap().unwrap().unwrap() {
            Reply::Data { data, claimed } => {
                assert_eq!(data, [7u8; 4]);
                assert_eq!(claimed, 10);
            }
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn truncated_response_is_fatal() {
        init_test_log();
        let mut c = ready_session();
        let mut rx = stat(&mut c, "/a");
        // HANDLE claiming 9 bytes with only 2 present
        let r = c.input(&packet(102, &[0, 0, 0, 0, 0, 0, 0, 9, 1, 2]));
        assert!(matches!(r, Err(Error::RanOut)));
        assert!(c.is_closed());
        assert!(matches!(rx.try_recv().unwrap().unwrap(), Err(Error::SessionEnded)));
    }

    #[test]
    fn old_version_incompatible() {
        init_test_log();
        let mut c = ClientSession::new(SessionConfig::default());
        let r = c.input(&packet(2, &[0, 0, 0, 2]));
        assert!(matches!(r, Err(Error::Incompatible { version: 2 })));
        assert!(c.is_closed());
        assert!(!c.is_ready());
        let mut buf = [0u8; 16];
        assert_eq!(c.output(&mut buf), 0);
        assert!(matches!(c.input(&[0]), Err(Error::SessionClosed)));
    }

    #[test]
    fn extensions_recorded() {
        let mut c = ClientSession::new(SessionConfig::default());
        let mut body = vec![];
        let info = VersionInfo {
            version: 3,
            extensions: vec![ExtPair { name: "fsync@openssh.com".into(), data: "1".into() }],
        };
        write_ssh_vec(&mut body, &info).unwrap();
        c.input(&packet(2, &body)).unwrap();
        assert!(c.extensions().supports("fsync@openssh.com", "1"));
    }

    #[test]
    fn teardown_modes() {
        let mut c = ready_session();
        let mut rx = stat(&mut c, "/x");
        c.close();
        assert!(matches!(rx.try_recv().unwrap().unwrap(), Err(Error::SessionEnded)));

        let mut c = ready_session();
        let mut rx = stat(&mut c, "/x");
        c.close_input();
        assert!(rx.try_recv().is_err(), "cancelled without a reply");
    }

    #[test]
    fn oversize_reply_fails_request() {
        init_test_log();
        let mut c = ready_session();
        let mut rx = stat(&mut c, "/x");
        let big = vec![0u8; 40000];
        let mut body = vec![];
        0u32.enc(&mut body).unwrap();
        BinString(&big).enc(&mut body).unwrap();
        c.input(&packet(103, &body)).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            Err(Error::BigPacket { .. })
        ));
        assert!(!c.is_closed());
    }

    #[test]
    fn statvfs_reply() {
        let mut c = ready_session();
        let (tx, mut rx) = oneshot::channel();
        let req = Request::Extended(Extended {
            name: SFTP_EXT_STATVFS.into(),
            data: crate::sshwire::Rest(&[]),
        });
        c.start(&req, Expect::Extended { name: SFTP_EXT_STATVFS }, tx).unwrap();
        let st = StatVfs { bsize: 4096, namemax: 255, ..Default::default() };
        let mut data = vec![];
        write_ssh_vec(&mut data, &st).unwrap();
        c.input(&response(
            0,
            &Response::ExtendedReply(ExtendedReply { data: crate::sshwire::Rest(&data) }),
        ))
        .unwrap();
        match rx.try_recv().unwrap().unwrap().unwrap() {
            Reply::StatVfs(s) => assert_eq!(s, st),
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn backpressure_pause() {
        let mut c = ready_session();
        let big = vec![0u8; 20000];
        for _ in 0..2 {
            let (tx, _rx) = oneshot::channel();
            let req = Request::Write(Write {
                handle: FileHandle::from(&big[..1]),
                offset: 0,
                data: BinString(&big),
            });
            c.start(&req, Expect::Plain, tx).unwrap();
        }
        assert!(c.is_paused());
        let mut buf = vec![0u8; 50000];
        c.output(&mut buf);
        assert!(!c.is_paused());
    }

    #[test]
    fn with_first_id_wraps() {
        let mut c = ready_session().with_first_id(u32::MAX);
        let _a = stat(&mut c, "/a");
        let _b = stat(&mut c, "/b");
        let mut buf = vec![0u8; 100];
        let l = c.output(&mut buf);
        // second request id wrapped to 0
        let second = &buf[..l][(l / 2)..];
        assert_eq!(second[5..9], [0, 0, 0, 0]);
    }
}
