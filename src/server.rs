//! Server side of an SFTP session, without IO.
//!
//! Input stops at each complete request, which is held until taken
//! with [`ServerSession::take_request()`]. Replies are queued with the
//! responder methods and collected with
//! [`output()`](ServerSession::output).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::attrs::Attrs;
use crate::client::DirEntry;
use crate::config::{SessionConfig, MAX_HANDLE_LEN, SFTP_VERSION};
use crate::extensions::Extensions;
use crate::framer::{write_packet, Framed, Framer, Reject, Role};
use crate::proto::{
    AttrsReply, Data, FileHandle, HandleArg, Name, NameEntry, ReqId, Request,
    Response, SftpNum, Status, StatusCode, VersionInfo,
};
use crate::sshwire::{read_ssh, BinString, DecodeBytes};

/// VERSION reply, version 3 and no extensions
const VERSION_PACKET: [u8; 9] = [0, 0, 0, 5, 2, 0, 0, 0, SFTP_VERSION as u8];

/// A complete request packet, not yet decoded
#[derive(Debug)]
pub(crate) struct RequestPacket {
    pub num: SftpNum,
    pub body: Vec<u8>,
}

impl RequestPacket {
    /// Decodes the request. SYMLINK paths are exchanged when
    /// `swap_symlink` is set, for OpenSSH clients.
    pub fn decode(&self, swap_symlink: bool) -> Result<(ReqId, Request<'_>)> {
        let mut s = DecodeBytes::new(&self.body);
        let (id, req) = Request::decode(self.num, &mut s)?;
        let req = match req {
            Request::Symlink(sl) if swap_symlink => Request::Symlink(sl.swapped()),
            r => r,
        };
        Ok((id, req))
    }

    /// The request id, if the body is long enough to have one
    pub fn id(&self) -> Option<ReqId> {
        read_ssh::<ReqId>(&self.body).ok()
    }
}

pub(crate) struct ServerSession {
    config: SessionConfig,
    framer: Framer,
    out: Vec<u8>,
    held: Option<RequestPacket>,
    /// Version sent in the client's INIT
    client_version: Option<u32>,
    extensions: Extensions,
    closed: bool,
}

impl core::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerSession")
            .field("client_version", &self.client_version)
            .field("held", &self.held.as_ref().map(|p| p.num))
            .field("out", &self.out.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            framer: Framer::new(Role::Server, config.max_packet_len),
            config,
            out: Vec::new(),
            held: None,
            client_version: None,
            extensions: Extensions::new(),
            closed: false,
        }
    }

    /// Whether more input can be accepted
    pub fn is_input_ready(&self) -> bool {
        self.held.is_none() && !self.closed
    }

    /// Consumes transport input, up to the end of the next complete
    /// request. Errors are fatal, the session is closed before returning.
    pub fn input(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let mut r = buf;
        while !r.is_empty() && self.held.is_none() {
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
        }
        Ok(buf.len() - r.len())
    }

    /// Returns the held request, allowing further input
    pub fn take_request(&mut self) -> Option<RequestPacket> {
        self.held.take()
    }

    pub fn output(&mut self, buf: &mut [u8]) -> usize {
        let l = self.out.len().min(buf.len());
        buf[..l].copy_from_slice(&self.out[..l]);
        self.out.drain(..l);
        l
    }

    pub fn is_paused(&self) -> bool {
        self.out.len() >= self.config.high_water
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn client_version(&self) -> Option<u32> {
        self.client_version
    }

    /// Extensions listed in the client's INIT
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Ends the session, discarding unsent output
    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing SFTP session");
            self.closed = true;
            self.held = None;
            self.out.clear();
        }
    }

    /// Replies to a request that couldn't be decoded, then fails
    /// the session.
    pub fn bad_request(&mut self, p: &RequestPacket, e: Error) -> Error {
        warn!("Bad {:?} request: {e}", p.num);
        if let Some(id) = p.id() {
            let _ = self.status(id, StatusCode::SSH_FX_FAILURE, "");
        }
        // the failure status is kept for the transport to flush
        let out = core::mem::take(&mut self.out);
        let e = self.fail(e);
        self.out = out;
        e
    }

    fn fail(&mut self, e: Error) -> Error {
        error!("SFTP session failed: {e}");
        self.close();
        e
    }

    fn dispatch(&mut self, ev: Framed) -> Result<()> {
        match ev {
            Framed::Packet { num: SftpNum::SSH_FXP_INIT, body } => {
                let info: VersionInfo = read_ssh(&body)?;
                if info.version < SFTP_VERSION {
                    return Err(Error::Incompatible { version: info.version });
                }
                self.extensions.add_version_info(&info);
                self.client_version = Some(info.version);
                debug!("Outgoing: Writing VERSION");
                self.out.extend_from_slice(&VERSION_PACKET);
                Ok(())
            }
            Framed::Packet { num, body } => {
                debug!("Incoming: {num:?}");
                self.held = Some(RequestPacket { num, body });
                Ok(())
            }
            Framed::Rejected { num, id, reason } => {
                warn!("Rejecting {num:?} id {}: {reason:?}", id.0);
                let code = match reason {
                    Reject::Unsupported => StatusCode::SSH_FX_OP_UNSUPPORTED,
                    Reject::Unnegotiated | Reject::TooBig { .. } => {
                        StatusCode::SSH_FX_FAILURE
                    }
                };
                self.status(id, code, "")
            }
        }
    }

    fn respond(&mut self, id: ReqId, r: &Response) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        debug!("Outgoing: Writing {:?} id {}", r.sftp_num(), id.0);
        write_packet(&mut self.out, |v| r.encode(id, v))
    }

    /// Sends a STATUS. `msg` may be empty.
    pub fn status(&mut self, id: ReqId, code: StatusCode, msg: &str) -> Result<()> {
        let st = Status { code, message: msg.into(), lang: "".into() };
        self.respond(id, &Response::Status(st))
    }

    pub fn handle(&mut self, id: ReqId, handle: &[u8]) -> Result<()> {
        if handle.len() > MAX_HANDLE_LEN {
            return Err(Error::BadUsage { msg: "handle too large (> 256 bytes)" });
        }
        let h = HandleArg { handle: FileHandle(BinString(handle)) };
        self.respond(id, &Response::Handle(h))
    }

    pub fn data(&mut self, id: ReqId, data: &[u8]) -> Result<()> {
        self.respond(id, &Response::Data(Data { data: BinString(data) }))
    }

    pub fn name(&mut self, id: ReqId, entries: &[DirEntry]) -> Result<()> {
        let names = entries
            .iter()
            .map(|e| NameEntry {
                filename: e.filename.as_str().into(),
                longname: e.longname.as_str().into(),
                attrs: e.attrs.clone(),
            })
            .collect();
        self.respond(id, &Response::Name(Name(names)))
    }

    pub fn attrs(&mut self, id: ReqId, attrs: &Attrs) -> Result<()> {
        self.respond(id, &Response::Attrs(AttrsReply { attrs: attrs.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftplog::init_test_log;

    fn packet(num: u8, body: &[u8]) -> Vec<u8> {
        let mut v = ((body.len() + 1) as u32).to_be_bytes().to_vec();
        v.push(num);
        v.extend_from_slice(body);
        v
    }

    fn drain(s: &mut ServerSession) -> Vec<u8> {
        let mut b = vec![0u8; 64 * 1024];
        let l = s.output(&mut b);
        b.truncate(l);
        b
    }

    #[test]
    fn init_gets_version() {
        init_test_log();
        let mut s = ServerSession::new(SessionConfig::default());
        s.input(&packet(1, &[0, 0, 0, 3])).unwrap();
        assert_eq!(drain(&mut s), [0, 0, 0, 5, 2, 0, 0, 0, 3]);
        assert_eq!(s.client_version(), Some(3));
    }

    #[test]
    fn held_request_stops_input() {
        init_test_log();
        let mut s = ServerSession::new(SessionConfig::default());
        let mut input = packet(1, &[0, 0, 0, 3]);
        input.extend(packet(16, &[0, 0, 0, 1, 0, 0, 0, 1, b'.']));
        let second = packet(15, &[0, 0, 0, 2, 0, 0, 0, 1, b'd']);
        input.extend(&second);

        let l = s.input(&input).unwrap();
        assert_eq!(l, input.len() - second.len());
        assert!(!s.is_input_ready());
        let p = s.take_request().unwrap();
        let (id, req) = p.decode(false).unwrap();
        assert_eq!(id, ReqId(1));
        assert!(matches!(req, Request::RealPath(_)));

        s.input(&input[l..]).unwrap();
        let p = s.take_request().unwrap();
        assert!(matches!(p.decode(false).unwrap().1, Request::Rmdir(_)));
    }

    #[test]
    fn rejected_requests_answered() {
        init_test_log();
        let mut s = ServerSession::new(SessionConfig::default());
        // before INIT
        s.input(&packet(17, &[0, 0, 0, 4, 0, 0, 0, 1, b'/'])).unwrap();
        let out = drain(&mut s);
        assert_eq!(out[4], 101);
        assert_eq!(out[5..9], [0, 0, 0, 4]);
        assert_eq!(out[9..13], [0, 0, 0, 4], "FAILURE");

        s.input(&packet(1, &[0, 0, 0, 3])).unwrap();
        drain(&mut s);
        s.input(&packet(200, &[0, 0, 0, 5, 0, 0, 0, 1, b'x'])).unwrap();
        let out = drain(&mut s);
        assert_eq!(out[5..9], [0, 0, 0, 5]);
        assert_eq!(out[9..13], [0, 0, 0, 8], "OP_UNSUPPORTED");
        assert!(s.is_input_ready());
    }

    #[test]
    fn symlink_swapped_for_openssh() {
        let body = [0, 0, 0, 3, 0, 0, 0, 1, b'a', 0, 0, 0, 1, b'b'];
        let p = RequestPacket { num: SftpNum::SSH_FXP_SYMLINK, body: body.to_vec() };
        match p.decode(true).unwrap().1 {
            Request::Symlink(sl) => {
                assert_eq!(sl.linkpath.as_str().unwrap(), "b");
                assert_eq!(sl.targetpath.as_str().unwrap(), "a");
            }
            r => panic!("unexpected {r:?}"),
        }
        match p.decode(false).unwrap().1 {
            Request::Symlink(sl) => assert_eq!(sl.linkpath.as_str().unwrap(), "a"),
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn responders() {
        let mut s = ServerSession::new(SessionConfig::default());
        s.handle(ReqId(1), &[9; 4]).unwrap();
        assert_eq!(drain(&mut s), [0, 0, 0, 13, 102, 0, 0, 0, 1, 0, 0, 0, 4, 9, 9, 9, 9]);
        assert!(matches!(
            s.handle(ReqId(1), &[0; 257]),
            Err(Error::BadUsage { .. })
        ));

        s.status(ReqId(2), StatusCode::SSH_FX_EOF, "").unwrap();
        assert_eq!(
            drain(&mut s),
            [0, 0, 0, 17, 101, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]
        );

        let entries = [DirEntry {
            filename: "f".into(),
            longname: "-rw f".into(),
            attrs: Attrs::with_mode(0o100644),
        }];
        s.name(ReqId(3), &entries).unwrap();
        let out = drain(&mut s);
        assert_eq!(out[4], 104);
        assert_eq!(out[9..13], [0, 0, 0, 1]);
    }

    #[test]
    fn bad_request_fails_session() {
        init_test_log();
        let mut s = ServerSession::new(SessionConfig::default());
        s.input(&packet(1, &[0, 0, 0, 3])).unwrap();
        drain(&mut s);
        // OPEN with a truncated filename
        s.input(&packet(3, &[0, 0, 0, 6, 0, 0, 0, 9, b'x'])).unwrap();
        let p = s.take_request().unwrap();
        let e = p.decode(false).unwrap_err();
        assert!(matches!(e, Error::RanOut));
        s.bad_request(&p, e);
        assert!(s.is_closed());
        let out = drain(&mut s);
        assert_eq!(out[5..9], [0, 0, 0, 6]);
        assert!(s.input(&[0]).is_err());
    }

    #[test]
    fn pauses_at_high_water() {
        init_test_log();
        let conf = SessionConfig { high_water: 20, ..Default::default() };
        let mut s = ServerSession::new(conf);
        s.input(&packet(1, &[0, 0, 0, 3])).unwrap();
        // VERSION alone is below the mark
        assert!(!s.is_paused());
        s.status(ReqId(1), StatusCode::SSH_FX_OK, "").unwrap();
        assert!(s.is_paused());
        assert_eq!(drain(&mut s).len(), 9 + 21);
        assert!(!s.is_paused());
    }

    #[test]
    fn old_client_rejected() {
        let mut s = ServerSession::new(SessionConfig::default());
        let r = s.input(&packet(1, &[0, 0, 0, 2]));
        assert!(matches!(r, Err(Error::Incompatible { version: 2 })));
        assert!(s.is_closed());
        assert!(drain(&mut s).is_empty());
    }
}
