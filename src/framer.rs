//! Splits an inbound byte stream into SFTP packets.
//!
//! Input may arrive in arbitrary fragments. Packets that can't be
//! processed are reduced to their request id so that the session can
//! answer or fail them, the remaining bytes are skipped without
//! buffering.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use heapless::Vec as HVec;
use pretty_hex::PrettyHex;

use crate::proto::{ReqId, SftpNum};
use crate::sshwire::WireResult;

/// length and type
const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// Why a packet was reduced to its id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reject {
    /// Arrived before version negotiation
    Unnegotiated,
    /// Longer than the allowed packet length
    TooBig { size: usize },
    /// A request type that isn't served
    Unsupported,
}

#[derive(Debug)]
pub(crate) enum Framed {
    /// A complete packet. `body` follows the type byte.
    Packet { num: SftpNum, body: Vec<u8> },
    Rejected { num: SftpNum, id: ReqId, reason: Reject },
}

#[derive(Debug)]
enum RxState {
    /// Reading length and type
    Header,
    /// Accumulating a packet body into `body`
    Payload { num: SftpNum, want: usize },
    /// Reading the request id of a packet that won't be processed.
    /// `left` excludes the id.
    Bad { num: SftpNum, reason: Reject, left: usize },
    /// Skipping the rest of a packet
    Discard { left: usize },
    /// A fatal framing error occurred, no further input is accepted
    Failed,
}

/// What to do with a packet after its header is read
enum Action {
    Accept,
    Reject(Reject),
    Discard,
}

pub(crate) struct Framer {
    role: Role,
    /// Largest body length accepted, excluding the length field
    limit: usize,
    negotiated: bool,
    hdr: HVec<u8, HEADER_LEN>,
    id: HVec<u8, 4>,
    body: Vec<u8>,
    state: RxState,
}

impl Framer {
    pub fn new(role: Role, limit: usize) -> Self {
        Self {
            role,
            limit,
            negotiated: false,
            hdr: HVec::new(),
            id: HVec::new(),
            body: Vec::new(),
            state: RxState::Header,
        }
    }

    /// Whether INIT (server) or VERSION (client) has been received
    pub fn negotiated(&self) -> bool {
        self.negotiated
    }

    /// Whether a partial packet is buffered
    pub fn is_idle(&self) -> bool {
        matches!(self.state, RxState::Header) && self.hdr.is_empty()
    }

    /// Consumes input until a packet is complete or `buf` runs out.
    ///
    /// Returns the number of bytes consumed. A returned `Framed` should be
    /// handled before calling again with the remaining input. Errors are
    /// fatal to the session.
    pub fn input(&mut self, buf: &[u8]) -> Result<(usize, Option<Framed>)> {
        let mut r = buf;
        loop {
            let before = r.len();
            let ev = self.step(&mut r)?;
            let done = buf.len() - r.len();
            if ev.is_some() {
                return Ok((done, ev));
            }
            if r.is_empty() || r.len() == before {
                return Ok((done, None));
            }
        }
    }

    fn step(&mut self, r: &mut &[u8]) -> Result<Option<Framed>> {
        match self.state {
            RxState::Failed => Err(Error::SftpProtoError),

            RxState::Header => {
                let need = (HEADER_LEN - self.hdr.len()).min(r.len());
                let x;
                (x, *r) = r.split_at(need);
                self.hdr.extend_from_slice(x).trap()?;
                if self.hdr.len() == HEADER_LEN {
                    return self.header();
                }
                Ok(None)
            }

            RxState::Payload { num, want } => {
                let need = (want - self.body.len()).min(r.len());
                let x;
                (x, *r) = r.split_at(need);
                self.body.extend_from_slice(x);
                if self.body.len() == want {
                    self.state = RxState::Header;
                    let body = core::mem::take(&mut self.body);
                    trace!("{:?}", body.hex_dump());
                    return Ok(Some(Framed::Packet { num, body }));
                }
                Ok(None)
            }

            RxState::Bad { num, reason, left } => {
                let need = (4 - self.id.len()).min(r.len());
                let x;
                (x, *r) = r.split_at(need);
                self.id.extend_from_slice(x).trap()?;
                if self.id.len() < 4 {
                    return Ok(None);
                }
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.id);
                self.id.clear();
                self.state = if left > 0 {
                    RxState::Discard { left }
                } else {
                    RxState::Header
                };
                let id = ReqId(u32::from_be_bytes(b));
                Ok(Some(Framed::Rejected { num, id, reason }))
            }

            RxState::Discard { left } => {
                let skip = left.min(r.len());
                *r = &r[skip..];
                self.state = if left == skip {
                    RxState::Header
                } else {
                    RxState::Discard { left: left - skip }
                };
                Ok(None)
            }
        }
    }

    /// Decides what to do with a packet once its header is complete
    fn header(&mut self) -> Result<Option<Framed>> {
        let mut lb = [0u8; 4];
        lb.copy_from_slice(&self.hdr[..4]);
        let len = u32::from_be_bytes(lb) as usize;
        let num = SftpNum::from(self.hdr[4]);
        self.hdr.clear();

        if len == 0 {
            self.state = RxState::Failed;
            warn!("Zero length packet");
            return Err(Error::SftpProtoError);
        }
        let body_len = len - 1;
        trace!("packet {num:?} len {body_len}");

        let action = match self.classify(num, body_len) {
            Ok(a) => a,
            Err(e) => {
                self.state = RxState::Failed;
                return Err(e);
            }
        };

        self.state = match action {
            Action::Accept if body_len == 0 => {
                return Ok(Some(Framed::Packet { num, body: Vec::new() }));
            }
            Action::Accept => {
                self.body = Vec::with_capacity(body_len);
                RxState::Payload { num, want: body_len }
            }
            Action::Reject(reason) if body_len >= 4 => {
                RxState::Bad { num, reason, left: body_len - 4 }
            }
            Action::Reject(reason) => {
                // too short for a request id, nothing to answer
                debug!("Dropping short packet {num:?} {reason:?}");
                if body_len == 0 {
                    RxState::Header
                } else {
                    RxState::Discard { left: body_len }
                }
            }
            Action::Discard if body_len == 0 => RxState::Header,
            Action::Discard => RxState::Discard { left: body_len },
        };
        Ok(None)
    }

    fn classify(&mut self, num: SftpNum, body_len: usize) -> Result<Action> {
        let a = match self.role {
            Role::Server => {
                if num == SftpNum::SSH_FXP_INIT {
                    if self.negotiated {
                        warn!("Duplicate INIT");
                        return Err(Error::PacketWrong);
                    }
                    if body_len > self.limit {
                        return Err(Error::BigPacket { size: body_len });
                    }
                    self.negotiated = true;
                    Action::Accept
                } else if !self.negotiated {
                    Action::Reject(Reject::Unnegotiated)
                } else if body_len > self.limit {
                    Action::Reject(Reject::TooBig { size: body_len })
                } else if num == SftpNum::SSH_FXP_EXTENDED {
                    Action::Reject(Reject::Unsupported)
                } else if num.is_request() {
                    Action::Accept
                } else {
                    debug!("Ignoring unexpected packet {num:?}");
                    Action::Discard
                }
            }

            Role::Client => {
                if num == SftpNum::SSH_FXP_VERSION {
                    if self.negotiated {
                        warn!("Duplicate VERSION");
                        return Err(Error::PacketWrong);
                    }
                    if body_len > self.limit {
                        return Err(Error::BigPacket { size: body_len });
                    }
                    self.negotiated = true;
                    Action::Accept
                } else if !self.negotiated {
                    warn!("Discarding {num:?} received before VERSION");
                    Action::Discard
                } else if body_len > self.limit {
                    Action::Reject(Reject::TooBig { size: body_len })
                } else if num.is_response() {
                    Action::Accept
                } else {
                    debug!("Ignoring unexpected packet {num:?}");
                    Action::Discard
                }
            }
        };
        Ok(a)
    }
}

/// Appends a packet to `out`, the type and body written by `f`.
///
/// The length field is filled in afterwards. `out` is left unchanged
/// on failure.
pub(crate) fn write_packet<F>(out: &mut Vec<u8>, f: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> WireResult<()>,
{
    let start = out.len();
    out.extend_from_slice(&[0u8; 4]);
    let r = f(out).map_err(Error::from).and_then(|()| {
        let len = out.len() - start - 4;
        u32::try_from(len).map_err(|_| Error::BigPacket { size: len })
    });
    match r {
        Ok(len) => {
            out[start..start + 4].copy_from_slice(&len.to_be_bytes());
            trace!("write packet len {len}");
            Ok(())
        }
        Err(e) => {
            out.truncate(start);
            Err(e)
        }
    }
}
