//! Outstanding request tracking, keyed by request id.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::proto::ReqId;

/// Allocates request ids and holds per-request state `P` until the
/// matching response arrives.
///
/// Ids increase by one for each request and wrap at `u32::MAX`.
/// An id still in use is skipped.
#[derive(Debug)]
pub(crate) struct RequestTable<P> {
    next: u32,
    /// Most requests that can be outstanding, every id in use
    limit: u64,
    pending: BTreeMap<u32, P>,
}

impl<P> Default for RequestTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> RequestTable<P> {
    pub fn new() -> Self {
        Self::with_first_id(0)
    }

    pub fn with_first_id(next: u32) -> Self {
        Self { next, limit: 1 << 32, pending: BTreeMap::new() }
    }

    /// Stores `p` under a fresh id.
    pub fn allocate(&mut self, p: P) -> Result<ReqId> {
        if self.pending.len() as u64 >= self.limit {
            return Err(Error::msg("Request ids exhausted"));
        }
        let mut id = self.next;
        while self.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next = id.wrapping_add(1);
        self.pending.insert(id, p);
        Ok(ReqId(id))
    }

    pub fn get(&self, id: ReqId) -> Option<&P> {
        self.pending.get(&id.0)
    }

    /// Removes and returns the state for a response's id.
    /// `None` for an unknown id.
    pub fn resolve(&mut self, id: ReqId) -> Option<P> {
        self.pending.remove(&id.0)
    }

    /// Removes all outstanding requests, in id order.
    pub fn drain(&mut self) -> impl Iterator<Item = (ReqId, P)> {
        core::mem::take(&mut self.pending).into_iter().map(|(k, v)| (ReqId(k), v))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids() {
        let mut t = RequestTable::new();
        assert_eq!(t.allocate('a').unwrap(), ReqId(0));
        assert_eq!(t.allocate('b').unwrap(), ReqId(1));
        assert_eq!(t.resolve(ReqId(0)), Some('a'));
        assert_eq!(t.resolve(ReqId(0)), None);
        assert_eq!(t.allocate('c').unwrap(), ReqId(2));
        assert_eq!(t.get(ReqId(2)), Some(&'c'));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn wrap_skips_pending() {
        let mut t = RequestTable::with_first_id(u32::MAX - 1);
        assert_eq!(t.allocate(1).unwrap(), ReqId(u32::MAX - 1));
        assert_eq!(t.allocate(2).unwrap(), ReqId(u32::MAX));
        assert_eq!(t.allocate(3).unwrap(), ReqId(0));
        // wrap around again onto still-pending ids
        t.next = u32::MAX - 1;
        t.resolve(ReqId(u32::MAX));
        assert_eq!(t.allocate(4).unwrap(), ReqId(u32::MAX));
        assert_eq!(t.allocate(5).unwrap(), ReqId(1));
    }

    #[test]
    fn exhausted_ids_fail() {
        let mut t = RequestTable::with_first_id(u32::MAX);
        t.limit = 3;
        for i in 0..3 {
            t.allocate(i).unwrap();
        }
        // would otherwise search for a free id forever
        assert!(t.allocate(3).is_err());
        assert_eq!(t.len(), 3);
        t.resolve(ReqId(0));
        assert_eq!(t.allocate(4).unwrap(), ReqId(2));
    }

    #[test]
    fn drain_empties() {
        let mut t = RequestTable::new();
        for i in 0..5 {
            t.allocate(i).unwrap();
        }
        let d: Vec<_> = t.drain().collect();
        assert_eq!(d.len(), 5);
        assert_eq!(d[4], (ReqId(4), 4));
        assert!(t.is_empty());
    }
}
