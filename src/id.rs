//! Proposal ids.
//!
//! The same id type orders Paxos rounds and correlates the two phases of a 2PC
//! transaction.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde_derive::{Deserialize, Serialize};

/// A round number with the proposing node in the low 16 bits.
///
/// Ordering is by round first and node second, so ids drawn by different
/// nodes in the same round never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub u64);

const NODE_BITS: u32 = 16;
const ROUND_MAX: u64 = u64::MAX >> NODE_BITS;

impl ProposalId {
    pub fn new(round: u64, node: u16) -> Self {
        Self(((round & ROUND_MAX) << NODE_BITS) | u64::from(node))
    }

    pub fn round(self) -> u64 {
        self.0 >> NODE_BITS
    }

    pub fn node(self) -> u16 {
        (self.0 & u64::from(u16::MAX)) as u16
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round(), self.node())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall clock ids for one node. They never repeat or go backwards, even when
/// two are drawn in the same millisecond.
#[derive(Debug)]
pub struct IdGenerator {
    node: u16,
    /// Last round handed out.
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new(node: u16) -> Self {
        Self {
            node,
            last: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> ProposalId {
        let now = now_millis();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            // The closure always returns Some.
            .unwrap_or_else(|last| last);
        ProposalId::new(now.max(prev + 1), self.node)
    }
}
