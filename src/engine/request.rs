//! In-flight request state

use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::network::{Cluster, RequestId};
use crate::protocol::codec::PROTO_HEADER_SIZE;
use crate::protocol::{Bin, Digest, ResultCode, WritePolicy};

/// What the caller receives when a request finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub result: ResultCode,
    /// Bins returned by the server; empty on any failure
    pub bins: Vec<Bin>,
    pub generation: u32,
}

impl Completion {
    pub(crate) fn failure(result: ResultCode) -> Self {
        Self {
            result,
            bins: Vec::new(),
            generation: 0,
        }
    }
}

/// Completion callback, invoked exactly once
pub type Callback = Box<dyn FnOnce(Completion)>;

/// A node and the connection borrowed from it for one attempt
pub(crate) struct Attempt<C: Cluster> {
    pub node: C::Node,
    pub conn: C::Conn,
}

/// Where a request is in its exchange
///
/// Every state past `AwaitingNode` owns the connection in use, so a request
/// holds a connection if and only if it is on the wire.
pub(crate) enum State<C: Cluster> {
    /// Waiting for a node or a connection
    AwaitingNode,
    Writing {
        io: Attempt<C>,
        written: usize,
    },
    ReadingHeader {
        io: Attempt<C>,
        header: [u8; PROTO_HEADER_SIZE],
        filled: usize,
    },
    ReadingBody {
        io: Attempt<C>,
        body: BytesMut,
        filled: usize,
    },
}

impl<C: Cluster> State<C> {
    pub fn name(&self) -> &'static str {
        match self {
            State::AwaitingNode => "awaiting-node",
            State::Writing { .. } => "writing",
            State::ReadingHeader { .. } => "reading-header",
            State::ReadingBody { .. } => "reading-body",
        }
    }

    pub fn attempt(&self) -> Option<&Attempt<C>> {
        match self {
            State::AwaitingNode => None,
            State::Writing { io, .. }
            | State::ReadingHeader { io, .. }
            | State::ReadingBody { io, .. } => Some(io),
        }
    }

    /// Give up the connection, if any, leaving `AwaitingNode` behind
    pub fn take_attempt(&mut self) -> Option<Attempt<C>> {
        match std::mem::replace(self, State::AwaitingNode) {
            State::AwaitingNode => None,
            State::Writing { io, .. }
            | State::ReadingHeader { io, .. }
            | State::ReadingBody { io, .. } => Some(io),
        }
    }
}

pub(crate) struct Request<C: Cluster> {
    pub id: RequestId,
    pub namespace: String,
    pub digest: Digest,
    pub is_write: bool,
    pub policy: WritePolicy,

    /// Encoded command, shared by every attempt
    pub wire: Bytes,

    pub started: Instant,
    /// Dispatch attempts so far
    pub attempts: u32,
    /// `None` for requests without a timeout
    pub deadline: Option<Instant>,

    pub state: State<C>,
    pub callback: Callback,
}

impl<C: Cluster> Request<C> {
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }
}
