//! Network Module
//!
//! The seams between the request engine and the outside world.
//!
//! ## Architecture
//! - [`Cluster`]: maps a digest to a node and lends out pooled sockets
//! - [`Reactor`]: level-triggered readiness and per-request timers
//! - [`Socket`]: non-blocking send/recv on one connection
//!
//! The engine only talks to these traits. [`StaticCluster`], [`TokioReactor`]
//! and [`Driver`] are the concrete pieces used outside of tests.

mod cluster;
mod driver;
mod reactor;

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use crate::protocol::Digest;

pub use cluster::{Node, StaticCluster};
pub use driver::{Driver, TcpEngine};
pub use reactor::{TcpConn, TokioReactor};

/// Identity of an in-flight request
///
/// Ids are handed out in increasing order and never reused, so an event
/// carrying the id of a finished request matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Readiness a request is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Something the reactor observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The watched socket is ready for the registered interest
    Ready(RequestId),
    /// The request's deadline passed
    Timer(RequestId),
}

/// Why a node is being reported as degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DunReason {
    /// Send or receive failed on one of its connections
    NetworkError,
    /// A request to it ran out of time
    UserTimeout,
    /// No connection could be obtained for it
    RestartFd,
}

/// Result of asking the pool for a connection
#[derive(Debug)]
pub enum Acquire<C> {
    /// A usable connection; `fresh` is set when it was just opened
    Ready { conn: C, fresh: bool },
    /// A pooled connection turned out to be closed; ask again
    Stale,
    /// The node cannot supply a connection right now
    Unavailable,
}

/// A non-blocking connection
pub trait Socket {
    /// Send some prefix of `buf`; `WouldBlock` when the send buffer is full
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receive into `buf`; `Ok(0)` means the peer closed
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Cluster directory and connection pool
pub trait Cluster {
    type Node: Clone + Debug;
    type Conn: Socket;

    /// Pick the node serving `digest`, or `None` if nothing can serve it now
    fn resolve_node(&mut self, namespace: &str, digest: &Digest, is_write: bool) -> Option<Self::Node>;

    fn acquire_connection(&mut self, node: &Self::Node) -> Acquire<Self::Conn>;

    /// Return a healthy connection for reuse
    fn release_connection(&mut self, node: &Self::Node, conn: Self::Conn);

    /// Close a connection whose state is unknown
    fn destroy_connection(&mut self, conn: Self::Conn);

    fn mark_healthy(&mut self, node: &Self::Node);

    fn mark_unhealthy(&mut self, node: &Self::Node, reason: DunReason);
}

/// Readiness and timer registration
///
/// Readiness interest is one-shot: once reported, it must be registered
/// again. Registering replaces any earlier interest for the same request.
pub trait Reactor<S> {
    fn watch(&mut self, id: RequestId, socket: &S, interest: Interest) -> io::Result<()>;

    fn unwatch(&mut self, id: RequestId);

    fn arm_timer(&mut self, id: RequestId, after: Duration) -> io::Result<()>;

    fn cancel_timer(&mut self, id: RequestId);
}
