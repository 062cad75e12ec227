//! Static cluster directory
//!
//! A fixed list of nodes from the configured seed hosts, each with its own
//! idle connection pool and failure counter.
//!
//! ## Routing
//! - partition id (from the digest) modulo node count picks the home node
//! - nodes at the dun threshold are skipped in favour of the next one
//! - `None` when every node is dun
//!
//! ## Pool
//! - idle connections are reused most-recent first
//! - an idle connection that was closed by the peer is reported as stale
//! - releases beyond `max_idle_per_node` close the connection

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::config::Config;
use crate::error::{AeroError, Result};
use crate::protocol::Digest;

use super::{Acquire, Cluster, DunReason, TcpConn};

/// A server node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    index: usize,
    addr: SocketAddr,
}

impl Node {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[derive(Debug)]
struct NodeState {
    node: Node,
    idle: VecDeque<TcpConn>,
    dun_count: u32,
}

/// Cluster directory over a fixed set of hosts
#[derive(Debug)]
pub struct StaticCluster {
    nodes: Vec<NodeState>,

    /// Runtime new connections are registered with
    handle: Handle,

    max_idle_per_node: usize,
    dun_threshold: u32,
}

impl StaticCluster {
    /// Resolve the configured hosts into nodes
    ///
    /// Only name resolution happens here; connections are opened on demand.
    pub fn new(config: &Config, handle: Handle) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(AeroError::Config("no hosts configured".to_string()));
        }
        if config.dun_threshold == 0 {
            return Err(AeroError::Config("dun_threshold must be at least 1".to_string()));
        }

        let mut nodes = Vec::with_capacity(config.hosts.len());
        for host in &config.hosts {
            let addr = host
                .to_socket_addrs()
                .map_err(|e| AeroError::Config(format!("cannot resolve host '{}': {}", host, e)))?
                .next()
                .ok_or_else(|| AeroError::Config(format!("host '{}' has no addresses", host)))?;

            let node = Node {
                index: nodes.len(),
                addr,
            };
            tracing::info!("Node {} at {}", node.index, node.addr);
            nodes.push(NodeState {
                node,
                idle: VecDeque::new(),
                dun_count: 0,
            });
        }

        Ok(Self {
            nodes,
            handle,
            max_idle_per_node: config.max_idle_per_node,
            dun_threshold: config.dun_threshold,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|state| &state.node)
    }

    /// Whether the node is currently out of rotation
    pub fn is_dun(&self, node: &Node) -> bool {
        self.nodes
            .get(node.index)
            .map_or(true, |state| state.dun_count >= self.dun_threshold)
    }

    /// Idle connections pooled for the node
    pub fn idle_count(&self, node: &Node) -> usize {
        self.nodes.get(node.index).map_or(0, |state| state.idle.len())
    }

    /// Put every dun node back into rotation
    ///
    /// Returns the number of nodes revived.
    pub fn tend(&mut self) -> usize {
        let mut revived = 0;
        for state in &mut self.nodes {
            if state.dun_count >= self.dun_threshold {
                tracing::info!(
                    "Reviving node {} at {} after {} failures",
                    state.node.index,
                    state.node.addr,
                    state.dun_count
                );
                state.dun_count = 0;
                revived += 1;
            }
        }
        revived
    }

    /// Start a non-blocking connect
    ///
    /// The connection is handed out while the handshake is still in flight.
    /// The first write readiness completes it; a refused or unreachable peer
    /// shows up as an error on the first send.
    fn connect(&self, addr: SocketAddr) -> io::Result<TcpConn> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;

        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(e),
        }

        let _guard = self.handle.enter();
        Ok(TcpConn::new(TcpStream::from_std(socket.into())?))
    }
}

impl Cluster for StaticCluster {
    type Node = Node;
    type Conn = TcpConn;

    fn resolve_node(&mut self, _namespace: &str, digest: &Digest, _is_write: bool) -> Option<Node> {
        let count = self.nodes.len();
        let home = usize::from(digest.partition_id()) % count;

        (0..count)
            .map(|offset| &self.nodes[(home + offset) % count])
            .find(|state| state.dun_count < self.dun_threshold)
            .map(|state| state.node.clone())
    }

    fn acquire_connection(&mut self, node: &Node) -> Acquire<TcpConn> {
        let Some(state) = self.nodes.get_mut(node.index) else {
            return Acquire::Unavailable;
        };

        if let Some(conn) = state.idle.pop_back() {
            if conn.is_stale() {
                tracing::debug!("Discarding stale connection to {}", node.addr);
                return Acquire::Stale;
            }
            return Acquire::Ready { conn, fresh: false };
        }

        match self.connect(node.addr) {
            Ok(conn) => {
                tracing::debug!("Opened connection to {}", node.addr);
                Acquire::Ready { conn, fresh: true }
            }
            Err(e) => {
                tracing::warn!("Connect to {} failed: {}", node.addr, e);
                Acquire::Unavailable
            }
        }
    }

    fn release_connection(&mut self, node: &Node, conn: TcpConn) {
        match self.nodes.get_mut(node.index) {
            Some(state) if state.idle.len() < self.max_idle_per_node => state.idle.push_back(conn),
            _ => tracing::trace!("Pool for {} full, closing connection", node.addr),
        }
    }

    fn destroy_connection(&mut self, conn: TcpConn) {
        drop(conn);
    }

    fn mark_healthy(&mut self, node: &Node) {
        if let Some(state) = self.nodes.get_mut(node.index) {
            state.dun_count = 0;
        }
    }

    fn mark_unhealthy(&mut self, node: &Node, reason: DunReason) {
        let threshold = self.dun_threshold;
        if let Some(state) = self.nodes.get_mut(node.index) {
            state.dun_count = state.dun_count.saturating_add(1);
            if state.dun_count == threshold {
                tracing::warn!(
                    "Node {} at {} out of rotation ({:?})",
                    node.index,
                    node.addr,
                    reason
                );
            } else {
                tracing::debug!("Node {} dun ({:?}), count {}", node.index, reason, state.dun_count);
            }
        }
    }
}

fn connect_in_progress(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
