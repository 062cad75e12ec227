//! # aerowire
//!
//! An event-driven client for the Aerospike/Citrusleaf binary protocol:
//! - Bit-exact request/response codec with RIPEMD-160 record digests
//! - One non-blocking state machine per request, resumed on readiness events
//! - Deadlines, retry on network failure, and one-shot writes
//! - Exactly one completion callback per request
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Caller                                │
//! │          get / get_all / put / delete / operate              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Command + callback
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Engine                                  │
//! │   encode → resolve node → acquire conn → write → read        │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │  Protocol   │        │   Cluster   │        │   Reactor   │
//! │   (codec)   │        │ (dir+pool)  │        │ (readiness, │
//! └─────────────┘        └─────────────┘        │   timers)   │
//!                                               └──────▲──────┘
//!                                                      │ events
//!                                               ┌──────┴──────┐
//!                                               │   Driver    │
//!                                               └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AeroError, Result};
pub use config::Config;
pub use engine::{completion_channel, Completion, Engine, StatsSnapshot};
pub use network::{Driver, StaticCluster, TcpEngine, TokioReactor};
pub use protocol::{Bin, Key, Operation, ResultCode, Value, WriteParams, WritePolicy};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of aerowire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
