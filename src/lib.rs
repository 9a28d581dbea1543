//! GD Scheduler — group-discussion session scheduling.
//!
//! Assembles human and simulated participants into fixed-size discussion
//! rooms on a lobby timer, generates a per-room conversation script, and
//! paces that script into a shared transcript while reacting to live human
//! activity (barge-in, silence).
//!
//! Component map, leaves first:
//! - [`store`] — typed access to the five persisted collections
//! - [`textgen`] / [`scripts`] — text-generation client and script builder
//! - [`pacer`] — per-room turn delivery with barge-in handling
//! - [`allocator`] — waiting pool → rooms of fixed capacity
//! - [`lobby`] — waiting → active session lifecycle
//! - [`evaluation`] — post-hoc participant scoring
//! - [`server`] — the HTTP surface over all of the above

pub mod allocator;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod lobby;
pub mod pacer;
pub mod scripts;
pub mod server;
pub mod services;
pub mod store;
pub mod textgen;

#[cfg(test)]
pub mod testutil;

pub use error::{GdError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
