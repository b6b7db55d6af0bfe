//! rsvalkey — a Valkey/Redis Cluster client.
//!
//! The client keeps a live view of the cluster topology (nodes and the
//! 16384-slot routing table), hashes each command's first key to pick the
//! owning shard, and transparently follows `MOVED`/`ASK` redirections with a
//! bounded retry budget. Blocking ([`ClusterClient`]) and async
//! ([`AsyncClusterClient`]) front ends share the same core.
//!
//! ```no_run
//! use rsvalkey::ClusterClient;
//!
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001")?;
//! client.command(&["SET", "{user:1}:name", "amy"])?;
//! let reply = client.command(&["GET", "{user:1}:name"])?;
//! assert_eq!(reply.as_str(), Some("amy"));
//! # Ok::<(), rsvalkey::RsvalkeyError>(())
//! ```

pub mod cluster;
pub(crate) mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod resp;
pub mod runtime;
pub mod slot;

pub use cluster::{AsyncClusterClient, ClusterClient, Node, NodeIterator, Role, SlotRange};
pub use config::{ClusterConfig, ClusterEvent, IpPreference};
#[cfg(feature = "tls")]
pub use config::TlsSettings;
pub use error::{Result, RsvalkeyError, ServerErrorKind};
pub use resp::types::RespValue;
pub use slot::{hash_slot, SLOT_COUNT};
