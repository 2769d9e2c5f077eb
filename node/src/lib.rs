//! LCAP node: hosts the poll engine and connects it to the outside world.
//!
//! The node is the runtime around [`lcap_poller::PollManager`]:
//! - a single poll-service actor that owns every poll and serializes events
//! - hash workers that run digest jobs off the actor
//! - peer reputation and agreement history, persisted between runs
//! - archival units served from directories on disk
//! - an in-process transport routing messages through the wire codec
//! - TOML configuration, structured logging and Prometheus metrics

pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod service;
pub mod shutdown;
pub mod status;
pub mod transport;

pub use config::{AuConfig, NodeConfig};
pub use content::{DirContentSource, DirRange};
pub use error::NodeError;
pub use identity::PeerRegistry;
pub use logging::{init_logging, LogFormat};
pub use metrics::PollMetrics;
pub use node::LcapNode;
pub use service::{PollService, PollServiceHandle, ServiceEvent, ServiceParts};
pub use shutdown::ShutdownController;
pub use transport::{LoopbackHub, LoopbackTransport};
