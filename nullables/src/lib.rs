//! Nullable infrastructure for deterministic poll testing.
//!
//! Everything the poll engine touches outside itself (clock, randomness,
//! network, archived content, peer identities) has a stand-in here that:
//! - Returns deterministic values
//! - Can be controlled programmatically
//! - Never touches the filesystem or network
//!
//! [`NullEnvironment`] drives one node by hand; [`Simulation`] runs several
//! nodes against each other on one simulated clock.

pub mod clock;
pub mod content;
pub mod environment;
pub mod identity;
pub mod network;
pub mod random;
pub mod sim;

pub use clock::NullClock;
pub use content::{NullAu, NullContentSource, NullRange};
pub use environment::NullEnvironment;
pub use identity::NullIdentityManager;
pub use network::{NullNetwork, SentMessage};
pub use random::NullRandom;
pub use sim::{SimNode, Simulation, DEFAULT_LATENCY};
