//! Poll engine: the poll/vote subsystem that audits archival units against peers.
//!
//! A node calls polls on content it holds and votes in polls other peers call.
//! Every vote is a digest of the content seeded with the poll's challenge and the
//! voter's verifier, so it cannot be precomputed or replayed. Tallies decide
//! whether the local copy agrees with the population and drive reputation
//! changes, verify polls, name reconciliation and (in V3) block repairs.
//!
//! ## Module overview
//!
//! - [`manager`]: registry of running polls, admission, conflict checks, dispatch.
//! - [`poll`]: the tagged poll and its per-kind strategy table.
//! - `v1`: name/content/verify polls of the broadcast protocol.
//! - [`v3`]: the invited-voter protocol (poller and voter roles).
//! - [`factory`]: per-version poll creation and duration selection.
//! - [`tally`] / [`vote`]: votes, weights, and the result rules.
//! - [`spec`]: poll specs and the range-overlap rules behind conflict checks.
//! - [`hashing`] / [`hash_scheduler`]: digest jobs and the time-budget scheduler.
//! - [`reconcile`]: name-list divergence after a lost name poll.
//! - [`repair`] / [`transfers`]: who may receive repairs from us.
//! - [`collab`] / [`event`] / [`context`]: the seams to the rest of the node.
//! - [`status`]: serializable snapshots for status surfaces.
//! - [`config`]: tunables with TOML defaults.

pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod factory;
pub mod hash_scheduler;
pub mod hashing;
pub mod manager;
pub mod poll;
pub mod reconcile;
pub mod repair;
mod replay;
pub mod spec;
pub mod status;
pub mod tally;
pub mod transfers;
mod v1;
pub mod v3;
pub mod vote;

pub use collab::{
    ContentRange, ContentSource, IdentityManager, ReputationDelta, Transport, INITIAL_REPUTATION,
    MAX_REPUTATION,
};
pub use config::{EngineConfig, PollConfig, RepairConfig, SchedulerConfig, V3Config};
pub use context::{PollCtx, PollRequest, SecretRegistry};
pub use error::PollError;
pub use event::{Alert, AlertKind, Environment, HashPurpose, PollEvent, PollOutcome, PollTimer};
pub use factory::{PollFactory, V1PollFactory, V3PollFactory};
pub use hash_scheduler::{HashScheduler, HashTaskId};
pub use hashing::{block_digest, blocks_digest, HashInput, HashOutput, HashRequest};
pub use manager::PollManager;
pub use poll::{Poll, PollState};
pub use reconcile::Reconciliation;
pub use repair::{RepairChannel, RepairPolicy};
pub use spec::{PollSpec, RangeRelation, AU_URL};
pub use status::{PeerStatusRow, PollStatusRow, StatusSnapshot, VoteStatusRow};
pub use tally::{lock_tally, PollTally, SharedTally, TallyParams, TallyResult, VoteRecord};
pub use transfers::ReputationTransfers;
pub use v3::{PeerStatus, PollerStatus, VoterStatus};
pub use vote::Vote;
