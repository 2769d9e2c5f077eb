//! Poll engine tunables.
//!
//! Every section deserialises from TOML with per-field defaults, so a node
//! config only needs to name the values it changes.

use lcap_types::time::{DAY, MINUTE, SECOND, WEEK};
use serde::{Deserialize, Serialize};

use crate::PollError;

/// V1 poll parameters and the shared tally thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Minimum number of counted votes for a decisive result.
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Fraction of votes the winning side needs; below it the poll is too close.
    #[serde(default = "default_vote_margin")]
    pub vote_margin: f64,

    /// Average disagreeing weight below which a loss is untrusted.
    #[serde(default = "default_trusted_weight")]
    pub trusted_weight: u32,

    /// Verify-poll probability factor for agreeing votes.
    #[serde(default = "default_agree_verify")]
    pub agree_verify: f64,

    /// Verify-poll probability factor for disagreeing votes.
    #[serde(default = "default_disagree_verify")]
    pub disagree_verify: f64,

    /// Average name poll duration (ms).
    #[serde(default = "default_name_poll_deadline")]
    pub name_poll_deadline: u64,

    /// Estimated time to hash a name listing (ms).
    #[serde(default = "default_name_hash_estimate")]
    pub name_hash_estimate: u64,

    #[serde(default = "default_content_poll_min")]
    pub content_poll_min: u64,

    #[serde(default = "default_content_poll_max")]
    pub content_poll_max: u64,

    #[serde(default = "default_duration_multiplier_min")]
    pub duration_multiplier_min: u64,

    #[serde(default = "default_duration_multiplier_max")]
    pub duration_multiplier_max: u64,

    /// This node's hash rate (bytes/ms). When it exceeds `slowest_hash_rate`
    /// content estimates are scaled up so slower peers can keep pace.
    #[serde(default)]
    pub my_hash_rate: Option<u64>,

    #[serde(default = "default_slowest_hash_rate")]
    pub slowest_hash_rate: u64,

    /// How long a verifier's secret is kept after its poll's deadline (ms).
    #[serde(default = "default_secret_slack")]
    pub secret_slack: u64,

    /// Number of completed polls kept for status and replay.
    #[serde(default = "default_recent_history")]
    pub recent_history: usize,

    /// Digest algorithm named in polls this node calls.
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
}

fn default_quorum() -> usize {
    5
}

fn default_vote_margin() -> f64 {
    0.75
}

fn default_trusted_weight() -> u32 {
    350
}

fn default_agree_verify() -> f64 {
    0.10
}

fn default_disagree_verify() -> f64 {
    0.80
}

fn default_name_poll_deadline() -> u64 {
    10 * MINUTE
}

fn default_name_hash_estimate() -> u64 {
    30 * SECOND
}

fn default_content_poll_min() -> u64 {
    3 * MINUTE
}

fn default_content_poll_max() -> u64 {
    5 * DAY
}

fn default_duration_multiplier_min() -> u64 {
    3
}

fn default_duration_multiplier_max() -> u64 {
    7
}

fn default_slowest_hash_rate() -> u64 {
    250
}

fn default_secret_slack() -> u64 {
    MINUTE * 60
}

fn default_recent_history() -> usize {
    100
}

fn default_hash_algorithm() -> String {
    lcap_crypto::DEFAULT_ALGORITHM.to_string()
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            vote_margin: default_vote_margin(),
            trusted_weight: default_trusted_weight(),
            agree_verify: default_agree_verify(),
            disagree_verify: default_disagree_verify(),
            name_poll_deadline: default_name_poll_deadline(),
            name_hash_estimate: default_name_hash_estimate(),
            content_poll_min: default_content_poll_min(),
            content_poll_max: default_content_poll_max(),
            duration_multiplier_min: default_duration_multiplier_min(),
            duration_multiplier_max: default_duration_multiplier_max(),
            my_hash_rate: None,
            slowest_hash_rate: default_slowest_hash_rate(),
            secret_slack: default_secret_slack(),
            recent_history: default_recent_history(),
            hash_algorithm: default_hash_algorithm(),
        }
    }
}

/// V3 poller/voter timing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct V3Config {
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    #[serde(default = "default_vote_multiplier")]
    pub vote_multiplier: u64,

    #[serde(default = "default_padding")]
    pub vote_padding: u64,

    #[serde(default = "default_tally_multiplier")]
    pub tally_multiplier: u64,

    #[serde(default = "default_padding")]
    pub tally_padding: u64,

    #[serde(default = "default_padding")]
    pub receipt_padding: u64,

    #[serde(default = "default_min_poll_duration")]
    pub min_poll_duration: u64,

    #[serde(default = "default_max_poll_duration")]
    pub max_poll_duration: u64,

    /// Growth factor between successive duration probes.
    #[serde(default = "default_extend_multiplier")]
    pub extend_multiplier: f64,

    /// Upper bound of the duration probe, as a multiple of the target.
    #[serde(default = "default_max_extend")]
    pub max_extend: u64,

    /// Fraction of the hash estimate a voter keeps free before the vote deadline.
    #[serde(default = "default_vote_send_hash_multiplier")]
    pub vote_send_hash_multiplier: f64,

    #[serde(default = "default_vote_send_padding")]
    pub vote_send_padding: u64,

    /// Invitations sent per poll, as a multiple of the quorum.
    #[serde(default = "default_invitation_multiplier")]
    pub invitation_multiplier: f64,

    #[serde(default = "default_min_nominations")]
    pub min_nominations: usize,

    #[serde(default = "default_max_nominations")]
    pub max_nominations: usize,

    /// Invite nominated peers that were not in the initial invitation set.
    #[serde(default = "default_true")]
    pub enable_outer_circle: bool,

    #[serde(default = "default_max_simultaneous_voters")]
    pub max_simultaneous_voters: usize,

    #[serde(default = "default_max_repairs")]
    pub max_repairs: usize,
}

fn default_vote_multiplier() -> u64 {
    4
}

fn default_tally_multiplier() -> u64 {
    5
}

fn default_padding() -> u64 {
    5 * MINUTE
}

fn default_min_poll_duration() -> u64 {
    10 * MINUTE
}

fn default_max_poll_duration() -> u64 {
    3 * WEEK
}

fn default_extend_multiplier() -> f64 {
    2.0
}

fn default_max_extend() -> u64 {
    10
}

fn default_vote_send_hash_multiplier() -> f64 {
    0.01
}

fn default_vote_send_padding() -> u64 {
    15 * SECOND
}

fn default_invitation_multiplier() -> f64 {
    1.5
}

fn default_min_nominations() -> usize {
    1
}

fn default_max_nominations() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_simultaneous_voters() -> usize {
    60
}

fn default_max_repairs() -> usize {
    1000
}

impl Default for V3Config {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            vote_multiplier: default_vote_multiplier(),
            vote_padding: default_padding(),
            tally_multiplier: default_tally_multiplier(),
            tally_padding: default_padding(),
            receipt_padding: default_padding(),
            min_poll_duration: default_min_poll_duration(),
            max_poll_duration: default_max_poll_duration(),
            extend_multiplier: default_extend_multiplier(),
            max_extend: default_max_extend(),
            vote_send_hash_multiplier: default_vote_send_hash_multiplier(),
            vote_send_padding: default_vote_send_padding(),
            invitation_multiplier: default_invitation_multiplier(),
            min_nominations: default_min_nominations(),
            max_nominations: default_max_nominations(),
            enable_outer_circle: default_true(),
            max_simultaneous_voters: default_max_simultaneous_voters(),
            max_repairs: default_max_repairs(),
        }
    }
}

/// When this node serves repairs to other peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether open-access AUs still require prior agreement.
    #[serde(default)]
    pub open_access_requires_agreement: bool,

    /// Serve any requester that arrives over a trusted channel.
    #[serde(default)]
    pub trusted_channel_bypass: bool,

    /// Check agreement on the requested URL instead of the whole AU.
    #[serde(default)]
    pub per_url_agreement: bool,

    #[serde(default = "default_min_percent_agreement")]
    pub min_percent_agreement: f64,

    /// Reputation transfers, each `"new,old"`.
    #[serde(default)]
    pub reputation_transfers: Vec<String>,
}

fn default_min_percent_agreement() -> f64 {
    0.5
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            open_access_requires_agreement: false,
            trusted_channel_bypass: false,
            per_url_agreement: false,
            min_percent_agreement: default_min_percent_agreement(),
            reputation_transfers: Vec::new(),
        }
    }
}

/// Hash scheduler capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fraction of wall time reserved for everything other than hashing.
    #[serde(default = "default_overhead_load")]
    pub overhead_load: f64,

    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Number of blocking hash workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_overhead_load() -> f64 {
    0.2
}

fn default_max_tasks() -> usize {
    64
}

fn default_workers() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            overhead_load: default_overhead_load(),
            max_tasks: default_max_tasks(),
            workers: default_workers(),
        }
    }
}

/// All engine sections together.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub v3: V3Config,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Reject values that would make polls meaningless or never schedulable.
    pub fn validate(&self) -> Result<(), PollError> {
        let bad = |msg: &str| Err(PollError::InvalidConfig(msg.to_string()));
        if self.poll.quorum == 0 || self.v3.quorum == 0 {
            return bad("quorum must be at least 1");
        }
        if !(0.5..=1.0).contains(&self.poll.vote_margin) {
            return bad("vote_margin must be within [0.5, 1.0]");
        }
        for p in [self.poll.agree_verify, self.poll.disagree_verify] {
            if !(0.0..=1.0).contains(&p) {
                return bad("verify probabilities must be within [0, 1]");
            }
        }
        if self.poll.content_poll_min > self.poll.content_poll_max {
            return bad("content_poll_min exceeds content_poll_max");
        }
        if self.v3.min_poll_duration > self.v3.max_poll_duration {
            return bad("v3 min_poll_duration exceeds max_poll_duration");
        }
        if self.v3.extend_multiplier <= 1.0 {
            return bad("v3 extend_multiplier must exceed 1.0");
        }
        if self.v3.min_nominations > self.v3.max_nominations {
            return bad("v3 min_nominations exceeds max_nominations");
        }
        if !(0.0..1.0).contains(&self.scheduler.overhead_load) {
            return bad("scheduler overhead_load must be within [0, 1)");
        }
        if self.scheduler.max_tasks == 0 || self.scheduler.workers == 0 {
            return bad("scheduler needs at least one task slot and one worker");
        }
        if !(0.0..=1.0).contains(&self.repair.min_percent_agreement) {
            return bad("repair min_percent_agreement must be within [0, 1]");
        }
        lcap_crypto::algorithm_by_name(&self.poll.hash_algorithm)?;
        Ok(())
    }
}
