//! Prometheus metrics for the poll service.
//!
//! [`PollMetrics`] owns a dedicated [`Registry`]; [`PollMetrics::encode`]
//! renders it in the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use lcap_poller::{Alert, PollOutcome};

pub struct PollMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Polls this node called.
    pub polls_called: IntCounter,
    /// Finished polls, by kind and result.
    pub polls_finished: IntCounterVec,
    /// Votes counted in finished polls.
    pub votes_tallied: IntCounter,
    /// Hash requests the scheduler refused.
    pub hash_refusals: IntCounter,
    pub hashes_run: IntCounter,
    /// Operator alerts, by kind.
    pub alerts: IntCounterVec,
    pub messages_received: IntCounter,
    pub messages_sent: IntCounter,
    /// Inbound messages the manager rejected.
    pub messages_rejected: IntCounter,
    /// Outbound messages the transport failed to deliver.
    pub send_failures: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub active_polls: IntGauge,
    /// Hash tasks admitted but not yet completed.
    pub hash_backlog: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of one hash, in milliseconds.
    pub hash_time_ms: Histogram,
}

impl PollMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_called = register_int_counter_with_registry!(
            Opts::new("lcap_polls_called_total", "Polls called by this node"),
            registry
        )?;
        let polls_finished = register_int_counter_vec_with_registry!(
            Opts::new("lcap_polls_finished_total", "Finished polls by kind and result"),
            &["kind", "result"],
            registry
        )?;
        let votes_tallied = register_int_counter_with_registry!(
            Opts::new("lcap_votes_tallied_total", "Votes counted in finished polls"),
            registry
        )?;
        let hash_refusals = register_int_counter_with_registry!(
            Opts::new("lcap_hash_refusals_total", "Hash requests refused by the scheduler"),
            registry
        )?;
        let hashes_run = register_int_counter_with_registry!(
            Opts::new("lcap_hashes_run_total", "Hashes run by the workers"),
            registry
        )?;
        let alerts = register_int_counter_vec_with_registry!(
            Opts::new("lcap_alerts_total", "Operator alerts by kind"),
            &["kind"],
            registry
        )?;
        let messages_received = register_int_counter_with_registry!(
            Opts::new("lcap_messages_received_total", "Peer messages received"),
            registry
        )?;
        let messages_sent = register_int_counter_with_registry!(
            Opts::new("lcap_messages_sent_total", "Peer messages handed to the transport"),
            registry
        )?;
        let messages_rejected = register_int_counter_with_registry!(
            Opts::new("lcap_messages_rejected_total", "Peer messages the poll manager rejected"),
            registry
        )?;
        let send_failures = register_int_counter_with_registry!(
            Opts::new("lcap_send_failures_total", "Messages the transport failed to send"),
            registry
        )?;
        let active_polls = register_int_gauge_with_registry!(
            Opts::new("lcap_active_polls", "Polls currently running"),
            registry
        )?;
        let hash_backlog = register_int_gauge_with_registry!(
            Opts::new("lcap_hash_backlog", "Hash tasks admitted and not yet complete"),
            registry
        )?;
        // 1 ms to ~16 min.
        let hash_time_ms = register_histogram_with_registry!(
            HistogramOpts::new("lcap_hash_time_ms", "Hash wall time in milliseconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 20)?),
            registry
        )?;

        Ok(Self {
            registry,
            polls_called,
            polls_finished,
            votes_tallied,
            hash_refusals,
            hashes_run,
            alerts,
            messages_received,
            messages_sent,
            messages_rejected,
            send_failures,
            active_polls,
            hash_backlog,
            hash_time_ms,
        })
    }

    pub fn record_outcome(&self, outcome: &PollOutcome) {
        self.polls_finished
            .with_label_values(&[outcome.kind.as_str(), outcome.result.as_str()])
            .inc();
        self.votes_tallied
            .inc_by((outcome.agree + outcome.disagree) as u64);
    }

    pub fn record_alert(&self, alert: &Alert) {
        self.alerts
            .with_label_values(&[&format!("{:?}", alert.kind)])
            .inc();
    }

    /// The registry in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
