//! LCAP daemon: entry point for running poll-service nodes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use lcap_node::{init_logging, LcapNode, LoopbackHub, NodeConfig, ShutdownController};
use lcap_nullables::Simulation;
use lcap_poller::{EngineConfig, PollOutcome, PollSpec};
use lcap_types::{PeerId, PollKind};

#[derive(Parser)]
#[command(name = "lcap-daemon", about = "LCAP poll/vote node daemon")]
struct Cli {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Overrides the level in the configuration file.
    #[arg(long, env = "LCAP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "LCAP_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run one or more nodes in this process, connected by an in-process hub.
    Run {
        /// TOML configuration, one per node. The first node calls the audits.
        #[arg(long = "config", required = true, env = "LCAP_CONFIG", value_delimiter = ',')]
        configs: Vec<PathBuf>,

        /// Collect Prometheus metrics on every node.
        #[arg(long, env = "LCAP_ENABLE_METRICS")]
        metrics: bool,

        /// Seconds between audits of every archival unit of the first node.
        /// No audits are called when unset.
        #[arg(long, env = "LCAP_AUDIT_EVERY")]
        audit_every: Option<u64>,
    },

    /// Run an audit among simulated peers on a virtual clock and print the outcome.
    Simulate {
        /// Number of peers, including the caller.
        #[arg(long, default_value_t = 6)]
        peers: usize,

        /// Peer (1-based index) whose copy of one page is damaged.
        #[arg(long)]
        tamper: Option<usize>,

        /// Poll kind to call: "content", "name" or "poller" (V3).
        #[arg(long, default_value = "poller")]
        kind: String,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Print outcomes as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML.
    Config,

    /// Validate a configuration file.
    CheckConfig { path: PathBuf },
}

fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let path_str = path.to_str().context("configuration path is not UTF-8")?;
    let config = NodeConfig::from_toml_file(path_str)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            configs,
            metrics,
            audit_every,
        } => {
            let mut loaded = Vec::with_capacity(configs.len());
            for path in &configs {
                let mut config = load_config(path)?;
                config.enable_metrics |= metrics;
                if let Some(level) = &cli.log_level {
                    config.log_level = level.clone();
                }
                if let Some(format) = &cli.log_format {
                    config.log_format = format.clone();
                }
                loaded.push(config);
            }
            let first = &loaded[0];
            init_logging(first.log_format()?, &first.log_level)?;
            run(loaded, audit_every).await
        }
        Command::Simulate {
            peers,
            tamper,
            kind,
            seed,
            json,
        } => {
            lcap_utils::init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            simulate(peers, tamper, &kind, seed, json)
        }
        Command::Config => {
            print!("{}", NodeConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::CheckConfig { path } => {
            let config = load_config(&path)?;
            println!(
                "{}: node {} with {} peers and {} archival units",
                path.display(),
                config.node_id,
                config.peers.len(),
                config.archival_units.len()
            );
            Ok(())
        }
    }
}

async fn run(configs: Vec<NodeConfig>, audit_every: Option<u64>) -> anyhow::Result<()> {
    let hub = LoopbackHub::new();
    let mut nodes = Vec::with_capacity(configs.len());
    for config in configs {
        tracing::info!(
            node = %config.node_id,
            aus = config.archival_units.len(),
            peers = config.peers.len(),
            "starting LCAP node"
        );
        nodes.push(LcapNode::start(config, &hub).await?);
    }

    let auditor = nodes[0].handle();
    let specs: Vec<PollSpec> = nodes[0]
        .config()
        .archival_units
        .iter()
        .map(|au| PollSpec::for_au(au.id.clone(), au.plugin.clone(), PollKind::Poller))
        .collect();
    let mut outcomes = auditor.subscribe_outcomes();
    let audits = tokio::spawn(async move {
        let Some(secs) = audit_every else {
            return;
        };
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        loop {
            ticker.tick().await;
            for spec in &specs {
                match auditor.call_poll(spec.clone()).await {
                    Ok(key) => tracing::info!(poll = %key, au = %spec.au_id, "audit called"),
                    Err(e) => tracing::warn!(au = %spec.au_id, error = %e, "audit not called"),
                }
            }
        }
    });
    let reporter = tokio::spawn(async move {
        while let Ok(outcome) = outcomes.recv().await {
            if outcome.caller_is_local {
                tracing::info!(
                    poll = %outcome.key,
                    au = %outcome.spec.au_id,
                    result = outcome.result.as_str(),
                    agree = outcome.agree,
                    disagree = outcome.disagree,
                    repaired = outcome.repaired.len(),
                    "audit finished"
                );
            }
        }
    });

    ShutdownController::new().wait_for_signal().await;
    tracing::info!("shutdown signal received, stopping nodes");
    audits.abort();
    reporter.abort();

    if let Ok(text) = nodes[0].status_text().await {
        println!("{text}");
    }
    if let Some(metrics) = nodes[0].metrics() {
        tracing::debug!(metrics = %metrics.encode()?, "final metrics");
    }
    let mut failed = false;
    for node in &mut nodes {
        if let Err(e) = node.stop().await {
            tracing::error!(node = %node.local(), error = %e, "node did not stop cleanly");
            failed = true;
        }
    }
    if failed {
        bail!("some nodes did not stop cleanly");
    }
    tracing::info!("LCAP daemon exited cleanly");
    Ok(())
}

const SIM_AU: &str = "sim-au";
const SIM_PLUGIN: &str = "org.lockss.plugin.Simulated";
const SIM_BASE: &str = "http://sim.example.org";
const SIM_PAGES: &[(&str, &str)] = &[
    ("index.html", "table of contents"),
    ("article1.html", "first article"),
    ("article2.html", "second article"),
];

fn simulate(peers: usize, tamper: Option<usize>, kind: &str, seed: u64, json: bool) -> anyhow::Result<()> {
    if peers < 2 {
        bail!("a simulation needs at least two peers");
    }
    let kind = match kind.to_ascii_lowercase().as_str() {
        "content" => PollKind::Content,
        "name" => PollKind::Name,
        "poller" | "v3" => PollKind::Poller,
        other => bail!("cannot call {other:?} polls"),
    };
    let mut config = EngineConfig::default();
    config.v3.quorum = config.v3.quorum.min(peers - 1);
    config.poll.quorum = config.poll.quorum.min(peers - 1);

    let mut sim = Simulation::new(config, seed);
    let ids: Vec<PeerId> = (1..=peers)
        .map(|i| sim.add_node(&format!("peer{i}")))
        .collect::<Result<_, _>>()?;
    for (i, id) in ids.iter().enumerate() {
        let node = sim.node(id).context("simulated peer vanished")?;
        let au = node.content.add_au(SIM_AU, 1_000);
        for (path, body) in SIM_PAGES {
            let body = if tamper == Some(i + 1) && *path == "article2.html" {
                "damaged copy"
            } else {
                body
            };
            au.put(format!("{SIM_BASE}/{path}"), body.as_bytes().to_vec());
        }
    }

    let spec = match kind {
        PollKind::Poller => PollSpec::for_au(SIM_AU, SIM_PLUGIN, kind),
        _ => PollSpec::new(SIM_AU, SIM_PLUGIN, SIM_BASE, kind),
    };
    let caller = &ids[0];
    let key = sim.call_poll(caller, spec)?;
    let steps = sim.run_to_completion();
    tracing::info!(steps, "simulation finished");

    let outcomes: Vec<&PollOutcome> = sim.nodes().flat_map(|n| n.outcomes()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }
    for outcome in &outcomes {
        let marker = if outcome.key == key && outcome.caller_is_local { "*" } else { " " };
        println!(
            "{marker} {:<8} {:<9} {:<7} agree={} disagree={} repaired={}",
            outcome.kind.as_str(),
            outcome.spec.au_id,
            outcome.result.as_str(),
            outcome.agree,
            outcome.disagree,
            outcome.repaired.len()
        );
    }
    for node in sim.nodes() {
        for alert in node.alerts() {
            println!("! {} {:?}: {}", node.id, alert.kind, alert.detail);
        }
    }
    Ok(())
}
