//! Nodes wired together over the loopback hub, running on the real clock.
//!
//! V3 timing is shrunk so an audit finishes in about a second.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lcap_node::{AuConfig, LcapNode, LoopbackHub, NodeConfig, NodeError};
use lcap_nullables::{NullContentSource, NullIdentityManager, NullNetwork};
use lcap_poller::{PollError, PollSpec, TallyResult, AU_URL};
use lcap_types::{PeerId, PollKind};

const BASE_URL: &str = "http://journal.example.org";
const WAIT: Duration = Duration::from_secs(20);

fn write_au(dir: &Path, tampered: bool) {
    fs::create_dir_all(dir.join("issue1")).unwrap();
    fs::write(dir.join("index.html"), b"<html>contents</html>").unwrap();
    fs::write(dir.join("issue1/article.html"), b"an article").unwrap();
    let tail: &[u8] = if tampered { b"garbage" } else { b"an erratum" };
    fs::write(dir.join("issue1/erratum.html"), tail).unwrap();
}

fn config(id: &str, all: &[&str], dir: &Path) -> NodeConfig {
    let mut config = NodeConfig {
        node_id: id.into(),
        peers: all.iter().filter(|p| **p != id).map(|p| p.to_string()).collect(),
        archival_units: vec![AuConfig {
            id: "au1".into(),
            plugin: "org.lockss.plugin.Journal".into(),
            base_url: BASE_URL.into(),
            dir: dir.to_path_buf(),
            open_access: false,
        }],
        enable_metrics: true,
        housekeeping_secs: 1,
        ..NodeConfig::default()
    };
    config.v3.quorum = 2;
    config.v3.vote_padding = 200;
    config.v3.tally_padding = 200;
    config.v3.receipt_padding = 200;
    config.v3.min_poll_duration = 3_000;
    config.v3.max_poll_duration = 30_000;
    config.v3.vote_send_padding = 50;
    config
}

async fn start_network(
    ids: &[&str],
    tampered: Option<&str>,
) -> (Vec<tempfile::TempDir>, LoopbackHub, Vec<LcapNode>) {
    let hub = LoopbackHub::new();
    let mut dirs = Vec::new();
    let mut nodes = Vec::new();
    for id in ids {
        let dir = tempfile::tempdir().unwrap();
        write_au(dir.path(), tampered == Some(*id));
        nodes.push(LcapNode::start(config(id, ids, dir.path()), &hub).await.unwrap());
        dirs.push(dir);
    }
    (dirs, hub, nodes)
}

fn au_poll() -> PollSpec {
    PollSpec::new("au1", "org.lockss.plugin.Journal", AU_URL, PollKind::Poller)
}

async fn stop_all(nodes: &mut [LcapNode]) {
    for node in nodes {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn identical_copies_win_a_v3_audit() {
    let ids = ["alpha", "beta", "gamma", "delta"];
    let (_dirs, _hub, mut nodes) = start_network(&ids, None).await;
    let poller = nodes[0].handle();
    let mut outcomes = poller.subscribe_outcomes();

    let key = poller.call_poll(au_poll()).await.unwrap();
    let outcome = tokio::time::timeout(WAIT, async {
        loop {
            let outcome = outcomes.recv().await.unwrap();
            if outcome.key == key {
                return outcome;
            }
        }
    })
    .await
    .expect("audit should finish");

    assert!(outcome.caller_is_local);
    assert_eq!(outcome.result, TallyResult::Won);
    assert_eq!(outcome.agree, 3);
    assert_eq!(outcome.disagree, 0);
    assert!(outcome.repaired.is_empty());

    let metrics = nodes[0].metrics().unwrap().encode().unwrap();
    assert!(metrics.contains("lcap_polls_called_total 1"));
    let status = nodes[0].status_text().await.unwrap();
    assert!(status.contains("recent:"));

    stop_all(&mut nodes).await;
}

#[tokio::test]
async fn damaged_copy_loses_without_a_willing_repairer() {
    let ids = ["alpha", "beta", "gamma", "delta"];
    let (dirs, _hub, mut nodes) = start_network(&ids, Some("alpha")).await;
    let poller = nodes[0].handle();
    let mut outcomes = poller.subscribe_outcomes();

    let key = poller.call_poll(au_poll()).await.unwrap();
    let outcome = tokio::time::timeout(WAIT, async {
        loop {
            let outcome = outcomes.recv().await.unwrap();
            if outcome.key == key {
                return outcome;
            }
        }
    })
    .await
    .expect("audit should finish");

    // No voter has agreed with alpha before, so none will repair it.
    assert_eq!(outcome.result, TallyResult::Lost);
    assert!(outcome.repaired.is_empty());
    let erratum = dirs[0].path().join("issue1/erratum.html");
    assert_eq!(fs::read(erratum).unwrap(), b"garbage");

    stop_all(&mut nodes).await;
}

#[tokio::test]
async fn conflicting_poll_is_refused_and_abort_finishes_it() {
    let network = Arc::new(NullNetwork::new());
    let content = Arc::new(NullContentSource::new());
    content.add_au("au1", 10).put("http://journal.example.org/a.html", b"x".to_vec());
    let identity = Arc::new(
        NullIdentityManager::new(PeerId::new("solo")).with_peers([PeerId::new("peer1")]),
    );
    let config = NodeConfig {
        node_id: "solo".into(),
        peers: vec!["peer1".into()],
        ..NodeConfig::default()
    };
    let mut node = LcapNode::start_with(config, identity, content, network.clone())
        .await
        .unwrap();
    let handle = node.handle();
    let mut outcomes = handle.subscribe_outcomes();

    let key = handle.call_poll(au_poll()).await.unwrap();
    let again = handle.call_poll(au_poll()).await;
    assert!(matches!(
        again,
        Err(NodeError::Poll(PollError::Conflict { .. }))
    ));

    handle.abort(key.clone()).await.unwrap();
    let outcome = tokio::time::timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
    assert_eq!(outcome.key, key);
    assert!(matches!(
        handle.abort(key).await,
        Err(NodeError::Poll(PollError::UnknownPoll(_)))
    ));

    let json: serde_json::Value = serde_json::from_str(&node.status_json().await.unwrap()).unwrap();
    assert_eq!(json["local"], "solo");
    assert_eq!(json["stats"]["polls_called"], 1);

    node.stop().await.unwrap();
    assert!(matches!(handle.snapshot().await, Err(NodeError::ServiceStopped)));
}

#[tokio::test]
async fn stopped_node_leaves_the_hub() {
    let dir = tempfile::tempdir().unwrap();
    write_au(dir.path(), false);
    let hub = LoopbackHub::new();
    let mut node = LcapNode::start(config("alpha", &["alpha", "beta"], dir.path()), &hub)
        .await
        .unwrap();
    assert_eq!(hub.peers(), vec![PeerId::new("alpha")]);
    node.stop().await.unwrap();
    assert!(hub.peers().is_empty());
}

#[tokio::test]
async fn peer_history_is_saved_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    write_au(dir.path(), false);
    let history = dir.path().join("peers.json");
    let mut config = config("alpha", &["alpha", "beta"], dir.path());
    config.identity_file = Some(history.clone());

    let mut node = LcapNode::start(config, &LoopbackHub::new()).await.unwrap();
    node.stop().await.unwrap();
    assert!(history.exists());
}
