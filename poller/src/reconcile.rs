//! Name-poll list reconciliation.
//!
//! When a name poll is lost or tied, the most widely supported disagreeing
//! listing is compared with ours. Entries only the peers hold are missing
//! locally; entries only we hold are extra. If more than one entry is disputed,
//! a narrower name poll is called over `[first, last]` of the disputed entries.

use std::collections::BTreeSet;

use crate::spec::PollSpec;
use crate::tally::VoteRecord;
use crate::vote::Vote;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Narrower name poll over the disputed sub-range, when it can be narrowed.
    pub sub_poll: Option<PollSpec>,
    pub missing_locally: Vec<String>,
    pub extra_locally: Vec<String>,
}

/// The disagreeing vote whose listing the most voters share. Listings are
/// compared directly since each digest is seeded with its voter's verifier.
/// Ties go to the listing seen first.
pub fn most_supported_disagreement(records: &[VoteRecord]) -> Option<&Vote> {
    let mut best: Option<(&Vote, usize)> = None;
    for (i, record) in records.iter().enumerate() {
        if record.vote.is_agree() || record.vote.entries.is_none() {
            continue;
        }
        let earlier = records[..i]
            .iter()
            .any(|r| !r.vote.is_agree() && r.vote.entries == record.vote.entries);
        if earlier {
            continue;
        }
        let support = records[i..]
            .iter()
            .filter(|r| !r.vote.is_agree() && r.vote.entries == record.vote.entries)
            .count();
        if best.map_or(true, |(_, n)| support > n) {
            best = Some((&record.vote, support));
        }
    }
    best.map(|(vote, _)| vote)
}

/// Entries present only remotely and only locally.
pub fn divergence(local: &[String], remote: &[String]) -> (Vec<String>, Vec<String>) {
    let local: BTreeSet<&String> = local.iter().collect();
    let remote: BTreeSet<&String> = remote.iter().collect();
    let missing = remote.difference(&local).map(|s| s.to_string()).collect();
    let extra = local.difference(&remote).map(|s| s.to_string()).collect();
    (missing, extra)
}

/// `[first, last]` differing entry over the union of both sorted listings.
pub fn divergent_range(local: &[String], remote: &[String]) -> Option<(String, String)> {
    let (missing, extra) = divergence(local, remote);
    let disputed: BTreeSet<String> = missing.into_iter().chain(extra).collect();
    let first = disputed.iter().next()?.clone();
    let last = disputed.iter().next_back()?.clone();
    Some((first, last))
}

/// Plan the follow-up to a lost or tied name poll over `spec`.
pub fn reconcile(spec: &PollSpec, local: &[String], records: &[VoteRecord]) -> Option<Reconciliation> {
    let winner = most_supported_disagreement(records)?;
    let remote = winner.entries.as_deref()?;
    let (missing_locally, extra_locally) = divergence(local, remote);
    let disputed = missing_locally.len() + extra_locally.len();
    if disputed == 0 {
        return None;
    }

    let mut sub_poll = None;
    if disputed > 1 {
        if let Some((first, last)) = divergent_range(local, remote) {
            let lower = relative(&spec.url, &first);
            let upper = relative(&spec.url, &last);
            let narrowed = spec.clone().with_range(Some(lower), Some(upper));
            if narrowed.lower != spec.lower || narrowed.upper != spec.upper {
                sub_poll = Some(narrowed);
            }
        }
    }
    Some(Reconciliation {
        sub_poll,
        missing_locally,
        extra_locally,
    })
}

fn relative(prefix: &str, url: &str) -> String {
    url.strip_prefix(prefix).unwrap_or(url).to_string()
}
