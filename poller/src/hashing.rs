//! Hash work items and their execution.

use std::fmt;
use std::sync::Arc;

use lcap_crypto::{seeded_hasher, DigestAlgorithm};
use lcap_messages::VoteBlock;
use lcap_types::{Digest, Nonce, PollKey, Timestamp};

use crate::collab::ContentRange;
use crate::event::HashPurpose;
use crate::PollError;

/// What part of a range a hash covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashInput {
    /// Every byte of every URL.
    Content,
    /// The newline-separated child listing.
    Names,
    /// One seeded digest per URL.
    Blocks,
}

/// A seeded digest computation requested by a poll.
pub struct HashRequest {
    pub key: PollKey,
    pub purpose: HashPurpose,
    pub input: HashInput,
    pub content: Arc<dyn ContentRange>,
    pub algorithm: &'static dyn DigestAlgorithm,
    pub challenge: Nonce,
    pub verifier: Nonce,
    pub estimate: u64,
    pub deadline: Timestamp,
}

/// Result of a hash: the overall digest, and per-URL blocks for block hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashOutput {
    pub digest: Digest,
    pub blocks: Vec<VoteBlock>,
}

impl HashRequest {
    /// Run the hash to completion on the calling thread.
    pub fn run(&self) -> Result<HashOutput, PollError> {
        match self.input {
            HashInput::Content => {
                let mut hasher = seeded_hasher(self.algorithm, &self.challenge, &self.verifier);
                self.content.feed(hasher.as_mut())?;
                Ok(HashOutput {
                    digest: hasher.finalize(),
                    blocks: Vec::new(),
                })
            }
            HashInput::Names => {
                let mut hasher = seeded_hasher(self.algorithm, &self.challenge, &self.verifier);
                for name in self.content.child_names() {
                    hasher.update(name.as_bytes());
                    hasher.update(b"\n");
                }
                Ok(HashOutput {
                    digest: hasher.finalize(),
                    blocks: Vec::new(),
                })
            }
            HashInput::Blocks => {
                let mut blocks = Vec::new();
                for url in self.content.child_names() {
                    let mut hasher =
                        seeded_hasher(self.algorithm, &self.challenge, &self.verifier);
                    self.content.feed_url(&url, hasher.as_mut())?;
                    blocks.push(VoteBlock {
                        url,
                        digest: hasher.finalize(),
                    });
                }
                Ok(HashOutput {
                    digest: blocks_digest(self.algorithm, &blocks),
                    blocks,
                })
            }
        }
    }
}

impl fmt::Debug for HashRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRequest")
            .field("key", &self.key)
            .field("purpose", &self.purpose)
            .field("input", &self.input)
            .field("algorithm", &self.algorithm.name())
            .field("estimate", &self.estimate)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Digest a single repaired block with the same seeds a voter used.
pub fn block_digest(
    algorithm: &dyn DigestAlgorithm,
    challenge: &Nonce,
    verifier: &Nonce,
    content: &[u8],
) -> Digest {
    let mut hasher = seeded_hasher(algorithm, challenge, verifier);
    hasher.update(content);
    hasher.finalize()
}

/// Digest over a vote's block digests, in order.
pub fn blocks_digest(algorithm: &dyn DigestAlgorithm, blocks: &[VoteBlock]) -> Digest {
    let mut overall = algorithm.hasher();
    for block in blocks {
        overall.update(block.digest.as_bytes());
    }
    overall.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_crypto::{algorithm_by_name, ContentHasher, DEFAULT_ALGORITHM};
    use std::collections::BTreeMap;

    struct MemRange(BTreeMap<String, Vec<u8>>);

    impl ContentRange for MemRange {
        fn estimated_hash_duration(&self) -> u64 {
            10
        }
        fn child_names(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
        fn feed_url(&self, url: &str, sink: &mut dyn ContentHasher) -> Result<(), PollError> {
            let bytes = self.0.get(url).ok_or_else(|| PollError::ContentUnavailable(url.into()))?;
            sink.update(bytes);
            Ok(())
        }
        fn read_url(&self, url: &str) -> Result<Vec<u8>, PollError> {
            self.0.get(url).cloned().ok_or_else(|| PollError::ContentUnavailable(url.into()))
        }
        fn store_repair(&self, _url: &str, _content: &[u8]) -> Result<(), PollError> {
            Ok(())
        }
    }

    fn request(input: HashInput, files: &[(&str, &[u8])], verifier: u8) -> HashRequest {
        let map = files
            .iter()
            .map(|(u, b)| (u.to_string(), b.to_vec()))
            .collect();
        HashRequest {
            key: PollKey::from_challenge(&Nonce::new(vec![1; 20])),
            purpose: HashPurpose::OwnVote,
            input,
            content: Arc::new(MemRange(map)),
            algorithm: algorithm_by_name(DEFAULT_ALGORITHM).unwrap(),
            challenge: Nonce::new(vec![1; 20]),
            verifier: Nonce::new(vec![verifier; 20]),
            estimate: 10,
            deadline: Timestamp::new(1_000),
        }
    }

    #[test]
    fn verifier_changes_the_digest() {
        let files: &[(&str, &[u8])] = &[("http://x/a", b"aaa"), ("http://x/b", b"bbb")];
        let a = request(HashInput::Content, files, 2).run().unwrap();
        let b = request(HashInput::Content, files, 3).run().unwrap();
        assert_ne!(a.digest, b.digest);
        assert!(a.blocks.is_empty());
    }

    #[test]
    fn one_changed_byte_changes_one_block() {
        let good: &[(&str, &[u8])] = &[("http://x/a", b"aaa"), ("http://x/b", b"bbb")];
        let bad: &[(&str, &[u8])] = &[("http://x/a", b"aaa"), ("http://x/b", b"bbc")];
        let g = request(HashInput::Blocks, good, 2).run().unwrap();
        let d = request(HashInput::Blocks, bad, 2).run().unwrap();
        assert_eq!(g.blocks[0], d.blocks[0]);
        assert_ne!(g.blocks[1], d.blocks[1]);
        assert_ne!(g.digest, d.digest);
    }

    #[test]
    fn repaired_block_digest_matches_vote_block() {
        let files: &[(&str, &[u8])] = &[("http://x/a", b"aaa")];
        let req = request(HashInput::Blocks, files, 4);
        let out = req.run().unwrap();
        let d = block_digest(req.algorithm, &req.challenge, &req.verifier, b"aaa");
        assert_eq!(out.blocks[0].digest, d);
        assert_eq!(blocks_digest(req.algorithm, &out.blocks), out.digest);
    }

    #[test]
    fn names_hash_ignores_content() {
        let a: &[(&str, &[u8])] = &[("http://x/a", b"1")];
        let b: &[(&str, &[u8])] = &[("http://x/a", b"2")];
        assert_eq!(
            request(HashInput::Names, a, 2).run().unwrap().digest,
            request(HashInput::Names, b, 2).run().unwrap().digest
        );
    }
}
