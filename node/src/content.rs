//! Archival units served from directories on disk.
//!
//! A file at `<dir>/a/b.html` is the URL `<base_url>/a/b.html`. Listings are
//! taken fresh on every call so repairs and external changes are seen by the
//! next hash.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lcap_crypto::ContentHasher;
use lcap_poller::{ContentRange, ContentSource, PollError, PollSpec};
use tracing::{debug, warn};

use crate::config::AuConfig;
use crate::NodeError;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct DirAu {
    base_url: String,
    dir: PathBuf,
    open_access: bool,
}

impl DirAu {
    fn path_for(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(self.base_url.as_str())?;
        let rest = rest.strip_prefix('/')?;
        if rest.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return None;
        }
        Some(self.dir.join(rest))
    }

    fn urls(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.dir, &mut files);
        let mut urls: Vec<String> = files
            .iter()
            .filter_map(|path| path.strip_prefix(&self.dir).ok())
            .filter_map(|rel| {
                let parts: Option<Vec<&str>> =
                    rel.components().map(|c| c.as_os_str().to_str()).collect();
                parts.map(|p| format!("{}/{}", self.base_url, p.join("/")))
            })
            .collect();
        urls.sort();
        urls
    }

    fn total_bytes(&self, urls: &[String]) -> u64 {
        urls.iter()
            .filter_map(|url| self.path_for(url))
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => collect_files(&path, out),
            Ok(t) if t.is_file() => out.push(path),
            _ => {}
        }
    }
}

fn io_err(url: &str, e: std::io::Error) -> PollError {
    PollError::ContentUnavailable(format!("{url}: {e}"))
}

/// The part of a directory AU one spec selects.
pub struct DirRange {
    au: Arc<DirAu>,
    spec: PollSpec,
    bytes_per_ms: u64,
}

impl ContentRange for DirRange {
    fn estimated_hash_duration(&self) -> u64 {
        let bytes = self.au.total_bytes(&self.child_names());
        (bytes / self.bytes_per_ms).max(1)
    }

    fn child_names(&self) -> Vec<String> {
        self.au
            .urls()
            .into_iter()
            .filter(|url| self.spec.matches(url))
            .collect()
    }

    fn feed_url(&self, url: &str, sink: &mut dyn ContentHasher) -> Result<(), PollError> {
        let path = self
            .au
            .path_for(url)
            .ok_or_else(|| PollError::ContentUnavailable(url.to_string()))?;
        let mut file = File::open(&path).map_err(|e| io_err(url, e))?;
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).map_err(|e| io_err(url, e))?;
            if n == 0 {
                return Ok(());
            }
            sink.update(&buf[..n]);
        }
    }

    fn read_url(&self, url: &str) -> Result<Vec<u8>, PollError> {
        let path = self
            .au
            .path_for(url)
            .ok_or_else(|| PollError::ContentUnavailable(url.to_string()))?;
        fs::read(path).map_err(|e| io_err(url, e))
    }

    fn store_repair(&self, url: &str, content: &[u8]) -> Result<(), PollError> {
        if !self.spec.matches(url) {
            return Err(PollError::ContentUnavailable(format!(
                "{url} is outside {}",
                self.spec
            )));
        }
        let path = self
            .au
            .path_for(url)
            .ok_or_else(|| PollError::ContentUnavailable(url.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(url, e))?;
        }
        let tmp = path.with_extension("repair-tmp");
        fs::write(&tmp, content).map_err(|e| io_err(url, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(url, e))?;
        debug!(url, bytes = content.len(), "repair written");
        Ok(())
    }
}

pub struct DirContentSource {
    aus: HashMap<String, Arc<DirAu>>,
    bytes_per_ms: u64,
}

impl DirContentSource {
    pub fn new(bytes_per_ms: u64) -> Self {
        Self {
            aus: HashMap::new(),
            bytes_per_ms: bytes_per_ms.max(1),
        }
    }

    pub fn from_config(units: &[AuConfig], bytes_per_ms: u64) -> Result<Self, NodeError> {
        let mut source = Self::new(bytes_per_ms);
        for au in units {
            source.add(au)?;
        }
        Ok(source)
    }

    pub fn add(&mut self, au: &AuConfig) -> Result<(), NodeError> {
        if !au.dir.is_dir() {
            return Err(NodeError::Content(format!(
                "archival unit {}: {} is not a directory",
                au.id,
                au.dir.display()
            )));
        }
        let base_url = au.base_url.trim_end_matches('/').to_string();
        self.aus.insert(
            au.id.clone(),
            Arc::new(DirAu {
                base_url,
                dir: au.dir.clone(),
                open_access: au.open_access,
            }),
        );
        Ok(())
    }

    pub fn au_ids(&self) -> impl Iterator<Item = &str> {
        self.aus.keys().map(String::as_str)
    }
}

impl ContentSource for DirContentSource {
    fn resolve(&self, spec: &PollSpec) -> Option<Arc<dyn ContentRange>> {
        let au = self.aus.get(&spec.au_id)?;
        if !spec.is_au() && !spec.url.starts_with(au.base_url.as_str()) {
            return None;
        }
        Some(Arc::new(DirRange {
            au: Arc::clone(au),
            spec: spec.clone(),
            bytes_per_ms: self.bytes_per_ms,
        }))
    }

    fn is_open_access(&self, au_id: &str) -> bool {
        self.aus.get(au_id).is_some_and(|au| au.open_access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_crypto::{seeded_hasher, Blake2b256Algorithm};
    use lcap_types::{Nonce, PollKind};

    fn fixture() -> (tempfile::TempDir, DirContentSource) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.html"), b"alpha").unwrap();
        fs::write(dir.path().join("sub/b.html"), b"bravo").unwrap();
        let au = AuConfig {
            id: "au1".into(),
            plugin: "p".into(),
            base_url: "http://example.org/".into(),
            dir: dir.path().to_path_buf(),
            open_access: true,
        };
        let source = DirContentSource::from_config(&[au], 1).unwrap();
        (dir, source)
    }

    fn spec(url: &str) -> PollSpec {
        PollSpec::new("au1", "p", url, PollKind::Content)
    }

    #[test]
    fn files_map_to_sorted_urls() {
        let (_dir, source) = fixture();
        let range = source.resolve(&spec("http://example.org")).unwrap();
        assert_eq!(
            range.child_names(),
            vec!["http://example.org/a.html", "http://example.org/sub/b.html"]
        );
        assert_eq!(range.estimated_hash_duration(), 10);
        assert!(source.is_open_access("au1"));
    }

    #[test]
    fn sub_url_selects_only_its_files() {
        let (_dir, source) = fixture();
        let range = source.resolve(&spec("http://example.org/sub")).unwrap();
        assert_eq!(range.child_names(), vec!["http://example.org/sub/b.html"]);
        assert!(source.resolve(&spec("http://elsewhere.org")).is_none());
    }

    #[test]
    fn feed_streams_file_bytes() {
        let (_dir, source) = fixture();
        let range = source.resolve(&spec("http://example.org/sub")).unwrap();
        let challenge = Nonce::new(vec![1; Nonce::LEN]);
        let verifier = Nonce::new(vec![2; Nonce::LEN]);

        let mut fed = seeded_hasher(&Blake2b256Algorithm, &challenge, &verifier);
        range.feed(fed.as_mut()).unwrap();
        let mut direct = seeded_hasher(&Blake2b256Algorithm, &challenge, &verifier);
        direct.update(b"bravo");
        assert_eq!(fed.finalize(), direct.finalize());
    }

    #[test]
    fn repair_replaces_file_and_rejects_escapes() {
        let (dir, source) = fixture();
        let range = source.resolve(&spec("http://example.org")).unwrap();
        range
            .store_repair("http://example.org/a.html", b"restored")
            .unwrap();
        assert_eq!(fs::read(dir.path().join("a.html")).unwrap(), b"restored");
        assert!(range
            .store_repair("http://example.org/../etc/passwd", b"x")
            .is_err());
        assert!(range.read_url("http://example.org/missing.html").is_err());
    }

    #[test]
    fn missing_directory_is_a_content_error() {
        let au = AuConfig {
            id: "au2".into(),
            plugin: "p".into(),
            base_url: "http://example.org".into(),
            dir: PathBuf::from("/nonexistent/lcap/au2"),
            open_access: false,
        };
        assert!(matches!(
            DirContentSource::from_config(&[au], 1),
            Err(NodeError::Content(_))
        ));
    }
}
