//! Nullable content: archival units held in memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use lcap_crypto::ContentHasher;
use lcap_poller::{ContentRange, ContentSource, PollError, PollSpec};

/// One in-memory archival unit: URL → bytes.
pub struct NullAu {
    urls: RwLock<BTreeMap<String, Vec<u8>>>,
    hash_estimate: u64,
    failing: AtomicBool,
}

impl NullAu {
    pub fn new(hash_estimate: u64) -> Self {
        Self {
            urls: RwLock::new(BTreeMap::new()),
            hash_estimate,
            failing: AtomicBool::new(false),
        }
    }

    pub fn put(&self, url: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.urls.write().unwrap().insert(url.into(), content.into());
    }

    pub fn remove(&self, url: &str) -> Option<Vec<u8>> {
        self.urls.write().unwrap().remove(url)
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.urls.read().unwrap().get(url).cloned()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.read().unwrap().keys().cloned().collect()
    }

    /// Make every following read fail, as if the disk went away.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PollError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PollError::Hashing("null content is failing".into()))
        } else {
            Ok(())
        }
    }
}

/// The part of a [`NullAu`] a spec selects.
pub struct NullRange {
    au: Arc<NullAu>,
    spec: PollSpec,
}

impl ContentRange for NullRange {
    fn estimated_hash_duration(&self) -> u64 {
        self.au.hash_estimate
    }

    fn child_names(&self) -> Vec<String> {
        self.au
            .urls
            .read()
            .unwrap()
            .keys()
            .filter(|url| self.spec.matches(url))
            .cloned()
            .collect()
    }

    fn feed_url(&self, url: &str, sink: &mut dyn ContentHasher) -> Result<(), PollError> {
        self.au.check()?;
        let urls = self.au.urls.read().unwrap();
        let bytes = urls
            .get(url)
            .ok_or_else(|| PollError::ContentUnavailable(url.to_string()))?;
        sink.update(bytes);
        Ok(())
    }

    fn read_url(&self, url: &str) -> Result<Vec<u8>, PollError> {
        self.au.check()?;
        self.au
            .get(url)
            .ok_or_else(|| PollError::ContentUnavailable(url.to_string()))
    }

    fn store_repair(&self, url: &str, content: &[u8]) -> Result<(), PollError> {
        if !self.spec.matches(url) {
            return Err(PollError::ContentUnavailable(format!(
                "{url} is outside {}",
                self.spec
            )));
        }
        self.au.put(url, content);
        Ok(())
    }
}

/// Every AU a simulated node holds.
#[derive(Default)]
pub struct NullContentSource {
    aus: Mutex<HashMap<String, Arc<NullAu>>>,
    open_access: Mutex<HashSet<String>>,
}

impl NullContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty AU, replacing any existing one.
    pub fn add_au(&self, au_id: impl Into<String>, hash_estimate: u64) -> Arc<NullAu> {
        let au = Arc::new(NullAu::new(hash_estimate));
        self.aus.lock().unwrap().insert(au_id.into(), Arc::clone(&au));
        au
    }

    pub fn au(&self, au_id: &str) -> Option<Arc<NullAu>> {
        self.aus.lock().unwrap().get(au_id).cloned()
    }

    pub fn set_open_access(&self, au_id: impl Into<String>) {
        self.open_access.lock().unwrap().insert(au_id.into());
    }
}

impl ContentSource for NullContentSource {
    /// Resolves when the AU is held and something in it lies under the spec's
    /// URL. A range may still select nothing.
    fn resolve(&self, spec: &PollSpec) -> Option<Arc<dyn ContentRange>> {
        let au = self.au(&spec.au_id)?;
        let held = spec.is_au() || au.urls().iter().any(|url| url.starts_with(&spec.url));
        if !held {
            return None;
        }
        Some(Arc::new(NullRange {
            au,
            spec: spec.clone(),
        }))
    }

    fn is_open_access(&self, au_id: &str) -> bool {
        self.open_access.lock().unwrap().contains(au_id)
    }
}
