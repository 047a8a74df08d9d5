//! Layered knowledge lookup and re-indexing.
//!
//! ## Lookup order
//! 1. normalize the query (empty → no match, not cached)
//! 2. match cache, including cached no-matches
//! 3. prefetch cache of canonical patterns
//! 4. single-token query → pattern index, highest priority wins
//! 5. full scan: first entry with a pattern contained in the query
//! 6. generic institute-name fallback → the general entry
//! 7. cache and return no-match
//!
//! ## Refresh
//! A full refresh clears the match cache and rebuilds every derived
//! structure. A partial refresh rebuilds the index and the prefetch cache
//! but leaves the match cache alone, so cached results (negative ones
//! included) survive until they expire or a full refresh runs.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::cache::{CacheStats, MatchCache, PrefetchCache};
use super::entry::{KnowledgeEntry, KnowledgePatch};
use super::index::PatternIndex;
use super::normalize::{normalize, tokenize};
use super::table::{self, GENERAL_ENTRY};
use crate::config::KnowledgeConfig;
use crate::error::{ChatError, Result};

/// Spellings of the institute's name that route to the general entry when
/// nothing more specific matched.
const GENERIC_NAMES: &[&str] = &["قەڵا", "قه\u{200c}ڵا", "قلا", "قەلا"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Full,
    Partial,
}

/// Which lookup stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Cache,
    Prefetch,
    Index,
    Scan,
    Generic,
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub entry: Option<Arc<KnowledgeEntry>>,
    pub source: MatchSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub version: u64,
    pub total_syncs: u64,
    pub cache_resets: u64,
    pub partial_updates: u64,
    pub last_sync_ms: u64,
    /// Unix milliseconds of the last refresh, if any ran.
    pub last_sync_at: Option<u64>,
    pub entries: usize,
    pub index_tokens: usize,
    pub prefetch_size: usize,
    pub full_scans: u64,
    pub match_cache: CacheStats,
}

#[derive(Debug, Default)]
struct SyncCounters {
    version: u64,
    total_syncs: u64,
    cache_resets: u64,
    partial_updates: u64,
    last_sync_ms: u64,
    last_sync_at: Option<u64>,
}

struct State {
    entries: Vec<Arc<KnowledgeEntry>>,
    /// Normalized patterns per entry, parallel to `entries`.
    patterns: Vec<Vec<String>>,
    index: PatternIndex,
    prefetch: PrefetchCache,
    cache: MatchCache,
    sync: SyncCounters,
    full_scans: u64,
}

impl State {
    fn rebuild_derived(&mut self) {
        self.patterns = self
            .entries
            .iter()
            .map(|e| e.patterns.iter().map(|p| normalize(p)).filter(|p| !p.is_empty()).collect())
            .collect();
        self.index = PatternIndex::build(&self.entries);
        self.prefetch = PrefetchCache::build(&self.entries);
    }

    fn scan(&mut self, query: &str) -> Option<usize> {
        self.full_scans += 1;
        self.patterns
            .iter()
            .position(|patterns| patterns.iter().any(|p| query.contains(p.as_str())))
    }
}

/// Process-wide knowledge base: the entry table plus its derived caches.
pub struct KnowledgeBase {
    state: Mutex<State>,
}

impl KnowledgeBase {
    pub fn new(entries: Vec<KnowledgeEntry>, cfg: &KnowledgeConfig) -> Self {
        let mut state = State {
            entries: entries.into_iter().map(Arc::new).collect(),
            patterns: Vec::new(),
            index: PatternIndex::default(),
            prefetch: PrefetchCache::default(),
            cache: MatchCache::new(cfg.cache_size, cfg.cache_ttl()),
            sync: SyncCounters::default(),
            full_scans: 0,
        };
        state.rebuild_derived();
        info!(
            entries = state.entries.len(),
            tokens = state.index.len(),
            "knowledge base ready"
        );
        Self { state: Mutex::new(state) }
    }

    /// Entries from `cfg.data_path` when set, otherwise the built-in table.
    pub fn from_config(cfg: &KnowledgeConfig) -> Result<Self> {
        let entries = match &cfg.data_path {
            Some(path) => load_entries(path)?,
            None => table::builtin(),
        };
        Ok(Self::new(entries, cfg))
    }

    pub fn find_match(&self, query: &str) -> Option<Arc<KnowledgeEntry>> {
        self.lookup_at(query, Instant::now()).entry
    }

    pub fn lookup(&self, query: &str) -> MatchOutcome {
        self.lookup_at(query, Instant::now())
    }

    /// Run the lookup stages with an explicit clock.
    pub fn lookup_at(&self, query: &str, now: Instant) -> MatchOutcome {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return MatchOutcome { entry: None, source: MatchSource::NoMatch };
        }

        let mut state = self.lock();
        if let Some(cached) = state.cache.get_at(&normalized, now) {
            return MatchOutcome { entry: cached, source: MatchSource::Cache };
        }

        let (entry, source) = Self::resolve(&mut state, &normalized);
        state.cache.insert_at(normalized, entry.clone(), now);
        debug!(?source, hit = entry.is_some(), "knowledge lookup");
        MatchOutcome { entry, source }
    }

    /// Steps 3 to 7, after the match cache missed.
    fn resolve(state: &mut State, query: &str) -> (Option<Arc<KnowledgeEntry>>, MatchSource) {
        if let Some(entry) = state.prefetch.get(query) {
            return (Some(entry), MatchSource::Prefetch);
        }

        let mut tokens = tokenize(query);
        if let (Some(token), None) = (tokens.next(), tokens.next()) {
            if let Some(idx) = state.index.best(token, &state.entries) {
                return (Some(Arc::clone(&state.entries[idx])), MatchSource::Index);
            }
        }

        if let Some(idx) = state.scan(query) {
            return (Some(Arc::clone(&state.entries[idx])), MatchSource::Scan);
        }

        if GENERIC_NAMES.iter().any(|name| query.contains(name)) {
            if let Some(general) = state.entries.get(GENERAL_ENTRY) {
                return (Some(Arc::clone(general)), MatchSource::Generic);
            }
        }

        (None, MatchSource::NoMatch)
    }

    /// Rebuild derived structures from the current table.
    pub fn refresh(&self, mode: RefreshMode) {
        let started = Instant::now();
        let mut state = self.lock();

        if mode == RefreshMode::Full {
            state.cache.clear();
            state.sync.cache_resets += 1;
        } else {
            state.sync.partial_updates += 1;
        }
        state.rebuild_derived();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let sync = &mut state.sync;
        sync.version += 1;
        sync.total_syncs += 1;
        sync.last_sync_ms = elapsed_ms;
        sync.last_sync_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        let version = sync.version;
        info!(?mode, version, elapsed_ms, "knowledge base refreshed");
    }

    /// Merge `patch` into entry `index`, then run a partial refresh.
    ///
    /// An out-of-range index is logged and ignored; returns whether the
    /// entry was updated.
    pub fn update_entry(&self, index: usize, patch: KnowledgePatch) -> bool {
        {
            let mut state = self.lock();
            let len = state.entries.len();
            let Some(slot) = state.entries.get_mut(index) else {
                error!(index, entries = len, "knowledge entry update ignored: index out of range");
                return false;
            };
            Arc::make_mut(slot).apply(patch);
        }
        self.refresh(RefreshMode::Partial);
        true
    }

    pub fn entry(&self, index: usize) -> Option<Arc<KnowledgeEntry>> {
        self.lock().entries.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> SyncStats {
        let state = self.lock();
        SyncStats {
            version: state.sync.version,
            total_syncs: state.sync.total_syncs,
            cache_resets: state.sync.cache_resets,
            partial_updates: state.sync.partial_updates,
            last_sync_ms: state.sync.last_sync_ms,
            last_sync_at: state.sync.last_sync_at,
            entries: state.entries.len(),
            index_tokens: state.index.len(),
            prefetch_size: state.prefetch.len(),
            full_scans: state.full_scans,
            match_cache: state.cache.stats(),
        }
    }

    /// Run a partial refresh every `period` until the task is aborted. The
    /// first refresh happens one full period after spawning.
    pub fn spawn_refresh_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        let period = period.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.refresh(RefreshMode::Partial);
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Read a JSON array of entries.
pub fn load_entries(path: &Path) -> Result<Vec<KnowledgeEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ChatError::Config(format!("invalid knowledge file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn kb(entries: Vec<KnowledgeEntry>) -> KnowledgeBase {
        KnowledgeBase::new(entries, &KnowledgeConfig::default())
    }

    fn builtin() -> KnowledgeBase {
        kb(table::builtin())
    }

    #[test]
    fn test_contact_pattern_resolves_to_contact_entry() {
        let base = builtin();
        let hit = base.find_match("پەیوەندی").expect("contact entry");
        assert_eq!(hit.canonical_pattern(), Some("پەیوەندی"));
    }

    #[test]
    fn test_empty_query_is_no_match_and_not_cached() {
        let base = builtin();
        assert!(base.find_match("   ").is_none());
        assert_eq!(base.stats().match_cache.size, 0);
    }

    #[test]
    fn test_second_lookup_hits_cache() {
        let base = builtin();
        let q = "دەمەوێت بزانم ژمارەی مۆبایل قەڵا چەندە";
        let first = base.lookup(q);
        assert_eq!(first.source, MatchSource::Scan);
        let scans = base.stats().full_scans;

        let second = base.lookup(q);
        assert_eq!(second.source, MatchSource::Cache);
        assert_eq!(base.stats().full_scans, scans);
        assert_eq!(first.entry, second.entry);
    }

    #[test]
    fn test_negative_results_are_cached() {
        let base = builtin();
        assert_eq!(base.lookup("hello there").source, MatchSource::NoMatch);
        let again = base.lookup("hello there");
        assert_eq!(again.source, MatchSource::Cache);
        assert!(again.entry.is_none());
    }

    #[test]
    fn test_prefetch_precedes_index() {
        let base = kb(vec![
            KnowledgeEntry::new(&["x", "shared"], "first"),
            KnowledgeEntry::new(&["shared"], "second").with_priority(9),
        ]);
        let out = base.lookup("shared");
        // "shared" is entry 1's canonical pattern
        assert_eq!(out.source, MatchSource::Prefetch);
        assert_eq!(out.entry.map(|e| e.response.clone()), Some("second".into()));
    }

    #[test]
    fn test_single_token_uses_priority() {
        let base = kb(vec![
            KnowledgeEntry::new(&["low one", "token"], "low").with_priority(1),
            KnowledgeEntry::new(&["high one", "token"], "high").with_priority(5),
        ]);
        let out = base.lookup("token");
        assert_eq!(out.source, MatchSource::Index);
        assert_eq!(out.entry.map(|e| e.response.clone()), Some("high".into()));
    }

    #[test]
    fn test_scan_returns_first_entry_in_table_order() {
        let base = kb(vec![
            KnowledgeEntry::new(&["aa bb"], "first"),
            KnowledgeEntry::new(&["bb"], "second"),
        ]);
        let out = base.lookup("zz aa bb zz");
        assert_eq!(out.source, MatchSource::Scan);
        assert_eq!(out.entry.map(|e| e.response.clone()), Some("first".into()));
    }

    #[test]
    fn test_generic_name_falls_back_to_general_entry() {
        let base = kb(vec![
            KnowledgeEntry::new(&["general"], "general info"),
            KnowledgeEntry::new(&["phone"], "contact"),
        ]);
        let out = base.lookup("ئایا قلا باشە");
        assert_eq!(out.source, MatchSource::Generic);
        assert_eq!(out.entry.map(|e| e.response.clone()), Some("general info".into()));
    }

    #[test]
    fn test_partial_refresh_keeps_cached_results() {
        let base = kb(vec![KnowledgeEntry::new(&["alpha"], "old")]);
        assert!(base.find_match("beta").is_none());
        assert!(base.update_entry(0, KnowledgePatch {
            patterns: Some(vec!["beta".into()]),
            ..Default::default()
        }));
        // still the cached no-match
        assert!(base.find_match("beta").is_none());

        base.refresh(RefreshMode::Full);
        assert_eq!(base.find_match("beta").map(|e| e.response.clone()), Some("old".into()));
    }

    #[test]
    fn test_update_entry_reindexes_for_new_queries() {
        let base = kb(vec![KnowledgeEntry::new(&["alpha"], "a")]);
        base.update_entry(0, KnowledgePatch {
            patterns: Some(vec!["gamma delta".into()]),
            ..Default::default()
        });
        assert_eq!(base.lookup("delta").source, MatchSource::Index);
        let stats = base.stats();
        assert_eq!((stats.partial_updates, stats.cache_resets, stats.version), (1, 0, 1));
    }

    #[test]
    fn test_update_entry_out_of_range_is_noop() {
        let base = builtin();
        assert!(!base.update_entry(99, KnowledgePatch::default()));
        assert_eq!(base.stats().total_syncs, 0);
    }

    #[test]
    fn test_full_refresh_clears_match_cache() {
        let base = builtin();
        base.find_match("شوێن");
        assert_eq!(base.stats().match_cache.size, 1);
        base.refresh(RefreshMode::Full);
        let stats = base.stats();
        assert_eq!(stats.match_cache.size, 0);
        assert_eq!(stats.cache_resets, 1);
        assert!(stats.last_sync_at.is_some());
    }

    #[test]
    fn test_cache_entries_expire() {
        let cfg = KnowledgeConfig { cache_ttl_secs: 10, ..Default::default() };
        let base = KnowledgeBase::new(table::builtin(), &cfg);
        let t0 = Instant::now();
        base.lookup_at("شوێن", t0);
        assert_eq!(base.lookup_at("شوێن", t0 + Duration::from_secs(5)).source, MatchSource::Cache);
        assert_ne!(base.lookup_at("شوێن", t0 + Duration::from_secs(11)).source, MatchSource::Cache);
    }

    #[test]
    fn test_load_entries_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"patterns":["a"],"response":"b","priority":2}}]"#).unwrap();
        let entries = load_entries(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, Some(2));
    }

    #[test]
    fn test_load_entries_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(load_entries(file.path()), Err(ChatError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_runs_partial_refresh_each_period() {
        let base = Arc::new(builtin());
        let handle = Arc::clone(&base).spawn_refresh_task(Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(base.stats().partial_updates, 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(base.stats().partial_updates, 1);
        handle.abort();
    }
}
