//! # Knowledge base
//!
//! Answers fixed-domain questions about the institute from a static table,
//! without calling the upstream model.
//!
//! ## Layout
//! - `entry`: the `KnowledgeEntry` record and partial updates
//! - `table`: the built-in entries
//! - `normalize`: spelling folds and tokenization
//! - `index`: token → entry index
//! - `cache`: bounded match cache and canonical-pattern prefetch
//! - `matcher`: the layered lookup and refresh logic tying these together

pub mod cache;
pub mod entry;
pub mod index;
pub mod matcher;
pub mod normalize;
pub mod table;

pub use cache::{CacheStats, MatchCache, PrefetchCache};
pub use entry::{KnowledgeEntry, KnowledgePatch};
pub use index::PatternIndex;
pub use matcher::{load_entries, KnowledgeBase, MatchOutcome, MatchSource, RefreshMode, SyncStats};
pub use normalize::{normalize, tokenize};
