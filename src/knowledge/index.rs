use std::collections::HashMap;

use super::entry::KnowledgeEntry;
use super::normalize::{normalize, tokenize};

/// Token → indices of the entries whose patterns contain that token.
///
/// Derived from the entry table and rebuilt wholesale; it is never patched
/// in place.
#[derive(Debug, Default)]
pub struct PatternIndex {
    tokens: HashMap<String, Vec<usize>>,
}

impl PatternIndex {
    pub fn build<E: AsRef<KnowledgeEntry>>(entries: &[E]) -> Self {
        let mut tokens: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for pattern in &entry.as_ref().patterns {
                let normalized = normalize(pattern);
                for token in tokenize(&normalized) {
                    let slot = tokens.entry(token.to_string()).or_default();
                    // indices arrive in ascending order, so a tail check dedups
                    if slot.last() != Some(&idx) {
                        slot.push(idx);
                    }
                }
            }
        }
        Self { tokens }
    }

    /// Entry indices for `token`, in table order.
    pub fn lookup(&self, token: &str) -> &[usize] {
        self.tokens.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest-priority entry containing `token`; the earliest wins ties.
    pub fn best<E: AsRef<KnowledgeEntry>>(&self, token: &str, entries: &[E]) -> Option<usize> {
        let mut best: Option<(usize, i32)> = None;
        for &idx in self.lookup(token) {
            let Some(entry) = entries.get(idx) else { continue };
            let priority = entry.as_ref().effective_priority();
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
