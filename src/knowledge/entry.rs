use serde::{Deserialize, Serialize};

/// One canned answer and the phrasings that should trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub patterns: Vec<String>,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    /// Tie-breaker when several entries share an indexed token. Higher wins;
    /// absent counts as 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl KnowledgeEntry {
    pub fn new(patterns: &[&str], response: &str) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            response: response.to_string(),
            links: None,
            priority: None,
        }
    }

    pub fn with_links(mut self, links: &[&str]) -> Self {
        self.links = Some(links.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// The first pattern, used as the prefetch key.
    pub fn canonical_pattern(&self) -> Option<&str> {
        self.patterns.first().map(String::as_str)
    }

    pub fn links(&self) -> &[String] {
        self.links.as_deref().unwrap_or(&[])
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Merge `patch` into this entry. Fields left `None` are untouched.
    pub fn apply(&mut self, patch: KnowledgePatch) {
        if let Some(patterns) = patch.patterns {
            self.patterns = patterns;
        }
        if let Some(response) = patch.response {
            self.response = response;
        }
        if let Some(links) = patch.links {
            self.links = Some(links);
        }
        if let Some(priority) = patch.priority {
            self.priority = Some(priority);
        }
    }
}

impl AsRef<KnowledgeEntry> for KnowledgeEntry {
    fn as_ref(&self) -> &KnowledgeEntry {
        self
    }
}

/// Partial update for [`KnowledgeEntry::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KnowledgePatch {
    pub patterns: Option<Vec<String>>,
    pub response: Option<String>,
    pub links: Option<Vec<String>>,
    pub priority: Option<i32>,
}
