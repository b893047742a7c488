use std::collections::HashSet;

use tradedge_core::TradeId;

/// Ids already surfaced during the current session. First write wins.
#[derive(Debug, Default)]
pub struct SeenRegistry {
    seen: HashSet<TradeId>,
}

impl SeenRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Returns `false` when the id was already registered.
    pub fn mark_seen(&mut self, id: impl Into<TradeId>) -> bool {
        self.seen.insert(id.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything; used when a new session starts.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let mut registry = SeenRegistry::new();
        assert!(!registry.has_seen("t-1"));
        assert!(registry.mark_seen("t-1"));
        assert!(!registry.mark_seen("t-1"));
        assert!(registry.has_seen("t-1"));
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
