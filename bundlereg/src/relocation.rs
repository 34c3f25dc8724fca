use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DistributionError, Result};

/// The record of where each of a bundle's images went during fixup.
///
/// Keys are the reference strings as declared in the source bundle, values
/// the digest-pinned relocated references in the target repository.
/// Iteration order is first-insertion order so serialization stays
/// deterministic; entries are never removed within one fixup session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocationMap {
    entries: IndexMap<String, String>,
}

impl RelocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where an original reference was relocated to.
    ///
    /// Atomic check-and-insert: recording the same original twice is only
    /// valid when the relocated value is identical, so a re-fixup is
    /// idempotent while two distinct digests claiming one original fail.
    pub fn record(
        &mut self,
        original: impl Into<String>,
        relocated: impl Into<String>,
    ) -> Result<()> {
        let original = original.into();
        let relocated = relocated.into();
        match self.entries.get(&original) {
            Some(existing) if *existing == relocated => Ok(()),
            Some(existing) => Err(DistributionError::RelocationConflict {
                original,
                existing: existing.clone(),
                requested: relocated,
            }),
            None => {
                self.entries.insert(original, relocated);
                Ok(())
            }
        }
    }

    /// Look up where an original reference was relocated to.
    pub fn lookup(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    /// All (original, relocated) pairs in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_looks_up() {
        let mut map = RelocationMap::new();
        map.record("app/invoke:1.0", "registry.example.com/ns/bundle@sha256:aa")
            .unwrap();
        assert_eq!(
            map.lookup("app/invoke:1.0"),
            Some("registry.example.com/ns/bundle@sha256:aa")
        );
        assert_eq!(map.lookup("app/other:1.0"), None);
    }

    #[test]
    fn identical_re_record_is_idempotent() {
        let mut map = RelocationMap::new();
        map.record("a", "x").unwrap();
        map.record("a", "x").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn conflicting_re_record_fails() {
        let mut map = RelocationMap::new();
        map.record("a", "x").unwrap();
        let err = map.record("a", "y").unwrap_err();
        assert!(matches!(
            err,
            DistributionError::RelocationConflict { original, existing, requested }
                if original == "a" && existing == "x" && requested == "y"
        ));
        // the original entry survives
        assert_eq!(map.lookup("a"), Some("x"));
    }

    #[test]
    fn iterates_in_first_insertion_order() {
        let mut map = RelocationMap::new();
        map.record("zeta", "1").unwrap();
        map.record("alpha", "2").unwrap();
        map.record("mid", "3").unwrap();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }
}
