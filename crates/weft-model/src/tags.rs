//! Free-form tags attached to a document.

use crate::error::{ModelError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use weft_bind::{CollectionEvent, MappedCrdtMap, ValueMapper};
use weft_store::{CrdtRoot, Subscription, TransactExt};

/// Name of the root map holding the tags.
pub const TAGS_ROOT: &str = "tags";

/// The set of tags of a document, stored as `tag -> tag` in a root map.
///
/// Two replicas adding the same tag concurrently both write the same key,
/// so in-place remote updates are expected here and accepted.
#[derive(Clone)]
pub struct DocumentTags {
    tags: MappedCrdtMap<String>,
}

fn normalize(tag: &str) -> Result<String> {
    let tag = tag.trim();
    if tag.is_empty() || tag.contains('.') {
        return Err(ModelError::InvalidTag(tag.to_string()));
    }
    Ok(tag.to_string())
}

impl DocumentTags {
    pub fn new(root: &dyn CrdtRoot) -> Result<Self> {
        let map = root.get_map(TAGS_ROOT)?;
        Ok(Self {
            tags: MappedCrdtMap::new(map, Arc::new(ValueMapper::<String>::new()), true),
        })
    }

    /// Add `tag`. Returns whether it was new.
    pub fn add(&self, tag: &str) -> Result<bool> {
        let tag = normalize(tag)?;
        if self.tags.has(&tag) {
            return Ok(false);
        }
        self.tags.add(&tag, tag.clone())?;
        Ok(true)
    }

    pub fn remove(&self, tag: &str) -> bool {
        self.tags.remove(tag.trim())
    }

    pub fn has(&self, tag: &str) -> bool {
        self.tags.has(tag.trim())
    }

    /// All tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.tags.keys()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Make the tag set exactly `tags`, in one transaction. Tags already
    /// present are left untouched.
    pub fn set_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted = tags
            .into_iter()
            .map(|t| normalize(t.as_ref()))
            .collect::<Result<BTreeSet<String>>>()?;
        let map = self.tags.map();
        map.transact_with(|| -> Result<()> {
            for stale in self.tags.keys() {
                if !wanted.contains(&stale) {
                    self.tags.remove(&stale);
                }
            }
            for tag in &wanted {
                if !self.tags.has(tag) {
                    self.tags.add(tag, tag.clone())?;
                }
            }
            Ok(())
        })
    }

    /// Called for every remote tag change.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<String>) + Send + Sync + 'static,
    {
        self.tags.on_change(listener)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.tags.to_json()
    }
}

impl std::fmt::Debug for DocumentTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tags()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::NoopRoot;

    #[test]
    fn test_add_and_remove() {
        let root = NoopRoot::new();
        let tags = DocumentTags::new(&root).unwrap();

        assert!(tags.add("draft").unwrap());
        assert!(tags.add("  review ").unwrap());
        assert!(!tags.add("draft").unwrap());
        assert_eq!(tags.tags(), vec!["draft", "review"]);

        assert!(tags.remove("draft"));
        assert!(!tags.remove("draft"));
        assert!(!tags.has("draft"));
        assert!(tags.has("review"));
    }

    #[test]
    fn test_invalid_tags_rejected() {
        let root = NoopRoot::new();
        let tags = DocumentTags::new(&root).unwrap();

        assert_eq!(
            tags.add("   ").unwrap_err(),
            ModelError::InvalidTag(String::new())
        );
        assert!(matches!(tags.add("a.b"), Err(ModelError::InvalidTag(_))));
        assert!(tags.is_empty());
    }

    #[test]
    fn test_set_tags_replaces_set() {
        let root = NoopRoot::new();
        let tags = DocumentTags::new(&root).unwrap();
        tags.add("old").unwrap();
        tags.add("keep").unwrap();

        tags.set_tags(["keep", "new", "new"]).unwrap();
        assert_eq!(tags.tags(), vec!["keep", "new"]);
        assert_eq!(
            tags.to_json(),
            serde_json::json!({"keep": "keep", "new": "new"})
        );
    }
}
