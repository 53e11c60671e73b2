//! The diagram document aggregate.

use crate::error::Result;
use crate::palette::DiagramPalette;
use crate::stories::DocumentStories;
use crate::tags::DocumentTags;
use serde_json::json;
use weft_bind::CrdtProp;
use weft_sdk::{Backend, Session};
use weft_store::{RootHandle, Subscription};

/// Name of the root map holding document metadata.
pub const META_ROOT: &str = "meta";

/// A diagram document: title, tags, palette and stories over one store root.
///
/// Any root works, so the same code runs single-user on the noop backend
/// and collaboratively on a replicated one.
#[derive(Clone)]
pub struct DiagramDocument {
    root: RootHandle,
    title: CrdtProp<String>,
    tags: DocumentTags,
    palette: DiagramPalette,
    stories: DocumentStories,
}

impl DiagramDocument {
    pub fn new(root: RootHandle) -> Result<Self> {
        let meta = root.get_map(META_ROOT)?;
        Ok(Self {
            title: CrdtProp::new(meta, "title"),
            tags: DocumentTags::new(root.as_ref())?,
            palette: DiagramPalette::new(root.as_ref())?,
            stories: DocumentStories::new(root.as_ref())?,
            root,
        })
    }

    /// A document on the root of `backend`.
    pub fn from_backend(backend: &Backend) -> Result<Self> {
        Self::new(backend.root())
    }

    /// A document on the root of `session`.
    pub fn from_session(session: &Session) -> Result<Self> {
        Self::new(session.root())
    }

    pub fn root(&self) -> &RootHandle {
        &self.root
    }

    pub fn title(&self) -> Option<String> {
        self.title.get().ok().flatten()
    }

    pub fn set_title(&self, title: &str) -> Result<()> {
        Ok(self.title.set(&title.to_string())?)
    }

    /// Called once per remote transaction that changed the title.
    pub fn on_title_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.title.on_remote_change(listener)
    }

    pub fn tags(&self) -> &DocumentTags {
        &self.tags
    }

    pub fn palette(&self) -> &DiagramPalette {
        &self.palette
    }

    pub fn stories(&self) -> &DocumentStories {
        &self.stories
    }

    /// Snapshot of everything the document stores.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "title": self.title(),
            "tags": self.tags.to_json(),
            "palette": self.palette.to_json(),
            "stories": self.stories.to_json(),
        })
    }
}

impl std::fmt::Debug for DiagramDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramDocument")
            .field("title", &self.title())
            .field("tags", &self.tags)
            .field("stories", &self.stories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_document() {
        let doc = DiagramDocument::from_backend(&Backend::noop()).unwrap();
        assert_eq!(doc.title(), None);
        assert_eq!(
            doc.to_json(),
            json!({"title": null, "tags": {}, "palette": [], "stories": {}})
        );
    }

    #[test]
    fn test_title_and_defaults() {
        let doc = DiagramDocument::from_backend(&Backend::noop()).unwrap();
        doc.set_title("Payments").unwrap();
        doc.palette().init_defaults().unwrap();

        assert_eq!(doc.title(), Some("Payments".to_string()));
        assert_eq!(doc.to_json()["palette"][0], json!("#1f77b4"));
        assert!(doc.root().has_data());
    }
}
