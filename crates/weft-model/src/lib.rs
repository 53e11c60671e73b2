//! # Weft Model
//!
//! The diagram document built on the binding layer: tags, a color palette,
//! and stories made of steps and actions. Nothing here knows which backend
//! holds the data.
//!
//! ```rust
//! use weft_model::{ActionData, ActionKind, DiagramDocument};
//! use weft_sdk::Backend;
//!
//! let doc = DiagramDocument::from_backend(&Backend::noop()).unwrap();
//! doc.set_title("Checkout flow").unwrap();
//! doc.tags().add("payments").unwrap();
//!
//! let story = doc.stories().add_story("Happy path", "").unwrap();
//! let step = story.add_step("Pick items", "").unwrap();
//! step.add_action(&ActionData::new(ActionKind::Highlight, ["cart"]))
//!     .unwrap();
//! assert_eq!(story.steps().len(), 1);
//! ```

pub mod document;
pub mod error;
pub mod palette;
pub mod stories;
pub mod tags;

pub use document::{DiagramDocument, META_ROOT};
pub use error::{ModelError, Result};
pub use palette::{DiagramPalette, DEFAULT_COLORS, PALETTE_ROOT};
pub use stories::{
    ActionData, ActionKind, ActionStyle, DocumentStories, Story, StoryAction, StoryStep,
    STORIES_ROOT,
};
pub use tags::{DocumentTags, TAGS_ROOT};
