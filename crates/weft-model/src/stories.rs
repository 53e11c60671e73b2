//! Stories: ordered walkthroughs of a diagram.
//!
//! The tree is story -> step -> action. Each level is an ordered keyed
//! collection whose elements are nested maps:
//!
//! ```text
//! stories: { <id>: { index, value: { id, name, description, steps } } }
//! steps:   { <id>: { index, value: { id, title, description, actions } } }
//! actions: { <id>: { index, value: { id, data: { <flattened ActionData> } } } }
//! ```
//!
//! [`Story`], [`StoryStep`] and [`StoryAction`] are live views over their
//! maps. New elements are written as a detached draft built from the
//! document's factory, which the collection then attaches.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use ulid::Ulid;
use weft_bind::{
    BindError, CollectionEvent, CrdtMapper, CrdtObject, CrdtProp, MappedCrdtOrderedMap,
};
use weft_store::{
    CrdtFactory, CrdtMap, CrdtRoot, Entry, FactoryHandle, MapExt, MapHandle, Subscription, Value,
};

/// Name of the root map holding the stories.
pub const STORIES_ROOT: &str = "stories";

const ID: &str = "id";
const STEPS: &str = "steps";
const ACTIONS: &str = "actions";
const DATA: &str = "data";

/// What an action does when its step plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Highlight,
    Focus,
    Annotate,
    Hide,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStyle {
    pub color: Option<String>,
    pub duration_ms: u64,
}

/// The record behind a [`StoryAction`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    pub kind: ActionKind,
    /// Ids of the diagram elements the action applies to.
    pub targets: Vec<String>,
    pub caption: Option<String>,
    pub style: ActionStyle,
}

impl ActionData {
    pub fn new<I, S>(kind: ActionKind, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            targets: targets.into_iter().map(Into::into).collect(),
            caption: None,
            style: ActionStyle::default(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_style(mut self, style: ActionStyle) -> Self {
        self.style = style;
        self
    }
}

fn read_id(map: &dyn CrdtMap) -> Result<String> {
    map.get_value(ID)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ModelError::Bind(BindError::MissingValue(format!("{}.{}", map.id(), ID))))
}

fn nested(map: &dyn CrdtMap, key: &str) -> Result<MapHandle> {
    map.get_nested_map(key)
        .ok_or_else(|| ModelError::Bind(BindError::MissingValue(format!("{}.{}", map.id(), key))))
}

fn text(value: &str) -> Entry {
    Entry::Value(Value::from(value))
}

fn read_text(prop: &CrdtProp<String>) -> String {
    prop.get().ok().flatten().unwrap_or_default()
}

/// Maps entries of an ordered collection to live views through `bind`.
struct ViewMapper<T> {
    bind: fn(MapHandle) -> Result<T>,
    map_of: fn(&T) -> &MapHandle,
}

impl<T: Send + Sync> CrdtMapper<T> for ViewMapper<T> {
    fn from_crdt(&self, entry: &Entry) -> weft_bind::Result<T> {
        let map = entry.as_map().ok_or_else(|| BindError::Decode {
            key: "element".to_string(),
            message: "expected a nested map".to_string(),
        })?;
        (self.bind)(map.clone()).map_err(|err| match err {
            ModelError::Bind(err) => err,
            ModelError::Store(err) => BindError::Store(err),
            other => BindError::Decode {
                key: map.id().to_string(),
                message: other.to_string(),
            },
        })
    }

    /// Only drafts can be stored; they are attached as they are.
    fn to_crdt(&self, value: &T, _factory: &dyn CrdtFactory) -> weft_bind::Result<Entry> {
        Ok(Entry::Map((self.map_of)(value).clone()))
    }
}

fn mapper<T: Send + Sync + 'static>(
    bind: fn(MapHandle) -> Result<T>,
    map_of: fn(&T) -> &MapHandle,
) -> Arc<dyn CrdtMapper<T>> {
    Arc::new(ViewMapper { bind, map_of })
}

/// One action of a step, holding an [`ActionData`] record.
#[derive(Clone)]
pub struct StoryAction {
    id: String,
    map: MapHandle,
    data: CrdtObject<ActionData>,
}

impl StoryAction {
    fn bind(map: MapHandle) -> Result<Self> {
        Ok(Self {
            id: read_id(map.as_ref())?,
            data: CrdtObject::new(nested(map.as_ref(), DATA)?),
            map,
        })
    }

    fn map(&self) -> &MapHandle {
        &self.map
    }

    fn draft(factory: &dyn CrdtFactory, id: &str, data: &ActionData) -> Result<Self> {
        let record = factory.make_map(Vec::new())?;
        CrdtObject::<ActionData>::new(record.clone()).set(data)?;
        let map = factory.make_map(vec![
            (ID.to_string(), text(id)),
            (DATA.to_string(), Entry::Map(record)),
        ])?;
        Self::bind(map)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current record.
    pub fn data(&self) -> Result<ActionData> {
        Ok(self.data.get_clone()?)
    }

    /// The flattened record binding, for field-level reads and writes.
    pub fn object(&self) -> &CrdtObject<ActionData> {
        &self.data
    }

    /// Called once per remote transaction that changed the record.
    pub fn on_remote_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.data.on_remote_change(listener)
    }
}

impl std::fmt::Debug for StoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryAction").field("id", &self.id).finish()
    }
}

/// One step of a story.
#[derive(Clone)]
pub struct StoryStep {
    id: String,
    map: MapHandle,
    title: CrdtProp<String>,
    description: CrdtProp<String>,
    actions: MappedCrdtOrderedMap<StoryAction>,
}

impl StoryStep {
    fn bind(map: MapHandle) -> Result<Self> {
        let actions = nested(map.as_ref(), ACTIONS)?;
        Ok(Self {
            id: read_id(map.as_ref())?,
            title: CrdtProp::new(map.clone(), "title"),
            description: CrdtProp::new(map.clone(), "description"),
            actions: MappedCrdtOrderedMap::new(
                actions,
                mapper(StoryAction::bind, StoryAction::map),
                false,
            ),
            map,
        })
    }

    fn map(&self) -> &MapHandle {
        &self.map
    }

    fn draft(factory: &dyn CrdtFactory, id: &str, title: &str, description: &str) -> Result<Self> {
        let map = factory.make_map(vec![
            (ID.to_string(), text(id)),
            ("title".to_string(), text(title)),
            ("description".to_string(), text(description)),
            (ACTIONS.to_string(), Entry::Map(factory.make_map(Vec::new())?)),
        ])?;
        Self::bind(map)
    }

    fn factory(&self) -> FactoryHandle {
        self.map.factory()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> String {
        read_text(&self.title)
    }

    pub fn set_title(&self, title: &str) -> Result<()> {
        Ok(self.title.set(&title.to_string())?)
    }

    pub fn description(&self) -> String {
        read_text(&self.description)
    }

    pub fn set_description(&self, description: &str) -> Result<()> {
        Ok(self.description.set(&description.to_string())?)
    }

    /// Append an action with a fresh id.
    pub fn add_action(&self, data: &ActionData) -> Result<StoryAction> {
        self.add_action_with_id(&Ulid::new().to_string(), data)
    }

    pub fn add_action_with_id(&self, id: &str, data: &ActionData) -> Result<StoryAction> {
        let draft = StoryAction::draft(self.factory().as_ref(), id, data)?;
        self.actions.add(id, draft)?;
        self.get_action(id)
            .ok_or_else(|| ModelError::ActionNotFound(id.to_string()))
    }

    pub fn remove_action(&self, id: &str) -> Result<bool> {
        Ok(self.actions.remove(id)?)
    }

    /// Replace an action's record in place, keeping its id and position.
    pub fn update_action(&self, id: &str, data: &ActionData) -> Result<()> {
        let action = self
            .get_action(id)
            .ok_or_else(|| ModelError::ActionNotFound(id.to_string()))?;
        action.data.set(data)?;
        Ok(())
    }

    pub fn move_action(&self, id: &str, position: usize) -> Result<()> {
        self.actions.set_index(id, position).map_err(|err| match err {
            BindError::UnknownKey(id) => ModelError::ActionNotFound(id),
            other => other.into(),
        })
    }

    pub fn get_action(&self, id: &str) -> Option<StoryAction> {
        self.actions.get(id)
    }

    /// Actions in play order.
    pub fn actions(&self) -> Vec<StoryAction> {
        self.actions.values()
    }

    pub fn on_actions_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<StoryAction>) + Send + Sync + 'static,
    {
        self.actions.on_change(listener)
    }
}

impl std::fmt::Debug for StoryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryStep")
            .field("id", &self.id)
            .field("title", &self.title())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// A named, ordered sequence of steps.
#[derive(Clone)]
pub struct Story {
    id: String,
    map: MapHandle,
    name: CrdtProp<String>,
    description: CrdtProp<String>,
    steps: MappedCrdtOrderedMap<StoryStep>,
}

impl Story {
    fn bind(map: MapHandle) -> Result<Self> {
        let steps = nested(map.as_ref(), STEPS)?;
        Ok(Self {
            id: read_id(map.as_ref())?,
            name: CrdtProp::new(map.clone(), "name"),
            description: CrdtProp::new(map.clone(), "description"),
            steps: MappedCrdtOrderedMap::new(steps, mapper(StoryStep::bind, StoryStep::map), false),
            map,
        })
    }

    fn map(&self) -> &MapHandle {
        &self.map
    }

    fn draft(factory: &dyn CrdtFactory, id: &str, name: &str, description: &str) -> Result<Self> {
        let map = factory.make_map(vec![
            (ID.to_string(), text(id)),
            ("name".to_string(), text(name)),
            ("description".to_string(), text(description)),
            (STEPS.to_string(), Entry::Map(factory.make_map(Vec::new())?)),
        ])?;
        Self::bind(map)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        read_text(&self.name)
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        Ok(self.name.set(&name.to_string())?)
    }

    pub fn description(&self) -> String {
        read_text(&self.description)
    }

    pub fn set_description(&self, description: &str) -> Result<()> {
        Ok(self.description.set(&description.to_string())?)
    }

    /// Append a step with a fresh id.
    pub fn add_step(&self, title: &str, description: &str) -> Result<StoryStep> {
        self.add_step_with_id(&Ulid::new().to_string(), title, description)
    }

    pub fn add_step_with_id(&self, id: &str, title: &str, description: &str) -> Result<StoryStep> {
        let draft = StoryStep::draft(self.map.factory().as_ref(), id, title, description)?;
        self.steps.add(id, draft)?;
        debug!(story = %self.id, step = id, "Added step");
        self.get_step(id)
            .ok_or_else(|| ModelError::StepNotFound(id.to_string()))
    }

    pub fn remove_step(&self, id: &str) -> Result<bool> {
        Ok(self.steps.remove(id)?)
    }

    pub fn move_step(&self, id: &str, position: usize) -> Result<()> {
        self.steps.set_index(id, position).map_err(|err| match err {
            BindError::UnknownKey(id) => ModelError::StepNotFound(id),
            other => other.into(),
        })
    }

    pub fn set_step_order<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        self.steps.set_order(ids).map_err(|err| match err {
            BindError::UnknownKey(id) => ModelError::StepNotFound(id),
            other => other.into(),
        })
    }

    pub fn get_step(&self, id: &str) -> Option<StoryStep> {
        self.steps.get(id)
    }

    /// Steps in play order.
    pub fn steps(&self) -> Vec<StoryStep> {
        self.steps.values()
    }

    pub fn on_steps_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<StoryStep>) + Send + Sync + 'static,
    {
        self.steps.on_change(listener)
    }

    /// Called once per remote transaction that renamed or re-described the
    /// story. Both subscriptions must be kept alive.
    pub fn on_remote_change<F>(&self, listener: F) -> [Subscription; 2]
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let on_description = listener.clone();
        [
            self.name.on_remote_change(move || (*listener)()),
            self.description.on_remote_change(move || (*on_description)()),
        ]
    }
}

impl std::fmt::Debug for Story {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Story")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// The ordered stories of a document.
#[derive(Clone)]
pub struct DocumentStories {
    stories: MappedCrdtOrderedMap<Story>,
}

impl DocumentStories {
    pub fn new(root: &dyn CrdtRoot) -> Result<Self> {
        let map = root.get_map(STORIES_ROOT)?;
        Ok(Self {
            stories: MappedCrdtOrderedMap::new(map, mapper(Story::bind, Story::map), false),
        })
    }

    /// Append a story with a fresh id.
    pub fn add_story(&self, name: &str, description: &str) -> Result<Story> {
        self.add_story_with_id(&Ulid::new().to_string(), name, description)
    }

    pub fn add_story_with_id(&self, id: &str, name: &str, description: &str) -> Result<Story> {
        let factory = self.stories.map().factory();
        let draft = Story::draft(factory.as_ref(), id, name, description)?;
        self.stories.add(id, draft)?;
        debug!(story = id, "Added story");
        self.get_story(id)
            .ok_or_else(|| ModelError::StoryNotFound(id.to_string()))
    }

    pub fn remove_story(&self, id: &str) -> Result<bool> {
        Ok(self.stories.remove(id)?)
    }

    pub fn get_story(&self, id: &str) -> Option<Story> {
        self.stories.get(id)
    }

    /// Stories in display order.
    pub fn stories(&self) -> Vec<Story> {
        self.stories.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.stories.keys()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn move_story(&self, id: &str, position: usize) -> Result<()> {
        self.stories.set_index(id, position).map_err(|err| match err {
            BindError::UnknownKey(id) => ModelError::StoryNotFound(id),
            other => other.into(),
        })
    }

    pub fn set_story_order<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        self.stories.set_order(ids).map_err(|err| match err {
            BindError::UnknownKey(id) => ModelError::StoryNotFound(id),
            other => other.into(),
        })
    }

    /// Called for every remote change to the list of stories.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<Story>) + Send + Sync + 'static,
    {
        self.stories.on_change(listener)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.stories.to_json()
    }
}

impl std::fmt::Debug for DocumentStories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stories()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::NoopRoot;

    fn highlight(target: &str) -> ActionData {
        ActionData::new(ActionKind::Highlight, [target])
    }

    #[test]
    fn test_story_tree() {
        let root = NoopRoot::new();
        let stories = DocumentStories::new(&root).unwrap();

        let story = stories.add_story("Checkout", "Happy path").unwrap();
        assert_eq!(story.name(), "Checkout");
        assert_eq!(story.description(), "Happy path");

        let step = story.add_step("Cart", "").unwrap();
        let action = step
            .add_action(&highlight("cart").with_caption("Items"))
            .unwrap();

        let again = stories.get_story(story.id()).unwrap();
        let step_again = again.get_step(step.id()).unwrap();
        assert_eq!(step_again.title(), "Cart");
        assert_eq!(
            step_again.get_action(action.id()).unwrap().data().unwrap(),
            highlight("cart").with_caption("Items")
        );
    }

    #[test]
    fn test_duplicate_story_rejected() {
        let root = NoopRoot::new();
        let stories = DocumentStories::new(&root).unwrap();
        stories.add_story_with_id("intro", "Intro", "").unwrap();

        let err = stories.add_story_with_id("intro", "Again", "").unwrap_err();
        assert_eq!(
            err,
            ModelError::Bind(BindError::DuplicateKey("intro".to_string()))
        );
        assert_eq!(stories.len(), 1);
    }

    #[test]
    fn test_story_order() {
        let root = NoopRoot::new();
        let stories = DocumentStories::new(&root).unwrap();
        for id in ["a", "b", "c"] {
            stories.add_story_with_id(id, id, "").unwrap();
        }

        stories.move_story("c", 0).unwrap();
        assert_eq!(stories.ids(), vec!["c", "a", "b"]);

        stories.set_story_order(&["b"]).unwrap();
        assert_eq!(stories.ids(), vec!["b", "c", "a"]);

        assert!(stories.remove_story("c").unwrap());
        assert_eq!(stories.ids(), vec!["b", "a"]);
        assert_eq!(
            stories.move_story("zzz", 0).unwrap_err(),
            ModelError::StoryNotFound("zzz".to_string())
        );
    }

    #[test]
    fn test_steps_and_actions() {
        let root = NoopRoot::new();
        let stories = DocumentStories::new(&root).unwrap();
        let story = stories.add_story_with_id("s", "Story", "").unwrap();

        for id in ["one", "two", "three"] {
            story.add_step_with_id(id, id, "").unwrap();
        }
        story.move_step("three", 1).unwrap();
        let titles: Vec<String> = story.steps().iter().map(StoryStep::title).collect();
        assert_eq!(titles, vec!["one", "three", "two"]);
        assert!(story.remove_step("one").unwrap());
        assert_eq!(story.steps().len(), 2);

        let step = story.get_step("two").unwrap();
        step.add_action_with_id("x", &highlight("node-1")).unwrap();
        step.add_action_with_id("y", &ActionData::new(ActionKind::Focus, ["node-2"]))
            .unwrap();
        step.move_action("y", 0).unwrap();

        let updated = ActionData::new(ActionKind::Annotate, ["node-1", "node-3"])
            .with_style(ActionStyle {
                color: Some("#ff0000".to_string()),
                duration_ms: 250,
            });
        step.update_action("x", &updated).unwrap();

        let actions = step.actions();
        assert_eq!(
            actions.iter().map(StoryAction::id).collect::<Vec<_>>(),
            vec!["y", "x"]
        );
        assert_eq!(actions[1].data().unwrap(), updated);
        assert_eq!(
            actions[1].object().get("style.duration_ms"),
            Some(Value::Int(250))
        );
        assert_eq!(
            step.update_action("nope", &updated).unwrap_err(),
            ModelError::ActionNotFound("nope".to_string())
        );
        assert!(step.remove_action("y").unwrap());
        assert_eq!(step.actions().len(), 1);
    }
}
