//! Causation chains.
//!
//! A [`Cause`] answers "why did this mutation happen": an ordered chain of
//! responsible objects (root first) plus an ordered key/value context.
//! While a phase is active its cause only grows, except through cause
//! frames, which remove exactly what they added when popped.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::effect::{BlockPos, EntityId, ItemStack, SpawnType};

/// An object in a cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CauseObject {
    /// A connected player, by name
    Player(String),
    /// A plugin, by id
    Plugin(String),
    /// Any entity
    Entity(EntityId),
    /// A block at a position
    Block(BlockPos),
    /// A command line being executed
    Command(String),
    /// An event fired earlier
    Event(u64),
    /// Anything else
    Named(String),
}

impl fmt::Display for CauseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(name) => write!(f, "player:{name}"),
            Self::Plugin(id) => write!(f, "plugin:{id}"),
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Block(pos) => write!(f, "block:{pos}"),
            Self::Command(line) => write!(f, "command:{line}"),
            Self::Event(id) => write!(f, "event:{id}"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Key of a cause context entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventContextKey {
    /// How spawned entities came to be
    SpawnType,
    /// Entity owning the affected objects
    Owner,
    /// Entity that notified the affected block
    Notifier,
    /// Plugin acting on behalf of the cause
    PluginId,
    /// Item used to perform the action
    UsedItem,
    /// Player being simulated by a plugin
    PlayerSimulated,
    /// Free-form key
    Custom(String),
}

impl fmt::Display for EventContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnType => f.write_str("spawn_type"),
            Self::Owner => f.write_str("owner"),
            Self::Notifier => f.write_str("notifier"),
            Self::PluginId => f.write_str("plugin_id"),
            Self::UsedItem => f.write_str("used_item"),
            Self::PlayerSimulated => f.write_str("player_simulated"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl std::str::FromStr for EventContextKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawn_type" => Ok(Self::SpawnType),
            "owner" => Ok(Self::Owner),
            "notifier" => Ok(Self::Notifier),
            "plugin_id" => Ok(Self::PluginId),
            "used_item" => Ok(Self::UsedItem),
            "player_simulated" => Ok(Self::PlayerSimulated),
            other => other
                .strip_prefix("custom:")
                .filter(|name| !name.is_empty())
                .map(|name| Self::Custom(name.to_string()))
                .ok_or_else(|| format!("unknown context key '{other}'")),
        }
    }
}

// Context keys are map keys in JSON output, so they serialize as strings.
impl Serialize for EventContextKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value of a cause context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// A cause object
    Object(CauseObject),
    /// A spawn type
    SpawnType(SpawnType),
    /// An item stack
    Item(ItemStack),
    /// Free-form text
    Text(String),
}

impl From<CauseObject> for ContextValue {
    fn from(value: CauseObject) -> Self {
        Self::Object(value)
    }
}

impl From<SpawnType> for ContextValue {
    fn from(value: SpawnType) -> Self {
        Self::SpawnType(value)
    }
}

impl From<ItemStack> for ContextValue {
    fn from(value: ItemStack) -> Self {
        Self::Item(value)
    }
}

/// Ordered chain of responsible objects plus context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cause {
    chain: Vec<CauseObject>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    context: IndexMap<EventContextKey, ContextValue>,
}

impl Cause {
    /// A cause with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A cause rooted at a single object.
    #[must_use]
    pub fn of(root: CauseObject) -> Self {
        Self {
            chain: vec![root],
            context: IndexMap::new(),
        }
    }

    /// Returns this cause with `key` set in its context.
    #[must_use]
    pub fn with_context(mut self, key: EventContextKey, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key, value.into());
        self
    }

    /// First (root) object of the chain.
    #[must_use]
    pub fn root(&self) -> Option<&CauseObject> {
        self.chain.first()
    }

    /// The full chain, root first.
    #[must_use]
    pub fn chain(&self) -> &[CauseObject] {
        &self.chain
    }

    /// Looks up a context entry.
    #[must_use]
    pub fn context(&self, key: &EventContextKey) -> Option<&ContextValue> {
        self.context.get(key)
    }

    /// Iterates over the context entries in insertion order.
    pub fn context_entries(&self) -> impl Iterator<Item = (&EventContextKey, &ContextValue)> {
        self.context.iter()
    }

    /// Whether the chain contains `object`.
    #[must_use]
    pub fn contains(&self, object: &CauseObject) -> bool {
        self.chain.contains(object)
    }

    /// Number of objects in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub(crate) fn push(&mut self, object: CauseObject) {
        self.chain.push(object);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.chain.truncate(len);
    }

    /// Inserts a context entry, returning the value it replaced.
    pub(crate) fn insert_context(
        &mut self,
        key: EventContextKey,
        value: ContextValue,
    ) -> Option<ContextValue> {
        self.context.insert(key, value)
    }

    /// Puts back what an earlier `insert_context` replaced.
    pub(crate) fn restore_context(&mut self, key: &EventContextKey, previous: Option<ContextValue>) {
        match previous {
            Some(value) => {
                self.context.insert(key.clone(), value);
            }
            None => {
                self.context.shift_remove(key);
            }
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, object) in self.chain.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{object}")?;
        }
        f.write_str("]")
    }
}

impl FromIterator<CauseObject> for Cause {
    fn from_iter<I: IntoIterator<Item = CauseObject>>(iter: I) -> Self {
        Self {
            chain: iter.into_iter().collect(),
            context: IndexMap::new(),
        }
    }
}

/// Handle for an open cause frame.
///
/// Returned by `PhaseContext::push_cause_frame` and required to pop the
/// frame again. Handles are unique per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle {
    pub(crate) id: u64,
}

impl FrameHandle {
    /// Numeric id of the frame, for diagnostics.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_display() {
        let cause: Cause = [
            CauseObject::Player("Steve".into()),
            CauseObject::Plugin("worldedit".into()),
        ]
        .into_iter()
        .collect();
        assert_eq!(cause.to_string(), "[player:Steve, plugin:worldedit]");
        assert_eq!(cause.root(), Some(&CauseObject::Player("Steve".into())));
    }

    #[test]
    fn test_restore_context_removes_new_keys() {
        let mut cause = Cause::of(CauseObject::Named("tick".into()));
        let previous = cause.insert_context(EventContextKey::SpawnType, SpawnType::Plugin.into());
        assert!(previous.is_none());
        cause.restore_context(&EventContextKey::SpawnType, previous);
        assert!(cause.context(&EventContextKey::SpawnType).is_none());
    }

    #[test]
    fn test_restore_context_puts_back_replaced_value() {
        let mut cause = Cause::of(CauseObject::Named("tick".into()))
            .with_context(EventContextKey::SpawnType, SpawnType::Plugin);
        let previous =
            cause.insert_context(EventContextKey::SpawnType, SpawnType::DroppedItem.into());
        assert_eq!(
            cause.context(&EventContextKey::SpawnType),
            Some(&ContextValue::SpawnType(SpawnType::DroppedItem))
        );
        cause.restore_context(&EventContextKey::SpawnType, previous);
        assert_eq!(
            cause.context(&EventContextKey::SpawnType),
            Some(&ContextValue::SpawnType(SpawnType::Plugin))
        );
    }

    #[test]
    fn test_context_key_round_trips_through_str() {
        for key in [
            EventContextKey::SpawnType,
            EventContextKey::Owner,
            EventContextKey::Custom("region".into()),
        ] {
            let parsed: EventContextKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
        assert!("custom:".parse::<EventContextKey>().is_err());
    }

    #[test]
    fn test_cause_serializes_context_as_string_keys() {
        let cause = Cause::of(CauseObject::Player("Alex".into()))
            .with_context(EventContextKey::SpawnType, SpawnType::DroppedItem);
        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json["chain"][0]["type"], "player");
        assert_eq!(json["context"]["spawn_type"], "dropped_item");
    }
}
