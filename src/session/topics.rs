//! Topic names, topic ids and the per-session registry binding them.

use std::collections::HashMap;

use tracing::trace;

use crate::transport::{TopicField, TopicIdType};

/// Topic of an outbound PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Id bound through REGISTER/REGACK or SUBACK in the current session.
    Normal(u16),
    /// Id agreed with the gateway in advance.
    Predefined(u16),
    /// Two-character topic name.
    Short([u8; 2]),
}

impl Topic {
    /// Short topic from a two-byte name.
    pub fn short(name: &str) -> Option<Self> {
        let bytes: [u8; 2] = name.as_bytes().try_into().ok()?;
        Some(Self::Short(bytes))
    }

    /// Topic id type bits for the flags octet.
    pub fn id_type(self) -> TopicIdType {
        match self {
            Self::Normal(_) => TopicIdType::Normal,
            Self::Predefined(_) => TopicIdType::Predefined,
            Self::Short(_) => TopicIdType::Short,
        }
    }

    /// Value of the 16-bit topic id field.
    pub fn wire_id(self) -> u16 {
        match self {
            Self::Normal(id) | Self::Predefined(id) => id,
            Self::Short(name) => u16::from_be_bytes(name),
        }
    }
}

/// Topic of a SUBSCRIBE or UNSUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicFilter {
    /// Topic name, possibly with `+` and `#` wildcards.
    Name(String),
    /// Predefined topic id.
    Predefined(u16),
    /// Two-character topic name.
    Short([u8; 2]),
}

impl TopicFilter {
    /// True if the name contains wildcards. The gateway assigns no id then.
    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::Name(name) => name.contains(['+', '#']),
            _ => false,
        }
    }

    /// Wire form of the filter.
    pub fn to_field(&self) -> TopicField {
        match self {
            Self::Name(name) => TopicField::Name(name.clone()),
            Self::Predefined(id) => TopicField::Predefined(*id),
            Self::Short(name) => TopicField::Short(*name),
        }
    }
}

impl From<&str> for TopicFilter {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for TopicFilter {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Topic name to topic id bindings of one session.
///
/// Ids are only meaningful for the session that received them: the registry
/// is cleared whenever a session ends, and each clear starts a new generation.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    by_name: HashMap<String, u16>,
    by_id: HashMap<u16, String>,
    generation: u32,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `id`, replacing earlier bindings of either.
    pub fn bind(&mut self, name: impl Into<String>, id: u16) {
        let name = name.into();
        if let Some(old_id) = self.by_name.remove(&name) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_name) = self.by_id.remove(&id) {
            self.by_name.remove(&old_name);
        }
        trace!(topic = %name, topic_id = id, "topic bound");
        self.by_name.insert(name.clone(), id);
        self.by_id.insert(id, name);
    }

    /// Topic id bound to `name`.
    pub fn resolve(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Topic name bound to `id`.
    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// True if `id` is bound.
    pub fn contains_id(&self, id: u16) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Drop the binding of `id`, returning its name.
    pub fn unbind_id(&mut self, id: u16) -> Option<String> {
        let name = self.by_id.remove(&id)?;
        self.by_name.remove(&name);
        Some(name)
    }

    /// Drop every binding and start a new generation.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of times the registry was cleared.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All bindings, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), *id))
    }
}
