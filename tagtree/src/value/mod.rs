// Typed tag values - the leaf data carried by tree nodes

use crate::error::{Result, TagTreeError};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The closed set of tag types a value can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    ByteArray,
    IntArray,
    LongArray,
    List,
    Compound,
}

impl TagKind {
    pub const ALL: [TagKind; 12] = [
        TagKind::Byte,
        TagKind::Short,
        TagKind::Int,
        TagKind::Long,
        TagKind::Float,
        TagKind::Double,
        TagKind::String,
        TagKind::ByteArray,
        TagKind::IntArray,
        TagKind::LongArray,
        TagKind::List,
        TagKind::Compound,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TagKind::Byte => "Byte",
            TagKind::Short => "Short",
            TagKind::Int => "Int",
            TagKind::Long => "Long",
            TagKind::Float => "Float",
            TagKind::Double => "Double",
            TagKind::String => "String",
            TagKind::ByteArray => "ByteArray",
            TagKind::IntArray => "IntArray",
            TagKind::LongArray => "LongArray",
            TagKind::List => "List",
            TagKind::Compound => "Compound",
        }
    }

    /// Lists and compounds decompose into child nodes; everything else is a leaf.
    pub fn is_container(self) -> bool {
        matches!(self, TagKind::List | TagKind::Compound)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TagKind::Byte
                | TagKind::Short
                | TagKind::Int
                | TagKind::Long
                | TagKind::Float
                | TagKind::Double
        )
    }

    /// The value a freshly created tag of this kind starts with.
    pub fn default_value(self) -> NodeValue {
        match self {
            TagKind::Byte => NodeValue::Byte(0),
            TagKind::Short => NodeValue::Short(0),
            TagKind::Int => NodeValue::Int(0),
            TagKind::Long => NodeValue::Long(0),
            TagKind::Float => NodeValue::Float(0.0),
            TagKind::Double => NodeValue::Double(0.0),
            TagKind::String => NodeValue::String(String::new()),
            TagKind::ByteArray => NodeValue::ByteArray(Vec::new()),
            TagKind::IntArray => NodeValue::IntArray(Vec::new()),
            TagKind::LongArray => NodeValue::LongArray(Vec::new()),
            TagKind::List => NodeValue::List(TagList::new()),
            TagKind::Compound => NodeValue::Compound(Compound::new()),
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value. Lists and compounds nest further values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NodeValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    ByteArray(Vec<i8>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    List(TagList),
    Compound(Compound),
}

impl NodeValue {
    pub fn kind(&self) -> TagKind {
        match self {
            NodeValue::Byte(_) => TagKind::Byte,
            NodeValue::Short(_) => TagKind::Short,
            NodeValue::Int(_) => TagKind::Int,
            NodeValue::Long(_) => TagKind::Long,
            NodeValue::Float(_) => TagKind::Float,
            NodeValue::Double(_) => TagKind::Double,
            NodeValue::String(_) => TagKind::String,
            NodeValue::ByteArray(_) => TagKind::ByteArray,
            NodeValue::IntArray(_) => TagKind::IntArray,
            NodeValue::LongArray(_) => TagKind::LongArray,
            NodeValue::List(_) => TagKind::List,
            NodeValue::Compound(_) => TagKind::Compound,
        }
    }

    pub fn is_container(&self) -> bool {
        self.kind().is_container()
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            NodeValue::Compound(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TagList> {
        match self {
            NodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Number of nested entries for lists and compounds.
    pub fn entry_count(&self) -> Option<usize> {
        match self {
            NodeValue::List(l) => Some(l.len()),
            NodeValue::Compound(c) => Some(c.len()),
            _ => None,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Byte(v) => write!(f, "{v}"),
            NodeValue::Short(v) => write!(f, "{v}"),
            NodeValue::Int(v) => write!(f, "{v}"),
            NodeValue::Long(v) => write!(f, "{v}"),
            NodeValue::Float(v) => write!(f, "{v}"),
            NodeValue::Double(v) => write!(f, "{v}"),
            NodeValue::String(v) => f.write_str(v),
            NodeValue::ByteArray(v) => write!(f, "[{} bytes]", v.len()),
            NodeValue::IntArray(v) => write!(f, "[{} ints]", v.len()),
            NodeValue::LongArray(v) => write!(f, "[{} longs]", v.len()),
            NodeValue::List(l) => write!(f, "{} entries", l.len()),
            NodeValue::Compound(c) => write!(f, "{} entries", c.len()),
        }
    }
}

// ── List ─────────────────────────────────────────────────────────

/// An ordered, homogeneous sequence of values.
///
/// An empty list may be untyped; it adopts the kind of the first element
/// pushed into it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawTagList")]
pub struct TagList {
    element: Option<TagKind>,
    items: Vec<NodeValue>,
}

#[derive(Deserialize)]
struct RawTagList {
    #[serde(default)]
    element: Option<TagKind>,
    #[serde(default)]
    items: Vec<NodeValue>,
}

impl TryFrom<RawTagList> for TagList {
    type Error = String;

    fn try_from(raw: RawTagList) -> std::result::Result<Self, Self::Error> {
        let mut list = match raw.element {
            Some(kind) => TagList::of(kind),
            None => TagList::new(),
        };
        for item in raw.items {
            list.push(item).map_err(|e| e.to_string())?;
        }
        Ok(list)
    }
}

impl TagList {
    pub fn new() -> Self {
        TagList::default()
    }

    /// An empty list that only accepts elements of `kind`.
    pub fn of(kind: TagKind) -> Self {
        TagList {
            element: Some(kind),
            items: Vec::new(),
        }
    }

    pub fn element(&self) -> Option<TagKind> {
        self.element
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[NodeValue] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeValue> {
        self.items.iter()
    }

    /// Whether a value of `kind` may be inserted.
    pub fn accepts(&self, kind: TagKind) -> bool {
        self.element.map_or(true, |k| k == kind)
    }

    pub fn push(&mut self, value: NodeValue) -> Result<()> {
        let at = self.items.len();
        self.insert(at, value)
    }

    pub fn insert(&mut self, index: usize, value: NodeValue) -> Result<()> {
        let kind = value.kind();
        if let Some(expected) = self.element {
            if expected != kind {
                return Err(TagTreeError::TypeMismatch {
                    expected,
                    actual: kind,
                });
            }
        }
        if index > self.items.len() {
            return Err(TagTreeError::OutOfRange {
                index: index as isize,
                len: self.items.len(),
            });
        }
        self.element = Some(kind);
        self.items.insert(index, value);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<NodeValue> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    /// Drop all items, keeping the declared element kind.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn take_items(&mut self) -> Vec<NodeValue> {
        std::mem::take(&mut self.items)
    }
}

// ── Compound ─────────────────────────────────────────────────────

/// How [`Compound::insert`] treats a name that is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    Reject,
    Replace,
}

/// Named values in insertion order. Names are unique.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compound {
    entries: Vec<(String, NodeValue)>,
}

impl Compound {
    pub fn new() -> Self {
        Compound::default()
    }

    /// Builder used by fixtures and replacement sets; replaces on duplicate names.
    pub fn with(mut self, name: &str, value: NodeValue) -> Self {
        // Replace never fails
        let _ = self.insert(name, value, InsertPolicy::Replace);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&NodeValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NodeValue> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn insert(&mut self, name: &str, value: NodeValue, policy: InsertPolicy) -> Result<()> {
        match (self.position(name), policy) {
            (Some(_), InsertPolicy::Reject) => Err(TagTreeError::NameConflict {
                name: name.to_string(),
                parent: "compound".to_string(),
            }),
            (Some(i), InsertPolicy::Replace) => {
                self.entries[i].1 = value;
                Ok(())
            }
            (None, _) => {
                self.entries.push((name.to_string(), value));
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<NodeValue> {
        let i = self.position(name)?;
        Some(self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn into_entries(self) -> Vec<(String, NodeValue)> {
        self.entries
    }
}

impl Serialize for Compound {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Compound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CompoundVisitor;

        impl<'de> Visitor<'de> for CompoundVisitor {
            type Value = Compound;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of tag names to tagged values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Compound, A::Error> {
                let mut compound = Compound::new();
                while let Some((name, value)) = access.next_entry::<String, NodeValue>()? {
                    if compound.contains(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate tag name '{name}'"
                        )));
                    }
                    compound.entries.push((name, value));
                }
                Ok(compound)
            }
        }

        deserializer.deserialize_map(CompoundVisitor)
    }
}
