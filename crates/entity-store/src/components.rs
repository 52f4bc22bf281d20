//! Built-in components visible to rules.

use std::fmt;

use hashbrown::HashMap;
use selector_dsl::Selector;
use smallvec::SmallVec;

use crate::component::impl_component;

/// Authored identity of an entity (`@name` selectors match this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

impl_component!(Name, names, true);

/// Set of tags on an entity (`#tag` selectors match these).
///
/// Insertion order is kept so documents are stable across reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(SmallVec<[String; 4]>);

impl Tags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag. Returns `false` if it was already present.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.contains(&tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    /// Remove a tag. Returns `true` if it was present.
    pub fn remove(&mut self, tag: &str) -> bool {
        let Some(pos) = self.0.iter().position(|t| t == tag) else {
            return false;
        };
        self.0.remove(pos);
        true
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags = Self::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

impl_component!(Tags, tags, true);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Local spatial transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub anchor: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            anchor: Vec3::ZERO,
        }
    }
}

impl_component!(Transform, transforms);

/// A scalar property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Free-form scalar properties keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(HashMap<String, PropertyValue>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Set a property, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl_component!(Properties, properties);

/// Parent reference, held as a selector and resolved against whatever
/// currently matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parent(pub Selector);

impl_component!(Parent, parents);

/// A fieldless enum with a fixed symbol set.
pub trait Symbol: Copy + 'static {
    /// Every variant, in declaration order.
    const ALL: &'static [Self];

    /// Canonical symbol for this variant.
    fn as_str(self) -> &'static str;

    /// Match `symbol` against the symbol set, ignoring ASCII case.
    fn parse_ignore_case(symbol: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(symbol))
    }
}

/// Declare a [`Symbol`] enum.
macro_rules! symbol_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $symbol:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl Symbol for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $symbol),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

symbol_enum!(FlexDirection {
    Row => "Row",
    Column => "Column",
    RowReverse => "RowReverse",
    ColumnReverse => "ColumnReverse",
});

symbol_enum!(JustifyContent {
    FlexStart => "FlexStart",
    Center => "Center",
    FlexEnd => "FlexEnd",
    SpaceBetween => "SpaceBetween",
    SpaceAround => "SpaceAround",
    SpaceEvenly => "SpaceEvenly",
});

symbol_enum!(
    /// Used for both `alignItems` and `alignSelf`.
    Align {
        Auto => "Auto",
        FlexStart => "FlexStart",
        Center => "Center",
        FlexEnd => "FlexEnd",
        Stretch => "Stretch",
        Baseline => "Baseline",
    }
);

symbol_enum!(FlexWrap {
    NoWrap => "NoWrap",
    Wrap => "Wrap",
    WrapReverse => "WrapReverse",
});

symbol_enum!(PositionType {
    Relative => "Relative",
    Absolute => "Absolute",
});

/// Per-edge lengths.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Edges {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

/// Authored layout attributes consumed by the presentation subsystem.
///
/// Every attribute is optional; only set attributes reach documents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlexStyle {
    pub direction: Option<FlexDirection>,
    pub justify_content: Option<JustifyContent>,
    pub align_items: Option<Align>,
    pub align_self: Option<Align>,
    pub wrap: Option<FlexWrap>,
    pub position_type: Option<PositionType>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub min_width: Option<f32>,
    pub min_height: Option<f32>,
    pub max_width: Option<f32>,
    pub max_height: Option<f32>,
    pub grow: Option<f32>,
    pub shrink: Option<f32>,
    pub basis: Option<f32>,
    pub gap: Option<f32>,
    pub margin: Option<Edges>,
    pub padding: Option<Edges>,
    pub border: Option<Edges>,
}

impl FlexStyle {
    /// Whether no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl_component!(FlexStyle, flex);

/// Layout rectangle computed by the presentation subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComputedLayout {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl_component!(ComputedLayout, layouts);
