//! Entity <-> document conversion.
//!
//! A document is a JSON object projecting one entity's rule-visible state.
//! Reads are sparse: only components the entity has are emitted. Writes are
//! partial patches: present fields are written, absent fields are left
//! alone and unknown fields are ignored. Each field is checked on its own,
//! so one malformed field never blocks the rest of the patch.
//!
//! ```json
//! {
//!   "_index": 12,
//!   "id": "player",
//!   "tags": ["hero"],
//!   "transform": {"position": {"x": 0, "y": 1, "z": 0}, "rotation": {"x": 0, "y": 0, "z": 0, "w": 1}},
//!   "properties": {"health": 5, "name": "Ada", "alive": true},
//!   "parent": "@camera",
//!   "flex": {"direction": "Row", "width": 120, "margin": {"top": 4, "right": 4, "bottom": 4, "left": 4}},
//!   "layout": {"x": 0, "y": 0, "width": 120, "height": 40}
//! }
//! ```

use entity_store::{
    ComputedLayout, Edges, Entity, EntityIndex, EntityStore, FlexStyle, Name, Parent, Properties,
    PropertyValue, Quat, Symbol, Tags, Transform, Vec3,
};
use selector_dsl::parse_selector;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::trace;

use crate::expr::{number, to_number};
use crate::{Diagnostics, RuleError, RuleResult};

/// Stable entity index. Read-only.
pub const INDEX: &str = "_index";
pub const ID: &str = "id";
pub const TAGS: &str = "tags";
pub const TRANSFORM: &str = "transform";
pub const PROPERTIES: &str = "properties";
pub const PARENT: &str = "parent";
pub const FLEX: &str = "flex";
/// Computed by the layout subsystem. Read-only.
pub const LAYOUT: &str = "layout";

type FlexNumber = (&'static str, fn(&mut FlexStyle) -> &mut Option<f32>);
type FlexEdges = (&'static str, fn(&mut FlexStyle) -> &mut Option<Edges>);

const FLEX_NUMBERS: [FlexNumber; 10] = [
    ("width", |s| &mut s.width),
    ("height", |s| &mut s.height),
    ("minWidth", |s| &mut s.min_width),
    ("minHeight", |s| &mut s.min_height),
    ("maxWidth", |s| &mut s.max_width),
    ("maxHeight", |s| &mut s.max_height),
    ("grow", |s| &mut s.grow),
    ("shrink", |s| &mut s.shrink),
    ("basis", |s| &mut s.basis),
    ("gap", |s| &mut s.gap),
];

const FLEX_EDGES: [FlexEdges; 3] = [
    ("margin", |s| &mut s.margin),
    ("padding", |s| &mut s.padding),
    ("border", |s| &mut s.border),
];

// ==================== Read ====================

/// Project an entity into a fresh document. `None` if it is not active.
#[must_use]
pub fn read(store: &EntityStore, entity: Entity) -> Option<Value> {
    if !store.is_active(entity) {
        return None;
    }
    let mut document = Map::new();
    read_into(store, entity, &mut document);
    Some(Value::Object(document))
}

/// Project an entity into `document`, replacing its contents.
pub fn read_into(store: &EntityStore, entity: Entity, document: &mut Map<String, Value>) {
    document.clear();
    document.insert(INDEX.into(), Value::from(entity.index()));

    if let Some(name) = store.get::<Name>(entity) {
        document.insert(ID.into(), Value::String(name.0.clone()));
    }
    if let Some(tags) = store.get::<Tags>(entity) {
        document.insert(TAGS.into(), tags.iter().map(Value::from).collect());
    }
    if let Some(transform) = store.get::<Transform>(entity) {
        document.insert(TRANSFORM.into(), transform_to_value(transform));
    }
    if let Some(properties) = store.get::<Properties>(entity) {
        let map = properties
            .iter()
            .map(|(key, value)| (key.to_string(), property_to_value(value)))
            .collect();
        document.insert(PROPERTIES.into(), Value::Object(map));
    }
    if let Some(parent) = store.get::<Parent>(entity) {
        document.insert(PARENT.into(), Value::String(parent.0.to_string()));
    }
    if let Some(flex) = store.get::<FlexStyle>(entity) {
        if !flex.is_empty() {
            document.insert(FLEX.into(), flex_to_value(flex));
        }
    }
    if let Some(layout) = store.get::<ComputedLayout>(entity) {
        let mut map = Map::new();
        map.insert("x".into(), float(layout.x));
        map.insert("y".into(), float(layout.y));
        map.insert("width".into(), float(layout.width));
        map.insert("height".into(), float(layout.height));
        document.insert(LAYOUT.into(), Value::Object(map));
    }
}

fn float(value: f32) -> Value {
    number(f64::from(value))
}

fn vec3_to_value(v: Vec3) -> Value {
    let mut map = Map::new();
    map.insert("x".into(), float(v.x));
    map.insert("y".into(), float(v.y));
    map.insert("z".into(), float(v.z));
    Value::Object(map)
}

fn transform_to_value(transform: &Transform) -> Value {
    let mut rotation = Map::new();
    rotation.insert("x".into(), float(transform.rotation.x));
    rotation.insert("y".into(), float(transform.rotation.y));
    rotation.insert("z".into(), float(transform.rotation.z));
    rotation.insert("w".into(), float(transform.rotation.w));

    let mut map = Map::new();
    map.insert("position".into(), vec3_to_value(transform.position));
    map.insert("rotation".into(), Value::Object(rotation));
    map.insert("scale".into(), vec3_to_value(transform.scale));
    map.insert("anchor".into(), vec3_to_value(transform.anchor));
    Value::Object(map)
}

fn property_to_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Number(n) => number(*n),
        PropertyValue::Text(s) => Value::String(s.clone()),
    }
}

fn edges_to_value(edges: Edges) -> Value {
    let mut map = Map::new();
    map.insert("top".into(), float(edges.top));
    map.insert("right".into(), float(edges.right));
    map.insert("bottom".into(), float(edges.bottom));
    map.insert("left".into(), float(edges.left));
    Value::Object(map)
}

fn flex_to_value(flex: &FlexStyle) -> Value {
    fn symbol<T: Symbol>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
        if let Some(value) = value {
            map.insert(key.into(), Value::from(value.as_str()));
        }
    }

    let mut map = Map::new();
    symbol(&mut map, "direction", flex.direction);
    symbol(&mut map, "justifyContent", flex.justify_content);
    symbol(&mut map, "alignItems", flex.align_items);
    symbol(&mut map, "alignSelf", flex.align_self);
    symbol(&mut map, "wrap", flex.wrap);
    symbol(&mut map, "positionType", flex.position_type);

    // Accessors take `&mut`; read through a scratch copy.
    let mut scratch = *flex;
    for (key, field) in FLEX_NUMBERS {
        if let Some(value) = *field(&mut scratch) {
            map.insert(key.into(), float(value));
        }
    }
    for (key, field) in FLEX_EDGES {
        if let Some(edges) = *field(&mut scratch) {
            map.insert(key.into(), edges_to_value(edges));
        }
    }
    Value::Object(map)
}

// ==================== Write ====================

/// Stable index stored in a document.
///
/// # Errors
///
/// [`RuleError::Conversion`] if the document has no numeric `_index`.
pub fn index_of(document: &Value) -> RuleResult<EntityIndex> {
    document
        .get(INDEX)
        .and_then(Value::as_u64)
        .and_then(|index| EntityIndex::try_from(index).ok())
        .ok_or_else(|| RuleError::conversion(INDEX, "expected a non-negative integer index"))
}

/// Apply `document` to `entity` as a partial patch.
///
/// Field failures are reported to `diagnostics` and skipped. Returns the
/// number of fields written.
///
/// # Errors
///
/// [`RuleError::StaleReference`] if the entity is no longer active, and
/// [`RuleError::Conversion`] if the document is not an object. Nothing is
/// written in either case.
pub fn write(
    document: &Value,
    entity: Entity,
    store: &mut EntityStore,
    diagnostics: &Diagnostics,
) -> RuleResult<usize> {
    if !store.is_active(entity) {
        return Err(RuleError::StaleReference(entity));
    }
    let Value::Object(fields) = document else {
        return Err(RuleError::conversion("document", "expected an object"));
    };

    let mut written = 0;
    for (key, value) in fields {
        let result = match key.as_str() {
            ID => write_id(value, entity, store),
            TAGS => write_tags(value, entity, store),
            TRANSFORM => write_transform(value, entity, store, diagnostics),
            PROPERTIES => write_properties(value, entity, store, diagnostics),
            PARENT => write_parent(value, entity, store),
            FLEX => write_flex(value, entity, store, diagnostics),
            _ => continue,
        };
        match result {
            Ok(()) => written += 1,
            Err(e) => diagnostics.report(e),
        }
    }
    trace!(%entity, written, "document written");
    Ok(written)
}

fn write_id(value: &Value, entity: Entity, store: &mut EntityStore) -> RuleResult<()> {
    let name = match value {
        Value::String(name) if !name.is_empty() => name,
        _ => return Err(RuleError::conversion(ID, "expected a non-empty string")),
    };
    if store.get::<Name>(entity).is_some_and(|current| current.0 == *name) {
        return Ok(());
    }
    store
        .insert(entity, Name(name.clone()))
        .map(drop)
        .map_err(|_| RuleError::StaleReference(entity))
}

fn write_tags(value: &Value, entity: Entity, store: &mut EntityStore) -> RuleResult<()> {
    let Value::Array(items) = value else {
        return Err(RuleError::conversion(TAGS, "expected a list of strings"));
    };
    let mut tags = Tags::new();
    for item in items {
        let Value::String(tag) = item else {
            return Err(RuleError::conversion(TAGS, format!("expected a string tag, found {item}")));
        };
        tags.insert(tag.as_str());
    }
    // Unchanged tags must not disturb selector freshness.
    if store.get::<Tags>(entity) == Some(&tags) {
        return Ok(());
    }
    store
        .insert(entity, tags)
        .map(drop)
        .map_err(|_| RuleError::StaleReference(entity))
}

fn write_parent(value: &Value, entity: Entity, store: &mut EntityStore) -> RuleResult<()> {
    match value {
        Value::Null => {
            store.remove::<Parent>(entity);
            Ok(())
        }
        Value::String(text) => {
            let selector = parse_selector(text)
                .map_err(|e| RuleError::syntax(format!("parent selector '{text}'"), e))?;
            store
                .insert(entity, Parent(selector))
                .map(drop)
                .map_err(|_| RuleError::StaleReference(entity))
        }
        other => Err(RuleError::conversion(
            PARENT,
            format!("expected a selector string or null, found {other}"),
        )),
    }
}

fn write_properties(
    value: &Value,
    entity: Entity,
    store: &mut EntityStore,
    diagnostics: &Diagnostics,
) -> RuleResult<()> {
    let Value::Object(patch) = value else {
        return Err(RuleError::conversion(PROPERTIES, "expected an object"));
    };

    // `None` removes the key.
    let mut changes: SmallVec<[(&str, Option<PropertyValue>); 8]> = SmallVec::new();
    for (key, value) in patch {
        let scalar = match value {
            Value::Null => None,
            Value::Bool(b) => Some(PropertyValue::Bool(*b)),
            Value::Number(n) => match n.as_f64() {
                Some(n) => Some(PropertyValue::Number(n)),
                None => continue,
            },
            Value::String(s) => Some(PropertyValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => {
                diagnostics.report(RuleError::conversion(
                    format!("{PROPERTIES}.{key}"),
                    "expected a string, number or bool",
                ));
                continue;
            }
        };
        changes.push((key.as_str(), scalar));
    }

    let properties = if changes.iter().any(|(_, scalar)| scalar.is_some()) {
        store
            .get_or_default::<Properties>(entity)
            .map_err(|_| RuleError::StaleReference(entity))?
    } else {
        let Some(properties) = store.get_mut::<Properties>(entity) else {
            return Ok(());
        };
        properties
    };
    for (key, scalar) in changes {
        match scalar {
            Some(scalar) => properties.set(key, scalar),
            None => properties.remove(key),
        };
    }
    Ok(())
}

fn write_transform(
    value: &Value,
    entity: Entity,
    store: &mut EntityStore,
    diagnostics: &Diagnostics,
) -> RuleResult<()> {
    let Value::Object(patch) = value else {
        return Err(RuleError::conversion(TRANSFORM, "expected an object"));
    };
    let mut transform = store.get::<Transform>(entity).copied().unwrap_or_default();
    let mut applied = false;

    for (key, value) in patch {
        let result = match key.as_str() {
            "position" => parse_vec3(value).map(|v| transform.position = v),
            "scale" => parse_vec3(value).map(|v| transform.scale = v),
            "anchor" => parse_vec3(value).map(|v| transform.anchor = v),
            "rotation" => parse_quat(value).map(|q| transform.rotation = q),
            _ => continue,
        };
        match result {
            Ok(()) => applied = true,
            Err(message) => {
                diagnostics.report(RuleError::conversion(format!("{TRANSFORM}.{key}"), message));
            }
        }
    }

    if applied {
        store
            .insert(entity, transform)
            .map_err(|_| RuleError::StaleReference(entity))?;
    }
    Ok(())
}

fn write_flex(
    value: &Value,
    entity: Entity,
    store: &mut EntityStore,
    diagnostics: &Diagnostics,
) -> RuleResult<()> {
    let Value::Object(patch) = value else {
        return Err(RuleError::conversion(FLEX, "expected an object"));
    };
    let mut style = store.get::<FlexStyle>(entity).copied().unwrap_or_default();
    let mut applied = false;

    for (key, value) in patch {
        let result = match key.as_str() {
            "direction" => set_symbol(value, &mut style.direction),
            "justifyContent" => set_symbol(value, &mut style.justify_content),
            "alignItems" => set_symbol(value, &mut style.align_items),
            "alignSelf" => set_symbol(value, &mut style.align_self),
            "wrap" => set_symbol(value, &mut style.wrap),
            "positionType" => set_symbol(value, &mut style.position_type),
            other => {
                if let Some((_, field)) = FLEX_NUMBERS.iter().find(|(name, _)| *name == other) {
                    set_number(value, field(&mut style))
                } else if let Some((_, field)) = FLEX_EDGES.iter().find(|(name, _)| *name == other) {
                    set_edges(value, field(&mut style))
                } else {
                    continue;
                }
            }
        };
        match result {
            Ok(()) => applied = true,
            Err(message) => {
                diagnostics.report(RuleError::conversion(format!("{FLEX}.{key}"), message));
            }
        }
    }

    if applied {
        store
            .insert(entity, style)
            .map_err(|_| RuleError::StaleReference(entity))?;
    }
    Ok(())
}

/// `null` clears; otherwise the symbol must match case-insensitively.
fn set_symbol<T: Symbol>(value: &Value, slot: &mut Option<T>) -> Result<(), String> {
    match value {
        Value::Null => {
            *slot = None;
            Ok(())
        }
        Value::String(symbol) => {
            let parsed = T::parse_ignore_case(symbol).ok_or_else(|| {
                let expected: Vec<_> = T::ALL.iter().map(|v| v.as_str()).collect();
                format!("unknown symbol '{symbol}', expected one of {}", expected.join(", "))
            })?;
            *slot = Some(parsed);
            Ok(())
        }
        other => Err(format!("expected a symbol string, found {other}")),
    }
}

fn set_number(value: &Value, slot: &mut Option<f32>) -> Result<(), String> {
    match value {
        Value::Null => *slot = None,
        Value::Number(n) => *slot = n.as_f64().map(|n| n as f32),
        other => return Err(format!("expected a number, found {other}")),
    }
    Ok(())
}

fn set_edges(value: &Value, slot: &mut Option<Edges>) -> Result<(), String> {
    if value.is_null() {
        *slot = None;
        return Ok(());
    }
    let [top, right, bottom, left] = components(value, ["top", "right", "bottom", "left"])?;
    *slot = Some(Edges {
        top,
        right,
        bottom,
        left,
    });
    Ok(())
}

fn parse_vec3(value: &Value) -> Result<Vec3, String> {
    let [x, y, z] = components(value, ["x", "y", "z"])?;
    Ok(Vec3::new(x, y, z))
}

fn parse_quat(value: &Value) -> Result<Quat, String> {
    let [x, y, z, w] = components(value, ["x", "y", "z", "w"])?;
    Ok(Quat { x, y, z, w })
}

/// Read named numeric components out of an object. Every name is required.
fn components<const N: usize>(value: &Value, names: [&str; N]) -> Result<[f32; N], String> {
    let Value::Object(map) = value else {
        return Err(format!("expected an object with {}", names.join(", ")));
    };
    let mut out = [0.0; N];
    for (slot, name) in out.iter_mut().zip(names) {
        let component = map.get(name).ok_or_else(|| format!("missing component '{name}'"))?;
        let Value::Number(_) = component else {
            return Err(format!("component '{name}' must be a number, found {component}"));
        };
        *slot = to_number(component).unwrap_or_default() as f32;
    }
    Ok(out)
}
