//! Mutation commands.
//!
//! A rule's `do` value is a single-key object naming the command kind:
//!
//! ```json
//! {"mut": [{"target": "tags", "value": {"merge": [{"var": "self.tags"}, ["dead"]]}}]}
//! {"deactivate": true}
//! {"loadScene": "scenes/level-2.json"}
//! ```
//!
//! Mutations run in order against the `self` document of a mutation
//! context; later operations see the effect of earlier ones.

use std::fmt;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::expr::Evaluator;
use crate::{Diagnostics, RuleError, RuleResult};

/// Key of the working document inside a mutation context.
pub const SELF_KEY: &str = "self";

/// A compiled rule command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ordered path/value operations on the entity's document.
    Mutate(Vec<MutOp>),
    /// Deactivate every entity the filter kept.
    Deactivate,
    /// Ask the host to load another scene after this step.
    LoadScene(String),
}

impl Command {
    /// Compile a `do` value.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Syntax`] if the value is not a single-key object
    /// naming a known command, or if its payload has the wrong shape.
    /// Malformed target paths do not fail here; see [`MutOp`].
    pub fn parse(value: &Value) -> RuleResult<Self> {
        let Value::Object(map) = value else {
            return Err(RuleError::syntax("command", "expected a single-key object"));
        };
        let mut entries = map.iter();
        let (Some((kind, payload)), None) = (entries.next(), entries.next()) else {
            return Err(RuleError::syntax(
                "command",
                format!("expected exactly one key, found {}", map.len()),
            ));
        };

        match kind.as_str() {
            "mut" => {
                let Value::Array(ops) = payload else {
                    return Err(RuleError::syntax("command 'mut'", "expected a list of operations"));
                };
                Ok(Self::Mutate(ops.iter().map(MutOp::parse).collect()))
            }
            "deactivate" => Ok(Self::Deactivate),
            "loadScene" => match payload {
                Value::String(path) if !path.is_empty() => Ok(Self::LoadScene(path.clone())),
                _ => Err(RuleError::syntax("command 'loadScene'", "expected a scene path")),
            },
            other => Err(RuleError::syntax("command", format!("unknown command '{other}'"))),
        }
    }

    /// Root document keys this command may write, in first-touched order.
    ///
    /// Only these fields are patched back into the entity.
    #[must_use]
    pub fn touched_roots(&self) -> SmallVec<[&str; 4]> {
        let mut roots = SmallVec::new();
        if let Self::Mutate(ops) = self {
            for op in ops {
                if let Ok(path) = &op.target {
                    let root = path.root();
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
            }
        }
        roots
    }
}

/// One `{target, value}` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutOp {
    /// Parsed target, or the reason it is malformed.
    ///
    /// A malformed target does not fail the rule's load; the operation is
    /// reported and skipped every time it would run.
    pub target: Result<TargetPath, String>,
    /// Value expression; a missing `value` is `null`.
    pub value: Value,
}

impl MutOp {
    fn parse(op: &Value) -> Self {
        let Value::Object(fields) = op else {
            return Self {
                target: Err("operation must be an object".to_string()),
                value: Value::Null,
            };
        };
        let target = fields
            .get("target")
            .ok_or_else(|| "missing 'target'".to_string())
            .and_then(TargetPath::parse);
        Self {
            target,
            value: fields.get("value").cloned().unwrap_or(Value::Null),
        }
    }
}

/// A path into a document, root segment first.
///
/// Written as nested single-key objects ending in a leaf string:
/// `"tags"`, `{"properties": "health"}`, `{"transform": {"position": "x"}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPath {
    segments: SmallVec<[String; 4]>,
}

impl TargetPath {
    /// Parse a nested target path.
    ///
    /// # Errors
    ///
    /// Returns a message if a path object has other than one key, or a
    /// segment is neither a string nor an object.
    pub fn parse(value: &Value) -> Result<Self, String> {
        let mut segments = SmallVec::new();
        let mut node = value;
        loop {
            match node {
                Value::String(leaf) if !leaf.is_empty() => {
                    segments.push(leaf.clone());
                    return Ok(Self { segments });
                }
                Value::String(_) => return Err("empty path segment".to_string()),
                Value::Object(step) => {
                    let mut entries = step.iter();
                    let (Some((key, rest)), None) = (entries.next(), entries.next()) else {
                        return Err(format!("path step must have exactly one key, found {}", step.len()));
                    };
                    segments.push(key.clone());
                    node = rest;
                }
                other => {
                    return Err(format!("path segment must be a string or object, found {other}"));
                }
            }
        }
    }

    /// First segment: the document field this path writes into.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// Set the leaf under `document`, creating intermediate objects as
    /// needed. Existing non-object intermediates are not overwritten.
    fn assign(&self, document: &mut Value, value: Value) -> Result<(), String> {
        let Some((leaf, steps)) = self.segments.split_last() else {
            return Err("empty path".to_string());
        };

        let mut node = document;
        for step in steps {
            let Value::Object(map) = node else {
                return Err(format!("'{step}' is inside a non-object"));
            };
            let child = map
                .entry(step.as_str())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }

        let Value::Object(map) = node else {
            return Err(format!("'{leaf}' is inside a non-object"));
        };
        map.insert(leaf.clone(), value);
        Ok(())
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Run mutation operations against `context[self]`.
///
/// Each operation fails on its own: the failure is reported and the
/// remaining operations still run. Returns the number applied.
pub fn apply_ops(
    ops: &[MutOp],
    evaluator: &Evaluator,
    context: &mut Value,
    rule: &str,
    diagnostics: &Diagnostics,
) -> usize {
    let mut applied = 0;
    for op in ops {
        let path = match &op.target {
            Ok(path) => path,
            Err(message) => {
                diagnostics.report(RuleError::syntax(format!("target path in rule '{rule}'"), message));
                continue;
            }
        };

        // Evaluation returns an owned tree, so nothing authored in the rule
        // is aliased into the document.
        let value = match evaluator.evaluate(&op.value, context) {
            Ok(value) => value,
            Err(e) => {
                diagnostics.report(RuleError::evaluation(rule, format!("value for '{path}': {e}")));
                continue;
            }
        };

        let Some(document) = context.get_mut(SELF_KEY) else {
            diagnostics.report(RuleError::conversion(path.to_string(), "context has no document"));
            continue;
        };
        match path.assign(document, value) {
            Ok(()) => applied += 1,
            Err(message) => diagnostics.report(RuleError::conversion(path.to_string(), message)),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_parse_command_kinds() {
        assert!(matches!(
            Command::parse(&json!({"mut": []})).unwrap(),
            Command::Mutate(ops) if ops.is_empty()
        ));
        assert_eq!(Command::parse(&json!({"deactivate": true})).unwrap(), Command::Deactivate);
        assert_eq!(
            Command::parse(&json!({"loadScene": "next.json"})).unwrap(),
            Command::LoadScene("next.json".into())
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_multi_key() {
        for bad in [
            json!({"explode": []}),
            json!({"mut": [], "deactivate": true}),
            json!({}),
            json!("mut"),
            json!({"mut": {"target": "id"}}),
            json!({"loadScene": 3}),
        ] {
            let err = Command::parse(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "{bad}");
        }
    }

    #[test]
    fn test_target_path_shapes() {
        let leaf = TargetPath::parse(&json!("tags")).unwrap();
        assert_eq!(leaf.to_string(), "tags");

        let nested = TargetPath::parse(&json!({"transform": {"position": "x"}})).unwrap();
        assert_eq!(nested.segments().collect::<Vec<_>>(), ["transform", "position", "x"]);
        assert_eq!(nested.root(), "transform");

        assert!(TargetPath::parse(&json!({"a": "x", "b": "y"})).is_err());
        assert!(TargetPath::parse(&json!({"properties": 3})).is_err());
        assert!(TargetPath::parse(&json!({})).is_err());
        assert!(TargetPath::parse(&json!("")).is_err());
    }

    #[test]
    fn test_malformed_op_is_retained() {
        let Command::Mutate(ops) =
            Command::parse(&json!({"mut": [{"target": {"a": 1, "b": 2}, "value": 1}, {"target": "id", "value": "x"}]}))
                .unwrap()
        else {
            panic!("expected mutation");
        };
        assert_eq!(ops.len(), 2);
        assert!(ops[0].target.is_err());
        assert!(ops[1].target.is_ok());
    }

    #[test]
    fn test_apply_creates_intermediates() {
        let command =
            Command::parse(&json!({"mut": [{"target": {"properties": "health"}, "value": 10}]})).unwrap();
        let Command::Mutate(ops) = &command else {
            panic!("expected mutation");
        };

        let mut context = json!({"step": {"deltaTime": 0.1}, "self": {"_index": 3}});
        let diagnostics = Diagnostics::default();
        let applied = apply_ops(ops, &Evaluator::new(), &mut context, "r", &diagnostics);

        assert_eq!(applied, 1);
        assert_eq!(context["self"], json!({"_index": 3, "properties": {"health": 10}}));
        assert_eq!(diagnostics.total(), 0);
    }

    #[test]
    fn test_later_ops_see_earlier_writes() {
        let command = Command::parse(&json!({"mut": [
            {"target": {"properties": "hp"}, "value": 5},
            {"target": {"properties": "hp"}, "value": {"*": [{"var": "self.properties.hp"}, 2]}},
        ]}))
        .unwrap();
        let Command::Mutate(ops) = &command else {
            panic!("expected mutation");
        };

        let mut context = json!({"self": {}});
        apply_ops(ops, &Evaluator::new(), &mut context, "r", &Diagnostics::default());
        assert_eq!(context["self"]["properties"]["hp"], json!(10));
    }

    #[test]
    fn test_failing_op_skips_only_itself() {
        let command = Command::parse(&json!({"mut": [
            {"target": {"x": "y", "z": "w"}, "value": 1},
            {"target": "id", "value": {"nope": []}},
            {"target": {"id": "deep"}, "value": 1},
            {"target": "tags", "value": ["ok"]},
        ]}))
        .unwrap();
        let Command::Mutate(ops) = &command else {
            panic!("expected mutation");
        };

        let diagnostics = Diagnostics::default();
        let mut context = json!({"self": {"id": "player"}});
        let applied = apply_ops(ops, &Evaluator::new(), &mut context, "r", &diagnostics);

        assert_eq!(applied, 1);
        assert_eq!(context["self"]["tags"], json!(["ok"]));
        assert_eq!(diagnostics.count(ErrorKind::Syntax), 1);
        assert_eq!(diagnostics.count(ErrorKind::Evaluation), 1);
        assert_eq!(diagnostics.count(ErrorKind::Conversion), 1);
    }

    #[test]
    fn test_touched_roots() {
        let command = Command::parse(&json!({"mut": [
            {"target": {"properties": "a"}, "value": 1},
            {"target": "tags", "value": []},
            {"target": {"properties": "b"}, "value": 2},
            {"target": {"bad": 1}, "value": 2},
        ]}))
        .unwrap();
        assert_eq!(command.touched_roots().as_slice(), ["properties", "tags"]);
        assert!(Command::Deactivate.touched_roots().is_empty());
    }
}
