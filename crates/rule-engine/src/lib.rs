//! Rule Engine - data-driven rules over a fixed entity population
//!
//! Content is authored as data: a selector names a live set of entities, a
//! filter expression narrows it each step, and a command writes changes back.
//!
//! # Key Concepts
//!
//! - **Selector**: `@id`, `#tag`, `!enter`/`!exit`, refined with `:` and
//!   unioned with `,`; tracked with a live match set
//! - **Rule**: `{"from": <selector>, "where": <filter>, "do": <command>}`,
//!   registered in the global or scene partition
//! - **Document**: JSON projection of one entity, read sparsely and written
//!   back as a partial patch
//! - **Diagnostics**: every recoverable failure is reported, never raised
//!
//! # Example
//!
//! ```
//! use entity_store::{Pool, Tags};
//! use rule_engine::{EngineConfig, Partition, RuleDef, RuleEngine};
//! use serde_json::json;
//!
//! let mut engine = RuleEngine::new(EngineConfig::default());
//! for health in [0, 5, -1] {
//!     engine.spawn(Pool::Scene, &json!({"tags": ["enemy"], "properties": {"health": health}}));
//! }
//!
//! let rule: RuleDef = serde_json::from_value(json!({
//!     "from": "#enemy",
//!     "where": {"filter": [{"var": "entities"}, {"<=": [{"var": "properties.health"}, 0]}]},
//!     "do": {"mut": [{"target": "tags", "value": {"merge": [{"var": "self.tags"}, ["dead"]]}}]},
//! }))
//! .unwrap();
//! engine.load_rule(&rule, Partition::Scene);
//!
//! let report = engine.step(1.0 / 60.0);
//! assert_eq!(report.entities_written, 2);
//! let dead = engine.store().active().filter(|&e| {
//!     engine.store().get::<Tags>(e).is_some_and(|t| t.contains("dead"))
//! });
//! assert_eq!(dead.count(), 2);
//! ```

pub mod command;
mod config;
mod diagnostics;
pub mod document;
mod driver;
mod engine;
mod error;
pub mod expr;
mod match_set;
pub mod rules;
pub mod scene;
pub mod selectors;

pub use command::{Command, MutOp, TargetPath};
pub use config::EngineConfig;
pub use diagnostics::Diagnostics;
pub use driver::{RuleDriver, StepReport};
pub use engine::{RuleEngine, SceneSummary};
pub use error::{ErrorKind, RuleError, RuleResult};
pub use expr::{EvalError, Evaluator, Operators};
pub use match_set::EntitySet;
pub use rules::{ActiveRule, CompiledRule, Partition, RuleDef, RuleHandle, RuleRegistry};
pub use scene::{PreparedScene, SceneError, SceneFile, SceneLoader};
pub use selectors::{SelectorHandle, SelectorRegistry, try_parse};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Diagnostics, EngineConfig, ErrorKind, Partition, RuleDef, RuleEngine, RuleError,
        StepReport,
    };
}
