//! Per-step rule driver.
//!
//! For every active rule, in registration order (global partition first):
//!
//! 1. Read the rule's match set. Selectors must already be refreshed.
//! 2. Lend the matched documents to the filter context
//!    `{"step": {"deltaTime"}, "entities": [...]}`.
//! 3. Evaluate `where`. The result must be a list.
//! 4. For each surviving document, run the command against
//!    `{"step", "entities": <survivors>, "self": <document>}`.
//! 5. Patch the fields the command touched back into the entity named by
//!    the document's `_index`.
//!
//! Documents are read at most once per entity per step: they live in a
//! cache that is lent out to contexts and invalidated on write-back. The
//! contexts themselves are reused across rules and steps.

use std::mem;

use entity_store::{Entity, EntityStore, StoreError};
use serde_json::{Map, Value, json};
use tracing::trace;

use crate::command::{Command, SELF_KEY, apply_ops};
use crate::document;
use crate::expr::Evaluator;
use crate::rules::{ActiveRule, RuleRegistry};
use crate::selectors::SelectorRegistry;
use crate::{Diagnostics, RuleError};

const STEP_KEY: &str = "step";
const ENTITIES_KEY: &str = "entities";

/// Outcome of one driver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Rules whose filter produced a list.
    pub rules_run: usize,
    /// Rules skipped because their filter failed.
    pub rules_skipped: usize,
    /// Documents patched back into entities.
    pub entities_written: usize,
    /// Entities deactivated by `deactivate` commands.
    pub entities_deactivated: usize,
    /// Write-backs skipped because the entity was already gone.
    pub stale_skips: usize,
    /// Last scene requested this step, for the host to load afterwards.
    pub scene_request: Option<String>,
}

/// One document slot per entity, valid for the current step.
struct DocumentCache {
    slots: Vec<Option<Value>>,
}

impl DocumentCache {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    fn begin_step(&mut self, capacity: usize) {
        for slot in &mut self.slots {
            *slot = None;
        }
        if self.slots.len() < capacity {
            self.slots.resize_with(capacity, || None);
        }
    }

    /// Take an entity's document, reading it if it is not cached.
    fn take(&mut self, store: &EntityStore, entity: Entity) -> Option<Value> {
        self.slots
            .get_mut(entity.slot())
            .and_then(Option::take)
            .or_else(|| document::read(store, entity))
    }

    fn put(&mut self, entity: Entity, document: Value) {
        if let Some(slot) = self.slots.get_mut(entity.slot()) {
            *slot = Some(document);
        }
    }

    fn invalidate(&mut self, entity: Entity) {
        if let Some(slot) = self.slots.get_mut(entity.slot()) {
            *slot = None;
        }
    }
}

/// Runs rules against the store once per step.
pub struct RuleDriver {
    evaluator: Evaluator,
    cache: DocumentCache,
    filter_context: Value,
    mutation_context: Value,
    /// Entities whose documents are lent to the filter context, in order.
    lent: Vec<Entity>,
    /// Survivors of the current rule's filter.
    targets: Vec<Entity>,
}

impl RuleDriver {
    /// A driver for a store of `entity_capacity` slots.
    #[must_use]
    pub fn new(evaluator: Evaluator, entity_capacity: usize) -> Self {
        Self {
            evaluator,
            cache: DocumentCache::new(entity_capacity),
            filter_context: json!({ STEP_KEY: {}, ENTITIES_KEY: [] }),
            mutation_context: json!({ STEP_KEY: {}, ENTITIES_KEY: [], SELF_KEY: null }),
            lent: Vec::with_capacity(entity_capacity),
            targets: Vec::with_capacity(entity_capacity),
        }
    }

    #[must_use]
    pub const fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Run every active rule once.
    ///
    /// `selectors` must have been refreshed against `store` for this step.
    /// Failures are reported to `diagnostics` and never stop the pass.
    pub fn run(
        &mut self,
        delta_time: f64,
        rules: &RuleRegistry,
        selectors: &SelectorRegistry,
        store: &mut EntityStore,
        diagnostics: &Diagnostics,
    ) -> StepReport {
        let mut report = StepReport::default();
        self.cache.begin_step(store.capacity());

        let step = json!({ "deltaTime": delta_time });
        swap(&mut self.mutation_context, STEP_KEY, step.clone());
        swap(&mut self.filter_context, STEP_KEY, step);

        for active in rules.iter() {
            let Some(survivors) = self.filter(active, selectors, store, diagnostics) else {
                report.rules_skipped += 1;
                continue;
            };
            report.rules_run += 1;
            if survivors.is_empty() {
                continue;
            }
            self.resolve_targets(&survivors, store, diagnostics, &mut report);
            self.execute(active, survivors, store, diagnostics, &mut report);
        }

        trace!(
            rules = report.rules_run,
            skipped = report.rules_skipped,
            written = report.entities_written,
            "rule pass complete"
        );
        report
    }

    /// Evaluate a rule's filter over its current matches.
    fn filter(
        &mut self,
        active: &ActiveRule,
        selectors: &SelectorRegistry,
        store: &EntityStore,
        diagnostics: &Diagnostics,
    ) -> Option<Vec<Value>> {
        let Some(matches) = selectors.matches(active.selector) else {
            diagnostics.report(RuleError::evaluation(&active.rule.label, "selector is not tracked"));
            return None;
        };

        if let Some(Value::Array(list)) = self.filter_context.get_mut(ENTITIES_KEY) {
            for entity in matches.iter() {
                // Deactivated earlier this step; its match set entry is stale.
                let Some(doc) = self.cache.take(store, entity) else {
                    continue;
                };
                self.lent.push(entity);
                list.push(doc);
            }
        }

        let result = self.evaluator.evaluate(&active.rule.filter, &self.filter_context);

        if let Some(Value::Array(list)) = self.filter_context.get_mut(ENTITIES_KEY) {
            for (entity, doc) in self.lent.drain(..).zip(list.drain(..)) {
                self.cache.put(entity, doc);
            }
        }
        self.lent.clear();

        match result {
            Ok(Value::Array(survivors)) => Some(survivors),
            Ok(other) => {
                diagnostics.report(RuleError::evaluation(
                    &active.rule.label,
                    format!("filter must produce a list, got {}", kind_of(&other)),
                ));
                None
            }
            Err(e) => {
                diagnostics.report(RuleError::evaluation(&active.rule.label, e));
                None
            }
        }
    }

    /// Map surviving documents to live entities. Nulls are skipped.
    fn resolve_targets(
        &mut self,
        survivors: &[Value],
        store: &EntityStore,
        diagnostics: &Diagnostics,
        report: &mut StepReport,
    ) {
        self.targets.clear();
        for survivor in survivors {
            if survivor.is_null() {
                continue;
            }
            match resolve(survivor, store) {
                Ok(entity) => self.targets.push(entity),
                Err(RuleError::StaleReference(_)) => report.stale_skips += 1,
                Err(e) => diagnostics.report(e),
            }
        }
    }

    fn execute(
        &mut self,
        active: &ActiveRule,
        survivors: Vec<Value>,
        store: &mut EntityStore,
        diagnostics: &Diagnostics,
        report: &mut StepReport,
    ) {
        match &active.rule.command {
            Command::Deactivate => {
                for &entity in &self.targets {
                    if store.deactivate(entity) {
                        self.cache.invalidate(entity);
                        report.entities_deactivated += 1;
                    }
                }
            }
            Command::LoadScene(path) => {
                if !self.targets.is_empty() {
                    report.scene_request = Some(path.clone());
                }
            }
            Command::Mutate(ops) => {
                let roots = active.rule.command.touched_roots();
                swap(&mut self.mutation_context, ENTITIES_KEY, Value::Array(survivors));

                for &entity in &self.targets {
                    let Some(doc) = self.cache.take(store, entity) else {
                        report.stale_skips += 1;
                        continue;
                    };
                    swap(&mut self.mutation_context, SELF_KEY, doc);
                    apply_ops(
                        ops,
                        &self.evaluator,
                        &mut self.mutation_context,
                        &active.rule.label,
                        diagnostics,
                    );
                    let mut doc = swap(&mut self.mutation_context, SELF_KEY, Value::Null);

                    // The command may have retargeted `_index`.
                    let target = match resolve(&doc, store) {
                        Ok(target) => target,
                        Err(RuleError::StaleReference(_)) => {
                            report.stale_skips += 1;
                            continue;
                        }
                        Err(e) => {
                            diagnostics.report(e);
                            continue;
                        }
                    };

                    let patch = sparse_patch(&mut doc, &roots);
                    match document::write(&patch, target, store, diagnostics) {
                        Ok(_) => report.entities_written += 1,
                        Err(RuleError::StaleReference(_)) => report.stale_skips += 1,
                        Err(e) => diagnostics.report(e),
                    }
                    self.cache.invalidate(target);
                }

                swap(&mut self.mutation_context, ENTITIES_KEY, Value::Array(Vec::new()));
            }
        }
    }
}

/// Resolve a document's `_index` to an active entity.
fn resolve(document: &Value, store: &EntityStore) -> Result<Entity, RuleError> {
    let index = document::index_of(document)?;
    store.entity(index).map_err(|e| match e {
        StoreError::Inactive(entity) => RuleError::StaleReference(entity),
        other => RuleError::conversion(document::INDEX, other),
    })
}

/// Move the touched root fields out of `document`.
fn sparse_patch(document: &mut Value, roots: &[&str]) -> Value {
    let mut patch = Map::new();
    if let Value::Object(fields) = document {
        for &root in roots {
            if let Some(value) = fields.remove(root) {
                patch.insert(root.to_string(), value);
            }
        }
    }
    Value::Object(patch)
}

/// Replace `context[key]`, returning the previous value.
fn swap(context: &mut Value, key: &str, value: Value) -> Value {
    if let Some(slot) = context.get_mut(key) {
        return mem::replace(slot, value);
    }
    if let Value::Object(map) = context {
        map.insert(key.to_string(), value);
    }
    Value::Null
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use entity_store::{Pool, Properties, PropertyValue, Tags};
    use serde_json::json;

    use super::*;
    use crate::rules::{CompiledRule, Partition, RuleDef};
    use crate::ErrorKind;

    struct Fixture {
        store: EntityStore,
        selectors: SelectorRegistry,
        rules: RuleRegistry,
        driver: RuleDriver,
        diagnostics: Diagnostics,
    }

    impl Fixture {
        fn new() -> Self {
            let store = EntityStore::new(4, 16);
            Self {
                selectors: SelectorRegistry::new(16, store.capacity()),
                rules: RuleRegistry::new(8, 8),
                driver: RuleDriver::new(Evaluator::new(), store.capacity()),
                diagnostics: Diagnostics::default(),
                store,
            }
        }

        fn enemy(&mut self, health: f64) -> Entity {
            let e = self.store.activate(Pool::Scene).unwrap();
            self.store.insert(e, Tags::from_iter(["enemy"])).unwrap();
            let mut props = Properties::new();
            props.set("health", health);
            self.store.insert(e, props).unwrap();
            e
        }

        fn rule(&mut self, def: serde_json::Value) {
            let def: RuleDef = serde_json::from_value(def).unwrap();
            let rule = CompiledRule::compile(&def).unwrap();
            self.rules.activate(Partition::Scene, rule, &mut self.selectors).unwrap();
        }

        fn step(&mut self) -> StepReport {
            self.selectors.refresh(&self.store);
            self.driver.run(
                0.016,
                &self.rules,
                &self.selectors,
                &mut self.store,
                &self.diagnostics,
            )
        }

        fn health(&self, e: Entity) -> Option<&PropertyValue> {
            self.store.get::<Properties>(e)?.get("health")
        }
    }

    fn damage_rule() -> serde_json::Value {
        json!({
            "from": "#enemy",
            "where": {"filter": [{"var": "entities"}, {">": [{"var": "properties.health"}, 0]}]},
            "do": {"mut": [{
                "target": {"properties": "health"},
                "value": {"-": [{"var": "self.properties.health"}, 1]},
            }]},
        })
    }

    #[test]
    fn test_filter_then_mutate() {
        let mut fx = Fixture::new();
        let alive = fx.enemy(3.0);
        let dead = fx.enemy(0.0);
        fx.rule(damage_rule());

        let report = fx.step();

        assert_eq!(report.rules_run, 1);
        assert_eq!(report.entities_written, 1);
        assert_eq!(fx.health(alive), Some(&PropertyValue::Number(2.0)));
        assert_eq!(fx.health(dead), Some(&PropertyValue::Number(0.0)));
        assert_eq!(fx.diagnostics.total(), 0);
    }

    #[test]
    fn test_later_rule_sees_earlier_write() {
        let mut fx = Fixture::new();
        let e = fx.enemy(3.0);
        fx.rule(damage_rule());
        fx.rule(damage_rule());

        fx.step();
        assert_eq!(fx.health(e), Some(&PropertyValue::Number(1.0)));
    }

    #[test]
    fn test_non_list_filter_skips_only_that_rule() {
        let mut fx = Fixture::new();
        let e = fx.enemy(3.0);
        fx.rule(json!({"from": "#enemy", "where": {"var": "step.deltaTime"}, "do": {"deactivate": true}}));
        fx.rule(damage_rule());

        let report = fx.step();

        assert_eq!(report.rules_skipped, 1);
        assert_eq!(report.rules_run, 1);
        assert!(fx.store.is_active(e));
        assert_eq!(fx.health(e), Some(&PropertyValue::Number(2.0)));
        assert_eq!(fx.diagnostics.count(ErrorKind::Evaluation), 1);
    }

    #[test]
    fn test_deactivated_entity_is_skipped_by_later_rules() {
        let mut fx = Fixture::new();
        let e = fx.enemy(3.0);
        fx.rule(json!({"from": "#enemy", "do": {"deactivate": true}}));
        fx.rule(damage_rule());

        let report = fx.step();

        assert!(!fx.store.is_active(e));
        assert_eq!(report.entities_deactivated, 1);
        assert_eq!(report.entities_written, 0);
        assert_eq!(fx.diagnostics.total(), 0);
    }

    #[test]
    fn test_nulls_in_filter_result_are_skipped() {
        let mut fx = Fixture::new();
        let e = fx.enemy(3.0);
        fx.rule(json!({
            "from": "#enemy",
            "where": [null, {"var": "entities.0"}, null],
            "do": {"mut": [{"target": "id", "value": "marked"}]},
        }));

        let report = fx.step();
        assert_eq!(report.entities_written, 1);
        assert_eq!(fx.store.get::<entity_store::Name>(e).unwrap().0, "marked");
        assert_eq!(fx.diagnostics.total(), 0);
    }

    #[test]
    fn test_mutation_context_exposes_survivors_and_step() {
        let mut fx = Fixture::new();
        let a = fx.enemy(3.0);
        let b = fx.enemy(7.0);
        fx.rule(json!({
            "from": "#enemy",
            "do": {"mut": [
                {"target": {"properties": "pack"}, "value": {"count": [{"var": "entities"}]}},
                {"target": {"properties": "dt"}, "value": {"var": "step.deltaTime"}},
            ]},
        }));

        fx.step();
        for e in [a, b] {
            let props = fx.store.get::<Properties>(e).unwrap();
            assert_eq!(props.get("pack"), Some(&PropertyValue::Number(2.0)));
            assert_eq!(props.get("dt"), Some(&PropertyValue::Number(0.016)));
        }
    }

    #[test]
    fn test_load_scene_request() {
        let mut fx = Fixture::new();
        fx.enemy(0.0);
        fx.rule(json!({
            "from": "#enemy",
            "where": {"filter": [{"var": "entities"}, {"<=": [{"var": "properties.health"}, 0]}]},
            "do": {"loadScene": "scenes/game-over.json"},
        }));
        fx.rule(json!({"from": "#nobody", "do": {"loadScene": "never.json"}}));

        let report = fx.step();
        assert_eq!(report.scene_request.as_deref(), Some("scenes/game-over.json"));
    }

    #[test]
    fn test_untouched_fields_are_not_written() {
        let mut fx = Fixture::new();
        let e = fx.enemy(3.0);
        let revision = fx.store.revision();
        fx.rule(damage_rule());

        fx.step();
        // Tags were not targeted, so selector membership is untouched.
        assert_eq!(fx.store.revision(), revision);
        assert_eq!(fx.health(e), Some(&PropertyValue::Number(2.0)));
    }

    #[test]
    fn test_document_cache_lend_and_return() {
        let mut store = EntityStore::new(2, 2);
        let e = store.activate(Pool::Global).unwrap();
        let mut cache = DocumentCache::new(store.capacity());

        let doc = cache.take(&store, e).unwrap();
        cache.put(e, json!({"_index": 0, "id": "cached"}));
        assert_eq!(cache.take(&store, e).unwrap()["id"], json!("cached"));
        // Taken and not returned: the next take reads fresh.
        assert_eq!(cache.take(&store, e).unwrap(), doc);
    }
}
