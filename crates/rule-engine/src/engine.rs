//! The rule engine: every service the driver needs, owned in one place.

use entity_store::{Entity, EntityStore, Parent, Pool};
use selector_dsl::EventKind;
use serde_json::Value;
use tracing::{debug, info};

use crate::driver::{RuleDriver, StepReport};
use crate::expr::Evaluator;
use crate::rules::{CompiledRule, Partition, RuleDef, RuleHandle, RuleRegistry};
use crate::scene::PreparedScene;
use crate::selectors::SelectorRegistry;
use crate::{Diagnostics, EngineConfig, RuleError, document};

/// Owns the store, registries, driver and diagnostic sink.
///
/// All mutation happens through `&mut self` on the step thread.
pub struct RuleEngine {
    config: EngineConfig,
    store: EntityStore,
    selectors: SelectorRegistry,
    rules: RuleRegistry,
    driver: RuleDriver,
    diagnostics: Diagnostics,
    steps: u64,
}

/// What [`RuleEngine::apply_scene`] activated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneSummary {
    pub entities: usize,
    pub rules: usize,
    pub global_rules: usize,
    /// Entities, rules or compile errors that were reported and dropped.
    pub dropped: usize,
}

impl RuleEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_evaluator(config, Evaluator::new())
    }

    /// An engine whose filters and commands use `evaluator`.
    #[must_use]
    pub fn with_evaluator(config: EngineConfig, evaluator: Evaluator) -> Self {
        let store = EntityStore::new(config.global_entities, config.scene_entities);
        let capacity = store.capacity();
        Self {
            selectors: SelectorRegistry::new(config.max_selectors, capacity),
            rules: RuleRegistry::new(config.global_rules, config.scene_rules),
            driver: RuleDriver::new(evaluator, capacity),
            diagnostics: Diagnostics::new(config.diagnostic_history),
            store,
            config,
            steps: 0,
        }
    }

    // ==================== Accessors ====================

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Direct store access for hosts. Selector membership catches up on
    /// the next step.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    #[must_use]
    pub const fn selectors(&self) -> &SelectorRegistry {
        &self.selectors
    }

    #[must_use]
    pub const fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Steps run so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    // ==================== Rules ====================

    /// Compile and activate a rule. Failures are reported, never returned.
    pub fn load_rule(&mut self, def: &RuleDef, partition: Partition) -> Option<RuleHandle> {
        match CompiledRule::compile(def) {
            Ok(rule) => self.activate(rule, partition),
            Err(e) => {
                self.diagnostics.report(e);
                None
            }
        }
    }

    /// Load a batch of rules; a bad rule is dropped and the rest still
    /// load. Returns how many activated.
    pub fn load_rules<'a>(
        &mut self,
        defs: impl IntoIterator<Item = &'a RuleDef>,
        partition: Partition,
    ) -> usize {
        defs.into_iter()
            .filter_map(|def| self.load_rule(def, partition))
            .count()
    }

    /// Activate an already-compiled rule.
    pub fn activate(&mut self, rule: CompiledRule, partition: Partition) -> Option<RuleHandle> {
        match partition {
            Partition::Global => {
                self.rules
                    .try_activate_global(rule, &mut self.selectors, &self.diagnostics)
            }
            Partition::Scene => self
                .rules
                .try_activate(rule, &mut self.selectors, &self.diagnostics),
        }
    }

    // ==================== Entities ====================

    /// Activate an entity and write `document` into it.
    ///
    /// Field errors are reported and skipped; exhausting the pool is
    /// reported as [`RuleError::CapacityExceeded`].
    pub fn spawn(&mut self, pool: Pool, document: &Value) -> Option<Entity> {
        let entity = match self.store.activate(pool) {
            Ok(entity) => entity,
            Err(_) => {
                self.diagnostics.report(RuleError::CapacityExceeded {
                    what: match pool {
                        Pool::Global => "global entity",
                        Pool::Scene => "scene entity",
                    },
                    max: self.store.pool_capacity(pool),
                });
                return None;
            }
        };
        if let Err(e) = document::write(document, entity, &mut self.store, &self.diagnostics) {
            self.diagnostics.report(e);
        }
        Some(entity)
    }

    /// Current document of an active entity.
    #[must_use]
    pub fn document(&self, entity: Entity) -> Option<Value> {
        document::read(&self.store, entity)
    }

    /// Resolve an entity's parent selector to whoever matches it now.
    #[must_use]
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        let parent = self.store.get::<Parent>(entity)?;
        self.selectors.first_match(&parent.0, &self.store)
    }

    /// Record a collision event for the next step.
    pub fn pulse(&mut self, kind: EventKind, entity: Entity) {
        self.selectors.pulse(kind, entity);
    }

    // ==================== Stepping ====================

    /// Bring match sets up to date with the store.
    pub fn refresh(&mut self) -> bool {
        self.selectors.refresh(&self.store)
    }

    /// Refresh selectors, then run every active rule once.
    pub fn step(&mut self, delta_time: f64) -> StepReport {
        self.refresh();
        let report = self.driver.run(
            delta_time,
            &self.rules,
            &self.selectors,
            &mut self.store,
            &self.diagnostics,
        );
        self.steps += 1;
        report
    }

    // ==================== Scenes ====================

    /// Replace the current scene with `scene`.
    ///
    /// Scene rules and scene entities are cleared first, so no rule ever
    /// sees a half-loaded scene. Global rules in the file are added to the
    /// global partition unless an equal rule is already active there.
    pub fn apply_scene(&mut self, scene: PreparedScene) -> SceneSummary {
        let PreparedScene {
            source,
            entities,
            rules,
            global_rules,
            errors,
        } = scene;

        self.rules.reset(&mut self.selectors);
        let removed = self.store.reset_scene();
        self.selectors.drop_stale_events(&self.store);
        debug!(removed, "scene partition reset");

        let mut summary = SceneSummary {
            dropped: errors.len(),
            ..SceneSummary::default()
        };
        for error in errors {
            self.diagnostics.report(error);
        }

        for doc in &entities {
            match self.spawn(Pool::Scene, doc) {
                Some(_) => summary.entities += 1,
                None => summary.dropped += 1,
            }
        }
        for rule in global_rules {
            if self.rules.find(Partition::Global, &rule).is_some() {
                debug!(rule = %rule.label, "global rule already active");
                continue;
            }
            match self.activate(rule, Partition::Global) {
                Some(_) => summary.global_rules += 1,
                None => summary.dropped += 1,
            }
        }
        for rule in rules {
            match self.activate(rule, Partition::Scene) {
                Some(_) => summary.rules += 1,
                None => summary.dropped += 1,
            }
        }

        // Events pulsed for the next step stay pending.
        self.selectors.rescan(&self.store);
        info!(
            source = %source.display(),
            entities = summary.entities,
            rules = summary.rules,
            global_rules = summary.global_rules,
            dropped = summary.dropped,
            "scene applied"
        );
        summary
    }

    /// Drop every rule, leaving entities in place.
    pub fn clear_rules(&mut self) {
        self.rules.clear_all(&mut self.selectors);
    }
}

#[cfg(test)]
mod tests {
    use entity_store::{Name, Tags};
    use selector_dsl::Selector;
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    fn small() -> EngineConfig {
        EngineConfig {
            global_entities: 4,
            scene_entities: 8,
            global_rules: 4,
            scene_rules: 4,
            max_selectors: 8,
            diagnostic_history: 16,
        }
    }

    #[test]
    fn test_spawn_writes_document() {
        let mut engine = RuleEngine::new(small());
        let e = engine
            .spawn(Pool::Global, &json!({"id": "player", "tags": ["hero"]}))
            .unwrap();
        assert_eq!(engine.store().get::<Name>(e).unwrap().0, "player");
        assert!(engine.store().get::<Tags>(e).unwrap().contains("hero"));
        assert_eq!(engine.document(e).unwrap()["_index"], json!(0));
    }

    #[test]
    fn test_spawn_beyond_pool_is_reported() {
        let mut engine = RuleEngine::new(small());
        for _ in 0..4 {
            assert!(engine.spawn(Pool::Global, &json!({})).is_some());
        }
        assert!(engine.spawn(Pool::Global, &json!({})).is_none());
        assert_eq!(engine.diagnostics().count(ErrorKind::CapacityExceeded), 1);
    }

    #[test]
    fn test_load_rules_skips_bad_ones() {
        let mut engine = RuleEngine::new(small());
        let defs: Vec<RuleDef> = serde_json::from_value(json!([
            {"from": "#a", "do": {"deactivate": true}},
            {"from": "@", "do": {"deactivate": true}},
            {"from": "#b", "do": {"teleport": true}},
            {"from": "#c", "do": {"deactivate": true}},
        ]))
        .unwrap();

        assert_eq!(engine.load_rules(&defs, Partition::Scene), 2);
        assert_eq!(engine.diagnostics().count(ErrorKind::Syntax), 2);
    }

    #[test]
    fn test_parent_tracks_whoever_matches() {
        let mut engine = RuleEngine::new(small());
        let child = engine.spawn(Pool::Scene, &json!({"parent": "#anchor"})).unwrap();
        assert_eq!(engine.parent_of(child), None);

        let first = engine.spawn(Pool::Scene, &json!({"tags": ["anchor"]})).unwrap();
        assert_eq!(engine.parent_of(child), Some(first));

        engine.store_mut().deactivate(first);
        let second = engine.spawn(Pool::Scene, &json!({"tags": ["anchor"], "id": "b"})).unwrap();
        assert_eq!(engine.parent_of(child), Some(second));
    }

    #[test]
    fn test_event_pulse_lasts_one_step() {
        let mut engine = RuleEngine::new(small());
        let e = engine.spawn(Pool::Scene, &json!({"tags": ["door"]})).unwrap();
        let handle = engine
            .load_rule(
                &serde_json::from_value(json!({
                    "from": "!enter:#door",
                    "do": {"mut": [{"target": {"properties": "opened"}, "value": true}]},
                }))
                .unwrap(),
                Partition::Scene,
            )
            .unwrap();
        let selector = engine.rules().get(handle).unwrap().selector;

        engine.pulse(EventKind::Enter, e);
        let report = engine.step(0.1);
        assert_eq!(report.entities_written, 1);
        assert!(engine.selectors().matches(selector).unwrap().contains(e));

        engine.step(0.1);
        assert!(!engine.selectors().matches(selector).unwrap().contains(e));
        assert_eq!(
            engine.selectors().selector(selector),
            Some(&Selector::event(EventKind::Enter).refined_by(Selector::tag("door")))
        );
    }

    fn scene_with_global_rule() -> PreparedScene {
        PreparedScene::from_json(
            "arena.json",
            r##"{
                "entities": [{"tags": ["crate"]}],
                "globalRules": [{"from": "@keeper", "do": {"mut": []}}]
            }"##,
        )
        .unwrap()
    }

    #[test]
    fn test_reentered_scene_keeps_one_copy_of_global_rules() {
        let mut engine = RuleEngine::new(small());
        let scene = scene_with_global_rule();

        let first = engine.apply_scene(scene.clone());
        assert_eq!(first.global_rules, 1);
        for _ in 0..3 {
            let again = engine.apply_scene(scene.clone());
            assert_eq!(again.global_rules, 0);
            assert_eq!(again.dropped, 0);
        }

        assert_eq!(engine.rules().partition_len(Partition::Global), 1);
        assert_eq!(engine.diagnostics().total(), 0);
    }

    #[test]
    fn test_apply_scene_keeps_pending_events() {
        let mut engine = RuleEngine::new(small());
        let player = engine.spawn(Pool::Global, &json!({"id": "player"})).unwrap();
        engine
            .load_rule(
                &serde_json::from_value(json!({
                    "from": "!enter:@player",
                    "do": {"mut": [{"target": {"properties": "hit"}, "value": true}]},
                }))
                .unwrap(),
                Partition::Global,
            )
            .unwrap();

        engine.pulse(EventKind::Enter, player);
        engine.apply_scene(scene_with_global_rule());
        let report = engine.step(0.1);

        assert_eq!(report.entities_written, 1);
        assert_eq!(engine.document(player).unwrap()["properties"]["hit"], json!(true));
    }

    #[test]
    fn test_apply_scene_forgets_events_of_removed_entities() {
        let mut engine = RuleEngine::new(small());
        let old = engine.spawn(Pool::Scene, &json!({"tags": ["crate"]})).unwrap();
        engine
            .load_rule(
                &serde_json::from_value(json!({"from": "!exit", "do": {"deactivate": true}})).unwrap(),
                Partition::Global,
            )
            .unwrap();

        engine.pulse(EventKind::Exit, old);
        engine.apply_scene(scene_with_global_rule());
        let report = engine.step(0.1);

        // The new crate reuses the old slot but never collided.
        assert!(engine.store().is_active(old));
        assert_eq!(report.entities_deactivated, 0);
    }
}
