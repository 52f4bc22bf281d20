//! Selector registry - parsed selectors and their live match sets.
//!
//! Identical selectors share one slot and one match set. Match sets are
//! recomputed by [`SelectorRegistry::recalc`]; [`SelectorRegistry::refresh`]
//! does so only when the store revision moved, events are pending, or a new
//! selector was tracked.

use entity_store::{Entity, EntityStore, Name, Tags};
use hashbrown::HashMap;
use selector_dsl::{EventKind, Selector, parse_selector};
use tracing::{debug, trace};

use crate::{Diagnostics, EntitySet, RuleError, RuleResult};

/// Parse selector text, reporting one syntax diagnostic on failure.
pub fn try_parse(text: &str, diagnostics: &Diagnostics) -> Option<Selector> {
    match parse_selector(text) {
        Ok(selector) => Some(selector),
        Err(e) => {
            diagnostics.report(RuleError::syntax(format!("selector '{text}'"), e));
            None
        }
    }
}

/// Handle to a tracked selector slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorHandle(u32);

impl SelectorHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

struct Tracked {
    selector: Selector,
    refs: u32,
    matches: EntitySet,
}

/// Owns tracked selectors and their match sets.
pub struct SelectorRegistry {
    /// Fixed number of slots; `None` is free.
    slots: Vec<Option<Tracked>>,
    index: HashMap<Selector, SelectorHandle>,
    /// Collision events for the next recalculation, one set per kind.
    pending_events: [EntitySet; 2],
    /// Events consumed by the last recalculation.
    events: [EntitySet; 2],
    /// Entity capacity every match set is sized to.
    entity_capacity: usize,
    /// Store revision observed by the last recalculation.
    seen_revision: Option<u64>,
    /// A selector was tracked since the last recalculation.
    new_selectors: bool,
    /// The last recalculation consumed events, so its matches expire.
    pulse_live: bool,
}

impl SelectorRegistry {
    /// Create a registry with room for `max_selectors` distinct selectors
    /// over a store of `entity_capacity` slots.
    #[must_use]
    pub fn new(max_selectors: usize, entity_capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(max_selectors);
        slots.resize_with(max_selectors, || None);
        Self {
            slots,
            index: HashMap::with_capacity(max_selectors),
            pending_events: [
                EntitySet::with_capacity(entity_capacity),
                EntitySet::with_capacity(entity_capacity),
            ],
            events: [
                EntitySet::with_capacity(entity_capacity),
                EntitySet::with_capacity(entity_capacity),
            ],
            entity_capacity,
            seen_revision: None,
            new_selectors: false,
            pulse_live: false,
        }
    }

    /// Start tracking `selector`, or add a reference to an identical one.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::CapacityExceeded`] when every slot is taken.
    pub fn track(&mut self, selector: &Selector) -> RuleResult<SelectorHandle> {
        if let Some(&handle) = self.index.get(selector) {
            if let Some(tracked) = self.slots[handle.index()].as_mut() {
                tracked.refs += 1;
                return Ok(handle);
            }
        }

        let Some(free) = self.slots.iter().position(Option::is_none) else {
            return Err(RuleError::CapacityExceeded {
                what: "selector",
                max: self.slots.len(),
            });
        };

        let handle = SelectorHandle(free as u32);
        self.slots[free] = Some(Tracked {
            selector: selector.clone(),
            refs: 1,
            matches: EntitySet::with_capacity(self.entity_capacity),
        });
        self.index.insert(selector.clone(), handle);
        self.new_selectors = true;
        debug!(%selector, slot = free, "selector tracked");
        Ok(handle)
    }

    /// Drop one reference; the slot is freed when none remain.
    pub fn release(&mut self, handle: SelectorHandle) {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };
        let Some(tracked) = slot.as_mut() else {
            return;
        };

        tracked.refs -= 1;
        if tracked.refs == 0 {
            if let Some(tracked) = slot.take() {
                self.index.remove(&tracked.selector);
                debug!(selector = %tracked.selector, "selector released");
            }
        }
    }

    /// Record a collision event for the next recalculation.
    ///
    /// Events are a one-step pulse: they are visible to exactly one
    /// recalculation and then cleared.
    pub fn pulse(&mut self, kind: EventKind, entity: Entity) {
        self.pending_events[event_slot(kind)].insert(entity);
    }

    /// Consume pending events and recompute every tracked match set.
    pub fn recalc(&mut self, store: &EntityStore) {
        for (current, pending) in self.events.iter_mut().zip(&mut self.pending_events) {
            std::mem::swap(current, pending);
            pending.clear();
        }
        self.pulse_live = self.events.iter().any(|set| !set.is_empty());
        self.rematch(store);
    }

    /// Recompute match sets against the events of the last recalculation,
    /// leaving pending events for the next one.
    pub fn rescan(&mut self, store: &EntityStore) {
        self.rematch(store);
    }

    /// Forget events recorded for entities that are no longer active.
    pub fn drop_stale_events(&mut self, store: &EntityStore) {
        for set in self.events.iter_mut().chain(&mut self.pending_events) {
            set.retain(|e| store.is_active(e));
        }
    }

    fn rematch(&mut self, store: &EntityStore) {
        let Self { slots, events, .. } = self;

        for tracked in slots.iter_mut().flatten() {
            tracked.matches.clear();
            for entity in store.active() {
                if selector_matches(&tracked.selector, entity, store, events) {
                    tracked.matches.insert(entity);
                }
            }
        }

        self.seen_revision = Some(store.revision());
        self.new_selectors = false;
        trace!(selectors = self.index.len(), "selectors recalculated");
    }

    /// Recalculate only if match sets may be stale. Returns `true` if it did.
    pub fn refresh(&mut self, store: &EntityStore) -> bool {
        if self.is_fresh(store) {
            return false;
        }
        self.recalc(store);
        true
    }

    /// Whether match sets reflect the current store state.
    #[must_use]
    pub fn is_fresh(&self, store: &EntityStore) -> bool {
        self.seen_revision == Some(store.revision())
            && !self.new_selectors
            && !self.pulse_live
            && self.pending_events.iter().all(EntitySet::is_empty)
    }

    /// The match set of a tracked selector.
    #[must_use]
    pub fn matches(&self, handle: SelectorHandle) -> Option<&EntitySet> {
        Some(&self.slots.get(handle.index())?.as_ref()?.matches)
    }

    /// The selector held in a slot.
    #[must_use]
    pub fn selector(&self, handle: SelectorHandle) -> Option<&Selector> {
        Some(&self.slots.get(handle.index())?.as_ref()?.selector)
    }

    /// The handle of an already-tracked selector.
    #[must_use]
    pub fn handle_of(&self, selector: &Selector) -> Option<SelectorHandle> {
        self.index.get(selector).copied()
    }

    /// Lowest-index active entity currently matching `selector`.
    ///
    /// Evaluated live rather than from a match set, so references track
    /// whoever matches now. Event links see this step's events.
    #[must_use]
    pub fn first_match(&self, selector: &Selector, store: &EntityStore) -> Option<Entity> {
        store
            .active()
            .find(|&e| selector_matches(selector, e, store, &self.events))
    }

    /// Number of distinct tracked selectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of distinct selectors.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

const fn event_slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Enter => 0,
        EventKind::Exit => 1,
    }
}

/// A selector matches if any of its chains does.
fn selector_matches(
    selector: &Selector,
    entity: Entity,
    store: &EntityStore,
    events: &[EntitySet; 2],
) -> bool {
    selector
        .chains()
        .any(|chain| chain_matches(chain, entity, store, events))
}

/// A chain matches if every link's own predicate does.
fn chain_matches(chain: &Selector, entity: Entity, store: &EntityStore, events: &[EntitySet; 2]) -> bool {
    chain
        .links()
        .all(|link| link_matches(link, entity, store, events))
}

fn link_matches(link: &Selector, entity: Entity, store: &EntityStore, events: &[EntitySet; 2]) -> bool {
    match link {
        Selector::Id { name, .. } => store.get::<Name>(entity).is_some_and(|n| n.0 == *name),
        Selector::Tag { name, .. } => store.get::<Tags>(entity).is_some_and(|t| t.contains(name)),
        Selector::Event { kind, .. } => events[event_slot(*kind)].contains(entity),
        Selector::Union(_) => selector_matches(link, entity, store, events),
    }
}

#[cfg(test)]
mod tests {
    use entity_store::Pool;

    use super::*;

    fn sel(text: &str) -> Selector {
        parse_selector(text).unwrap()
    }

    fn spawn(store: &mut EntityStore, name: &str, tags: &[&str]) -> Entity {
        let e = store.activate(Pool::Scene).unwrap();
        store.insert(e, Name(name.to_string())).unwrap();
        store.insert(e, tags.iter().copied().collect::<Tags>()).unwrap();
        e
    }

    fn members(registry: &SelectorRegistry, handle: SelectorHandle) -> Vec<Entity> {
        registry.matches(handle).unwrap().iter().collect()
    }

    #[test]
    fn test_id_and_tag_matching() {
        let mut store = EntityStore::new(0, 8);
        let player = spawn(&mut store, "player", &["hero"]);
        let goblin = spawn(&mut store, "goblin", &["enemy"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let by_id = registry.track(&sel("@player")).unwrap();
        let by_tag = registry.track(&sel("#enemy")).unwrap();
        registry.recalc(&store);

        assert_eq!(members(&registry, by_id), [player]);
        assert_eq!(members(&registry, by_tag), [goblin]);
    }

    #[test]
    fn test_refinement_is_intersection() {
        let mut store = EntityStore::new(0, 8);
        let _grunt = spawn(&mut store, "grunt", &["enemy"]);
        let boss = spawn(&mut store, "boss", &["enemy", "boss"]);
        let _statue = spawn(&mut store, "statue", &["boss"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("#enemy:#boss")).unwrap();
        registry.recalc(&store);

        assert_eq!(members(&registry, handle), [boss]);
    }

    #[test]
    fn test_union_is_union() {
        let mut store = EntityStore::new(0, 8);
        let a = spawn(&mut store, "a", &["x"]);
        let b = spawn(&mut store, "b", &["y"]);
        let _c = spawn(&mut store, "c", &["z"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("#y, @a")).unwrap();
        registry.recalc(&store);

        assert_eq!(members(&registry, handle), [a, b]);
    }

    #[test]
    fn test_recalc_is_idempotent() {
        let mut store = EntityStore::new(0, 8);
        spawn(&mut store, "a", &["x"]);
        spawn(&mut store, "b", &["x", "y"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("#x, #y:@b")).unwrap();
        registry.recalc(&store);
        let first = registry.matches(handle).unwrap().clone();
        registry.recalc(&store);

        assert_eq!(registry.matches(handle).unwrap(), &first);
    }

    #[test]
    fn test_event_pulse_lasts_one_recalc() {
        let mut store = EntityStore::new(0, 8);
        let door = spawn(&mut store, "door", &["door"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("!enter:#door")).unwrap();
        registry.recalc(&store);
        assert!(registry.matches(handle).unwrap().is_empty());

        registry.pulse(EventKind::Enter, door);
        assert!(registry.refresh(&store));
        assert_eq!(members(&registry, handle), [door]);

        // Expired matches force one more pass, then the registry settles
        assert!(registry.refresh(&store));
        assert!(registry.matches(handle).unwrap().is_empty());
        assert!(!registry.refresh(&store));
    }

    #[test]
    fn test_refresh_follows_store_revision() {
        let mut store = EntityStore::new(0, 8);
        let e = spawn(&mut store, "a", &[]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("#late")).unwrap();
        assert!(registry.refresh(&store));
        assert!(!registry.refresh(&store));

        store.get_mut::<Tags>(e).unwrap().insert("late");
        assert!(!registry.is_fresh(&store));
        assert!(registry.refresh(&store));
        assert_eq!(members(&registry, handle), [e]);
    }

    #[test]
    fn test_identical_selectors_share_a_slot() {
        let mut registry = SelectorRegistry::new(2, 4);
        let a = registry.track(&sel("#x")).unwrap();
        let b = registry.track(&sel(" #x ")).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);

        registry.release(a);
        assert!(registry.selector(b).is_some());
        registry.release(b);
        assert!(registry.selector(b).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut registry = SelectorRegistry::new(1, 4);
        registry.track(&sel("#a")).unwrap();
        let err = registry.track(&sel("#b")).unwrap_err();
        assert!(matches!(err, RuleError::CapacityExceeded { max: 1, .. }));
    }

    #[test]
    fn test_first_match_is_live() {
        let mut store = EntityStore::new(0, 8);
        let a = spawn(&mut store, "a", &["root"]);
        let b = spawn(&mut store, "b", &["root"]);

        let registry = SelectorRegistry::new(1, store.capacity());
        assert_eq!(registry.first_match(&sel("#root"), &store), Some(a));

        store.deactivate(a);
        assert_eq!(registry.first_match(&sel("#root"), &store), Some(b));
    }

    #[test]
    fn test_rescan_keeps_pending_events() {
        let mut store = EntityStore::new(0, 8);
        let door = spawn(&mut store, "door", &["door"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("!enter:#door")).unwrap();
        registry.pulse(EventKind::Enter, door);

        let late = spawn(&mut store, "late", &["door"]);
        registry.rescan(&store);
        assert!(registry.matches(handle).unwrap().is_empty());
        assert!(!registry.is_fresh(&store));

        assert!(registry.refresh(&store));
        assert_eq!(members(&registry, handle), [door]);
        assert!(!registry.matches(handle).unwrap().contains(late));
    }

    #[test]
    fn test_first_match_sees_consumed_events() {
        let mut store = EntityStore::new(0, 8);
        let a = spawn(&mut store, "a", &["pad"]);
        let b = spawn(&mut store, "b", &["pad"]);

        let mut registry = SelectorRegistry::new(1, store.capacity());
        registry.pulse(EventKind::Enter, b);
        // Not yet consumed, so not part of this step.
        assert_eq!(registry.first_match(&sel("!enter"), &store), None);

        registry.recalc(&store);
        assert_eq!(registry.first_match(&sel("!enter:#pad"), &store), Some(b));
        registry.pulse(EventKind::Enter, a);
        assert_eq!(registry.first_match(&sel("!enter:#pad"), &store), Some(b));
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let mut store = EntityStore::new(0, 8);
        let door = spawn(&mut store, "door", &["door"]);

        let mut registry = SelectorRegistry::new(8, store.capacity());
        let handle = registry.track(&sel("!exit")).unwrap();
        registry.pulse(EventKind::Exit, door);
        store.deactivate(door);
        registry.drop_stale_events(&store);

        // The slot is reused by a fresh entity that never collided.
        let fresh = spawn(&mut store, "fresh", &[]);
        assert_eq!(fresh, door);
        registry.refresh(&store);
        assert!(registry.matches(handle).unwrap().is_empty());
    }

    #[test]
    fn test_try_parse_reports_once() {
        let diagnostics = Diagnostics::new(8);
        assert!(try_parse("@@x", &diagnostics).is_none());
        assert_eq!(diagnostics.total(), 1);
        assert!(try_parse("@x", &diagnostics).is_some());
        assert_eq!(diagnostics.total(), 1);
    }
}
