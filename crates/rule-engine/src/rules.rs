//! Rule definitions and the partitioned rule registry.
//!
//! Rules live in one of two fixed-capacity partitions. The global partition
//! survives scene transitions; the scene partition is cleared by
//! [`RuleRegistry::reset`]. Iteration is always global first, then scene,
//! each in registration order.

use std::fmt;

use selector_dsl::{Selector, parse_selector};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::command::Command;
use crate::selectors::{SelectorHandle, SelectorRegistry};
use crate::{Diagnostics, RuleError, RuleResult};

/// A rule as authored: `{"from": "<selector>", "where": <expr>, "do": <command>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    /// Optional label used in diagnostics; defaults to the `from` text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub from: String,
    /// Filter over `entities`; keeps every match when omitted.
    #[serde(rename = "where", default = "keep_all")]
    pub filter: Value,
    #[serde(rename = "do")]
    pub command: Value,
}

fn keep_all() -> Value {
    json!({ "var": "entities" })
}

/// A rule with its selector and command parsed. Holds no registry state,
/// so it can be built off the step thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub label: String,
    pub from: Selector,
    pub filter: Value,
    pub command: Command,
}

impl CompiledRule {
    /// Parse a rule definition.
    ///
    /// # Errors
    ///
    /// [`RuleError::Syntax`] for a malformed selector or command.
    pub fn compile(def: &RuleDef) -> RuleResult<Self> {
        let label = def.name.clone().unwrap_or_else(|| def.from.clone());
        let from = parse_selector(&def.from)
            .map_err(|e| RuleError::syntax(format!("selector '{}' of rule '{label}'", def.from), e))?;
        let command = Command::parse(&def.command).map_err(|e| match e {
            RuleError::Syntax { context, message } => {
                RuleError::syntax(format!("{context} of rule '{label}'"), message)
            }
            other => other,
        })?;
        Ok(Self {
            label,
            from,
            filter: def.filter.clone(),
            command,
        })
    }
}

/// Rule lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Survives scene transitions.
    Global,
    /// Cleared on every scene transition.
    Scene,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Scene => f.write_str("scene"),
        }
    }
}

/// Handle to an active rule. Invalidated when its partition is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleHandle {
    pub partition: Partition,
    /// Partition generation the slot belongs to.
    pub generation: u32,
    pub slot: u32,
}

/// A registered rule and the selector slot it holds.
#[derive(Debug)]
pub struct ActiveRule {
    pub rule: CompiledRule,
    pub selector: SelectorHandle,
}

#[derive(Debug)]
struct Bucket {
    rules: Vec<ActiveRule>,
    capacity: usize,
    /// Bumped on every clear so old handles stop resolving.
    generation: u32,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            rules: Vec::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    fn clear(&mut self, selectors: &mut SelectorRegistry) -> usize {
        let count = self.rules.len();
        self.generation = self.generation.wrapping_add(1);
        for active in self.rules.drain(..) {
            selectors.release(active.selector);
        }
        count
    }
}

/// Fixed-capacity storage for active rules.
#[derive(Debug)]
pub struct RuleRegistry {
    global: Bucket,
    scene: Bucket,
}

impl RuleRegistry {
    #[must_use]
    pub fn new(global_capacity: usize, scene_capacity: usize) -> Self {
        Self {
            global: Bucket::new(global_capacity),
            scene: Bucket::new(scene_capacity),
        }
    }

    /// Activate a rule in `partition`, tracking its selector.
    ///
    /// # Errors
    ///
    /// [`RuleError::CapacityExceeded`] if the partition or the selector
    /// registry is full. Nothing is registered in that case.
    pub fn activate(
        &mut self,
        partition: Partition,
        rule: CompiledRule,
        selectors: &mut SelectorRegistry,
    ) -> RuleResult<RuleHandle> {
        let bucket = self.bucket_mut(partition);
        if bucket.rules.len() >= bucket.capacity {
            return Err(RuleError::CapacityExceeded {
                what: match partition {
                    Partition::Global => "global rule",
                    Partition::Scene => "scene rule",
                },
                max: bucket.capacity,
            });
        }

        let selector = selectors.track(&rule.from)?;
        let slot = bucket.rules.len() as u32;
        debug!(rule = %rule.label, %partition, slot, "rule activated");
        bucket.rules.push(ActiveRule { rule, selector });
        Ok(RuleHandle {
            partition,
            generation: bucket.generation,
            slot,
        })
    }

    /// Activate a scene rule, reporting failure instead of returning it.
    pub fn try_activate(
        &mut self,
        rule: CompiledRule,
        selectors: &mut SelectorRegistry,
        diagnostics: &Diagnostics,
    ) -> Option<RuleHandle> {
        match self.activate(Partition::Scene, rule, selectors) {
            Ok(handle) => Some(handle),
            Err(e) => {
                diagnostics.report(e);
                None
            }
        }
    }

    /// Activate a global rule, reporting failure instead of returning it.
    pub fn try_activate_global(
        &mut self,
        rule: CompiledRule,
        selectors: &mut SelectorRegistry,
        diagnostics: &Diagnostics,
    ) -> Option<RuleHandle> {
        match self.activate(Partition::Global, rule, selectors) {
            Ok(handle) => Some(handle),
            Err(e) => {
                diagnostics.report(e);
                None
            }
        }
    }

    /// Clear the scene partition. Global rules are untouched.
    pub fn reset(&mut self, selectors: &mut SelectorRegistry) {
        let cleared = self.scene.clear(selectors);
        debug!(cleared, "scene rules reset");
    }

    /// Clear both partitions.
    pub fn clear_all(&mut self, selectors: &mut SelectorRegistry) {
        let cleared = self.scene.clear(selectors) + self.global.clear(selectors);
        debug!(cleared, "all rules cleared");
    }

    /// The rule behind `handle`, unless its partition was cleared since.
    #[must_use]
    pub fn get(&self, handle: RuleHandle) -> Option<&ActiveRule> {
        let bucket = self.bucket(handle.partition);
        if bucket.generation != handle.generation {
            return None;
        }
        bucket.rules.get(handle.slot as usize)
    }

    /// Handle of an active rule in `partition` equal to `rule`.
    #[must_use]
    pub fn find(&self, partition: Partition, rule: &CompiledRule) -> Option<RuleHandle> {
        let bucket = self.bucket(partition);
        let slot = bucket.rules.iter().position(|active| active.rule == *rule)?;
        Some(RuleHandle {
            partition,
            generation: bucket.generation,
            slot: slot as u32,
        })
    }

    /// Every active rule: global partition first, then scene, each in
    /// registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveRule> {
        self.global.rules.iter().chain(&self.scene.rules)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.global.rules.len() + self.scene.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active rules in one partition.
    #[must_use]
    pub fn partition_len(&self, partition: Partition) -> usize {
        self.bucket(partition).rules.len()
    }

    #[must_use]
    pub fn partition_capacity(&self, partition: Partition) -> usize {
        self.bucket(partition).capacity
    }

    const fn bucket(&self, partition: Partition) -> &Bucket {
        match partition {
            Partition::Global => &self.global,
            Partition::Scene => &self.scene,
        }
    }

    fn bucket_mut(&mut self, partition: Partition) -> &mut Bucket {
        match partition {
            Partition::Global => &mut self.global,
            Partition::Scene => &mut self.scene,
        }
    }
}
