//! Named context hooks, resolved once at startup from a compile-time registry.

use std::fmt;
use std::sync::Arc;

use janitor_core::{Facts, JanitorError, Resource, RunCache};
use serde_json::Value;

/// Contributes extra facts for one resource. Anything that must be computed at
/// most once per run belongs in the `RunCache`.
pub trait ContextHook: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn facts(&self, resource: &Resource, cache: &RunCache) -> Facts;
}

/// One die roll per run, published as `_context.random_dice`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDice;

pub const RANDOM_DICE: &str = "random_dice";

impl ContextHook for RandomDice {
    fn name(&self) -> &'static str {
        RANDOM_DICE
    }

    fn facts(&self, _resource: &Resource, cache: &RunCache) -> Facts {
        let roll = cache.get_or_insert_with(RANDOM_DICE, || Value::from(fastrand::u8(1..=6)));
        let mut facts = Facts::new();
        facts.insert(RANDOM_DICE.to_string(), roll);
        facts
    }
}

type HookCtor = fn() -> Arc<dyn ContextHook>;

fn random_dice() -> Arc<dyn ContextHook> {
    Arc::new(RandomDice)
}

const REGISTRY: &[(&str, HookCtor)] = &[(RANDOM_DICE, random_dice)];

pub fn registered() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Look up a hook by name; unknown names are a configuration error.
pub fn resolve(name: &str) -> Result<Arc<dyn ContextHook>, JanitorError> {
    REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ctor)| ctor())
        .ok_or_else(|| {
            let known: Vec<_> = registered().collect();
            JanitorError::Config(format!("unknown resource context hook {name:?} (known: {})", known.join(", ")))
        })
}
