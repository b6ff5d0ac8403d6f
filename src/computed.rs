//! Cached properties recomputed lazily after any of their dependent paths change.
use super::{
    error::ArrayError,
    property::{ObserverHandle, PropertyChange, add_observer, notify_property_change},
    utils::{error, release},
    value::Value,
};
use bevy_ecs::{prelude::*, system::SystemId};
use bevy_platform::{collections::HashMap, prelude::*};

struct ComputedSlot {
    getter: SystemId<In<Entity>, Value>,
    cache: Option<Value>,
    dependents: Vec<ObserverHandle>,
}

impl ComputedSlot {
    fn teardown(self, world: &mut World) {
        for handle in self.dependents {
            handle.cleanup(world);
        }
        release(world, self.getter);
    }
}

/// [`Component`] holding the computed properties defined on an object.
#[derive(Component, Default)]
pub struct ComputedProperties(HashMap<String, ComputedSlot>);

impl ComputedProperties {
    /// Whether `key` currently holds a cached value.
    pub fn is_cached(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|slot| slot.cache.is_some())
    }
}

/// Defines `key` on `object` as the output of `getter`, cached until any of `dependent_paths`
/// changes, at which point the cache is dropped and observers of `key` are notified.
///
/// Redefining `key` tears down the previous definition.
pub fn define_computed<M>(
    world: &mut World,
    object: Entity,
    key: &str,
    dependent_paths: &[&str],
    getter: impl IntoSystem<In<Entity>, Value, M> + 'static,
) -> Result<(), ArrayError> {
    let mut slot = ComputedSlot {
        getter: world.register_system(getter),
        cache: None,
        dependents: Vec::with_capacity(dependent_paths.len()),
    };
    for path in dependent_paths {
        let invalidated = String::from(key);
        let observed = add_observer(world, object, path, move |In(_): In<PropertyChange>, world: &mut World| {
            invalidate(world, object, &invalidated)
        });
        match observed {
            Ok(handle) => slot.dependents.push(handle),
            Err(error) => {
                slot.teardown(world);
                return Err(error);
            }
        }
    }
    let previous = match world.get_entity_mut(object) {
        Ok(mut entity) => match entity.get_mut::<ComputedProperties>() {
            Some(mut computed) => computed.0.insert(key.into(), slot),
            None => {
                let mut computed = ComputedProperties::default();
                computed.0.insert(key.into(), slot);
                entity.insert(computed);
                None
            }
        },
        Err(_) => Some(slot),
    };
    if let Some(previous) = previous {
        previous.teardown(world);
    }
    Ok(())
}

/// Drops the cached value of `key` and notifies its observers.
pub fn invalidate(world: &mut World, object: Entity, key: &str) {
    if let Some(mut computed) = world.get_mut::<ComputedProperties>(object)
        && let Some(slot) = computed.0.get_mut(key)
    {
        slot.cache = None;
    }
    notify_property_change(world, object, key);
}

/// Cached value of `key`, computing it if needed; [`None`] if `key` is not computed.
pub(crate) fn get(world: &mut World, object: Entity, key: &str) -> Option<Value> {
    let slot = world.get::<ComputedProperties>(object)?.0.get(key)?;
    if let Some(cached) = &slot.cache {
        return Some(cached.clone());
    }
    let getter = slot.getter;
    let value = match world.run_system_with(getter, object) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to compute {} of {}: {}", key, object, err);
            return Some(Value::Null);
        }
    };
    if let Some(mut computed) = world.get_mut::<ComputedProperties>(object)
        && let Some(slot) = computed.0.get_mut(key)
    {
        slot.cache = Some(value.clone());
    }
    Some(value)
}

pub(crate) fn peek(world: &World, object: Entity, key: &str) -> Option<Value> {
    world
        .get::<ComputedProperties>(object)
        .and_then(|computed| computed.0.get(key))
        .and_then(|slot| slot.cache.clone())
}
