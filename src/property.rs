//! Minimal host object layer: named [`Properties`], path observers and change notification.
//!
//! Arrays publish their changes through the synthetic keys [`LENGTH_KEY`], [`CONTENT_KEY`],
//! [`FIRST_OBJECT_KEY`], [`LAST_OBJECT_KEY`] and [`EACH_KEY`]; anything observing those keys
//! goes through [`add_observer`] like any other property.
use super::{
    array::{ArrayAccess, ArrayEntity},
    computed, each,
    error::ArrayError,
    path::{EACH_KEY, PathKind, PropertyPath},
    utils::{debug, error, release},
    value::Value,
};
use bevy_derive::Deref;
use bevy_ecs::{prelude::*, system::SystemId};
use bevy_platform::{collections::HashMap, prelude::*};

/// Published when an array's element count changes.
pub const LENGTH_KEY: &str = "length";
/// Published after every change bracket, since content identity changed regardless of length.
pub const CONTENT_KEY: &str = "[]";
#[allow(missing_docs)]
pub const FIRST_OBJECT_KEY: &str = "firstObject";
#[allow(missing_docs)]
pub const LAST_OBJECT_KEY: &str = "lastObject";

/// [`Component`] holding the plain named values of an object [`Entity`].
#[derive(Component, Default, Clone, Debug, PartialEq)]
pub struct Properties(HashMap<String, Value>);

impl Properties {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`.insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    #[allow(missing_docs)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets `key` without notifying anyone, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

/// Input of property observer systems: the object the observer was registered on and the path
/// it registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyChange {
    #[allow(missing_docs)]
    pub object: Entity,
    #[allow(missing_docs)]
    pub path: String,
}

/// What happens when a tapped key changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tap {
    /// Run the callback of a path observer.
    Fire(Entity),
    /// An intermediate hop of a path observer changed; re-link it, then fire.
    Relink(Entity),
    /// An element of an `@each` proxy changed the tapped key.
    Relay(Entity),
}

#[derive(Component, Default)]
pub(crate) struct PropertyTaps(HashMap<String, Vec<Tap>>);

pub(crate) fn add_tap(world: &mut World, object: Entity, key: &str, tap: Tap) {
    let Ok(mut entity) = world.get_entity_mut(object) else {
        return;
    };
    if let Some(mut taps) = entity.get_mut::<PropertyTaps>() {
        taps.0.entry(key.into()).or_default().push(tap);
    } else {
        let mut taps = PropertyTaps::default();
        taps.0.insert(key.into(), vec![tap]);
        entity.insert(taps);
    }
}

pub(crate) fn remove_tap(world: &mut World, object: Entity, key: &str, tap: Tap) {
    if let Some(mut taps) = world.get_mut::<PropertyTaps>(object)
        && let Some(list) = taps.0.get_mut(key)
        && let Some(position) = list.iter().position(|existing| *existing == tap)
    {
        list.remove(position);
        if list.is_empty() {
            taps.0.remove(key);
        }
    }
}

/// Number of taps registered on `key` of `object`, mostly useful to assert nothing leaks.
pub fn tap_count(world: &World, object: Entity, key: &str) -> usize {
    world
        .get::<PropertyTaps>(object)
        .and_then(|taps| taps.0.get(key))
        .map(Vec::len)
        .unwrap_or(0)
}

struct Installed {
    object: Entity,
    key: String,
    tap: Tap,
    watching: Option<Entity>,
}

/// Root of one [`add_observer`] subscription.
#[derive(Component)]
pub(crate) struct PathObserver {
    object: Entity,
    path: PropertyPath,
    raw: String,
    callback: SystemId<In<PropertyChange>>,
    installed: Vec<Installed>,
}

/// Handle to a property observer returned by [`add_observer`]; the observer stays active until
/// [`.cleanup`](Self::cleanup) is called or its object is despawned (see
/// [`OrderlyPlugin`](crate::OrderlyPlugin)).
#[derive(Clone, Copy, Deref, Debug, PartialEq, Eq, Hash)]
pub struct ObserverHandle(Entity);

impl ObserverHandle {
    /// Removes every tap installed along the observed path and unregisters the callback.
    pub fn cleanup(self, world: &mut World) {
        uninstall(world, self.0);
        let removed = world
            .get_entity_mut(self.0)
            .ok()
            .and_then(|mut entity| entity.take::<PathObserver>());
        if let Some(observer) = removed {
            release(world, observer.callback);
        }
        if world.get_entity(self.0).is_ok() {
            world.despawn(self.0);
        }
    }
}

/// Runs `callback` whenever `path`, relative to `object`, changes.
///
/// `path` is parsed once into a [`PropertyPath`]: plain keys (`length`, `[]`, `desc`), `@each`
/// (membership of an array) and `@each.<key>` (membership or `<key>` of any element), optionally
/// preceded by plain hops (`resources.@each.common`) that are re-linked whenever they change.
///
/// Fails if the path is malformed, if `@each` is applied to something that is not an array, or
/// if an `@each.<key>` array currently holds an element that is not an object.
pub fn add_observer<M>(
    world: &mut World,
    object: Entity,
    path: &str,
    callback: impl IntoSystem<In<PropertyChange>, (), M> + 'static,
) -> Result<ObserverHandle, ArrayError> {
    let parsed = PropertyPath::parse(path)?;
    let callback = world.register_system(callback);
    let handle = ObserverHandle(
        world
            .spawn(PathObserver {
                object,
                path: parsed,
                raw: path.into(),
                callback,
                installed: Vec::new(),
            })
            .id(),
    );
    if let Err(error) = install(world, handle.0) {
        handle.cleanup(world);
        return Err(error);
    }
    Ok(handle)
}

/// Alias of [`ObserverHandle::cleanup`].
pub fn remove_observer(world: &mut World, handle: ObserverHandle) {
    handle.cleanup(world);
}

fn install(world: &mut World, observer: Entity) -> Result<(), ArrayError> {
    let Some(PathObserver { object, path, .. }) = world.get::<PathObserver>(observer) else {
        return Ok(());
    };
    let (object, path) = (*object, path.clone());
    let mut installed = Vec::new();
    let result = install_path(world, observer, object, &path, &mut installed);
    if let Some(mut root) = world.get_mut::<PathObserver>(observer) {
        root.installed = installed;
    }
    result
}

fn install_path(
    world: &mut World,
    observer: Entity,
    mut current: Entity,
    path: &PropertyPath,
    installed: &mut Vec<Installed>,
) -> Result<(), ArrayError> {
    let mut tap = |world: &mut World, object: Entity, key: &str, tap: Tap| {
        add_tap(world, object, key, tap);
        installed.push(Installed {
            object,
            key: key.into(),
            tap,
            watching: None,
        });
    };
    for hop in &path.chain {
        tap(world, current, hop, Tap::Relink(observer));
        match get_property(world, current, hop) {
            Value::Object(next) => current = next,
            _ => return Ok(()),
        }
    }
    let (object, key) = match &path.kind {
        PathKind::Plain(key) => {
            tap(world, current, key, Tap::Fire(observer));
            if !each::is_proxy(world, current) {
                return Ok(());
            }
            (current, key)
        }
        PathKind::Each => {
            let array = ArrayEntity::get(world, current)?;
            tap(world, *array, EACH_KEY, Tap::Fire(observer));
            return Ok(());
        }
        PathKind::EachProperty(key) => {
            let array = ArrayEntity::get(world, current)?;
            let proxy = array.each(world);
            tap(world, proxy, key, Tap::Fire(observer));
            (proxy, key)
        }
    };
    each::watch(world, object, key)?;
    if let Some(last) = installed.last_mut() {
        last.watching = Some(object);
    }
    Ok(())
}

fn uninstall(world: &mut World, observer: Entity) {
    let installed = world
        .get_mut::<PathObserver>(observer)
        .map(|mut root| core::mem::take(&mut root.installed))
        .unwrap_or_default();
    for Installed {
        object,
        key,
        tap,
        watching,
    } in installed
    {
        remove_tap(world, object, &key, tap);
        if let Some(proxy) = watching {
            each::unwatch(world, proxy, &key);
        }
    }
}

fn relink(world: &mut World, observer: Entity) {
    uninstall(world, observer);
    if let Err(error) = install(world, observer) {
        error!("failed to re-link property observer {}: {}", observer, error);
    }
}

fn fire(world: &mut World, observer: Entity) {
    let Some(root) = world.get::<PathObserver>(observer) else {
        return;
    };
    let callback = root.callback;
    let change = PropertyChange {
        object: root.object,
        path: root.raw.clone(),
    };
    if let Err(error) = world.run_system_with(callback, change) {
        debug!("skipping property observer {}: {}", observer, error);
    }
}

/// Notifies every observer tapping `key` on `object`.
///
/// Identical taps collapse, so an observer reachable twice through the same key (e.g. an element
/// present at two indices of an `@each` array) runs once per notification.
pub fn notify_property_change(world: &mut World, object: Entity, key: &str) {
    let Some(taps) = world.get::<PropertyTaps>(object).and_then(|taps| taps.0.get(key)) else {
        return;
    };
    let mut pending = Vec::<Tap>::with_capacity(taps.len());
    for tap in taps {
        if !pending.contains(tap) {
            pending.push(*tap);
        }
    }
    for tap in pending {
        match tap {
            Tap::Fire(observer) => fire(world, observer),
            Tap::Relink(observer) => {
                relink(world, observer);
                fire(world, observer);
            }
            Tap::Relay(proxy) => each::relay(world, proxy, object, key),
        }
    }
}

/// Reads `key` of `object`, resolving synthetic array keys and (re)computing computed
/// properties as needed; [`Value::Null`] when absent.
pub fn get_property(world: &mut World, object: Entity, key: &str) -> Value {
    if let Some(value) = array_key(world, object, key) {
        return value;
    }
    if key == EACH_KEY && world.get::<ArrayAccess>(object).is_some() {
        return Value::Object(ArrayEntity(object).each(world));
    }
    if let Some(value) = computed::get(world, object, key) {
        return value;
    }
    if let Some(value) = world.get::<Properties>(object).and_then(|properties| properties.get(key)) {
        return value.clone();
    }
    if let Some(owner) = each::owner(world, object) {
        return match each::each_array(world, owner, key) {
            Ok(array) => array.into(),
            Err(error) => {
                error!("failed to materialize {}.{}: {}", EACH_KEY, key, error);
                Value::Null
            }
        };
    }
    Value::Null
}

/// Reads `key` of `object` without computing or spawning anything: synthetic array keys, cached
/// computed values and plain properties.
pub fn peek_property(world: &World, object: Entity, key: &str) -> Value {
    array_key(world, object, key)
        .or_else(|| computed::peek(world, object, key))
        .or_else(|| {
            world
                .get::<Properties>(object)
                .and_then(|properties| properties.get(key).cloned())
        })
        .unwrap_or_default()
}

fn array_key(world: &World, object: Entity, key: &str) -> Option<Value> {
    world.get::<ArrayAccess>(object)?;
    let array = ArrayEntity(object);
    match key {
        LENGTH_KEY => Some(array.length(world).into()),
        CONTENT_KEY => Some(Value::Object(object)),
        FIRST_OBJECT_KEY => Some(array.first_object(world).unwrap_or_default()),
        LAST_OBJECT_KEY => Some(array.last_object(world).unwrap_or_default()),
        _ => None,
    }
}

/// Sets `key` of `object`, notifying observers if the value changed. Returns whether it changed.
pub fn set_property(world: &mut World, object: Entity, key: &str, value: impl Into<Value>) -> bool {
    let value = value.into();
    let Ok(mut entity) = world.get_entity_mut(object) else {
        return false;
    };
    let changed = match entity.get_mut::<Properties>() {
        Some(mut properties) => {
            if properties.get(key) == Some(&value) {
                false
            } else {
                properties.insert(key, value);
                true
            }
        }
        None => {
            entity.insert(Properties::new().with(key, value));
            true
        }
    };
    if changed {
        notify_property_change(world, object, key);
    }
    changed
}

/// Tears down path observers whose root object was despawned.
pub(crate) fn prune_orphaned_observers(world: &mut World) {
    let mut observers = world.query::<(Entity, &PathObserver)>();
    let orphaned = observers
        .iter(world)
        .filter(|(_, observer)| world.get_entity(observer.object).is_err())
        .map(|(entity, _)| ObserverHandle(entity))
        .collect::<Vec<_>>();
    for handle in orphaned {
        debug!("pruning property observer {}, its object was despawned", *handle);
        handle.cleanup(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{native::MutableArray, utils::clone};
    use bevy_platform::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use test_log::test;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(In<PropertyChange>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let system = clone!((count) move |In(_): In<PropertyChange>| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        (count, system)
    }

    #[test]
    fn set_property_notifies_only_on_change() {
        let mut world = World::new();
        let object = world.spawn(Properties::new().with("desc", "Todo 1")).id();
        let (count, system) = counter();
        add_observer(&mut world, object, "desc", system).unwrap();

        assert!(!set_property(&mut world, object, "desc", "Todo 1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(set_property(&mut world, object, "desc", "Todo 2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(get_property(&mut world, object, "desc"), Value::from("Todo 2"));
    }

    #[test]
    fn observer_receives_root_object_and_path() {
        let mut world = World::new();
        let inner = world.spawn(Properties::new().with("name", "a")).id();
        let outer = world.spawn(Properties::new().with("owner", inner)).id();
        let seen = Arc::new(bevy_platform::sync::Mutex::new(Vec::new()));
        add_observer(
            &mut world,
            outer,
            "owner.name",
            clone!((seen) move |In(change): In<PropertyChange>| seen.lock().unwrap().push(change)),
        )
        .unwrap();

        set_property(&mut world, inner, "name", "b");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![PropertyChange {
                object: outer,
                path: "owner.name".into()
            }]
        );
    }

    #[test]
    fn chains_relink_when_an_intermediate_hop_changes() {
        let mut world = World::new();
        let first = world.spawn(Properties::new().with("name", "a")).id();
        let second = world.spawn(Properties::new().with("name", "x")).id();
        let root = world.spawn(Properties::new().with("owner", first)).id();
        let (count, system) = counter();
        add_observer(&mut world, root, "owner.name", system).unwrap();

        set_property(&mut world, root, "owner", second);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // the old hop is no longer observed
        set_property(&mut world, first, "name", "b");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tap_count(&world, first, "name"), 0);

        set_property(&mut world, second, "name", "y");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cleanup_removes_every_tap() {
        let mut world = World::new();
        let inner = world.spawn(Properties::new().with("name", "a")).id();
        let root = world.spawn(Properties::new().with("owner", inner)).id();
        let (count, system) = counter();
        let handle = add_observer(&mut world, root, "owner.name", system).unwrap();
        assert_eq!(tap_count(&world, root, "owner"), 1);
        assert_eq!(tap_count(&world, inner, "name"), 1);

        handle.cleanup(&mut world);
        assert_eq!(tap_count(&world, root, "owner"), 0);
        assert_eq!(tap_count(&world, inner, "name"), 0);
        set_property(&mut world, inner, "name", "b");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(world.get_entity(*handle).is_err());
    }

    #[test]
    fn array_synthetic_keys() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, [1, 2, 3]);
        let entity = array.entity();
        assert_eq!(get_property(&mut world, entity, LENGTH_KEY), Value::Int(3));
        assert_eq!(get_property(&mut world, entity, FIRST_OBJECT_KEY), Value::Int(1));
        assert_eq!(get_property(&mut world, entity, LAST_OBJECT_KEY), Value::Int(3));
        assert_eq!(get_property(&mut world, entity, CONTENT_KEY), Value::Object(entity));
        let proxy = get_property(&mut world, entity, EACH_KEY);
        assert_eq!(proxy, Value::Object(array.each(&mut world)));
    }

    #[test]
    fn each_on_a_plain_object_is_rejected() {
        let mut world = World::new();
        let object = world.spawn(Properties::new()).id();
        let (_, system) = counter();
        assert_eq!(
            add_observer(&mut world, object, "@each", system).unwrap_err(),
            ArrayError::NotAnArray(object)
        );
        assert_eq!(tap_count(&world, object, EACH_KEY), 0);
    }

    #[test]
    fn malformed_paths_are_rejected_before_registering() {
        let mut world = World::new();
        let object = world.spawn(Properties::new()).id();
        let (_, system) = counter();
        assert!(matches!(
            add_observer(&mut world, object, "a..b", system),
            Err(ArrayError::InvalidPath { .. })
        ));
    }
}
