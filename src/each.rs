//! `@each` proxies and projections.
//!
//! Every array gets at most one [`EachProxy`], linked through [`EachLink`] and torn down with
//! it. For each element key observed through the proxy, the proxy taps that key on every
//! element, keeping an index-aligned list of tapped elements (with an empty slot for anything
//! that is not an object) which is re-spliced after every change bracket over just the touched
//! range.
use super::{
    array::{ArrayEntity, ArrayLike},
    bracket::{self, BracketState, Change},
    error::ArrayError,
    property::{CONTENT_KEY, Tap, add_tap, get_property, notify_property_change, peek_property, remove_tap},
    utils::debug,
    value::Value,
};
use bevy_ecs::{
    component::HookContext,
    prelude::*,
    world::DeferredWorld,
};
use bevy_platform::{collections::HashMap, prelude::*};

/// Points from an array to its [`EachProxy`]; removing it despawns the proxy and its
/// projections.
#[derive(Component)]
#[component(on_remove = despawn_each_proxy)]
pub(crate) struct EachLink(Entity);

struct WatchedKey {
    watchers: usize,
    elements: Vec<Option<Entity>>,
}

/// The `@each` view of an array.
///
/// Observing `<key>` on the proxy fires whenever the membership of the array changes or any
/// element's `<key>` changes; reading `<key>` yields the [`EachArray`] projection.
#[derive(Component)]
pub struct EachProxy {
    owner: Entity,
    keys: HashMap<String, WatchedKey>,
    arrays: HashMap<String, Entity>,
}

impl EachProxy {
    /// The array this proxy belongs to.
    pub fn owner(&self) -> Entity {
        self.owner
    }

    /// Number of observers currently tracking `key` through this proxy.
    pub fn watchers(&self, key: &str) -> usize {
        self.keys.get(key).map(|watched| watched.watchers).unwrap_or(0)
    }
}

/// Derived collection whose element `i` is `key` of element `i` of `owner`, read live.
///
/// Computed element keys are read from their caches, which the proxy refills whenever an
/// element joins or reports a change of `key`.
#[derive(Component)]
pub struct EachArray {
    owner: Entity,
    key: String,
}

impl ArrayLike for EachArray {
    fn length(&self, world: &World) -> usize {
        ArrayEntity(self.owner).length(world)
    }

    fn object_at(&self, world: &World, index: usize) -> Option<Value> {
        ArrayEntity(self.owner)
            .object_at(world, index)
            .map(|element| match element {
                Value::Object(element) => peek_property(world, element, &self.key),
                _ => Value::Null,
            })
    }
}

/// The proxy of `owner`, spawned on first access.
pub(crate) fn proxy(world: &mut World, owner: Entity) -> Entity {
    if let Some(EachLink(proxy)) = world.get::<EachLink>(owner) {
        return *proxy;
    }
    let proxy = world
        .spawn(EachProxy {
            owner,
            keys: HashMap::default(),
            arrays: HashMap::default(),
        })
        .id();
    if let Ok(mut entity) = world.get_entity_mut(owner) {
        entity.insert(EachLink(proxy));
    }
    proxy
}

pub(crate) fn is_proxy(world: &World, entity: Entity) -> bool {
    world.get::<EachProxy>(entity).is_some()
}

pub(crate) fn owner(world: &World, entity: Entity) -> Option<Entity> {
    world.get::<EachProxy>(entity).map(EachProxy::owner)
}

fn element_at(world: &World, owner: Entity, index: usize) -> Option<Entity> {
    match ArrayEntity(owner).object_at(world, index) {
        Some(Value::Object(element)) if world.get_entity(element).is_ok() => Some(element),
        _ => None,
    }
}

/// Elements of `owner[start..start + count]`, [`None`] where there is no live object.
fn elements_in(world: &World, owner: Entity, start: usize, count: usize) -> Vec<Option<Entity>> {
    (start..start.saturating_add(count))
        .map(|index| element_at(world, owner, index))
        .collect()
}

/// Fails on the first element of `owner[start..start + count]` that is not a live object.
fn require_objects(world: &World, owner: Entity, key: &str, start: usize, count: usize) -> Result<(), ArrayError> {
    let array = ArrayEntity(owner);
    match (start..start.saturating_add(count)).find(|&index| element_at(world, owner, index).is_none()) {
        Some(index) => Err(ArrayError::EachRequiresObjects {
            array: owner,
            key: key.into(),
            index,
            found: array.object_at(world, index).unwrap_or_default().describe(),
        }),
        None => Ok(()),
    }
}

/// Refills the caches of `key` on `elements` if `key` is projected, so the projection reads
/// current values.
fn warm(world: &mut World, proxy: Entity, key: &str, elements: &[Option<Entity>]) {
    if world
        .get::<EachProxy>(proxy)
        .is_some_and(|each| each.arrays.contains_key(key))
    {
        for &element in elements.iter().flatten() {
            get_property(world, element, key);
        }
    }
}

/// Starts (or counts another) tracking of `key` on every element of the proxy's owner.
pub(crate) fn watch(world: &mut World, proxy: Entity, key: &str) -> Result<(), ArrayError> {
    let Some(mut each) = world.get_mut::<EachProxy>(proxy) else {
        return Ok(());
    };
    if let Some(watched) = each.keys.get_mut(key) {
        watched.watchers += 1;
        return Ok(());
    }
    let owner = each.owner;
    let length = ArrayEntity(owner).length(world);
    require_objects(world, owner, key, 0, length)?;
    let elements = elements_in(world, owner, 0, length);
    for &element in elements.iter().flatten() {
        add_tap(world, element, key, Tap::Relay(proxy));
    }
    if let Some(mut each) = world.get_mut::<EachProxy>(proxy) {
        each.keys.insert(key.into(), WatchedKey { watchers: 1, elements });
    }
    Ok(())
}

/// Releases one tracking of `key`; the element taps go away with the last one.
pub(crate) fn unwatch(world: &mut World, proxy: Entity, key: &str) {
    let elements = {
        let Some(mut each) = world.get_mut::<EachProxy>(proxy) else {
            return;
        };
        let Some(watched) = each.keys.get_mut(key) else {
            return;
        };
        watched.watchers -= 1;
        if watched.watchers > 0 {
            return;
        }
        each.keys.remove(key).map(|watched| watched.elements).unwrap_or_default()
    };
    for element in elements.into_iter().flatten() {
        remove_tap(world, element, key, Tap::Relay(proxy));
    }
}

/// `element` changed `key`: the proxy's `key` and the matching projection's content changed.
pub(crate) fn relay(world: &mut World, proxy: Entity, element: Entity, key: &str) {
    warm(world, proxy, key, &[Some(element)]);
    notify_property_change(world, proxy, key);
    if let Some(array) = world
        .get::<EachProxy>(proxy)
        .and_then(|each| each.arrays.get(key).copied())
    {
        notify_property_change(world, array, CONTENT_KEY);
    }
}

/// The [`EachArray`] projection of `key` over `owner`, spawned and tracked on first access.
pub(crate) fn each_array(world: &mut World, owner: Entity, key: &str) -> Result<ArrayEntity, ArrayError> {
    ArrayEntity::get(world, owner)?;
    let proxy = proxy(world, owner);
    if let Some(array) = world
        .get::<EachProxy>(proxy)
        .and_then(|each| each.arrays.get(key).copied())
    {
        return Ok(ArrayEntity(array));
    }
    watch(world, proxy, key)?;
    let array = ArrayEntity::spawn(
        world,
        EachArray {
            owner,
            key: key.into(),
        },
    );
    let elements = match world.get_mut::<EachProxy>(proxy) {
        Some(mut each) => {
            each.arrays.insert(key.into(), *array);
            each.keys
                .get(key)
                .map(|watched| watched.elements.clone())
                .unwrap_or_default()
        }
        None => Vec::new(),
    };
    warm(world, proxy, key, &elements);
    Ok(array)
}

fn linked(world: &World, owner: Entity) -> Option<&EachProxy> {
    world
        .get::<EachLink>(owner)
        .and_then(|EachLink(proxy)| world.get::<EachProxy>(*proxy))
}

fn projections(world: &World, owner: Entity) -> Vec<Entity> {
    linked(world, owner)
        .map(|each| each.arrays.values().copied().collect())
        .unwrap_or_default()
}

/// Normalizes `change` against `tracked` elements before and `length` elements after the
/// mutation, returning `(start, removed, added)`.
fn splice_range(change: Change, tracked: usize, length: usize) -> (usize, usize, usize) {
    let start = change.start.min(tracked);
    let removed = change.removed.unwrap_or(tracked - start).min(tracked - start);
    let added = change.added.unwrap_or(length.saturating_sub(start));
    (start, removed, added)
}

/// Fails if a projection of `owner` is still inside a bracket of its own.
pub(crate) fn ensure_closed(world: &World, owner: Entity) -> Result<(), ArrayError> {
    match projections(world, owner)
        .into_iter()
        .find(|array| world.get::<BracketState>(*array).is_some_and(BracketState::is_open))
    {
        Some(array) => Err(ArrayError::BracketAlreadyOpen { array }),
        None => Ok(()),
    }
}

/// Forwards the will phase to the projections of `owner`; if one fails, the brackets already
/// opened here are closed again.
pub(crate) fn will_change(world: &mut World, owner: Entity, change: Change) -> Result<(), ArrayError> {
    let arrays = projections(world, owner);
    for (opened, &array) in arrays.iter().enumerate() {
        if let Err(error) = bracket::will_change(world, array, change) {
            for &array in &arrays[..opened] {
                bracket::abort(world, array);
            }
            return Err(error);
        }
    }
    Ok(())
}

/// Closes the brackets forwarded to the projections of `owner` without notifying.
pub(crate) fn abort(world: &mut World, owner: Entity) {
    for array in projections(world, owner) {
        bracket::abort(world, array);
    }
}

/// Ends a change that broke the object-only contract: the element taps are still re-spliced so
/// they stay aligned with `owner`, then the projections' brackets are closed without notifying.
pub(crate) fn abandon(world: &mut World, owner: Entity, change: Change) {
    let Some(EachLink(proxy)) = world.get::<EachLink>(owner) else {
        return;
    };
    let proxy = *proxy;
    let length = ArrayEntity(owner).length(world);
    for key in tracked_keys(world, owner) {
        splice(world, proxy, owner, &key, change, length);
    }
    abort(world, owner);
}

fn tracked_keys(world: &World, owner: Entity) -> Vec<String> {
    linked(world, owner)
        .map(|each| each.keys.keys().cloned().collect())
        .unwrap_or_default()
}

/// Checks that the range added by `change` only holds objects, if any key is tracked.
pub(crate) fn validate(world: &World, owner: Entity, change: Change) -> Result<(), ArrayError> {
    let Some(each) = linked(world, owner) else {
        return Ok(());
    };
    let length = ArrayEntity(owner).length(world);
    for (key, watched) in &each.keys {
        let (start, _, added) = splice_range(change, watched.elements.len(), length);
        require_objects(world, owner, key, start, added)?;
    }
    Ok(())
}

/// Re-splices the element taps over the touched range, then forwards the did phase to the
/// projections and notifies every tracked key on the proxy.
pub(crate) fn did_change(world: &mut World, owner: Entity, change: Change) -> Result<(), ArrayError> {
    let Some(EachLink(proxy)) = world.get::<EachLink>(owner) else {
        return Ok(());
    };
    let proxy = *proxy;
    let keys = tracked_keys(world, owner);
    let length = ArrayEntity(owner).length(world);
    for key in &keys {
        splice(world, proxy, owner, key, change, length);
    }
    for array in projections(world, owner) {
        bracket::did_change(world, array, change)?;
    }
    for key in &keys {
        notify_property_change(world, proxy, key);
    }
    Ok(())
}

fn splice(world: &mut World, proxy: Entity, owner: Entity, key: &str, change: Change, length: usize) {
    let Some(tracked) = world
        .get::<EachProxy>(proxy)
        .and_then(|each| each.keys.get(key))
        .map(|watched| watched.elements.len())
    else {
        return;
    };
    let (start, removed, added) = splice_range(change, tracked, length);
    let incoming = elements_in(world, owner, start, added);
    let outgoing = match world.get_mut::<EachProxy>(proxy) {
        Some(mut each) => match each.keys.get_mut(key) {
            Some(watched) => watched
                .elements
                .splice(start..start + removed, incoming.iter().copied())
                .collect::<Vec<_>>(),
            None => return,
        },
        None => return,
    };
    for element in outgoing.into_iter().flatten() {
        remove_tap(world, element, key, Tap::Relay(proxy));
    }
    for &element in incoming.iter().flatten() {
        add_tap(world, element, key, Tap::Relay(proxy));
    }
    warm(world, proxy, key, &incoming);
}

fn despawn_each_proxy(mut world: DeferredWorld, HookContext { entity, .. }: HookContext) {
    if let Some(&EachLink(proxy)) = world.get::<EachLink>(entity) {
        world.commands().queue(move |world: &mut World| teardown(world, proxy));
    }
}

fn teardown(world: &mut World, proxy: Entity) {
    let Some(each) = world
        .get_entity_mut(proxy)
        .ok()
        .and_then(|mut entity| entity.take::<EachProxy>())
    else {
        return;
    };
    debug!("tearing down @each proxy {} of {}", proxy, each.owner);
    for (key, watched) in each.keys {
        for element in watched.elements.into_iter().flatten() {
            remove_tap(world, element, &key, Tap::Relay(proxy));
        }
    }
    for array in each.arrays.into_values() {
        if world.get_entity(array).is_ok() {
            world.despawn(array);
        }
    }
    world.despawn(proxy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        computed::{define_computed, invalidate},
        native::MutableArray,
        property::{Properties, PropertyChange, add_observer, get_property, set_property, tap_count},
    };
    use bevy_platform::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use test_log::test;

    fn todos(world: &mut World, done: &[bool]) -> Vec<Entity> {
        done.iter()
            .enumerate()
            .map(|(index, done)| {
                world
                    .spawn(
                        Properties::new()
                            .with("desc", alloc::format!("Todo {}", index + 1))
                            .with("isDone", *done),
                    )
                    .id()
            })
            .collect()
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl Fn(In<PropertyChange>) + Send + Sync + 'static {
        let count = count.clone();
        move |In(_): In<PropertyChange>| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn element_taps_follow_membership() {
        let mut world = World::new();
        let items = todos(&mut world, &[false, true, false]);
        let array = MutableArray::spawn(&mut world, items.clone());
        let proxy = array.each(&mut world);
        let count = Arc::new(AtomicUsize::new(0));
        let handle = add_observer(&mut world, proxy, "isDone", counting(&count)).unwrap();
        assert!(items.iter().all(|&item| tap_count(&world, item, "isDone") == 1));

        let removed = array.pop_object(&mut world).unwrap();
        assert_eq!(removed, Some(Value::Object(items[2])));
        assert_eq!(tap_count(&world, items[2], "isDone"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        set_property(&mut world, items[2], "isDone", true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        set_property(&mut world, items[0], "isDone", true);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.cleanup(&mut world);
        assert!(items.iter().all(|&item| tap_count(&world, item, "isDone") == 0));
        assert_eq!(world.get::<EachProxy>(proxy).unwrap().watchers("isDone"), 0);
    }

    #[test]
    fn duplicate_elements_notify_once() {
        let mut world = World::new();
        let items = todos(&mut world, &[false]);
        let array = MutableArray::spawn(&mut world, [items[0], items[0]]);
        let count = Arc::new(AtomicUsize::new(0));
        add_observer(&mut world, array.entity(), "@each.isDone", counting(&count)).unwrap();
        assert_eq!(tap_count(&world, items[0], "isDone"), 2);

        set_property(&mut world, items[0], "isDone", true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_array_projects_element_keys() {
        let mut world = World::new();
        let items = todos(&mut world, &[false, true]);
        let array = MutableArray::spawn(&mut world, items.clone());
        let projection = array.each_array(&mut world, "isDone").unwrap();
        assert_eq!(projection.to_vec(&world), vec![Value::Bool(false), Value::Bool(true)]);
        assert_eq!(array.each_array(&mut world, "isDone").unwrap(), projection);

        let proxy = array.each(&mut world);
        assert_eq!(get_property(&mut world, proxy, "isDone"), projection.into());

        let length = Arc::new(AtomicUsize::new(0));
        let content = Arc::new(AtomicUsize::new(0));
        add_observer(&mut world, *projection, "length", counting(&length)).unwrap();
        add_observer(&mut world, *projection, "[]", counting(&content)).unwrap();

        set_property(&mut world, items[0], "isDone", true);
        assert_eq!(content.load(Ordering::SeqCst), 1);
        assert_eq!(length.load(Ordering::SeqCst), 0);

        let extra = todos(&mut world, &[false]);
        array.push_object(&mut world, extra[0]).unwrap();
        assert_eq!(length.load(Ordering::SeqCst), 1);
        assert_eq!(content.load(Ordering::SeqCst), 2);
        assert_eq!(
            projection.to_vec(&world),
            vec![Value::Bool(true), Value::Bool(true), Value::Bool(false)]
        );
    }

    #[test]
    fn projections_read_computed_element_keys() {
        let mut world = World::new();
        let item = world.spawn(Properties::new().with("count", 2)).id();
        define_computed(&mut world, item, "double", &["count"], |In(object): In<Entity>, world: &mut World| {
            let count = get_property(world, object, "count").as_int().unwrap_or(0);
            Value::from(count * 2)
        })
        .unwrap();
        let array = MutableArray::spawn(&mut world, [item]);
        let projection = array.each_array(&mut world, "double").unwrap();
        assert_eq!(projection.to_vec(&world), vec![Value::Int(4)]);

        invalidate(&mut world, item, "double");
        assert_eq!(projection.to_vec(&world), vec![Value::Int(4)]);

        set_property(&mut world, item, "count", 3);
        assert_eq!(projection.to_vec(&world), vec![Value::Int(6)]);
    }

    #[test]
    fn projections_read_synthetic_keys_of_nested_arrays() {
        let mut world = World::new();
        let inner = MutableArray::spawn(&mut world, [1, 2, 3]);
        let outer = MutableArray::spawn(&mut world, [inner.entity()]);
        let lengths = outer.each_array(&mut world, "length").unwrap();
        let firsts = outer.each_array(&mut world, "firstObject").unwrap();
        assert_eq!(lengths.to_vec(&world), vec![Value::Int(3)]);
        assert_eq!(firsts.to_vec(&world), vec![Value::Int(1)]);

        inner.push_object(&mut world, 4).unwrap();
        assert_eq!(lengths.to_vec(&world), vec![Value::Int(4)]);
    }

    #[test]
    fn despawning_the_array_tears_down_the_proxy() {
        let mut world = World::new();
        let items = todos(&mut world, &[false, false]);
        let array = MutableArray::spawn(&mut world, items.clone());
        let projection = array.each_array(&mut world, "isDone").unwrap();
        let proxy = array.each(&mut world);

        world.despawn(array.entity());
        world.flush();
        assert!(world.get_entity(proxy).is_err());
        assert!(world.get_entity(*projection).is_err());
        assert!(items.iter().all(|&item| tap_count(&world, item, "isDone") == 0));
    }

    #[test]
    fn splice_range_handles_unknown_counts() {
        assert_eq!(splice_range(Change::WHOLE, 3, 5), (0, 3, 5));
        assert_eq!(splice_range(Change::new(1, 1, 2), 3, 4), (1, 1, 2));
        assert_eq!(splice_range(Change::from_args(Some(2), None, Some(0)), 3, 2), (2, 1, 0));
        assert_eq!(splice_range(Change::new(9, 0, 1), 3, 4), (3, 0, 1));
    }
}
