//! Array and enumerable observer registries, see [`ArrayObserver`] and [`EnumerableObserver`].
use super::{
    bracket::Change,
    utils::{SSs, debug, release},
    value::Value,
};
use bevy_ecs::{prelude::*, system::SystemId};
use bevy_platform::prelude::*;
use core::marker::PhantomData;

/// Raw change tuple delivered to array observers on both sides of a bracket.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayChange {
    /// The array being mutated.
    pub array: Entity,
    /// The registered observer target.
    pub target: Entity,
    /// Context supplied at registration.
    pub context: Option<Value>,
    #[allow(missing_docs)]
    pub change: Change,
}

/// Delivered to enumerable observers before a mutation.
///
/// Carries the elements about to be removed and the number about to be added; both are
/// [`None`] when the bracket is the whole-collection sentinel.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumerableWillChange {
    /// The collection being mutated.
    pub enumerable: Entity,
    /// The registered observer target.
    pub target: Entity,
    /// Context supplied at registration.
    pub context: Option<Value>,
    #[allow(missing_docs)]
    pub removing: Option<Vec<Value>>,
    #[allow(missing_docs)]
    pub adding: Option<usize>,
}

/// Delivered to enumerable observers after a mutation.
///
/// Carries the number of elements removed and the elements added; both are [`None`] when the
/// bracket is the whole-collection sentinel.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumerableDidChange {
    /// The collection being mutated.
    pub enumerable: Entity,
    /// The registered observer target.
    pub target: Entity,
    /// Context supplied at registration.
    pub context: Option<Value>,
    #[allow(missing_docs)]
    pub removing: Option<usize>,
    #[allow(missing_docs)]
    pub adding: Option<Vec<Value>>,
}

/// Distinguishes the independent observer registries an array carries.
pub trait ObserverKind: SSs {
    /// Input of the will-change callback.
    type Will: SSs;
    /// Input of the did-change callback.
    type Did: SSs;
}

/// Marker for the array observer registry.
pub struct ArrayObservers;

impl ObserverKind for ArrayObservers {
    type Will = ArrayChange;
    type Did = ArrayChange;
}

/// Marker for the enumerable observer registry.
pub struct EnumerableObservers;

impl ObserverKind for EnumerableObservers {
    type Will = EnumerableWillChange;
    type Did = EnumerableDidChange;
}

type LazyCallback<I> = Box<dyn FnOnce(&mut World) -> SystemId<In<I>> + Send + Sync>;

/// Describes an observer before it is registered: which directions it handles and the context
/// handed back to it. Directions left unset are skipped when notifying.
pub struct ObserverBuilder<K: ObserverKind> {
    will: Option<LazyCallback<K::Will>>,
    did: Option<LazyCallback<K::Did>>,
    context: Option<Value>,
    _marker: PhantomData<fn() -> K>,
}

/// Builder for observers registered with
/// [`ArrayEntity::add_array_observer`](super::array::ArrayEntity::add_array_observer).
pub type ArrayObserver = ObserverBuilder<ArrayObservers>;

/// Builder for observers registered with
/// [`ArrayEntity::add_enumerable_observer`](super::array::ArrayEntity::add_enumerable_observer).
pub type EnumerableObserver = ObserverBuilder<EnumerableObservers>;

impl<K: ObserverKind> Default for ObserverBuilder<K> {
    fn default() -> Self {
        Self {
            will: None,
            did: None,
            context: None,
            _marker: PhantomData,
        }
    }
}

impl<K: ObserverKind> ObserverBuilder<K> {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `system` before each mutation.
    pub fn will_change<M>(mut self, system: impl IntoSystem<In<K::Will>, (), M> + SSs) -> Self {
        self.will = Some(Box::new(move |world: &mut World| world.register_system(system)));
        self
    }

    /// Run `system` after each mutation.
    pub fn did_change<M>(mut self, system: impl IntoSystem<In<K::Did>, (), M> + SSs) -> Self {
        self.did = Some(Box::new(move |world: &mut World| world.register_system(system)));
        self
    }

    /// Opaque value handed back with every notification.
    pub fn context(mut self, context: impl Into<Value>) -> Self {
        self.context = Some(context.into());
        self
    }
}

struct Registration<K: ObserverKind> {
    target: Entity,
    context: Option<Value>,
    will: Option<SystemId<In<K::Will>>>,
    did: Option<SystemId<In<K::Did>>>,
}

impl<K: ObserverKind> Registration<K> {
    fn unregister(self, world: &mut World) {
        if let Some(will) = self.will {
            release(world, will);
        }
        if let Some(did) = self.did {
            release(world, did);
        }
    }
}

/// [`Component`] holding one registry of observers on an array [`Entity`].
#[derive(Component)]
pub struct ObserverRegistry<K: ObserverKind> {
    registrations: Vec<Registration<K>>,
}

impl<K: ObserverKind> Default for ObserverRegistry<K> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<K: ObserverKind> ObserverRegistry<K> {
    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    #[allow(missing_docs)]
    pub fn contains(&self, target: Entity) -> bool {
        self.registrations.iter().any(|registration| registration.target == target)
    }

    fn take(&mut self, target: Entity) -> Option<Registration<K>> {
        let position = self
            .registrations
            .iter()
            .position(|registration| registration.target == target)?;
        Some(self.registrations.remove(position))
    }
}

pub(crate) fn add<K: ObserverKind>(world: &mut World, subject: Entity, target: Entity, builder: ObserverBuilder<K>) {
    let ObserverBuilder { will, did, context, .. } = builder;
    let registration = Registration::<K> {
        target,
        context,
        will: will.map(|register| register(world)),
        did: did.map(|register| register(world)),
    };
    if world.get_entity(subject).is_err() {
        registration.unregister(world);
        return;
    }
    let mut entity = world.entity_mut(subject);
    let previous = match entity.get_mut::<ObserverRegistry<K>>() {
        Some(mut registry) => {
            let previous = registry.take(target);
            registry.registrations.push(registration);
            previous
        }
        None => {
            entity.insert(ObserverRegistry::<K> {
                registrations: vec![registration],
            });
            None
        }
    };
    if let Some(previous) = previous {
        debug!("replacing observer registration of {} on {}", target, subject);
        previous.unregister(world);
    }
}

pub(crate) fn remove<K: ObserverKind>(world: &mut World, subject: Entity, target: Entity) {
    let removed = world
        .get_mut::<ObserverRegistry<K>>(subject)
        .and_then(|mut registry| registry.take(target));
    if let Some(registration) = removed {
        registration.unregister(world);
    }
}

pub(crate) fn has_observers<K: ObserverKind>(world: &World, subject: Entity) -> bool {
    world
        .get::<ObserverRegistry<K>>(subject)
        .is_some_and(|registry| !registry.is_empty())
}

/// Runs every will-change callback registered on `subject`, building each input with `event`.
///
/// The registry is snapshotted first, so callbacks may add or remove observers; a callback
/// whose registration was removed earlier in the same pass is skipped.
pub(crate) fn notify_will<K: ObserverKind>(
    world: &mut World,
    subject: Entity,
    mut event: impl FnMut(Entity, Option<Value>) -> K::Will,
) {
    let Some(registry) = world.get::<ObserverRegistry<K>>(subject) else {
        return;
    };
    let pending = registry
        .registrations
        .iter()
        .filter_map(|registration| {
            registration
                .will
                .map(|system| (system, registration.target, registration.context.clone()))
        })
        .collect::<Vec<_>>();
    for (system, target, context) in pending {
        if world.get_entity(target).is_err() {
            continue;
        }
        if let Err(error) = world.run_system_with(system, event(target, context)) {
            debug!("skipping will-change observer {} of {}: {}", target, subject, error);
        }
    }
}

/// Did-change counterpart of [`notify_will`].
pub(crate) fn notify_did<K: ObserverKind>(
    world: &mut World,
    subject: Entity,
    mut event: impl FnMut(Entity, Option<Value>) -> K::Did,
) {
    let Some(registry) = world.get::<ObserverRegistry<K>>(subject) else {
        return;
    };
    let pending = registry
        .registrations
        .iter()
        .filter_map(|registration| {
            registration
                .did
                .map(|system| (system, registration.target, registration.context.clone()))
        })
        .collect::<Vec<_>>();
    for (system, target, context) in pending {
        if world.get_entity(target).is_err() {
            continue;
        }
        if let Err(error) = world.run_system_with(system, event(target, context)) {
            debug!("skipping did-change observer {} of {}: {}", target, subject, error);
        }
    }
}

/// Drops registrations whose target [`Entity`] no longer exists.
pub(crate) fn prune_despawned_targets<K: ObserverKind>(world: &mut World) {
    let mut registries = world.query::<(Entity, &ObserverRegistry<K>)>();
    let stale = registries
        .iter(world)
        .flat_map(|(subject, registry)| {
            registry
                .registrations
                .iter()
                .filter(|registration| world.get_entity(registration.target).is_err())
                .map(move |registration| (subject, registration.target))
        })
        .collect::<Vec<_>>();
    for (subject, target) in stale {
        debug!("pruning observer {} of {}, its target was despawned", target, subject);
        remove::<K>(world, subject, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array::ArrayEntity, native::MutableArray};
    use bevy_platform::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use test_log::test;

    #[test]
    fn re_registering_replaces_the_previous_registration() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, [1, 2]);
        let target = world.spawn_empty().id();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            array.add_array_observer(
                &mut world,
                target,
                ArrayObserver::new().did_change(move |In(_): In<ArrayChange>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(world.get::<ObserverRegistry<ArrayObservers>>(*array.0).unwrap().len(), 1);

        array.push_object(&mut world, 3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "should only call once");

        array.remove_array_observer(&mut world, target);
        array.push_object(&mut world, 4).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "removal should disable");
        assert!(!array.has_array_observers(&world));
    }

    #[test]
    fn last_registration_context_wins() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, [1]);
        let target = world.spawn_empty().id();
        let contexts = Arc::new(Mutex::new(Vec::new()));

        for context in ["first", "second"] {
            let contexts = contexts.clone();
            array.add_array_observer(
                &mut world,
                target,
                ArrayObserver::new()
                    .context(context)
                    .will_change(move |In(change): In<ArrayChange>| {
                        contexts.lock().unwrap().push(change.context);
                    }),
            );
        }
        array.pop_object(&mut world).unwrap();
        assert_eq!(*contexts.lock().unwrap(), vec![Some(Value::from("second"))]);
    }

    #[test]
    fn removing_an_unknown_observer_is_a_no_op() {
        let mut world = World::new();
        let array: ArrayEntity = *MutableArray::spawn(&mut world, [1]);
        let stranger = world.spawn_empty().id();
        array.remove_array_observer(&mut world, stranger);
        array.remove_enumerable_observer(&mut world, stranger);
        assert!(!array.has_array_observers(&world));
        assert!(!array.has_enumerable_observers(&world));
    }

    #[test]
    fn missing_directions_are_skipped() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, Vec::<Value>::new());
        let target = world.spawn_empty().id();
        let did = Arc::new(AtomicUsize::new(0));
        array.add_enumerable_observer(
            &mut world,
            target,
            EnumerableObserver::new().did_change({
                let did = did.clone();
                move |In(_): In<EnumerableDidChange>| {
                    did.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        array.push_object(&mut world, "a").unwrap();
        assert_eq!(did.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_may_remove_themselves_during_delivery() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, [1]);
        let target = world.spawn_empty().id();
        let calls = Arc::new(AtomicUsize::new(0));
        array.add_array_observer(
            &mut world,
            target,
            ArrayObserver::new().will_change({
                let calls = calls.clone();
                move |In(change): In<ArrayChange>, world: &mut World| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ArrayEntity(change.array).remove_array_observer(world, change.target);
                }
            }),
        );
        array.push_object(&mut world, 2).unwrap();
        array.push_object(&mut world, 3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!array.has_array_observers(&world));
    }

    #[derive(Resource)]
    struct Missing;

    #[test]
    fn a_failing_observer_neither_stops_delivery_nor_sticks() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, [1]);
        let failing = world.spawn_empty().id();
        let healthy = world.spawn_empty().id();
        let calls = Arc::new(AtomicUsize::new(0));
        array.add_array_observer(
            &mut world,
            failing,
            ArrayObserver::new()
                .will_change(|In(_): In<ArrayChange>, _: Res<Missing>| {})
                .did_change(|In(_): In<ArrayChange>, _: Res<Missing>| {}),
        );
        array.add_array_observer(
            &mut world,
            healthy,
            ArrayObserver::new().did_change({
                let calls = calls.clone();
                move |In(_): In<ArrayChange>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        array.push_object(&mut world, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(array.length(&world), 2);

        array.remove_array_observer(&mut world, failing);
        assert_eq!(world.get::<ObserverRegistry<ArrayObservers>>(*array.0).unwrap().len(), 1);
        array.remove_array_observer(&mut world, healthy);
        assert!(!array.has_array_observers(&world));
    }
}
