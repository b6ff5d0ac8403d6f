//! The capability contract for observable ordered collections, see [`ArrayLike`] and
//! [`ArrayEntity`].
use super::{
    bracket::{self, BracketState, Change},
    each,
    error::ArrayError,
    native::MutableArray,
    observer::{self, ArrayObserver, ArrayObservers, EnumerableObserver, EnumerableObservers},
    value::Value,
};
use bevy_derive::Deref;
use bevy_ecs::{component::Mutable, prelude::*};
use bevy_platform::prelude::*;
use core::ops::Range;

/// Minimal read interface an ordered collection exposes to participate in change notification.
///
/// Any [`Component`] implementing this can be made observable with [`observable`] or
/// [`ArrayEntity::spawn`]; nothing else is mandatory. `object_at` must be stable between a
/// [`will_change`](ArrayEntity::will_change) and the matching
/// [`did_change`](ArrayEntity::did_change) for indices outside the mutated range.
pub trait ArrayLike: Send + Sync + 'static {
    /// Number of elements.
    fn length(&self, world: &World) -> usize;

    /// Element at `index`, [`None`] when out of range.
    fn object_at(&self, world: &World, index: usize) -> Option<Value>;

    /// Elements in `[begin, end)`, see [`slice_bounds`].
    fn slice(&self, world: &World, begin: Option<isize>, end: Option<isize>) -> Vec<Value> {
        read_range(slice_bounds(self.length(world), begin, end), |index| self.object_at(world, index))
    }
}

/// Reads every index of `range`, holes becoming [`Value::Null`].
fn read_range(range: Range<usize>, object_at: impl Fn(usize) -> Option<Value>) -> Vec<Value> {
    range.map(|index| object_at(index).unwrap_or_default()).collect()
}

/// Normalizes `slice` arguments against `length`: negative indices count from the end, a
/// missing `begin` is `0`, a missing `end` is `length`, and both clamp to `[0, length]`. An
/// inverted range is empty.
pub fn slice_bounds(length: usize, begin: Option<isize>, end: Option<isize>) -> Range<usize> {
    let resolve = |index: isize| {
        if index < 0 {
            length.saturating_sub(index.unsigned_abs())
        } else {
            index.unsigned_abs().min(length)
        }
    };
    let begin = begin.map(resolve).unwrap_or(0);
    let end = end.map(resolve).unwrap_or(length);
    begin..end.max(begin)
}

/// Type-erased readers for the [`ArrayLike`] component backing an [`Entity`].
#[derive(Component, Clone, Copy)]
#[require(BracketState)]
pub struct ArrayAccess {
    length: fn(&World, Entity) -> usize,
    object_at: fn(&World, Entity, usize) -> Option<Value>,
}

impl ArrayAccess {
    /// Readers for the `A` component.
    pub fn of<A: ArrayLike + Component>() -> Self {
        fn length<A: ArrayLike + Component>(world: &World, entity: Entity) -> usize {
            world.get::<A>(entity).map(|array| array.length(world)).unwrap_or(0)
        }

        fn object_at<A: ArrayLike + Component>(world: &World, entity: Entity, index: usize) -> Option<Value> {
            world.get::<A>(entity).and_then(|array| array.object_at(world, index))
        }

        Self {
            length: length::<A>,
            object_at: object_at::<A>,
        }
    }
}

/// Bundles an [`ArrayLike`] component with the readers the change bracket engine uses.
pub fn observable<A: ArrayLike + Component>(array: A) -> impl Bundle {
    (array, ArrayAccess::of::<A>())
}

/// Handle to an [`Entity`] carrying an observable ordered collection.
#[derive(Clone, Copy, Deref, Debug, PartialEq, Eq, Hash)]
pub struct ArrayEntity(pub Entity);

impl From<ArrayEntity> for Entity {
    fn from(array: ArrayEntity) -> Self {
        array.0
    }
}

impl From<ArrayEntity> for Value {
    fn from(array: ArrayEntity) -> Self {
        Value::Object(array.0)
    }
}

impl ArrayEntity {
    /// Spawns `array` as a new observable collection.
    pub fn spawn<A: ArrayLike + Component>(world: &mut World, array: A) -> Self {
        Self(world.spawn(observable(array)).id())
    }

    /// Wraps `entity` if it carries an observable collection.
    pub fn get(world: &World, entity: Entity) -> Result<Self, ArrayError> {
        if world.get::<ArrayAccess>(entity).is_some() {
            Ok(Self(entity))
        } else {
            Err(ArrayError::NotAnArray(entity))
        }
    }

    #[allow(missing_docs)]
    pub fn entity(self) -> Entity {
        self.0
    }

    #[allow(missing_docs)]
    pub fn length(self, world: &World) -> usize {
        world
            .get::<ArrayAccess>(self.0)
            .map(|access| (access.length)(world, self.0))
            .unwrap_or(0)
    }

    #[allow(missing_docs)]
    pub fn is_empty(self, world: &World) -> bool {
        self.length(world) == 0
    }

    #[allow(missing_docs)]
    pub fn object_at(self, world: &World, index: usize) -> Option<Value> {
        world
            .get::<ArrayAccess>(self.0)
            .and_then(|access| (access.object_at)(world, self.0, index))
    }

    /// Reads `index..index + count` straight through `object_at`, without clamping to the
    /// current length.
    pub(crate) fn objects_in(self, world: &World, index: usize, count: usize) -> Vec<Value> {
        read_range(index..index.saturating_add(count), |index| self.object_at(world, index))
    }

    /// Elements in `[begin, end)` with negative indices counting from the end, see
    /// [`slice_bounds`].
    pub fn slice(self, world: &World, begin: Option<isize>, end: Option<isize>) -> Vec<Value> {
        read_range(slice_bounds(self.length(world), begin, end), |index| self.object_at(world, index))
    }

    /// Like [`.slice`](Self::slice), but the result is itself spawned as an observable
    /// [`MutableArray`].
    pub fn slice_array(self, world: &mut World, begin: Option<isize>, end: Option<isize>) -> MutableArray {
        let values = self.slice(world, begin, end);
        MutableArray::spawn(world, values)
    }

    #[allow(missing_docs)]
    pub fn to_vec(self, world: &World) -> Vec<Value> {
        self.slice(world, None, None)
    }

    #[allow(missing_docs)]
    pub fn first_object(self, world: &World) -> Option<Value> {
        self.object_at(world, 0)
    }

    #[allow(missing_docs)]
    pub fn last_object(self, world: &World) -> Option<Value> {
        self.length(world)
            .checked_sub(1)
            .and_then(|index| self.object_at(world, index))
    }

    /// Announces an impending mutation, see [`bracket::will_change`].
    pub fn will_change(self, world: &mut World, change: impl Into<Change>) -> Result<(), ArrayError> {
        bracket::will_change(world, self.0, change.into())
    }

    /// Announces a completed mutation, see [`bracket::did_change`].
    pub fn did_change(self, world: &mut World, change: impl Into<Change>) -> Result<(), ArrayError> {
        bracket::did_change(world, self.0, change.into())
    }

    /// Frames `mutation` of the backing `A` component with a will-change/did-change bracket
    /// described by `change`.
    ///
    /// The mutation is not run if the will phase fails.
    pub fn mutate<A, R>(
        self,
        world: &mut World,
        change: impl Into<Change>,
        mutation: impl FnOnce(&mut A) -> R,
    ) -> Result<R, ArrayError>
    where
        A: ArrayLike + Component<Mutability = Mutable>,
    {
        if world.get::<A>(self.0).is_none() {
            return Err(ArrayError::NotAnArray(self.0));
        }
        let change = change.into();
        self.will_change(world, change)?;
        let output = world.get_mut::<A>(self.0).map(|mut array| mutation(&mut array));
        self.did_change(world, change)?;
        output.ok_or(ArrayError::NotAnArray(self.0))
    }

    /// Registers `observer` for `target`, replacing any previous registration of `target`.
    pub fn add_array_observer(self, world: &mut World, target: Entity, observer: ArrayObserver) {
        observer::add::<ArrayObservers>(world, self.0, target, observer);
    }

    /// Removes `target`'s array observer registration, doing nothing if there is none.
    pub fn remove_array_observer(self, world: &mut World, target: Entity) {
        observer::remove::<ArrayObservers>(world, self.0, target);
    }

    #[allow(missing_docs)]
    pub fn has_array_observers(self, world: &World) -> bool {
        observer::has_observers::<ArrayObservers>(world, self.0)
    }

    /// Registers `observer` for `target`, replacing any previous registration of `target`.
    pub fn add_enumerable_observer(self, world: &mut World, target: Entity, observer: EnumerableObserver) {
        observer::add::<EnumerableObservers>(world, self.0, target, observer);
    }

    /// Removes `target`'s enumerable observer registration, doing nothing if there is none.
    pub fn remove_enumerable_observer(self, world: &mut World, target: Entity) {
        observer::remove::<EnumerableObservers>(world, self.0, target);
    }

    #[allow(missing_docs)]
    pub fn has_enumerable_observers(self, world: &World) -> bool {
        observer::has_observers::<EnumerableObservers>(world, self.0)
    }

    /// The `@each` proxy of this array, spawned on first access.
    pub fn each(self, world: &mut World) -> Entity {
        each::proxy(world, self.0)
    }

    /// The derived collection whose element `i` is `key` of this array's element `i`.
    ///
    /// Materializing it tracks `key` on every element, so this fails like an `@each.<key>`
    /// observer would if an element is not an object.
    pub fn each_array(self, world: &mut World, key: &str) -> Result<ArrayEntity, ArrayError> {
        each::each_array(world, self.0, key)
    }
}
