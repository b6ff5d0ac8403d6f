//! A [`Vec`] backed observable array, the reference [`ArrayLike`] implementation.
//!
//! Every mutator of [`MutableArray`] funnels through [`MutableArray::replace`], which frames the
//! splice with a single change bracket.
use super::{
    array::{ArrayEntity, ArrayLike},
    bracket::Change,
    error::ArrayError,
    value::Value,
};
use bevy_derive::Deref;
use bevy_ecs::prelude::*;
use bevy_platform::prelude::*;

/// [`Component`] storing the elements of a [`MutableArray`].
#[derive(Component, Default, Clone, Debug, PartialEq)]
pub struct NativeArray(pub Vec<Value>);

impl ArrayLike for NativeArray {
    fn length(&self, _: &World) -> usize {
        self.0.len()
    }

    fn object_at(&self, _: &World, index: usize) -> Option<Value> {
        self.0.get(index).cloned()
    }
}

impl<V: Into<Value>> FromIterator<V> for NativeArray {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Handle to a [`NativeArray`] entity exposing bracketed mutators; read access comes from the
/// wrapped [`ArrayEntity`].
#[derive(Clone, Copy, Deref, Debug, PartialEq, Eq, Hash)]
pub struct MutableArray(pub ArrayEntity);

impl From<MutableArray> for Value {
    fn from(array: MutableArray) -> Self {
        array.0.into()
    }
}

impl MutableArray {
    /// Spawns a new array holding `values`.
    pub fn spawn(world: &mut World, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self(ArrayEntity::spawn(world, values.into_iter().collect::<NativeArray>()))
    }

    /// Wraps `entity` if it carries a [`NativeArray`].
    pub fn get(world: &World, entity: Entity) -> Result<Self, ArrayError> {
        if world.get::<NativeArray>(entity).is_some() {
            ArrayEntity::get(world, entity).map(Self)
        } else {
            Err(ArrayError::NotAnArray(entity))
        }
    }

    /// Removes up to `remove_count` elements at `start` and inserts `objects` in their place.
    ///
    /// `remove_count` is clamped to the elements actually available; `start` may equal the
    /// length (pure append) but not exceed it.
    pub fn replace(
        self,
        world: &mut World,
        start: usize,
        remove_count: usize,
        objects: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<(), ArrayError> {
        let length = self.length(world);
        if start > length {
            return Err(ArrayError::OutOfRange { index: start, length });
        }
        let removed = remove_count.min(length - start);
        let objects = objects.into_iter().map(Into::into).collect::<Vec<Value>>();
        let change = Change::new(start, removed, objects.len());
        self.mutate::<NativeArray, _>(world, change, move |array| {
            array.0.splice(start..start + removed, objects);
        })
    }

    /// Inserts `object` at `index`, which may equal the length.
    pub fn insert_at(self, world: &mut World, index: usize, object: impl Into<Value>) -> Result<(), ArrayError> {
        let object: Value = object.into();
        self.replace(world, index, 0, [object])
    }

    /// Removes `count` elements starting at `start`, which must address an existing element.
    pub fn remove_at(self, world: &mut World, start: usize, count: usize) -> Result<(), ArrayError> {
        let length = self.length(world);
        if start >= length {
            return Err(ArrayError::OutOfRange { index: start, length });
        }
        self.replace(world, start, count, core::iter::empty::<Value>())
    }

    #[allow(missing_docs)]
    pub fn push_object(self, world: &mut World, object: impl Into<Value>) -> Result<(), ArrayError> {
        let length = self.length(world);
        self.insert_at(world, length, object)
    }

    /// Appends `objects` in a single bracket.
    pub fn push_objects(self, world: &mut World, objects: impl IntoIterator<Item = impl Into<Value>>) -> Result<(), ArrayError> {
        let length = self.length(world);
        self.replace(world, length, 0, objects)
    }

    /// Removes and returns the last element, [`None`] when empty.
    pub fn pop_object(self, world: &mut World) -> Result<Option<Value>, ArrayError> {
        let Some(index) = self.length(world).checked_sub(1) else {
            return Ok(None);
        };
        let last = self.object_at(world, index);
        self.remove_at(world, index, 1)?;
        Ok(last)
    }

    /// Removes and returns the first element, [`None`] when empty.
    pub fn shift_object(self, world: &mut World) -> Result<Option<Value>, ArrayError> {
        if self.is_empty(world) {
            return Ok(None);
        }
        let first = self.object_at(world, 0);
        self.remove_at(world, 0, 1)?;
        Ok(first)
    }

    #[allow(missing_docs)]
    pub fn unshift_object(self, world: &mut World, object: impl Into<Value>) -> Result<(), ArrayError> {
        self.insert_at(world, 0, object)
    }

    /// Prepends `objects` in a single bracket.
    pub fn unshift_objects(
        self,
        world: &mut World,
        objects: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<(), ArrayError> {
        self.replace(world, 0, 0, objects)
    }

    #[allow(missing_docs)]
    pub fn index_of(self, world: &World, object: &Value) -> Option<usize> {
        world
            .get::<NativeArray>(self.entity())
            .and_then(|array| array.0.iter().position(|element| element == object))
    }

    #[allow(missing_docs)]
    pub fn contains(self, world: &World, object: &Value) -> bool {
        self.index_of(world, object).is_some()
    }

    /// Appends `object` unless already present.
    pub fn add_object(self, world: &mut World, object: impl Into<Value>) -> Result<(), ArrayError> {
        let object = object.into();
        if self.contains(world, &object) {
            return Ok(());
        }
        self.push_object(world, object)
    }

    /// Removes every occurrence of `object`, one bracket per occurrence, last first.
    pub fn remove_object(self, world: &mut World, object: impl Into<Value>) -> Result<(), ArrayError> {
        let object = object.into();
        let occurrences = world
            .get::<NativeArray>(self.entity())
            .map(|array| {
                array
                    .0
                    .iter()
                    .enumerate()
                    .filter(|(_, element)| **element == object)
                    .map(|(index, _)| index)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for index in occurrences.into_iter().rev() {
            self.remove_at(world, index, 1)?;
        }
        Ok(())
    }

    /// Removes every element; does nothing on an empty array.
    pub fn clear(self, world: &mut World) -> Result<(), ArrayError> {
        let length = self.length(world);
        if length == 0 {
            return Ok(());
        }
        self.replace(world, 0, length, core::iter::empty::<Value>())
    }

    /// Replaces the whole content with `objects` in a single bracket.
    pub fn set_objects(self, world: &mut World, objects: impl IntoIterator<Item = impl Into<Value>>) -> Result<(), ArrayError> {
        let length = self.length(world);
        self.replace(world, 0, length, objects)
    }
}
