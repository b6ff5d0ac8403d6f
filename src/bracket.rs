//! The will-change/did-change bracket every mutation of an observable array is framed by.
//!
//! [`will_change`] runs before the backing storage is touched, [`did_change`] after; together
//! they fan a single [`Change`] out to range observers, the synthetic `length`, `[]`,
//! `firstObject`, `lastObject` and `@each` keys, and the array's `@each` projections.
use super::{
    array::ArrayEntity,
    each,
    error::ArrayError,
    observer::{self, ArrayChange, ArrayObservers, EnumerableDidChange, EnumerableObservers, EnumerableWillChange},
    path::EACH_KEY,
    property::{CONTENT_KEY, FIRST_OBJECT_KEY, LAST_OBJECT_KEY, LENGTH_KEY, notify_property_change},
    utils::{debug, warn},
    value::Value,
};
use bevy_ecs::prelude::*;

/// Describes a contiguous mutation: starting at `start`, `removed` elements were replaced by
/// `added` elements. A [`None`] count means "unknown".
///
/// The [`Default`] is the "whole array, unknown extent" sentinel, [`Change::WHOLE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Change {
    #[allow(missing_docs)]
    pub start: usize,
    #[allow(missing_docs)]
    pub removed: Option<usize>,
    #[allow(missing_docs)]
    pub added: Option<usize>,
}

impl Change {
    /// Something about the array changed, extent unknown.
    pub const WHOLE: Self = Self {
        start: 0,
        removed: None,
        added: None,
    };

    #[allow(missing_docs)]
    pub const fn new(start: usize, removed: usize, added: usize) -> Self {
        Self {
            start,
            removed: Some(removed),
            added: Some(added),
        }
    }

    /// Builds a change from possibly omitted arguments; a missing `start` yields
    /// [`Change::WHOLE`] regardless of the counts.
    pub fn from_args(start: Option<usize>, removed: Option<usize>, added: Option<usize>) -> Self {
        match start {
            Some(start) => Self { start, removed, added },
            None => Self::WHOLE,
        }
    }

    #[allow(missing_docs)]
    pub fn is_whole(&self) -> bool {
        *self == Self::WHOLE
    }

    /// Whether `length` may have changed: the counts differ or either is unknown.
    pub fn changes_length(&self) -> bool {
        match (self.removed, self.added) {
            (Some(removed), Some(added)) => removed != added,
            _ => true,
        }
    }

    /// The `(start, removed, added)` triple with unknown counts as `-1`.
    pub fn raw(&self) -> (usize, isize, isize) {
        let count = |count: Option<usize>| count.map_or(-1, |count| count as isize);
        (self.start, count(self.removed), count(self.added))
    }
}

impl Default for Change {
    fn default() -> Self {
        Self::WHOLE
    }
}

impl From<(usize, usize, usize)> for Change {
    fn from((start, removed, added): (usize, usize, usize)) -> Self {
        Self::new(start, removed, added)
    }
}

/// Per-array bracket bookkeeping, required by [`ArrayAccess`](crate::array::ArrayAccess).
#[derive(Component, Default, Debug)]
pub struct BracketState {
    open: Option<Change>,
    boundary: Option<(Option<Value>, Option<Value>)>,
}

impl BracketState {
    /// Whether a [`will_change`] is waiting for its [`did_change`].
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

/// Opens a change bracket on `array`, notifying before-phase observers with the elements about
/// to be removed while they are still readable.
///
/// Brackets do not nest: opening a second one before the first is closed fails with
/// [`ArrayError::BracketAlreadyOpen`].
pub fn will_change(world: &mut World, array: Entity, change: Change) -> Result<(), ArrayError> {
    let handle = ArrayEntity::get(world, array)?;
    let boundary = (handle.first_object(world), handle.last_object(world));
    let state = world.get::<BracketState>(array).ok_or(ArrayError::NotAnArray(array))?;
    if state.is_open() {
        return Err(ArrayError::BracketAlreadyOpen { array });
    }
    each::ensure_closed(world, array)?;
    let Some(mut state) = world.get_mut::<BracketState>(array) else {
        return Err(ArrayError::NotAnArray(array));
    };
    state.open = Some(change);
    state.boundary = Some(boundary);
    debug!("{} will change {:?}", array, change.raw());

    let removing = match change.removed {
        Some(count) if handle.has_enumerable_observers(world) => Some(handle.objects_in(world, change.start, count)),
        _ => None,
    };
    observer::notify_will::<EnumerableObservers>(world, array, |target, context| EnumerableWillChange {
        enumerable: array,
        target,
        context,
        removing: removing.clone(),
        adding: change.added,
    });
    observer::notify_will::<ArrayObservers>(world, array, |target, context| ArrayChange {
        array,
        target,
        context,
        change,
    });
    if let Err(error) = each::will_change(world, array, change) {
        close(world, array);
        return Err(error);
    }
    Ok(())
}

fn close(world: &mut World, array: Entity) {
    if let Some(mut state) = world.get_mut::<BracketState>(array) {
        state.open = None;
        state.boundary = None;
    }
    debug!("{} abandoned its change bracket", array);
}

/// Closes the bracket on `array` and its projections without notifying anyone.
pub(crate) fn abort(world: &mut World, array: Entity) {
    close(world, array);
    each::abort(world, array);
}

/// Closes the change bracket on `array`, notifying after-phase observers with the elements that
/// were added, then publishing `length` (only if it may have changed), `[]`, `firstObject` and
/// `lastObject` (only if they differ from the values seen by [`will_change`]), the `@each`
/// projections and finally `@each` itself.
///
/// If the array is observed through `@each.<key>` and now holds a non-object in the added range,
/// fails with [`ArrayError::EachRequiresObjects`] before anyone is notified; the bracket is
/// still closed, along with the brackets forwarded to the array's projections.
pub fn did_change(world: &mut World, array: Entity, change: Change) -> Result<(), ArrayError> {
    let handle = ArrayEntity::get(world, array)?;
    let (opened, boundary) = match world.get_mut::<BracketState>(array) {
        Some(mut state) => (state.open.take(), state.boundary.take()),
        None => (None, None),
    };
    match opened {
        None => warn!("{} did change {:?} without a matching will change", array, change.raw()),
        Some(opened) if opened != change => debug!(
            "{} opened its bracket with {:?} but closed it with {:?}",
            array,
            opened.raw(),
            change.raw()
        ),
        Some(_) => debug!("{} did change {:?}", array, change.raw()),
    }
    if let Err(error) = each::validate(world, array, change) {
        each::abandon(world, array, change);
        return Err(error);
    }

    let adding = match change.added {
        Some(count) if handle.has_enumerable_observers(world) => Some(handle.objects_in(world, change.start, count)),
        _ => None,
    };
    observer::notify_did::<EnumerableObservers>(world, array, |target, context| EnumerableDidChange {
        enumerable: array,
        target,
        context,
        removing: change.removed,
        adding: adding.clone(),
    });
    observer::notify_did::<ArrayObservers>(world, array, |target, context| ArrayChange {
        array,
        target,
        context,
        change,
    });

    if change.changes_length() {
        notify_property_change(world, array, LENGTH_KEY);
    }
    notify_property_change(world, array, CONTENT_KEY);
    if let Some((first, last)) = boundary {
        if handle.first_object(world) != first {
            notify_property_change(world, array, FIRST_OBJECT_KEY);
        }
        if handle.last_object(world) != last {
            notify_property_change(world, array, LAST_OBJECT_KEY);
        }
    }
    each::did_change(world, array, change)?;
    notify_property_change(world, array, EACH_KEY);
    Ok(())
}
