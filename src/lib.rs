#![doc = include_str!("../README.md")]
//! ## Feature flags
#![cfg_attr(feature = "document-features", doc = document_features::document_features!())]
#![no_std]

extern crate alloc;

use bevy_app::prelude::*;
use bevy_ecs::schedule::IntoScheduleConfigs;

pub mod array;
pub mod bracket;
pub mod computed;
pub mod each;
pub mod error;
pub mod native;
pub mod observer;
pub mod path;
pub mod property;
#[allow(missing_docs)]
pub mod utils;
pub mod value;

/// Cleans up after despawned entities: observer registrations whose target is gone and property
/// observers whose object is gone.
///
/// Everything in [orderly](crate) works on a bare [`World`](bevy_ecs::world::World); the plugin
/// only adds this housekeeping, run in [`Last`].
#[derive(Default)]
pub struct OrderlyPlugin;

impl Plugin for OrderlyPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Last,
            (
                observer::prune_despawned_targets::<observer::ArrayObservers>,
                observer::prune_despawned_targets::<observer::EnumerableObservers>,
                property::prune_orphaned_observers,
            )
                .chain(),
        );
    }
}

/// `use orderly::prelude::*;` imports everything one needs to start observing arrays.
pub mod prelude {
    pub use crate::{
        OrderlyPlugin,
        array::{ArrayEntity, ArrayLike, observable},
        bracket::Change,
        computed::define_computed,
        each::{EachArray, EachProxy},
        error::ArrayError,
        native::{MutableArray, NativeArray},
        observer::{
            ArrayChange, ArrayObserver, EnumerableDidChange, EnumerableObserver, EnumerableWillChange,
        },
        path::EACH_KEY,
        property::{
            ObserverHandle, Properties, PropertyChange, add_observer, get_property, notify_property_change,
            set_property,
        },
        utils::clone,
        value::Value,
    };
    #[doc(no_inline)]
    pub use apply::{Also, Apply};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use bevy::prelude::*;
    use bevy_platform::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use test_log::test;

    #[test]
    fn plugin_prunes_despawned_targets_and_objects() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, OrderlyPlugin));
        let world = app.world_mut();

        let array = MutableArray::spawn(world, [1, 2]);
        let target = world.spawn_empty().id();
        let calls = Arc::new(AtomicUsize::new(0));
        array.add_array_observer(
            world,
            target,
            ArrayObserver::new().did_change(clone!((calls) move |_: In<ArrayChange>| {
                calls.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let object = world.spawn(Properties::new().with("items", array)).id();
        let handle = add_observer(world, object, "items.length", |_: In<PropertyChange>| {}).unwrap();

        world.despawn(target);
        world.despawn(object);
        app.update();

        let world = app.world_mut();
        assert!(!array.has_array_observers(world));
        assert!(world.get_entity(*handle).is_err());
        array.push_object(world, 3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(crate::property::tap_count(world, array.entity(), "length"), 0);
    }

    #[test]
    fn prelude_builds_an_observed_array() {
        let mut world = World::new();
        let array = MutableArray::spawn(&mut world, core::iter::empty::<Value>());
        let lengths = Arc::new(AtomicUsize::new(0));
        add_observer(
            &mut world,
            array.entity(),
            "length",
            clone!((lengths) move |_: In<PropertyChange>| {
                lengths.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        array.push_objects(&mut world, ["a", "b"]).unwrap();
        assert_eq!(lengths.load(Ordering::SeqCst), 1);
        assert_eq!(get_property(&mut world, array.entity(), "length"), Value::Int(2));
    }
}
