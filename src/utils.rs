use bevy_ecs::{prelude::*, system::SystemId};

#[doc(no_inline)]
pub use enclose::enclose as clone;

/// Convenience trait for [`Send`] + [`Sync`] + 'static.
pub trait SSs: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> SSs for T {}

/// Unregisters `system`, deferring to the next command flush if it is the system currently
/// running (a callback removing itself).
pub(crate) fn release<I: SSs, O: 'static>(world: &mut World, system: SystemId<In<I>, O>) {
    if world.unregister_system(system).is_err() {
        world.commands().queue(move |world: &mut World| {
            let _ = world.unregister_system(system);
        });
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "tracing")] {
        pub(crate) use bevy_log::{debug, error, warn};
    } else {
        macro_rules! debug {
            ($($arg:tt)*) => {{
                let _ = format_args!($($arg)*);
            }};
        }

        macro_rules! warn {
            ($($arg:tt)*) => {{
                let _ = format_args!($($arg)*);
            }};
        }

        macro_rules! error {
            ($($arg:tt)*) => {{
                let _ = format_args!($($arg)*);
            }};
        }

        pub(crate) use {debug, error, warn};
    }
}
