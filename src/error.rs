//! Errors surfaced synchronously to the caller of a mutating or subscribing operation.
use bevy_ecs::prelude::*;
use bevy_platform::prelude::*;

/// Programming errors detected by the change bracket engine, the observer registries, or the
/// property path parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArrayError {
    /// An array observed through `@each.<key>` yielded an element that does not support
    /// property access.
    #[error(
        "When using @each to observe the array {array}, the array must return an object, but index {index} yielded {found} while observing `{key}`"
    )]
    EachRequiresObjects {
        /// The observed array.
        array: Entity,
        /// The tracked per-element property.
        key: String,
        /// Index of the offending element.
        index: usize,
        /// Description of the value found there.
        found: String,
    },
    /// `will_change` was called while a bracket was already open on the same array.
    #[error("array {array} received a will-change while its previous bracket is still open")]
    BracketAlreadyOpen {
        #[allow(missing_docs)]
        array: Entity,
    },
    /// A mutator addressed an index past the end of the array.
    #[error("index {index} is out of range for an array of length {length}")]
    OutOfRange {
        #[allow(missing_docs)]
        index: usize,
        #[allow(missing_docs)]
        length: usize,
    },
    /// A property path could not be parsed.
    #[error("invalid property path `{path}`: {reason}")]
    InvalidPath {
        #[allow(missing_docs)]
        path: String,
        #[allow(missing_docs)]
        reason: &'static str,
    },
    /// The entity does not carry an observable array.
    #[error("entity {0} is not an observable array")]
    NotAnArray(Entity),
}
