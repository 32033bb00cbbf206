#![deny(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]
//! Type-erased callables, stored inline when they fit in a pointer.
//!
//! See [`Function`] for the crate's central API.
//!
//! A [`Function<S>`] holds any [`Clone`] value callable with the signature `S`,
//! written as a function-pointer type such as `fn(i32, i32) -> i32`.
//! Calls, clones, moves and drops all go through a table of operations
//! built once per stored type, so the `Function` itself carries no type information
//! beyond the address of that table.
//!
//! # Storage
//!
//! Every `Function` is two pointers wide: a one-pointer buffer and the table pointer.
//! Values that fit in the buffer (see [`policy_of`]) are stored inline, and anything
//! else is [boxed] on the heap behind a single owning pointer.
//!
//! [boxed]: Policy::Boxed
//!
//! # Soundness
//!
//! Dispatch tables are built lazily, at most once per (signature, stored type) pair,
//! and live for the rest of the process. Comparing their addresses is how
//! [`Function::target`] recognises the stored type.
//!
//! Bear in mind that the crate relies on `unsafe` code which is tested but not formally verified.
//!
//! # Examples
//!
//! ```rust
//! use smallfn::{EmptyCallError, Function, Policy};
//!
//! type Op = Function<fn(u64) -> u64>;
//!
//! // a closure capturing a single `u64` is stored inline:
//! let step = 3;
//! let add = Op::new(move |x: u64| x + step);
//! assert_eq!(add.policy(), Some(Policy::Inline));
//!
//! // but one capturing more than a pointer's worth is boxed:
//! let table = [1_u64, 2, 3, 4];
//! let lookup = Op::new(move |x: u64| table[x as usize % 4]);
//! assert_eq!(lookup.policy(), Some(Policy::Boxed));
//!
//! // either way, calling looks the same:
//! assert_eq!(add.call(1), Ok(4));
//! assert_eq!(lookup.call(5), Ok(2));
//!
//! // clones are independent values:
//! let mut copy = lookup.clone();
//! let moved = copy.take();
//! assert_eq!(copy.call(0), Err(EmptyCallError));
//! assert_eq!(moved.call(0), Ok(1));
//! assert_eq!(lookup.call(0), Ok(1));
//! ```
//!
//! Custom types can be made callable by implementing [`Callable`]:
//!
//! ```rust
//! use smallfn::{Callable, Function};
//!
//! #[derive(Clone)]
//! struct Scale(f32);
//!
//! impl Callable<fn(f32) -> f32> for Scale {
//!     fn call_with(&self, (x,): (f32,)) -> f32 {
//!         x * self.0
//!     }
//! }
//!
//! let f = Function::<fn(f32) -> f32>::new(Scale(2.0));
//! assert_eq!(f.call(1.5), Ok(3.0));
//! assert_eq!(f.target::<Scale>().map(|s| s.0), Some(2.0));
//! ```
//!
#![doc = document_features::document_features!()]

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, trace};

/// Forwards to `tracing::trace` when the tracing feature is enabled
#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($tt:tt)*) => {};
}
/// Forwards to `tracing::debug` when the tracing feature is enabled
#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {};
}
#[cfg(not(feature = "tracing"))]
pub(crate) use {debug, trace};

mod error;
#[cfg(test)]
mod failing_alloc;
mod function;
mod registry;
mod signature;
mod storage;
mod table;

pub use error::{AllocError, EmptyCallError};
pub use function::Function;
pub use signature::{Callable, Signature};
pub use storage::{policy_of, Policy};
