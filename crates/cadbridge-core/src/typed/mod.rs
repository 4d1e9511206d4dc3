//! Typed host operations layered over the string-keyed task registry.
//!
//! - Surface: `HostOperation` (type string + argument struct) and
//!   `OperationHandler<T>`
//! - Inside: `TypedHandler<T, H>` implements the untyped `TaskHandler`

pub mod handler;
pub mod operation;

pub use self::handler::{OperationHandler, TypedHandler};
pub use self::operation::{HostOperation, decode_args};

