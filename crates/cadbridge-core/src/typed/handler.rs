//! Handler side of typed operations.
//!
//! `OperationHandler<T>` is the typed surface; `TypedHandler<T, H>` erases
//! `T` so the handler can sit in the queue's string-keyed registry next to
//! plain closures.

use serde_json::{Map, Value};
use std::marker::PhantomData;

use super::operation::{HostOperation, decode_args};
use crate::error::BridgeError;
use crate::queue::TaskHandler;

pub trait OperationHandler<T: HostOperation>: Send + Sync {
    fn handle(&self, op: T) -> Result<Value, BridgeError>;
}

impl<T, F> OperationHandler<T> for F
where
    T: HostOperation,
    F: Fn(T) -> Result<Value, BridgeError> + Send + Sync,
{
    fn handle(&self, op: T) -> Result<Value, BridgeError> {
        self(op)
    }
}

pub struct TypedHandler<T: HostOperation, H: OperationHandler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: HostOperation, H: OperationHandler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }

    pub fn task_type(&self) -> &'static str {
        T::TYPE
    }
}

impl<T: HostOperation, H: OperationHandler<T>> TaskHandler for TypedHandler<T, H> {
    fn handle(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, BridgeError> {
        let op: T = decode_args(args, kwargs)?;
        self.handler.handle(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::operation::tests::MoveBody;
    use serde_json::json;

    #[test]
    fn typed_handler_decodes_before_calling() {
        let handler = TypedHandler::<MoveBody, _>::new(|op: MoveBody| -> Result<Value, BridgeError> {
            Ok(json!({"moved": op.dx + op.dy}))
        });
        assert_eq!(handler.task_type(), "move_body");

        let out = handler.handle(&[json!(1.0), json!(2.0)], &Map::new()).unwrap();
        assert_eq!(out["moved"], 3.0);
    }

    #[test]
    fn decode_failure_never_reaches_the_handler() {
        let handler = TypedHandler::<MoveBody, _>::new(|_: MoveBody| -> Result<Value, BridgeError> {
            panic!("must not be called")
        });
        assert!(handler.handle(&[json!("x")], &Map::new()).is_err());
    }
}
