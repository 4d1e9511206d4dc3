//! Typed host operations.
//!
//! A `HostOperation` ties a task type string to a Rust struct its arguments
//! decode into, so handlers never pick values out of a `Value` by hand.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// # Example
/// ```ignore
/// #[derive(Deserialize)]
/// struct DrawCircle {
///     radius: f64,
///     #[serde(default)]
///     plane: Plane,
/// }
///
/// impl HostOperation for DrawCircle {
///     const TYPE: &'static str = "draw_circle";
/// }
/// ```
pub trait HostOperation: DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// Decode captured task arguments into `T`.
///
/// Positional arguments map onto fields in declaration order (serde accepts a
/// sequence for any derived struct); keyword arguments map by name. A task
/// carrying both is rejected.
pub fn decode_args<T: HostOperation>(
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<T, BridgeError> {
    let value = match (args.is_empty(), kwargs.is_empty()) {
        (false, false) => {
            return Err(BridgeError::validation(
                T::TYPE,
                "typed operations take positional or keyword arguments, not both",
            ));
        }
        (false, true) => Value::Array(args.to_vec()),
        (true, _) => Value::Object(kwargs.clone()),
    };
    serde_json::from_value(value)
        .map_err(|e| BridgeError::validation(T::TYPE, format!("cannot decode arguments: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub(crate) struct MoveBody {
        pub dx: f64,
        pub dy: f64,
        #[serde(default)]
        pub body: Option<String>,
    }

    impl HostOperation for MoveBody {
        const TYPE: &'static str = "move_body";
    }

    #[test]
    fn positional_args_fill_fields_in_order() {
        let op: MoveBody = decode_args(&[json!(1.0), json!(2.5)], &Map::new()).unwrap();
        assert_eq!(op, MoveBody { dx: 1.0, dy: 2.5, body: None });
    }

    #[test]
    fn keyword_args_fill_fields_by_name() {
        let kwargs = json!({"dy": 3.0, "dx": 4.0, "body": "Body1"});
        let op: MoveBody = decode_args(&[], kwargs.as_object().unwrap()).unwrap();
        assert_eq!(op.body.as_deref(), Some("Body1"));
        assert_eq!(op.dx, 4.0);
    }

    #[test]
    fn mixed_or_bad_args_are_validation_errors() {
        let kwargs = json!({"dx": 1.0});
        let err = decode_args::<MoveBody>(&[json!(1.0)], kwargs.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));

        let err = decode_args::<MoveBody>(&[json!("left")], &Map::new()).unwrap_err();
        assert!(err.to_string().contains("move_body"));
    }
}
