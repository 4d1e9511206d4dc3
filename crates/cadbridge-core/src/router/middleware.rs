use crate::domain::{HttpMethod, RequestData};
use crate::error::BridgeError;

/// Runs before validation and dispatch, in registration order.
///
/// - `Ok(Some(data))`: continue with (possibly rewritten) data
/// - `Ok(None)`: refuse the request (403)
/// - `Err(_)`: abort the request (500)
pub trait Middleware: Send + Sync {
    fn process(
        &self,
        path: &str,
        method: HttpMethod,
        data: RequestData,
    ) -> Result<Option<RequestData>, BridgeError>;
}

impl<F> Middleware for F
where
    F: Fn(&str, HttpMethod, RequestData) -> Result<Option<RequestData>, BridgeError> + Send + Sync,
{
    fn process(
        &self,
        path: &str,
        method: HttpMethod,
        data: RequestData,
    ) -> Result<Option<RequestData>, BridgeError> {
        self(path, method, data)
    }
}
