//! CAD routes for the simulated host.
//!
//! Reads are answered from the published snapshot. Writes are validated,
//! queued for the main thread and acknowledged with 202.

use cadbridge_core::app::Bridge;
use cadbridge_core::domain::{ApiResponse, ErrorResponse, HttpMethod, Priority, RequestData, TaskRequest};
use cadbridge_core::error::BridgeError;
use cadbridge_core::queue::TaskQueue;
use cadbridge_core::router::{Middleware, ParamKind, ParamRule};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::host::SharedSnapshot;

/// Refuses writes until the host has finished starting up. Reads always pass.
pub struct HostReady {
    ready: Arc<AtomicBool>,
}

impl HostReady {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }
}

impl Middleware for HostReady {
    fn process(
        &self,
        _path: &str,
        method: HttpMethod,
        data: RequestData,
    ) -> Result<Option<RequestData>, BridgeError> {
        if method == HttpMethod::Get || self.ready.load(Ordering::Acquire) {
            Ok(Some(data))
        } else {
            Ok(None)
        }
    }
}

fn priority_rule() -> ParamRule {
    ParamRule::new("priority", ParamKind::String)
        .default_value(json!("NORMAL"))
        .one_of(["LOW", "NORMAL", "HIGH", "CRITICAL"].map(|p| json!(p)))
}

fn coordinate(name: &str) -> ParamRule {
    ParamRule::new(name, ParamKind::Number).default_value(json!(0.0))
}

fn plane_rule() -> ParamRule {
    ParamRule::new("plane", ParamKind::String)
        .default_value(json!("XY"))
        .one_of(["XY", "XZ", "YZ"].map(|p| json!(p)))
}

fn register_schemas(bridge: &Bridge) -> Result<(), BridgeError> {
    let validator = &bridge.validator;
    validator.register_method_schema(
        "/sketch/box",
        &[HttpMethod::Post],
        vec![
            ParamRule::new("width", ParamKind::Number).required().min(0.001),
            ParamRule::new("height", ParamKind::Number).required().min(0.001),
            ParamRule::new("depth", ParamKind::Number).required().min(0.001),
            coordinate("x"),
            coordinate("y"),
            coordinate("z"),
            plane_rule(),
            priority_rule(),
        ],
    )?;
    validator.register_method_schema(
        "/sketch/cylinder",
        &[HttpMethod::Post],
        vec![
            ParamRule::new("radius", ParamKind::Number).required().min(0.001),
            ParamRule::new("height", ParamKind::Number).required().min(0.001),
            coordinate("x"),
            coordinate("y"),
            coordinate("z"),
            plane_rule(),
            priority_rule(),
        ],
    )?;
    // GET /tools shares the path and must stay unvalidated.
    validator.register_method_schema(
        "/tools",
        &[HttpMethod::Post],
        vec![
            ParamRule::new("tool_id", ParamKind::String).required(),
            ParamRule::new("description", ParamKind::String).default_value(json!("")),
            ParamRule::new("diameter", ParamKind::Number).required().min(0.01).max(200.0),
            ParamRule::new("kind", ParamKind::String)
                .default_value(json!("flat_end_mill"))
                .one_of(["flat_end_mill", "ball_end_mill", "drill", "chamfer_mill"].map(|k| json!(k))),
            priority_rule(),
        ],
    )?;
    Ok(())
}

fn request_priority(data: &RequestData) -> Result<Priority, BridgeError> {
    match data.get("priority") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| BridgeError::validation("priority", e.to_string())),
        None => Ok(Priority::Normal),
    }
}

fn pick(data: &RequestData, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// Enqueue and acknowledge.
fn submit(queue: &TaskQueue, request: TaskRequest, task_type: &str) -> ApiResponse {
    let task_id = queue.enqueue(request);
    ApiResponse::queued(json!({
        "task_id": task_id,
        "task_type": task_type,
        "queue_size": queue.get_queue_size(),
    }))
}

pub fn register_cad_routes(bridge: &Bridge, snapshot: SharedSnapshot) -> Result<(), BridgeError> {
    register_schemas(bridge)?;
    let router = &bridge.router;

    let queue = Arc::clone(&bridge.queue);
    router.register_handler(
        "/sketch/box",
        move |data: RequestData| -> Result<ApiResponse, BridgeError> {
            let args = ["width", "height", "depth", "x", "y", "z", "plane"]
                .iter()
                .map(|k| data.get(*k).cloned().unwrap_or(Value::Null))
                .collect();
            let request = TaskRequest::new("draw_box")
                .args(args)
                .priority(request_priority(&data)?)
                .origin("POST /sketch/box");
            Ok(submit(&queue, request, "draw_box"))
        },
        &[HttpMethod::Post],
        "sketch",
        "sketch_ops",
    )?;

    let queue = Arc::clone(&bridge.queue);
    router.register_handler(
        "/sketch/cylinder",
        move |data: RequestData| -> Result<ApiResponse, BridgeError> {
            let request = TaskRequest::new("draw_cylinder")
                .kwargs(pick(&data, &["radius", "height", "x", "y", "z", "plane"]))
                .priority(request_priority(&data)?)
                .origin("POST /sketch/cylinder");
            Ok(submit(&queue, request, "draw_cylinder"))
        },
        &[HttpMethod::Post],
        "sketch",
        "sketch_ops",
    )?;

    let snap = Arc::clone(&snapshot);
    router.register_handler(
        "/document",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            Ok(ApiResponse::ok(serde_json::to_value(&*snap.read())?))
        },
        &[HttpMethod::Get],
        "document",
        "document_ops",
    )?;

    let snap = Arc::clone(&snapshot);
    router.register_handler(
        "/tools",
        move |_data: RequestData| -> Result<ApiResponse, BridgeError> {
            let tools = snap.read().tools.clone();
            Ok(ApiResponse::ok(json!({ "tools": tools, "count": tools.len() })))
        },
        &[HttpMethod::Get],
        "tools",
        "tool_ops",
    )?;

    let queue = Arc::clone(&bridge.queue);
    router.register_handler(
        "/tools",
        move |data: RequestData| -> Result<ApiResponse, BridgeError> {
            let request = TaskRequest::new("create_tool")
                .kwargs(pick(&data, &["tool_id", "description", "diameter", "kind"]))
                .priority(request_priority(&data)?)
                .origin("POST /tools");
            Ok(submit(&queue, request, "create_tool"))
        },
        &[HttpMethod::Post],
        "tools",
        "tool_ops",
    )?;

    let snap = Arc::clone(&snapshot);
    router.register_handler(
        "/tools/{tool_id}",
        move |data: RequestData| -> Result<ApiResponse, BridgeError> {
            let tool_id = data.get("tool_id").and_then(Value::as_str).unwrap_or_default();
            let found = snap.read().tools.iter().find(|t| t.tool_id == tool_id).cloned();
            match found {
                Some(tool) => Ok(ApiResponse::ok(serde_json::to_value(tool)?)),
                None => Ok(ErrorResponse::new(404, "TOOL_NOT_FOUND", format!("no tool '{tool_id}'"))
                    .with_suggestions(vec!["List available tools with GET /tools".to_string()])
                    .into()),
            }
        },
        &[HttpMethod::Get],
        "tools",
        "tool_ops",
    )?;

    let queue = Arc::clone(&bridge.queue);
    router.register_handler(
        "/tools/{tool_id}",
        move |data: RequestData| -> Result<ApiResponse, BridgeError> {
            let request = TaskRequest::new("delete_tool")
                .kwargs(pick(&data, &["tool_id"]))
                .priority(Priority::High)
                .origin("DELETE /tools/{tool_id}");
            Ok(submit(&queue, request, "delete_tool"))
        },
        &[HttpMethod::Delete],
        "tools",
        "tool_ops",
    )?;

    Ok(())
}
