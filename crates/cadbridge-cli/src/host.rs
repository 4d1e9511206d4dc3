//! Simulated CAD host.
//!
//! Stands in for a real host API: the document may only be touched from the
//! main thread (by queued operations), and HTTP handlers read a snapshot the
//! main thread republishes after every change.

use cadbridge_core::error::BridgeError;
use cadbridge_core::typed::HostOperation;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    #[default]
    XY,
    XZ,
    YZ,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Box { width: f64, height: f64, depth: f64 },
    Cylinder { radius: f64, height: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Body {
    pub name: String,
    pub shape: Shape,
    pub origin: [f64; 3],
    pub plane: Plane,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub tool_id: String,
    pub description: String,
    pub diameter: f64,
    #[serde(default = "default_tool_kind")]
    pub kind: String,
}

fn default_tool_kind() -> String {
    "flat_end_mill".to_string()
}

/// Read-only view for HTTP handlers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentSnapshot {
    pub bodies: Vec<Body>,
    pub tools: Vec<Tool>,
    pub revision: u64,
}

pub type SharedSnapshot = Arc<RwLock<DocumentSnapshot>>;

/// Positional form: `width, height, depth, x, y, z, plane`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DrawBox {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub plane: Plane,
}

impl HostOperation for DrawBox {
    const TYPE: &'static str = "draw_box";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DrawCylinder {
    pub radius: f64,
    pub height: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub plane: Plane,
}

impl HostOperation for DrawCylinder {
    const TYPE: &'static str = "draw_cylinder";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateTool {
    pub tool_id: String,
    pub description: String,
    pub diameter: f64,
    #[serde(default = "default_tool_kind")]
    pub kind: String,
}

impl HostOperation for CreateTool {
    const TYPE: &'static str = "create_tool";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteTool {
    pub tool_id: String,
}

impl HostOperation for DeleteTool {
    const TYPE: &'static str = "delete_tool";
}

#[derive(Default)]
struct Document {
    bodies: Vec<Body>,
    tools: BTreeMap<String, Tool>,
    revision: u64,
}

/// The host document plus the snapshot it publishes.
#[derive(Clone)]
pub struct SimulatedHost {
    document: Arc<Mutex<Document>>,
    snapshot: SharedSnapshot,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            document: Arc::new(Mutex::new(Document::default())),
            snapshot: Arc::new(RwLock::new(DocumentSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn draw_box(&self, op: DrawBox) -> Result<Value, BridgeError> {
        if op.width <= 0.0 || op.height <= 0.0 || op.depth <= 0.0 {
            return Err(BridgeError::HostApi(format!(
                "box dimensions must be positive: {} x {} x {}",
                op.width, op.height, op.depth
            )));
        }
        let shape = Shape::Box {
            width: op.width,
            height: op.height,
            depth: op.depth,
        };
        Ok(self.add_body(shape, [op.x, op.y, op.z], op.plane))
    }

    pub fn draw_cylinder(&self, op: DrawCylinder) -> Result<Value, BridgeError> {
        if op.radius <= 0.0 || op.height <= 0.0 {
            return Err(BridgeError::HostApi(format!(
                "cylinder needs a positive radius and height, got r={} h={}",
                op.radius, op.height
            )));
        }
        let shape = Shape::Cylinder {
            radius: op.radius,
            height: op.height,
        };
        Ok(self.add_body(shape, [op.x, op.y, op.z], op.plane))
    }

    pub fn create_tool(&self, op: CreateTool) -> Result<Value, BridgeError> {
        let mut doc = self.document.lock();
        if doc.tools.contains_key(&op.tool_id) {
            return Err(BridgeError::HostApi(format!("tool '{}' already exists in the library", op.tool_id)));
        }
        let tool = Tool {
            tool_id: op.tool_id.clone(),
            description: op.description,
            diameter: op.diameter,
            kind: op.kind,
        };
        doc.tools.insert(op.tool_id.clone(), tool);
        self.publish(&mut doc);
        info!(tool_id = %op.tool_id, "tool created");
        Ok(json!({ "tool_id": op.tool_id }))
    }

    pub fn delete_tool(&self, op: DeleteTool) -> Result<Value, BridgeError> {
        let mut doc = self.document.lock();
        if doc.tools.remove(&op.tool_id).is_none() {
            return Err(BridgeError::HostApi(format!("tool '{}' is not in the library", op.tool_id)));
        }
        self.publish(&mut doc);
        info!(tool_id = %op.tool_id, "tool deleted");
        Ok(json!({ "deleted": op.tool_id }))
    }

    fn add_body(&self, shape: Shape, origin: [f64; 3], plane: Plane) -> Value {
        let mut doc = self.document.lock();
        let name = format!("Body{}", doc.bodies.len() + 1);
        doc.bodies.push(Body {
            name: name.clone(),
            shape,
            origin,
            plane,
        });
        self.publish(&mut doc);
        info!(body = %name, ?plane, "body created");
        json!({ "body": name })
    }

    fn publish(&self, doc: &mut Document) {
        doc.revision += 1;
        *self.snapshot.write() = DocumentSnapshot {
            bodies: doc.bodies.clone(),
            tools: doc.tools.values().cloned().collect(),
            revision: doc.revision,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadbridge_core::typed::decode_args;
    use serde_json::Map;

    #[test]
    fn draw_box_decodes_seven_positional_args() {
        let args = [json!(5), json!(5), json!(5), json!(0), json!(0), json!(0), json!("XY")];
        let op: DrawBox = decode_args(&args, &Map::new()).unwrap();
        assert_eq!(op.plane, Plane::XY);

        let host = SimulatedHost::new();
        assert_eq!(host.draw_box(op).unwrap()["body"], "Body1");
        let snap = host.snapshot();
        assert_eq!(snap.read().bodies.len(), 1);
        assert_eq!(snap.read().revision, 1);
    }

    #[test]
    fn host_rejects_degenerate_geometry() {
        let host = SimulatedHost::new();
        let op = DrawCylinder { radius: 0.0, height: 1.0, x: 0.0, y: 0.0, z: 0.0, plane: Plane::XZ };
        assert!(matches!(host.draw_cylinder(op), Err(BridgeError::HostApi(_))));
        assert_eq!(host.snapshot().read().revision, 0);
    }

    #[test]
    fn tool_library_round_trip() {
        let host = SimulatedHost::new();
        let create = CreateTool {
            tool_id: "T1".into(),
            description: "6mm flat".into(),
            diameter: 6.0,
            kind: default_tool_kind(),
        };
        host.create_tool(create.clone()).unwrap();
        assert!(host.create_tool(create).is_err());
        assert_eq!(host.snapshot().read().tools[0].tool_id, "T1");

        host.delete_tool(DeleteTool { tool_id: "T1".into() }).unwrap();
        assert!(host.snapshot().read().tools.is_empty());
        assert!(host.delete_tool(DeleteTool { tool_id: "T1".into() }).is_err());
    }
}
