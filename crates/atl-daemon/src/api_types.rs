//! Request and response types for the atl-daemon HTTP endpoints that are not
//! workflow inputs.
//!
//! Workflow inputs (`CreateCommande`, `ControlVerdict`, ...) and results
//! (`Receipt`, `CommandeDetail`) are serialized as-is from atl-workflow.

use atl_schemas::{ErrorKind, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `{ "error": { "kind": ..., "message": ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Command bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignControleurRequest {
    pub controleur_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub disponibilite: bool,
}

/// `token: null` clears the registered device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}
