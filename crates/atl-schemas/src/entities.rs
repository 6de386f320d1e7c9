use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{
    CommandeStatus, Gender, ImageKind, NotificationKind, PaymentMode, PaymentStatus,
    PenaliteKind, RemunerationStatus, Role,
};
use crate::money::Amount;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The authenticated caller of a workflow operation.
///
/// Identity is resolved upstream; every operation receives it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Subject id at the identity provider, when synced from it.
    pub external_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    /// Availability flag consulted when assigning new orders.
    pub disponibilite: bool,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Expo device token shape: `ExponentPushToken[...]` or `ExpoPushToken[...]`.
pub fn is_expo_push_token(token: &str) -> bool {
    let t = token.trim();
    (t.starts_with("ExponentPushToken[") || t.starts_with("ExpoPushToken[")) && t.ends_with(']')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub telephone: String,
    pub adresse: Option<String>,
    pub gender: Gender,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Client payload for first-or-create at order creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClient {
    pub first_name: String,
    pub last_name: String,
    pub telephone: String,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default = "default_gender")]
    pub gender: Gender,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn default_gender() -> Gender {
    Gender::M
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: Uuid,
    /// Unique model name.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Commande
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandeImage {
    pub url: String,
    pub kind: ImageKind,
}

/// The order aggregate. `status` only changes through the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commande {
    pub id: Uuid,
    pub status: CommandeStatus,
    pub price: Amount,
    /// Advance payment; never exceeds `price`.
    pub advance: Amount,
    pub due_date: NaiveDate,
    pub description: Option<String>,
    pub audio_url: Option<String>,
    pub images: Vec<CommandeImage>,
    pub client_id: Uuid,
    pub style_id: Uuid,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub controleur_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When `status` last changed. Drives the non-conformity SLA.
    pub status_changed_at: DateTime<Utc>,
    /// Workflow stage reached while RETARD. Set when the order goes late,
    /// advanced by the events applied to it, cleared on delivery.
    #[serde(default)]
    pub late_stage: Option<CommandeStatus>,
}

impl Commande {
    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.assigned_to == Some(user_id)
    }

    /// The stage workflow events apply to: `late_stage` while RETARD.
    pub fn stage(&self) -> CommandeStatus {
        match (self.status, self.late_stage) {
            (CommandeStatus::Retard, Some(stage)) => stage,
            (status, _) => status,
        }
    }

    /// Whether the assigned employee is still working on this order.
    pub fn holds_employee(&self) -> bool {
        self.stage().holds_employee()
    }
}

// ---------------------------------------------------------------------------
// Records owned by a commande
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    /// At most one notification per (commande, key) when set.
    pub dedupe_key: Option<String>,
    /// Deferred delivery time for scheduled reminders.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paiement {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub client_id: Uuid,
    pub amount: Amount,
    pub mode: PaymentMode,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// A quality-control verdict. Append-only; the latest one is the active verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controle {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub controleur_id: Uuid,
    pub conforme: bool,
    pub remarques: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only penalty charged against an employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalite {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub employe_id: Uuid,
    pub kind: PenaliteKind,
    pub amount: Amount,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remuneration {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub employe_id: Uuid,
    pub amount: Amount,
    pub status: RemunerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesureValeur {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesure {
    pub id: Uuid,
    pub client_id: Uuid,
    pub commande_id: Option<Uuid>,
    pub label: Option<String>,
    pub valeurs: Vec<MesureValeur>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Supply line item consumed by an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fourniture {
    pub id: Uuid,
    pub commande_id: Uuid,
    pub designation: String,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}
