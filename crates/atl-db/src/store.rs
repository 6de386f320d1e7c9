//! Entity Store boundary.
//!
//! All reads and writes go through a [`StoreTx`] unit of work obtained from
//! [`Store::begin`]. A unit of work is atomic: [`StoreTx::commit`] publishes
//! every write, dropping it without commit discards every write.
//!
//! The Postgres implementation row-locks the commande it fetches, so two
//! units of work touching the same order serialize. Status changes go through
//! a compare-and-set ([`StoreTx::update_commande_status`]); a `false` return
//! means another writer moved the order first.

use async_trait::async_trait;
use atl_schemas::{
    Amount, Client, Commande, CommandeStatus, Controle, ErrorKind, Fourniture, Mesure,
    Notification, NotificationKind, Paiement, Penalite, Remuneration, Role, Style, User,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Name of the unique constraint guarding style names.
pub const UQ_STYLES_NAME: &str = "uq_styles_name";

#[derive(Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write. Callers that upsert catch this
    /// and re-read the existing row.
    UniqueViolation { constraint: String },
    /// Anything else: connectivity, decoding, constraint checks.
    Backend(anyhow::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint: c } if c == constraint)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UniqueViolation { .. } => ErrorKind::Conflict,
            StoreError::Backend(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {constraint}")
            }
            StoreError::Backend(e) => write!(f, "store backend error: {e:#}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::UniqueViolation { .. } => None,
            StoreError::Backend(e) => Some(e.as_ref()),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Backend(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Outbox rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Claimed => "CLAIMED",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "CLAIMED" => Ok(OutboxStatus::Claimed),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(anyhow::anyhow!("invalid outbox status: {}", other)),
        }
    }
}

/// Delivery bookkeeping for one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub notification_id: Uuid,
    pub status: OutboxStatus,
    pub attempts: i32,
    /// Not claimable before this instant (scheduled reminders).
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Last delivery or processing error, kept for operators.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for one outbox claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pub limit: u32,
    pub dispatcher_id: &'a str,
    pub now: DateTime<Utc>,
    /// CLAIMED rows claimed before this instant are treated as abandoned.
    pub stale_before: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Factory for units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One atomic unit of work over the workshop entities.
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    // --- users -------------------------------------------------------------
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;
    async fn fetch_user(&mut self, id: Uuid) -> StoreResult<Option<User>>;
    async fn fetch_user_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<User>>;
    /// Ordered by `(created_at, id)`.
    async fn list_users_by_role(&mut self, role: Role) -> StoreResult<Vec<User>>;
    /// The available EMPLOYEE with the earliest `(created_at, id)`.
    async fn first_available_employee(&mut self) -> StoreResult<Option<User>>;
    async fn set_user_availability(&mut self, id: Uuid, disponibilite: bool) -> StoreResult<bool>;
    async fn set_user_role(&mut self, id: Uuid, role: Role) -> StoreResult<bool>;
    async fn set_push_token(&mut self, id: Uuid, token: Option<&str>) -> StoreResult<bool>;

    // --- clients & styles --------------------------------------------------
    async fn insert_client(&mut self, client: &Client) -> StoreResult<()>;
    async fn fetch_client(&mut self, id: Uuid) -> StoreResult<Option<Client>>;
    /// Fails with [`StoreError::UniqueViolation`] ([`UQ_STYLES_NAME`]) when
    /// the name is taken; the unit of work stays usable afterwards.
    async fn insert_style(&mut self, style: &Style) -> StoreResult<()>;
    async fn fetch_style(&mut self, id: Uuid) -> StoreResult<Option<Style>>;
    async fn fetch_style_by_name(&mut self, name: &str) -> StoreResult<Option<Style>>;
    /// Idempotent.
    async fn link_client_style(&mut self, client_id: Uuid, style_id: Uuid) -> StoreResult<()>;

    // --- commandes ---------------------------------------------------------
    async fn insert_commande(&mut self, commande: &Commande) -> StoreResult<()>;
    /// Reads and locks the order row for the rest of the unit of work.
    async fn fetch_commande(&mut self, id: Uuid) -> StoreResult<Option<Commande>>;
    /// Compare-and-set on `status`; stamps `updated_at` and
    /// `status_changed_at`. Returns `false` when the row was not in `from`.
    /// Entering RETARD records `from` as the late stage; any other move
    /// clears it.
    async fn update_commande_status(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Compare-and-set on the stage of a RETARD order; `status` stays.
    async fn update_late_stage(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Writes every mutable field except `status`, `status_changed_at` and
    /// `late_stage`.
    async fn update_commande_details(&mut self, commande: &Commande) -> StoreResult<bool>;
    /// Cascades to everything the order owns.
    async fn delete_commande(&mut self, id: Uuid) -> StoreResult<bool>;
    async fn list_commandes_not_delivered(&mut self) -> StoreResult<Vec<Commande>>;
    async fn list_commandes_by_status(
        &mut self,
        status: CommandeStatus,
    ) -> StoreResult<Vec<Commande>>;
    async fn list_commandes_assigned_to(&mut self, user_id: Uuid) -> StoreResult<Vec<Commande>>;
    /// Orders other than `excluding` in which `employee_id` is still working.
    async fn count_in_flight_for_employee(
        &mut self,
        employee_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<i64>;

    // --- notifications & outbox -------------------------------------------
    /// Persists the notification and its PENDING outbox row together.
    /// Returns `false` (and writes nothing) when `dedupe_key` already exists
    /// for that commande.
    async fn insert_notification(&mut self, notification: &Notification) -> StoreResult<bool>;
    /// Deletes notifications of `kind` for the order that are still PENDING
    /// and scheduled after `after`. Returns the number removed.
    async fn delete_pending_notifications(
        &mut self,
        commande_id: Uuid,
        kind: NotificationKind,
        after: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn fetch_notification(&mut self, id: Uuid) -> StoreResult<Option<Notification>>;
    /// Newest first.
    async fn list_notifications_for_user(
        &mut self,
        user_id: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Notification>>;
    /// Oldest first.
    async fn list_notifications_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Vec<Notification>>;
    async fn outbox_claim_batch(&mut self, req: &ClaimRequest<'_>) -> StoreResult<Vec<OutboxRow>>;
    async fn outbox_mark_sent(
        &mut self,
        notification_id: Uuid,
        at: DateTime<Utc>,
        delivery_error: Option<&str>,
    ) -> StoreResult<bool>;
    /// Returns a CLAIMED row to PENDING with `attempts + 1`, or to FAILED once
    /// `max_attempts` is reached. `None` when the row does not exist.
    async fn outbox_release(
        &mut self,
        notification_id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<Option<OutboxStatus>>;
    async fn outbox_fetch(&mut self, notification_id: Uuid) -> StoreResult<Option<OutboxRow>>;

    // --- money & quality ---------------------------------------------------
    async fn insert_paiement(&mut self, paiement: &Paiement) -> StoreResult<()>;
    async fn list_paiements(&mut self, commande_id: Uuid) -> StoreResult<Vec<Paiement>>;
    async fn insert_controle(&mut self, controle: &Controle) -> StoreResult<()>;
    /// Oldest first; the last element is the active verdict.
    async fn list_controles(&mut self, commande_id: Uuid) -> StoreResult<Vec<Controle>>;
    async fn insert_penalite(&mut self, penalite: &Penalite) -> StoreResult<()>;
    async fn list_penalites(&mut self, commande_id: Uuid) -> StoreResult<Vec<Penalite>>;
    async fn insert_remuneration(&mut self, remuneration: &Remuneration) -> StoreResult<()>;
    async fn fetch_remuneration_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Option<Remuneration>>;
    async fn update_remuneration_amount(
        &mut self,
        id: Uuid,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // --- production records -----------------------------------------------
    async fn insert_mesure(&mut self, mesure: &Mesure) -> StoreResult<()>;
    async fn list_mesures_for_commande(&mut self, commande_id: Uuid) -> StoreResult<Vec<Mesure>>;
    async fn insert_fourniture(&mut self, fourniture: &Fourniture) -> StoreResult<()>;
    async fn list_fournitures(&mut self, commande_id: Uuid) -> StoreResult<Vec<Fourniture>>;
}
