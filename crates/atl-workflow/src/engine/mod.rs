//! Order Workflow Engine.
//!
//! Every operation follows the same shape:
//! 1. role guards that need no data run before anything is opened;
//! 2. one unit of work: lock the order, check ownership and the state
//!    machine, compare-and-set the status, write records and notifications;
//! 3. commit, then wake the outbox worker.
//!
//! Any error before commit drops the unit of work, so nothing is written.
//! Delivery never happens here: notifications are persisted with the
//! business writes and delivered by the outbox dispatcher.

mod orders;
mod reads;
mod transitions;
mod users;

use std::sync::Arc;

use atl_config::{EmployeeRelease, WorkflowSettings, WorkshopConfig};
use atl_db::{Store, StoreResult, StoreTx};
use atl_penalty::PenaltyRates;
use atl_schemas::{Actor, Commande, CommandeStatus, Notification, NotificationKind, Role};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{WorkflowError, WorkflowResult};
use crate::reminders::{reminder_dedupe_key, reminder_message};
use crate::state_machine::{transition, CommandeEvent, Transition};
use crate::types::Receipt;

pub struct Workflow {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: WorkflowSettings,
    rates: PenaltyRates,
    tz: Tz,
    outbox_kick: Option<Arc<Notify>>,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: &WorkshopConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            clock,
            settings: config.workflow.clone(),
            rates: PenaltyRates::from(&config.penalty),
            tz: config.workshop.tz()?,
            outbox_kick: None,
        })
    }

    /// Woken after every commit that wrote notifications.
    pub fn with_outbox_kick(mut self, kick: Arc<Notify>) -> Self {
        self.outbox_kick = Some(kick);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Calendar day in the workshop timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    async fn begin(&self) -> WorkflowResult<Box<dyn StoreTx>> {
        Ok(self.store.begin().await?)
    }

    async fn finish(&self, tx: Box<dyn StoreTx>, receipt: &Receipt) -> WorkflowResult<()> {
        tx.commit().await?;
        if !receipt.notifications.is_empty() {
            if let Some(kick) = &self.outbox_kick {
                kick.notify_one();
            }
        }
        Ok(())
    }

    /// Compare-and-set the status (or the late stage of a RETARD order) for
    /// `event`. Returns the previous status when the status changed.
    async fn apply_event(
        &self,
        tx: &mut dyn StoreTx,
        commande: &mut Commande,
        event: CommandeEvent,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<CommandeStatus>> {
        match transition(commande.status, commande.late_stage, event)? {
            Transition::Unchanged => Ok(None),
            Transition::Status(to) => {
                let from = commande.status;
                if !tx.update_commande_status(commande.id, from, to, now).await? {
                    return Err(moved_concurrently(commande.id));
                }
                commande.status = to;
                commande.late_stage = None;
                commande.updated_at = now;
                commande.status_changed_at = now;
                Ok(Some(from))
            }
            Transition::LateStage(to) => {
                let from = commande.stage();
                if !tx.update_late_stage(commande.id, from, to, now).await? {
                    return Err(moved_concurrently(commande.id));
                }
                debug!(commande_id = %commande.id, %from, %to, "late order advanced");
                commande.late_stage = Some(to);
                commande.updated_at = now;
                Ok(None)
            }
        }
    }

    /// Give the employee their availability back when `trigger` is the
    /// configured policy and they hold no other in-flight order.
    async fn release_on(
        &self,
        tx: &mut dyn StoreTx,
        commande: &Commande,
        trigger: EmployeeRelease,
    ) -> StoreResult<bool> {
        if self.settings.employee_release != trigger {
            return Ok(false);
        }
        release_employee(tx, commande).await
    }

    /// Persist a RAPPEL_LIVRAISON per configured offset whose fire time is
    /// still ahead.
    async fn schedule_reminders(
        &self,
        tx: &mut dyn StoreTx,
        commande: &Commande,
        employee_id: Uuid,
        now: DateTime<Utc>,
        out: &mut Vec<Notification>,
    ) -> StoreResult<()> {
        for &days in &self.settings.reminder_offsets_days {
            let Some(day) = commande.due_date.checked_sub_signed(Duration::days(days)) else {
                continue;
            };
            let Some(local) = day.and_hms_opt(self.settings.reminder_hour, 0, 0) else {
                continue;
            };
            let Some(at) = self.tz.from_local_datetime(&local).earliest() else {
                continue;
            };
            let at = at.with_timezone(&Utc);
            if at <= now {
                continue;
            }
            let mut n = draft(
                commande.id,
                employee_id,
                NotificationKind::RappelLivraison,
                reminder_message(commande.id, days),
                now,
            );
            n.dedupe_key = Some(reminder_dedupe_key(commande.due_date, days));
            n.scheduled_for = Some(at);
            persist(tx, n, out).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the operation modules
// ---------------------------------------------------------------------------

pub(crate) fn require_admin(actor: &Actor, action: &'static str) -> WorkflowResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(action, "réservé aux administrateurs"))
    }
}

pub(crate) fn require_assigned_or_admin(
    actor: &Actor,
    commande: &Commande,
    action: &'static str,
) -> WorkflowResult<()> {
    if actor.is_admin() || (actor.role == Role::Employee && commande.is_assigned_to(actor.user_id))
    {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(
            action,
            "réservé à l'employé assigné ou à un administrateur",
        ))
    }
}

fn moved_concurrently(commande_id: Uuid) -> WorkflowError {
    WorkflowError::Conflict(format!(
        "La commande {commande_id} a été modifiée par une autre opération."
    ))
}

pub(crate) async fn locked(tx: &mut dyn StoreTx, id: Uuid) -> WorkflowResult<Commande> {
    tx.fetch_commande(id)
        .await?
        .ok_or(WorkflowError::not_found("commande", id))
}

pub(crate) fn draft(
    commande_id: Uuid,
    recipient_id: Uuid,
    kind: NotificationKind,
    message: String,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        commande_id,
        recipient_id,
        kind,
        message,
        dedupe_key: None,
        scheduled_for: None,
        created_at: now,
    }
}

/// Insert and record it in `out` unless its dedupe key was already used.
pub(crate) async fn persist(
    tx: &mut dyn StoreTx,
    n: Notification,
    out: &mut Vec<Notification>,
) -> StoreResult<()> {
    if tx.insert_notification(&n).await? {
        out.push(n);
    } else {
        debug!(commande_id = %n.commande_id, key = ?n.dedupe_key, "duplicate notification skipped");
    }
    Ok(())
}

/// The order's creator when still an admin, else the oldest admin.
pub(crate) async fn admin_recipient(
    tx: &mut dyn StoreTx,
    commande: &Commande,
) -> StoreResult<Option<Uuid>> {
    if let Some(u) = tx.fetch_user(commande.created_by).await? {
        if u.role == Role::Admin {
            return Ok(Some(u.id));
        }
    }
    Ok(tx
        .list_users_by_role(Role::Admin)
        .await?
        .into_iter()
        .next()
        .map(|u| u.id))
}

pub(crate) async fn release_employee(
    tx: &mut dyn StoreTx,
    commande: &Commande,
) -> StoreResult<bool> {
    let Some(employee) = commande.assigned_to else {
        return Ok(false);
    };
    if tx.count_in_flight_for_employee(employee, commande.id).await? > 0 {
        return Ok(false);
    }
    tx.set_user_availability(employee, true).await
}
