//! Scheduled sweep over every order not yet delivered.
//!
//! Each order is handled in its own unit of work: a failure on one order is
//! logged and counted, and the sweep moves on. All writes are idempotent
//! (reminders are deduplicated, penalties apply once), so running the sweep
//! twice in a row produces nothing new.

use std::sync::Arc;

use atl_config::{SweepSettings, WorkshopConfig};
use atl_db::{Store, StoreResult, StoreTx};
use atl_penalty::{apply_delay_penalty, apply_non_conformite_penalty, days_until_due, PenaltyRates};
use atl_schemas::{Commande, CommandeStatus, Notification, NotificationKind};
use atl_workflow::{reminder_dedupe_key, reminder_message, Clock};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reminders: usize,
    pub delay_penalties: usize,
    pub non_conformite_penalties: usize,
    /// Orders whose unit of work failed; they are retried on the next run.
    pub failures: usize,
}

impl SweepReport {
    pub fn wrote_notifications(&self) -> bool {
        self.reminders + self.delay_penalties + self.non_conformite_penalties > 0
    }
}

#[derive(Default)]
struct OrderOutcome {
    reminder: bool,
    delay_penalty: bool,
    non_conformite_penalty: bool,
}

pub struct Sweep {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: SweepSettings,
    rates: PenaltyRates,
    tz: Tz,
    outbox_kick: Option<Arc<Notify>>,
}

impl Sweep {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: &WorkshopConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            clock,
            settings: config.sweep.clone(),
            rates: PenaltyRates::from(&config.penalty),
            tz: config.workshop.tz()?,
            outbox_kick: None,
        })
    }

    pub fn with_outbox_kick(mut self, kick: Arc<Notify>) -> Self {
        self.outbox_kick = Some(kick);
        self
    }

    /// One pass at the clock's current time.
    ///
    /// Only a failure to list the orders aborts the pass.
    pub async fn run_once(&self) -> StoreResult<SweepReport> {
        let now = self.clock.now();
        let today = now.with_timezone(&self.tz).date_naive();

        let ids: Vec<Uuid> = {
            let mut tx = self.store.begin().await?;
            tx.list_commandes_not_delivered()
                .await?
                .iter()
                .map(|c| c.id)
                .collect()
        };

        let mut report = SweepReport {
            scanned: ids.len(),
            ..SweepReport::default()
        };
        for id in ids {
            match self.sweep_one(id, today, now).await {
                Ok(outcome) => {
                    report.reminders += usize::from(outcome.reminder);
                    report.delay_penalties += usize::from(outcome.delay_penalty);
                    report.non_conformite_penalties += usize::from(outcome.non_conformite_penalty);
                }
                Err(e) => {
                    warn!(commande_id = %id, error = %e, "sweep failed for order");
                    report.failures += 1;
                }
            }
        }

        if report.wrote_notifications() {
            if let Some(kick) = &self.outbox_kick {
                kick.notify_one();
            }
        }
        info!(
            %today,
            scanned = report.scanned,
            reminders = report.reminders,
            delay_penalties = report.delay_penalties,
            non_conformite_penalties = report.non_conformite_penalties,
            failures = report.failures,
            "sweep pass"
        );
        Ok(report)
    }

    async fn sweep_one(
        &self,
        id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<OrderOutcome> {
        let mut tx = self.store.begin().await?;
        let mut outcome = OrderOutcome::default();
        // Re-read under the unit of work; the order may have moved since listing.
        let Some(commande) = tx.fetch_commande(id).await? else {
            return Ok(outcome);
        };
        if commande.status.is_delivered() {
            return Ok(outcome);
        }

        outcome.reminder = self.remind(tx.as_mut(), &commande, today, now).await?;

        if apply_delay_penalty(tx.as_mut(), &commande, &self.rates, today, now)
            .await?
            .is_some()
        {
            outcome.delay_penalty = true;
        } else if commande.status == CommandeStatus::NonConforme {
            outcome.non_conformite_penalty =
                apply_non_conformite_penalty(tx.as_mut(), &commande, &self.rates, now)
                    .await?
                    .is_some();
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn remind(
        &self,
        tx: &mut dyn StoreTx,
        commande: &Commande,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let days = days_until_due(commande.due_date, today);
        if !self.settings.reminder_days.contains(&days) {
            return Ok(false);
        }
        let Some(employe_id) = commande.assigned_to else {
            return Ok(false);
        };
        let inserted = tx
            .insert_notification(&Notification {
                id: Uuid::new_v4(),
                commande_id: commande.id,
                recipient_id: employe_id,
                kind: NotificationKind::RappelLivraison,
                message: reminder_message(commande.id, days),
                dedupe_key: Some(reminder_dedupe_key(commande.due_date, days)),
                scheduled_for: None,
                created_at: now,
            })
            .await?;
        if !inserted {
            debug!(commande_id = %commande.id, days, "reminder already exists");
        }
        Ok(inserted)
    }
}
