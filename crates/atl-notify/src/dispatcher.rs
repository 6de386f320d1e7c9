//! Outbox dispatcher.
//!
//! One drain pass:
//! 1. claim due rows in their own unit of work (PENDING and available, or
//!    CLAIMED but stale) so a concurrent dispatcher skips them;
//! 2. load each notification and its recipient;
//! 3. publish on the recipient's realtime topic;
//! 4. send push messages for recipients with a valid token, in batches;
//! 5. mark every delivered row SENT, recording any swallowed failure.
//!
//! A row whose notification cannot be loaded is released with
//! `attempts + 1` and becomes FAILED at `max_attempts`.

use std::sync::Arc;

use atl_config::OutboxSettings;
use atl_db::{ClaimRequest, OutboxStatus, Store, StoreResult};
use atl_schemas::Notification;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::push::{is_expo_push_token, PushGateway, PushMessage};
use crate::realtime::{RealtimeChannel, RealtimeEvent};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub sent: usize,
    pub realtime_failures: usize,
    pub push_attempted: usize,
    pub push_failures: usize,
    pub released: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    realtime: Arc<dyn RealtimeChannel>,
    push: Arc<dyn PushGateway>,
    settings: OutboxSettings,
    dispatcher_id: String,
}

struct Loaded {
    notification: Notification,
    push_token: Option<String>,
    errors: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        realtime: Arc<dyn RealtimeChannel>,
        push: Arc<dyn PushGateway>,
        settings: OutboxSettings,
    ) -> Self {
        Self {
            store,
            realtime,
            push,
            settings,
            dispatcher_id: format!("dispatcher-{}", Uuid::new_v4()),
        }
    }

    pub fn with_dispatcher_id(mut self, id: impl Into<String>) -> Self {
        self.dispatcher_id = id.into();
        self
    }

    pub fn dispatcher_id(&self) -> &str {
        &self.dispatcher_id
    }

    /// Claim and deliver one batch. Store errors abort the pass; delivery
    /// errors never do.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> StoreResult<DrainReport> {
        let mut report = DrainReport::default();

        let claimed = {
            let mut tx = self.store.begin().await?;
            let rows = tx
                .outbox_claim_batch(&ClaimRequest {
                    limit: self.settings.batch_size,
                    dispatcher_id: &self.dispatcher_id,
                    now,
                    stale_before: now - Duration::seconds(self.settings.stale_claim_secs),
                })
                .await?;
            tx.commit().await?;
            rows
        };
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(report);
        }

        let mut loaded: Vec<Loaded> = Vec::with_capacity(claimed.len());
        for row in &claimed {
            match self.load(row.notification_id).await {
                Ok(Some(l)) => loaded.push(l),
                Ok(None) => {
                    self.release(row.notification_id, "notification not found", &mut report)
                        .await?;
                }
                Err(e) => {
                    warn!(notification_id = %row.notification_id, error = %e, "outbox load failed");
                    self.release(row.notification_id, &e.to_string(), &mut report)
                        .await?;
                }
            }
        }

        for l in loaded.iter_mut() {
            let n = &l.notification;
            if let Err(e) = self
                .realtime
                .publish(n.recipient_id, RealtimeEvent::NotificationNew(n.clone()))
            {
                warn!(
                    notification_id = %n.id,
                    recipient = %n.recipient_id,
                    kind = %e.kind(),
                    error = %e,
                    "realtime delivery failed"
                );
                report.realtime_failures += 1;
                l.errors.push(e.to_string());
            }
        }

        let push_targets: Vec<usize> = loaded
            .iter()
            .enumerate()
            .filter(|(_, l)| l.push_token.as_deref().is_some_and(is_expo_push_token))
            .map(|(i, _)| i)
            .collect();
        if !push_targets.is_empty() {
            let messages: Vec<PushMessage> = push_targets
                .iter()
                .map(|&i| push_message(&loaded[i]))
                .collect();
            report.push_attempted = messages.len();
            let results = self.push.send(&messages).await;
            for (&i, res) in push_targets.iter().zip(results) {
                if let Err(e) = res {
                    debug!(notification_id = %loaded[i].notification.id, kind = %e.kind(), "push not delivered");
                    report.push_failures += 1;
                    loaded[i].errors.push(e.to_string());
                }
            }
        }

        for l in &loaded {
            let err = (!l.errors.is_empty()).then(|| l.errors.join("; "));
            let mut tx = self.store.begin().await?;
            if tx
                .outbox_mark_sent(l.notification.id, now, err.as_deref())
                .await?
            {
                report.sent += 1;
            }
            tx.commit().await?;
        }

        info!(
            dispatcher = %self.dispatcher_id,
            claimed = report.claimed,
            sent = report.sent,
            released = report.released,
            failed = report.failed,
            push_failures = report.push_failures,
            "outbox drain pass"
        );
        Ok(report)
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<Loaded>> {
        let mut tx = self.store.begin().await?;
        let Some(notification) = tx.fetch_notification(id).await? else {
            return Ok(None);
        };
        let push_token = tx
            .fetch_user(notification.recipient_id)
            .await?
            .and_then(|u| u.push_token);
        Ok(Some(Loaded {
            notification,
            push_token,
            errors: Vec::new(),
        }))
    }

    async fn release(&self, id: Uuid, error: &str, report: &mut DrainReport) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        let status = tx
            .outbox_release(id, error, self.settings.max_attempts)
            .await?;
        tx.commit().await?;
        match status {
            Some(OutboxStatus::Failed) => {
                warn!(notification_id = %id, error, "outbox row failed permanently");
                report.failed += 1;
            }
            Some(_) => {
                debug!(notification_id = %id, error, "outbox row released for retry");
                report.released += 1;
            }
            None => {}
        }
        Ok(())
    }
}

fn push_message(l: &Loaded) -> PushMessage {
    let n = &l.notification;
    PushMessage {
        to: l.push_token.clone().unwrap_or_default(),
        title: n.kind.push_title().to_string(),
        body: n.message.clone(),
        data: serde_json::json!({
            "commandeId": n.commande_id,
            "notificationId": n.id,
            "type": n.kind.as_str(),
        }),
    }
}
