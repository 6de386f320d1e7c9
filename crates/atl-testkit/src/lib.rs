//! Shared fixtures for the workshop scenario tests.
//!
//! A [`Workshop`] is a MemStore-backed engine with a settable clock and one
//! staff member per role. [`RecordingPush`] and [`RecordingRealtime`] stand
//! in for the delivery channels and keep what they were given.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use atl_config::WorkshopConfig;
use atl_db::{MemStore, Store};
use atl_notify::{DeliveryError, PushGateway, PushMessage, RealtimeChannel, RealtimeEvent};
use atl_schemas::{
    Actor, Amount, CommandeStatus, Gender, NewClient, Notification, PaymentMode, Role, User,
};
use atl_workflow::{ClientRef, CreateCommande, FixedClock, StyleRef, Workflow};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

/// 2025-06-02 09:00 UTC, a Monday.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn staff(role: Role, first_name: &str) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: None,
        email: format!("{}.{}@atelier.test", first_name.to_lowercase(), Uuid::new_v4()),
        first_name: first_name.to_string(),
        last_name: "Ndiaye".to_string(),
        role,
        disponibilite: true,
        push_token: None,
        created_at: t0() - Duration::days(60),
    }
}

pub struct Workshop {
    pub store: Arc<MemStore>,
    pub clock: Arc<FixedClock>,
    pub config: WorkshopConfig,
    pub workflow: Workflow,
    pub admin: Actor,
    pub employee: Actor,
    pub controleur: Actor,
}

impl Workshop {
    pub async fn new() -> Result<Self> {
        Self::with_config(WorkshopConfig::default()).await
    }

    pub async fn with_config(config: WorkshopConfig) -> Result<Self> {
        let store = Arc::new(MemStore::new());
        let clock = Arc::new(FixedClock::new(t0()));

        let admin = staff(Role::Admin, "Awa");
        let employee = staff(Role::Employee, "Cheikh");
        let controleur = staff(Role::Controlleur, "Binta");
        let mut tx = store.begin().await?;
        for u in [&admin, &employee, &controleur] {
            tx.insert_user(u).await?;
        }
        tx.commit().await?;

        let workflow = Workflow::new(store.clone(), clock.clone(), &config)
            .context("workflow from config")?;
        Ok(Self {
            store,
            clock,
            config,
            workflow,
            admin: admin.actor(),
            employee: employee.actor(),
            controleur: controleur.actor(),
        })
    }

    /// Adds another staff member and returns their actor.
    pub async fn hire(&self, role: Role, first_name: &str) -> Result<Actor> {
        let user = staff(role, first_name);
        let mut tx = self.store.begin().await?;
        tx.insert_user(&user).await?;
        tx.commit().await?;
        Ok(user.actor())
    }

    pub fn today(&self) -> NaiveDate {
        self.workflow.local_date(self.workflow.now())
    }

    pub fn due_in(&self, days: i64) -> NaiveDate {
        self.today() + Duration::days(days)
    }

    pub async fn status_of(&self, commande_id: Uuid) -> Result<CommandeStatus> {
        let mut tx = self.store.begin().await?;
        let c = tx
            .fetch_commande(commande_id)
            .await?
            .context("commande vanished")?;
        Ok(c.status)
    }

    pub async fn user(&self, user_id: Uuid) -> Result<User> {
        let mut tx = self.store.begin().await?;
        tx.fetch_user(user_id).await?.context("user vanished")
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_notifications_for_user(user_id, 500).await?)
    }
}

/// A new-client order with a named style.
pub fn create_request(price: Amount, advance: Amount, due_date: NaiveDate) -> CreateCommande {
    CreateCommande {
        client: ClientRef::New(NewClient {
            first_name: "Aminata".to_string(),
            last_name: "Ba".to_string(),
            telephone: "+221770001122".to_string(),
            adresse: Some("Médina, Dakar".to_string()),
            gender: Gender::F,
            image_url: None,
        }),
        style: StyleRef::Named("Grand boubou".to_string()),
        due_date,
        price,
        advance,
        payment_mode: PaymentMode::Especes,
        description: Some("Bazin riche, broderie dorée".to_string()),
        audio_url: None,
        images: vec![],
    }
}

// ---------------------------------------------------------------------------
// Recording delivery channels
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
    fail_all: Mutex<bool>,
}

impl RecordingPush {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_all: Mutex::new(true),
        }
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn send(&self, messages: &[PushMessage]) -> Vec<Result<(), DeliveryError>> {
        let fail = self.fail_all.lock().map(|g| *g).unwrap_or(false);
        if let Ok(mut g) = self.sent.lock() {
            g.extend(messages.iter().cloned());
        }
        messages
            .iter()
            .map(|_| {
                if fail {
                    Err(DeliveryError::PushTransport {
                        status: Some(503),
                        message: "unavailable".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
            .collect()
    }
}

#[derive(Default)]
pub struct RecordingRealtime {
    published: Mutex<Vec<(Uuid, RealtimeEvent)>>,
}

impl RecordingRealtime {
    pub fn published(&self) -> Vec<(Uuid, RealtimeEvent)> {
        self.published.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Notifications published to `user_id`, in order.
    pub fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.published()
            .into_iter()
            .filter(|(to, _)| *to == user_id)
            .filter_map(|(_, e)| match e {
                RealtimeEvent::NotificationNew(n) => Some(n),
                RealtimeEvent::Heartbeat { .. } => None,
            })
            .collect()
    }
}

impl RealtimeChannel for RecordingRealtime {
    fn publish(&self, user_id: Uuid, event: RealtimeEvent) -> Result<usize, DeliveryError> {
        if let Ok(mut g) = self.published.lock() {
            g.push((user_id, event));
        }
        Ok(1)
    }
}
