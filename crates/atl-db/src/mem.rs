//! In-memory store for tests.
//!
//! A unit of work takes the single state lock for its whole lifetime and
//! mutates a private copy; `commit` writes the copy back. Units of work are
//! therefore fully serialized, and dropping one discards its writes.
//!
//! [`MemStore::fail_on`] arms a [`FailPoint`] that makes the matching
//! operation return a backend error until [`MemStore::clear_faults`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use atl_schemas::{
    Amount, Client, Commande, CommandeStatus, Controle, Fourniture, Mesure, Notification,
    NotificationKind, Paiement, Penalite, Remuneration, Role, Style, User,
};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::store::{
    ClaimRequest, OutboxRow, OutboxStatus, Store, StoreError, StoreResult, StoreTx,
    UQ_STYLES_NAME,
};

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertCommande,
    InsertPaiement,
    InsertNotification,
    InsertPenalite,
    InsertRemuneration,
    UpdateCommandeStatus,
    FetchNotification,
    Commit,
    /// `insert_style` behaves as if another writer committed the same name
    /// first: the competing row appears and the insert reports a unique
    /// violation.
    ConcurrentStyleInsert,
}

/// Row counts per table, for atomicity assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemCounts {
    pub users: usize,
    pub clients: usize,
    pub styles: usize,
    pub commandes: usize,
    pub notifications: usize,
    pub outbox: usize,
    pub paiements: usize,
    pub controles: usize,
    pub penalites: usize,
    pub remunerations: usize,
    pub mesures: usize,
    pub fournitures: usize,
}

#[derive(Debug, Clone, Default)]
struct MemState {
    users: BTreeMap<Uuid, User>,
    clients: BTreeMap<Uuid, Client>,
    styles: BTreeMap<Uuid, Style>,
    client_styles: BTreeSet<(Uuid, Uuid)>,
    commandes: BTreeMap<Uuid, Commande>,
    notifications: BTreeMap<Uuid, Notification>,
    outbox: BTreeMap<Uuid, OutboxRow>,
    paiements: Vec<Paiement>,
    controles: Vec<Controle>,
    penalites: Vec<Penalite>,
    remunerations: BTreeMap<Uuid, Remuneration>,
    mesures: Vec<Mesure>,
    fournitures: Vec<Fourniture>,
}

impl MemState {
    fn counts(&self) -> MemCounts {
        MemCounts {
            users: self.users.len(),
            clients: self.clients.len(),
            styles: self.styles.len(),
            commandes: self.commandes.len(),
            notifications: self.notifications.len(),
            outbox: self.outbox.len(),
            paiements: self.paiements.len(),
            controles: self.controles.len(),
            penalites: self.penalites.len(),
            remunerations: self.remunerations.len(),
            mesures: self.mesures.len(),
            fournitures: self.fournitures.len(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<AsyncMutex<MemState>>,
    faults: Arc<Mutex<HashSet<FailPoint>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, point: FailPoint) {
        if let Ok(mut f) = self.faults.lock() {
            f.insert(point);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut f) = self.faults.lock() {
            f.clear();
        }
    }

    /// Committed row counts. Waits for any open unit of work to finish.
    pub async fn counts(&self) -> MemCounts {
        self.state.lock().await.counts()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemTx {
            guard,
            work,
            faults: self.faults.clone(),
        }))
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
    faults: Arc<Mutex<HashSet<FailPoint>>>,
}

impl MemTx {
    fn armed(&self, point: FailPoint) -> StoreResult<bool> {
        let f = self
            .faults
            .lock()
            .map_err(|_| anyhow!("fault registry poisoned"))?;
        Ok(f.contains(&point))
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.armed(point)? {
            return Err(StoreError::Backend(anyhow!("injected failure: {point:?}")));
        }
        Ok(())
    }
}

fn sorted_by_creation<T, K: Ord>(mut v: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    v.sort_by_key(|x| key(x));
    v
}

#[async_trait]
impl StoreTx for MemTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check(FailPoint::Commit)?;
        let MemTx {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }

    // --- users -------------------------------------------------------------

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        let dup_email = self.work.users.values().any(|u| u.email == user.email);
        let dup_external = user.external_id.is_some()
            && self
                .work
                .users
                .values()
                .any(|u| u.external_id == user.external_id);
        if dup_email {
            return Err(StoreError::UniqueViolation {
                constraint: "users_email_key".to_string(),
            });
        }
        if dup_external {
            return Err(StoreError::UniqueViolation {
                constraint: "users_external_id_key".to_string(),
            });
        }
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn fetch_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn fetch_user_by_external_id(&mut self, external_id: &str) -> StoreResult<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_users_by_role(&mut self, role: Role) -> StoreResult<Vec<User>> {
        let v = self
            .work
            .users
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |u: &User| (u.created_at, u.id)))
    }

    async fn first_available_employee(&mut self) -> StoreResult<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .filter(|u| u.role == Role::Employee && u.disponibilite)
            .min_by_key(|u| (u.created_at, u.id))
            .cloned())
    }

    async fn set_user_availability(&mut self, id: Uuid, disponibilite: bool) -> StoreResult<bool> {
        Ok(match self.work.users.get_mut(&id) {
            Some(u) => {
                u.disponibilite = disponibilite;
                true
            }
            None => false,
        })
    }

    async fn set_user_role(&mut self, id: Uuid, role: Role) -> StoreResult<bool> {
        Ok(match self.work.users.get_mut(&id) {
            Some(u) => {
                u.role = role;
                true
            }
            None => false,
        })
    }

    async fn set_push_token(&mut self, id: Uuid, token: Option<&str>) -> StoreResult<bool> {
        Ok(match self.work.users.get_mut(&id) {
            Some(u) => {
                u.push_token = token.map(str::to_string);
                true
            }
            None => false,
        })
    }

    // --- clients & styles --------------------------------------------------

    async fn insert_client(&mut self, client: &Client) -> StoreResult<()> {
        self.work.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn fetch_client(&mut self, id: Uuid) -> StoreResult<Option<Client>> {
        Ok(self.work.clients.get(&id).cloned())
    }

    async fn insert_style(&mut self, style: &Style) -> StoreResult<()> {
        if self.armed(FailPoint::ConcurrentStyleInsert)? {
            let competitor = Style {
                id: Uuid::new_v4(),
                name: style.name.clone(),
                created_at: style.created_at,
            };
            self.work.styles.insert(competitor.id, competitor);
        }
        if self.work.styles.values().any(|s| s.name == style.name) {
            return Err(StoreError::UniqueViolation {
                constraint: UQ_STYLES_NAME.to_string(),
            });
        }
        self.work.styles.insert(style.id, style.clone());
        Ok(())
    }

    async fn fetch_style(&mut self, id: Uuid) -> StoreResult<Option<Style>> {
        Ok(self.work.styles.get(&id).cloned())
    }

    async fn fetch_style_by_name(&mut self, name: &str) -> StoreResult<Option<Style>> {
        Ok(self.work.styles.values().find(|s| s.name == name).cloned())
    }

    async fn link_client_style(&mut self, client_id: Uuid, style_id: Uuid) -> StoreResult<()> {
        self.work.client_styles.insert((client_id, style_id));
        Ok(())
    }

    // --- commandes ---------------------------------------------------------

    async fn insert_commande(&mut self, commande: &Commande) -> StoreResult<()> {
        self.check(FailPoint::InsertCommande)?;
        if commande.advance > commande.price {
            return Err(StoreError::Backend(anyhow!(
                "check constraint ck_commandes_advance_le_price violated"
            )));
        }
        self.work.commandes.insert(commande.id, commande.clone());
        Ok(())
    }

    async fn fetch_commande(&mut self, id: Uuid) -> StoreResult<Option<Commande>> {
        Ok(self.work.commandes.get(&id).cloned())
    }

    async fn update_commande_status(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check(FailPoint::UpdateCommandeStatus)?;
        Ok(match self.work.commandes.get_mut(&id) {
            Some(c) if c.status == from => {
                c.status = to;
                c.late_stage = (to == CommandeStatus::Retard).then_some(from);
                c.updated_at = at;
                c.status_changed_at = at;
                true
            }
            _ => false,
        })
    }

    async fn update_late_stage(
        &mut self,
        id: Uuid,
        from: CommandeStatus,
        to: CommandeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check(FailPoint::UpdateCommandeStatus)?;
        Ok(match self.work.commandes.get_mut(&id) {
            Some(c) if c.status == CommandeStatus::Retard && c.late_stage == Some(from) => {
                c.late_stage = Some(to);
                c.updated_at = at;
                true
            }
            _ => false,
        })
    }

    async fn update_commande_details(&mut self, commande: &Commande) -> StoreResult<bool> {
        if commande.advance > commande.price {
            return Err(StoreError::Backend(anyhow!(
                "check constraint ck_commandes_advance_le_price violated"
            )));
        }
        Ok(match self.work.commandes.get_mut(&commande.id) {
            Some(c) => {
                let status = c.status;
                let status_changed_at = c.status_changed_at;
                let late_stage = c.late_stage;
                *c = commande.clone();
                c.status = status;
                c.status_changed_at = status_changed_at;
                c.late_stage = late_stage;
                true
            }
            None => false,
        })
    }

    async fn delete_commande(&mut self, id: Uuid) -> StoreResult<bool> {
        if self.work.commandes.remove(&id).is_none() {
            return Ok(false);
        }
        let w = &mut self.work;
        let dropped: Vec<Uuid> = w
            .notifications
            .values()
            .filter(|n| n.commande_id == id)
            .map(|n| n.id)
            .collect();
        for nid in dropped {
            w.notifications.remove(&nid);
            w.outbox.remove(&nid);
        }
        w.paiements.retain(|p| p.commande_id != id);
        w.controles.retain(|c| c.commande_id != id);
        w.penalites.retain(|p| p.commande_id != id);
        w.remunerations.retain(|_, r| r.commande_id != id);
        w.fournitures.retain(|f| f.commande_id != id);
        for m in w.mesures.iter_mut() {
            if m.commande_id == Some(id) {
                m.commande_id = None;
            }
        }
        Ok(true)
    }

    async fn list_commandes_not_delivered(&mut self) -> StoreResult<Vec<Commande>> {
        let v = self
            .work
            .commandes
            .values()
            .filter(|c| !c.status.is_delivered())
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |c: &Commande| (c.created_at, c.id)))
    }

    async fn list_commandes_by_status(
        &mut self,
        status: CommandeStatus,
    ) -> StoreResult<Vec<Commande>> {
        let v = self
            .work
            .commandes
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |c: &Commande| (c.created_at, c.id)))
    }

    async fn list_commandes_assigned_to(&mut self, user_id: Uuid) -> StoreResult<Vec<Commande>> {
        let v = self
            .work
            .commandes
            .values()
            .filter(|c| c.assigned_to == Some(user_id) || c.controleur_id == Some(user_id))
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |c: &Commande| (c.created_at, c.id)))
    }

    async fn count_in_flight_for_employee(
        &mut self,
        employee_id: Uuid,
        excluding: Uuid,
    ) -> StoreResult<i64> {
        let n = self
            .work
            .commandes
            .values()
            .filter(|c| {
                c.id != excluding
                    && c.assigned_to == Some(employee_id)
                    && c.holds_employee()
            })
            .count();
        Ok(n as i64)
    }

    // --- notifications & outbox -------------------------------------------

    async fn insert_notification(&mut self, n: &Notification) -> StoreResult<bool> {
        self.check(FailPoint::InsertNotification)?;
        if let Some(key) = n.dedupe_key.as_deref() {
            let taken = self
                .work
                .notifications
                .values()
                .any(|x| x.commande_id == n.commande_id && x.dedupe_key.as_deref() == Some(key));
            if taken {
                return Ok(false);
            }
        }
        self.work.notifications.insert(n.id, n.clone());
        self.work.outbox.insert(
            n.id,
            OutboxRow {
                notification_id: n.id,
                status: OutboxStatus::Pending,
                attempts: 0,
                available_at: n.scheduled_for.unwrap_or(n.created_at),
                claimed_by: None,
                claimed_at: None,
                sent_at: None,
                last_error: None,
                created_at: n.created_at,
            },
        );
        Ok(true)
    }

    async fn delete_pending_notifications(
        &mut self,
        commande_id: Uuid,
        kind: NotificationKind,
        after: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let w = &mut self.work;
        let doomed: Vec<Uuid> = w
            .notifications
            .values()
            .filter(|n| n.commande_id == commande_id && n.kind == kind)
            .filter(|n| {
                w.outbox.get(&n.id).is_some_and(|o| {
                    o.status == OutboxStatus::Pending && o.available_at > after
                })
            })
            .map(|n| n.id)
            .collect();
        for id in &doomed {
            w.notifications.remove(id);
            w.outbox.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn fetch_notification(&mut self, id: Uuid) -> StoreResult<Option<Notification>> {
        self.check(FailPoint::FetchNotification)?;
        Ok(self.work.notifications.get(&id).cloned())
    }

    async fn list_notifications_for_user(
        &mut self,
        user_id: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Notification>> {
        let mut v: Vec<Notification> = self
            .work
            .notifications
            .values()
            .filter(|n| n.recipient_id == user_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        v.truncate(limit as usize);
        Ok(v)
    }

    async fn list_notifications_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Vec<Notification>> {
        let v = self
            .work
            .notifications
            .values()
            .filter(|n| n.commande_id == commande_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |n: &Notification| (n.created_at, n.id)))
    }

    async fn outbox_claim_batch(&mut self, req: &ClaimRequest<'_>) -> StoreResult<Vec<OutboxRow>> {
        let mut ids: Vec<(DateTime<Utc>, Uuid)> = self
            .work
            .outbox
            .values()
            .filter(|o| match o.status {
                OutboxStatus::Pending => o.available_at <= req.now,
                OutboxStatus::Claimed => o.claimed_at.is_some_and(|t| t < req.stale_before),
                OutboxStatus::Sent | OutboxStatus::Failed => false,
            })
            .map(|o| (o.available_at, o.notification_id))
            .collect();
        ids.sort();
        ids.truncate(req.limit as usize);

        let mut claimed = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(o) = self.work.outbox.get_mut(&id) {
                o.status = OutboxStatus::Claimed;
                o.claimed_by = Some(req.dispatcher_id.to_string());
                o.claimed_at = Some(req.now);
                claimed.push(o.clone());
            }
        }
        Ok(claimed)
    }

    async fn outbox_mark_sent(
        &mut self,
        notification_id: Uuid,
        at: DateTime<Utc>,
        delivery_error: Option<&str>,
    ) -> StoreResult<bool> {
        Ok(match self.work.outbox.get_mut(&notification_id) {
            Some(o) if o.status == OutboxStatus::Claimed => {
                o.status = OutboxStatus::Sent;
                o.sent_at = Some(at);
                o.last_error = delivery_error.map(str::to_string);
                true
            }
            _ => false,
        })
    }

    async fn outbox_release(
        &mut self,
        notification_id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<Option<OutboxStatus>> {
        Ok(self.work.outbox.get_mut(&notification_id).map(|o| {
            o.attempts += 1;
            o.status = if i64::from(o.attempts) >= i64::from(max_attempts) {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            o.last_error = Some(error.to_string());
            o.claimed_by = None;
            o.claimed_at = None;
            o.status
        }))
    }

    async fn outbox_fetch(&mut self, notification_id: Uuid) -> StoreResult<Option<OutboxRow>> {
        Ok(self.work.outbox.get(&notification_id).cloned())
    }

    // --- money & quality ---------------------------------------------------

    async fn insert_paiement(&mut self, paiement: &Paiement) -> StoreResult<()> {
        self.check(FailPoint::InsertPaiement)?;
        self.work.paiements.push(paiement.clone());
        Ok(())
    }

    async fn list_paiements(&mut self, commande_id: Uuid) -> StoreResult<Vec<Paiement>> {
        let v = self
            .work
            .paiements
            .iter()
            .filter(|p| p.commande_id == commande_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |p: &Paiement| p.created_at))
    }

    async fn insert_controle(&mut self, controle: &Controle) -> StoreResult<()> {
        self.work.controles.push(controle.clone());
        Ok(())
    }

    async fn list_controles(&mut self, commande_id: Uuid) -> StoreResult<Vec<Controle>> {
        let v = self
            .work
            .controles
            .iter()
            .filter(|c| c.commande_id == commande_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |c: &Controle| c.created_at))
    }

    async fn insert_penalite(&mut self, penalite: &Penalite) -> StoreResult<()> {
        self.check(FailPoint::InsertPenalite)?;
        self.work.penalites.push(penalite.clone());
        Ok(())
    }

    async fn list_penalites(&mut self, commande_id: Uuid) -> StoreResult<Vec<Penalite>> {
        let v = self
            .work
            .penalites
            .iter()
            .filter(|p| p.commande_id == commande_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |p: &Penalite| p.created_at))
    }

    async fn insert_remuneration(&mut self, r: &Remuneration) -> StoreResult<()> {
        self.check(FailPoint::InsertRemuneration)?;
        if self
            .work
            .remunerations
            .values()
            .any(|x| x.commande_id == r.commande_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "uq_remunerations_commande".to_string(),
            });
        }
        self.work.remunerations.insert(r.id, r.clone());
        Ok(())
    }

    async fn fetch_remuneration_for_commande(
        &mut self,
        commande_id: Uuid,
    ) -> StoreResult<Option<Remuneration>> {
        Ok(self
            .work
            .remunerations
            .values()
            .find(|r| r.commande_id == commande_id)
            .cloned())
    }

    async fn update_remuneration_amount(
        &mut self,
        id: Uuid,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(match self.work.remunerations.get_mut(&id) {
            Some(r) => {
                r.amount = amount;
                r.updated_at = at;
                true
            }
            None => false,
        })
    }

    // --- production records -----------------------------------------------

    async fn insert_mesure(&mut self, mesure: &Mesure) -> StoreResult<()> {
        self.work.mesures.push(mesure.clone());
        Ok(())
    }

    async fn list_mesures_for_commande(&mut self, commande_id: Uuid) -> StoreResult<Vec<Mesure>> {
        let v = self
            .work
            .mesures
            .iter()
            .filter(|m| m.commande_id == Some(commande_id))
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |m: &Mesure| m.created_at))
    }

    async fn insert_fourniture(&mut self, fourniture: &Fourniture) -> StoreResult<()> {
        self.work.fournitures.push(fourniture.clone());
        Ok(())
    }

    async fn list_fournitures(&mut self, commande_id: Uuid) -> StoreResult<Vec<Fourniture>> {
        let v = self
            .work
            .fournitures
            .iter()
            .filter(|f| f.commande_id == commande_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(v, |f: &Fourniture| f.created_at))
    }
}
