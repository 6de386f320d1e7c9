//! Scenario: the in-memory store honours unit-of-work semantics.
//!
//! # Invariants under test
//! - Writes become visible only after `commit`.
//! - Dropping a unit of work discards its writes.
//! - Status updates are compare-and-set.
//! - A dedupe key admits at most one notification per commande.
//!
//! Run: cargo test -p atl-db --features testkit --test scenario_mem_store_unit_of_work

use atl_db::{ClaimRequest, FailPoint, MemStore, OutboxStatus, Store, StoreError, UQ_STYLES_NAME};
use atl_schemas::{
    Client, Commande, CommandeStatus, Gender, Notification, NotificationKind, Role, Style, User,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn user(role: Role, email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: None,
        email: email.to_string(),
        first_name: "Awa".to_string(),
        last_name: "Diop".to_string(),
        role,
        disponibilite: true,
        push_token: None,
        created_at: t0(),
    }
}

async fn seed_commande(store: &MemStore) -> Commande {
    let admin = user(Role::Admin, "admin@atelier.test");
    let client = Client {
        id: Uuid::new_v4(),
        first_name: "Fatou".to_string(),
        last_name: "Sow".to_string(),
        telephone: "+221770000000".to_string(),
        adresse: None,
        gender: Gender::F,
        image_url: None,
        created_at: t0(),
    };
    let style = Style {
        id: Uuid::new_v4(),
        name: "Boubou".to_string(),
        created_at: t0(),
    };
    let commande = Commande {
        id: Uuid::new_v4(),
        status: CommandeStatus::EnAttente,
        price: 50_000,
        advance: 10_000,
        due_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
        description: None,
        audio_url: None,
        images: vec![],
        client_id: client.id,
        style_id: style.id,
        created_by: admin.id,
        assigned_to: None,
        controleur_id: None,
        created_at: t0(),
        updated_at: t0(),
        status_changed_at: t0(),
        late_stage: None,
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&admin).await.unwrap();
    tx.insert_client(&client).await.unwrap();
    tx.insert_style(&style).await.unwrap();
    tx.insert_commande(&commande).await.unwrap();
    tx.commit().await.unwrap();
    commande
}

fn notification(commande_id: Uuid, key: Option<&str>) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        commande_id,
        recipient_id: Uuid::new_v4(),
        kind: NotificationKind::RappelLivraison,
        message: "Rappel".to_string(),
        dedupe_key: key.map(str::to_string),
        scheduled_for: None,
        created_at: t0(),
    }
}

#[tokio::test]
async fn dropped_unit_of_work_leaves_no_rows() {
    let store = MemStore::new();
    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user(Role::Employee, "e@atelier.test"))
            .await
            .unwrap();
        // dropped without commit
    }
    assert_eq!(store.counts().await.users, 0);
}

#[tokio::test]
async fn failed_commit_publishes_nothing() {
    let store = MemStore::new();
    store.fail_on(FailPoint::Commit);
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&user(Role::Employee, "e@atelier.test"))
        .await
        .unwrap();
    assert!(tx.commit().await.is_err());
    assert_eq!(store.counts().await.users, 0);
}

#[tokio::test]
async fn status_update_is_compare_and_set() {
    let store = MemStore::new();
    let c = seed_commande(&store).await;

    let mut tx = store.begin().await.unwrap();
    let moved = tx
        .update_commande_status(c.id, CommandeStatus::EnAttente, CommandeStatus::Assignee, t0())
        .await
        .unwrap();
    assert!(moved);
    let again = tx
        .update_commande_status(c.id, CommandeStatus::EnAttente, CommandeStatus::Assignee, t0())
        .await
        .unwrap();
    assert!(!again, "second CAS from a stale status must not apply");
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn details_update_never_touches_status() {
    let store = MemStore::new();
    let c = seed_commande(&store).await;

    let mut edited = c.clone();
    edited.status = CommandeStatus::Livre;
    edited.price = 60_000;

    let mut tx = store.begin().await.unwrap();
    assert!(tx.update_commande_details(&edited).await.unwrap());
    let got = tx.fetch_commande(c.id).await.unwrap().unwrap();
    assert_eq!(got.price, 60_000);
    assert_eq!(got.status, CommandeStatus::EnAttente);
}

#[tokio::test]
async fn dedupe_key_admits_one_notification_and_one_outbox_row() {
    let store = MemStore::new();
    let c = seed_commande(&store).await;

    let mut tx = store.begin().await.unwrap();
    assert!(tx
        .insert_notification(&notification(c.id, Some("rappel:D-1")))
        .await
        .unwrap());
    assert!(!tx
        .insert_notification(&notification(c.id, Some("rappel:D-1")))
        .await
        .unwrap());
    assert!(tx.insert_notification(&notification(c.id, None)).await.unwrap());
    assert!(tx.insert_notification(&notification(c.id, None)).await.unwrap());
    tx.commit().await.unwrap();

    let counts = store.counts().await;
    assert_eq!(counts.notifications, 3);
    assert_eq!(counts.outbox, 3);
}

#[tokio::test]
async fn concurrent_style_insert_surfaces_unique_violation() {
    let store = MemStore::new();
    store.fail_on(FailPoint::ConcurrentStyleInsert);

    let mut tx = store.begin().await.unwrap();
    let style = Style {
        id: Uuid::new_v4(),
        name: "Kaftan".to_string(),
        created_at: t0(),
    };
    let err = tx.insert_style(&style).await.unwrap_err();
    assert!(matches!(&err, StoreError::UniqueViolation { .. }));
    assert!(err.is_unique_violation(UQ_STYLES_NAME));

    let winner = tx.fetch_style_by_name("Kaftan").await.unwrap().unwrap();
    assert_ne!(winner.id, style.id);
}

#[tokio::test]
async fn outbox_claim_respects_schedule_and_release_counts_attempts() {
    let store = MemStore::new();
    let c = seed_commande(&store).await;

    let due_now = notification(c.id, None);
    let mut later = notification(c.id, Some("rappel:D-0"));
    later.scheduled_for = Some(t0() + Duration::days(2));

    let mut tx = store.begin().await.unwrap();
    tx.insert_notification(&due_now).await.unwrap();
    tx.insert_notification(&later).await.unwrap();

    let req = ClaimRequest {
        limit: 10,
        dispatcher_id: "dispatcher-A",
        now: t0(),
        stale_before: t0() - Duration::minutes(5),
    };
    let claimed = tx.outbox_claim_batch(&req).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].notification_id, due_now.id);

    // Nothing left to claim for a second dispatcher.
    let req_b = ClaimRequest {
        dispatcher_id: "dispatcher-B",
        ..req.clone()
    };
    assert!(tx.outbox_claim_batch(&req_b).await.unwrap().is_empty());

    let status = tx.outbox_release(due_now.id, "boom", 2).await.unwrap();
    assert_eq!(status, Some(OutboxStatus::Pending));
    tx.outbox_claim_batch(&req).await.unwrap();
    let status = tx.outbox_release(due_now.id, "boom", 2).await.unwrap();
    assert_eq!(status, Some(OutboxStatus::Failed));

    let row = tx.outbox_fetch(due_now.id).await.unwrap().unwrap();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn delete_commande_cascades_to_owned_rows() {
    let store = MemStore::new();
    let c = seed_commande(&store).await;

    let mut tx = store.begin().await.unwrap();
    tx.insert_notification(&notification(c.id, None)).await.unwrap();
    assert!(tx.delete_commande(c.id).await.unwrap());
    tx.commit().await.unwrap();

    let counts = store.counts().await;
    assert_eq!(counts.commandes, 0);
    assert_eq!(counts.notifications, 0);
    assert_eq!(counts.outbox, 0);
}
