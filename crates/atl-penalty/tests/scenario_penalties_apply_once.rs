//! Scenario: penalties are applied exactly once per breach.
//!
//! # Invariants under test
//! - A 5-days-overdue order priced 1000 gets one RETARD penalty of 200 and
//!   moves to RETARD; a second application creates nothing.
//! - A NON_CONFORME order past the 24h SLA gets one 10% penalty, moves to
//!   RETOUCHE, and an existing remuneration is decremented (clamped at 0).
//! - Remuneration is `max(price * 40% - penalties, 0)` and generated once.

use atl_db::{MemStore, Store, StoreTx};
use atl_penalty::{
    apply_delay_penalty, apply_non_conformite_penalty, generate_remuneration, PenaltyRates,
    RemunerationSkip,
};
use atl_schemas::{
    Client, Commande, CommandeStatus, Gender, NotificationKind, Penalite, PenaliteKind, Role,
    Style, User,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 20, 0, 30, 0).unwrap()
}

fn staff(role: Role, email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: None,
        email: email.to_string(),
        first_name: "Staff".to_string(),
        last_name: email.to_string(),
        role,
        disponibilite: true,
        push_token: None,
        created_at: now() - Duration::days(30),
    }
}

struct Seeded {
    commande: Commande,
    employee: User,
    admin: User,
}

async fn seed(store: &MemStore, status: CommandeStatus, price: i64, due: NaiveDate) -> Seeded {
    let admin = staff(Role::Admin, "admin@atelier.test");
    let employee = staff(Role::Employee, "emp@atelier.test");
    let client = Client {
        id: Uuid::new_v4(),
        first_name: "Aminata".to_string(),
        last_name: "Ba".to_string(),
        telephone: "+221771112233".to_string(),
        adresse: None,
        gender: Gender::F,
        image_url: None,
        created_at: now(),
    };
    let style = Style {
        id: Uuid::new_v4(),
        name: "Grand boubou".to_string(),
        created_at: now(),
    };
    let commande = Commande {
        id: Uuid::new_v4(),
        status,
        price,
        advance: 0,
        due_date: due,
        description: Some("Grand boubou brodé".to_string()),
        audio_url: None,
        images: vec![],
        client_id: client.id,
        style_id: style.id,
        created_by: admin.id,
        assigned_to: Some(employee.id),
        controleur_id: None,
        created_at: now() - Duration::days(20),
        updated_at: now() - Duration::days(2),
        status_changed_at: now() - Duration::days(2),
        late_stage: None,
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&admin).await.unwrap();
    tx.insert_user(&employee).await.unwrap();
    tx.insert_client(&client).await.unwrap();
    tx.insert_style(&style).await.unwrap();
    tx.insert_commande(&commande).await.unwrap();
    tx.commit().await.unwrap();

    Seeded {
        commande,
        employee,
        admin,
    }
}

async fn locked(tx: &mut Box<dyn StoreTx>, id: Uuid) -> Commande {
    tx.fetch_commande(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn delay_penalty_applies_once_and_forces_retard() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::EnProduction, 1_000, today - Duration::days(5)).await;
    let rates = PenaltyRates::default();

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let p = apply_delay_penalty(tx.as_mut(), &c, &rates, today, now())
        .await
        .unwrap()
        .expect("penalty applied");
    assert_eq!(p.amount, 200);
    assert_eq!(p.kind, PenaliteKind::Retard);
    assert_eq!(p.employe_id, s.employee.id);
    tx.commit().await.unwrap();

    // Second run sees RETARD and does nothing.
    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    assert_eq!(c.status, CommandeStatus::Retard);
    assert_eq!(c.late_stage, Some(CommandeStatus::EnProduction));
    assert!(apply_delay_penalty(tx.as_mut(), &c, &rates, today, now())
        .await
        .unwrap()
        .is_none());
    let penalites = tx.list_penalites(c.id).await.unwrap();
    assert_eq!(penalites.len(), 1);

    let notes = tx.list_notifications_for_commande(c.id).await.unwrap();
    assert!(notes
        .iter()
        .any(|n| n.kind == NotificationKind::Penalite && n.recipient_id == s.employee.id));
    assert!(notes
        .iter()
        .any(|n| n.kind == NotificationKind::Retard && n.recipient_id == s.admin.id));
}

#[tokio::test]
async fn delay_penalty_respects_the_grace_window() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::EnProduction, 1_000, today - Duration::days(3)).await;

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let out = apply_delay_penalty(tx.as_mut(), &c, &PenaltyRates::default(), today, now())
        .await
        .unwrap();
    assert!(out.is_none());
}

#[tokio::test]
async fn delivered_orders_are_never_penalised() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::Livre, 1_000, today - Duration::days(30)).await;

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let out = apply_delay_penalty(tx.as_mut(), &c, &PenaltyRates::default(), today, now())
        .await
        .unwrap();
    assert!(out.is_none());
}

#[tokio::test]
async fn non_conformity_escalates_to_retouche_and_decrements_remuneration() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::NonConforme, 1_000, today + Duration::days(10)).await;
    let rates = PenaltyRates::default();

    // A remuneration already exists (e.g. generated on an earlier pass).
    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let rem = generate_remuneration(tx.as_mut(), &c, &rates, now())
        .await
        .unwrap()
        .expect("created");
    assert_eq!(rem.amount, 400);
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let p = apply_non_conformite_penalty(tx.as_mut(), &c, &rates, now())
        .await
        .unwrap()
        .expect("escalated");
    assert_eq!(p.amount, 100);
    assert_eq!(p.kind, PenaliteKind::NonConforme);
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    assert_eq!(c.status, CommandeStatus::Retouche);
    let rem = tx
        .fetch_remuneration_for_commande(c.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rem.amount, 300);
    assert!(apply_non_conformite_penalty(tx.as_mut(), &c, &rates, now())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn non_conformity_waits_for_the_sla() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::NonConforme, 1_000, today + Duration::days(10)).await;

    let mut tx = store.begin().await.unwrap();
    let c = locked(&mut tx, s.commande.id).await;
    let early = c.status_changed_at + Duration::hours(23);
    let out = apply_non_conformite_penalty(tx.as_mut(), &c, &PenaltyRates::default(), early)
        .await
        .unwrap();
    assert!(out.is_none());
}

#[tokio::test]
async fn remuneration_subtracts_recorded_penalties_and_is_generated_once() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::Pret, 1_000, today + Duration::days(10)).await;
    let rates = PenaltyRates::default();

    let mut tx = store.begin().await.unwrap();
    for amount in [200, 100] {
        tx.insert_penalite(&Penalite {
            id: Uuid::new_v4(),
            commande_id: s.commande.id,
            employe_id: s.employee.id,
            kind: PenaliteKind::Retard,
            amount,
            reason: "test".to_string(),
            created_at: now(),
        })
        .await
        .unwrap();
    }
    let c = locked(&mut tx, s.commande.id).await;
    let rem = generate_remuneration(tx.as_mut(), &c, &rates, now())
        .await
        .unwrap()
        .expect("created");
    assert_eq!(rem.amount, 100);

    let again = generate_remuneration(tx.as_mut(), &c, &rates, now())
        .await
        .unwrap();
    assert_eq!(again.unwrap_err(), RemunerationSkip::AlreadyExists);
}

#[tokio::test]
async fn remuneration_without_employee_is_a_recoverable_skip() {
    let store = MemStore::new();
    let today = now().date_naive();
    let s = seed(&store, CommandeStatus::Pret, 1_000, today + Duration::days(10)).await;

    let mut tx = store.begin().await.unwrap();
    let mut c = locked(&mut tx, s.commande.id).await;
    c.assigned_to = None;
    let out = generate_remuneration(tx.as_mut(), &c, &PenaltyRates::default(), now())
        .await
        .unwrap();
    assert_eq!(out.unwrap_err(), RemunerationSkip::NoAssignedEmployee);
    assert!(tx
        .fetch_remuneration_for_commande(c.id)
        .await
        .unwrap()
        .is_none());
}
