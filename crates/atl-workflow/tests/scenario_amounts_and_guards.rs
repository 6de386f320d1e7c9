//! Scenario: order amounts and role guards.
//!
//! # Invariants under test
//! - `create_commande` succeeds iff `0 <= advance <= price` (for `price > 0`),
//!   and a rejected creation writes nothing.
//! - Only ADMIN creates orders; only the assigned EMPLOYEE accepts; a
//!   refused accept leaves the status untouched.
//! - Moving the due date replaces the pending reminders.

use std::sync::Arc;

use atl_config::WorkshopConfig;
use atl_db::{MemStore, Store};
use atl_schemas::{
    Actor, CommandeStatus, ErrorKind, Gender, NewClient, NotificationKind, PaymentMode, Role,
    User,
};
use atl_workflow::{
    ClientRef, CreateCommande, FixedClock, StyleRef, UpdateCommande, Workflow, WorkflowError,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
}

fn staff(role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: None,
        email: format!("{}@atelier.test", Uuid::new_v4()),
        first_name: "Khady".to_string(),
        last_name: "Sarr".to_string(),
        role,
        disponibilite: true,
        push_token: None,
        created_at: now() - Duration::days(90),
    }
}

struct Shop {
    store: Arc<MemStore>,
    workflow: Workflow,
    admin: Actor,
    employee: Actor,
}

async fn shop() -> Shop {
    let store = Arc::new(MemStore::new());
    let admin = staff(Role::Admin);
    let employee = staff(Role::Employee);
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&admin).await.unwrap();
    tx.insert_user(&employee).await.unwrap();
    tx.commit().await.unwrap();

    let workflow = Workflow::new(
        store.clone(),
        Arc::new(FixedClock::new(now())),
        &WorkshopConfig::default(),
    )
    .unwrap();
    Shop {
        store,
        workflow,
        admin: Actor::new(admin.id, Role::Admin),
        employee: Actor::new(employee.id, Role::Employee),
    }
}

fn request(price: i64, advance: i64, due: NaiveDate) -> CreateCommande {
    CreateCommande {
        client: ClientRef::New(NewClient {
            first_name: "Mariama".to_string(),
            last_name: "Kane".to_string(),
            telephone: "+221761234567".to_string(),
            adresse: None,
            gender: Gender::F,
            image_url: None,
        }),
        style: StyleRef::Named("Robe de soirée".to_string()),
        due_date: due,
        price,
        advance,
        payment_mode: PaymentMode::Especes,
        description: None,
        audio_url: None,
        images: vec![],
    }
}

fn due_in(days: i64) -> NaiveDate {
    now().date_naive() + Duration::days(days)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn advance_never_exceeds_price(price in 1i64..=1_000_000, advance in -10i64..=1_100_000) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (result, counts) = rt.block_on(async {
            let s = shop().await;
            let r = s.workflow.create_commande(&s.admin, request(price, advance, due_in(10))).await;
            (r, s.store.counts().await)
        });
        let valid = (0..=price).contains(&advance);
        prop_assert_eq!(result.is_ok(), valid);
        if valid {
            prop_assert_eq!(counts.commandes, 1);
            prop_assert_eq!(counts.paiements, usize::from(advance > 0));
        } else {
            let e = result.unwrap_err();
            prop_assert_eq!(e.kind(), ErrorKind::ValidationError);
            prop_assert_eq!(counts.commandes, 0);
            prop_assert_eq!(counts.clients, 0);
        }
    }
}

#[tokio::test]
async fn only_admins_create_orders() {
    let s = shop().await;
    let err = s
        .workflow
        .create_commande(&s.employee, request(500, 0, due_in(5)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(s.store.counts().await.commandes, 0);
}

#[tokio::test]
async fn due_date_in_the_past_is_rejected() {
    let s = shop().await;
    let err = s
        .workflow
        .create_commande(&s.admin, request(500, 0, due_in(-1)))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn non_employee_accept_leaves_status_unchanged() {
    let s = shop().await;
    let receipt = s
        .workflow
        .create_commande(&s.admin, request(500, 100, due_in(5)))
        .await
        .unwrap();
    let id = receipt.commande.id;

    let err = s.workflow.accept_commande(&s.admin, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let stranger = Actor::new(Uuid::new_v4(), Role::Employee);
    let err = s.workflow.accept_commande(&stranger, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let detail = s.workflow.commande_detail(&s.admin, id).await.unwrap();
    assert_eq!(detail.commande.status, CommandeStatus::EnAttente);

    let accepted = s.workflow.accept_commande(&s.employee, id).await.unwrap();
    assert_eq!(accepted.commande.status, CommandeStatus::Assignee);
    assert_eq!(accepted.previous_status, Some(CommandeStatus::EnAttente));
}

#[tokio::test]
async fn moving_the_due_date_reschedules_reminders() {
    let s = shop().await;
    let receipt = s
        .workflow
        .create_commande(&s.admin, request(500, 0, due_in(6)))
        .await
        .unwrap();
    let id = receipt.commande.id;
    let reminders_before: Vec<_> = receipt
        .notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::RappelLivraison)
        .map(|n| n.dedupe_key.clone())
        .collect();
    assert!(!reminders_before.is_empty());

    let new_due = due_in(9);
    s.workflow
        .update_commande(
            &s.admin,
            id,
            UpdateCommande {
                due_date: Some(new_due),
                ..UpdateCommande::default()
            },
        )
        .await
        .unwrap();

    let detail = s.workflow.commande_detail(&s.admin, id).await.unwrap();
    let keys: Vec<String> = detail
        .notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::RappelLivraison)
        .filter_map(|n| n.dedupe_key.clone())
        .collect();
    assert!(!keys.is_empty());
    assert!(keys.iter().all(|k| k.starts_with(&format!("rappel:{new_due}:"))));
}
