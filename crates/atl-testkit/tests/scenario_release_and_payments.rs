//! Scenario: employee release policy and the payment cap.
//!
//! # Invariants under test
//! - `on_ready` frees the employee at PRET, `on_delivered` only at LIVRE,
//!   `never` not at all.
//! - An employee still holding another order stays unavailable.
//! - Valid payments never sum above the price, including after an edit of
//!   the price or the advance.

use atl_config::{EmployeeRelease, WorkshopConfig};
use atl_schemas::{CommandeStatus, ErrorKind, PaymentMode};
use atl_testkit::{create_request, Workshop};
use atl_workflow::{ControlVerdict, NewPayment, UpdateCommande};
use uuid::Uuid;

/// Creates an order and walks it to PRET.
async fn ready_order(w: &Workshop) -> anyhow::Result<Uuid> {
    let id = w
        .workflow
        .create_commande(&w.admin, create_request(500, 0, w.due_in(10)))
        .await?
        .commande
        .id;
    w.workflow.accept_commande(&w.employee, id).await?;
    w.workflow.confirm_preparation(&w.employee, id).await?;
    w.workflow.mark_ready_for_control(&w.employee, id).await?;
    w.workflow
        .perform_control(
            &w.controleur,
            id,
            ControlVerdict {
                conforme: true,
                remarques: Some("Finitions propres".to_string()),
            },
        )
        .await?;
    assert_eq!(w.status_of(id).await?, CommandeStatus::Pret);
    Ok(id)
}

async fn workshop_releasing(policy: EmployeeRelease) -> anyhow::Result<Workshop> {
    let mut config = WorkshopConfig::default();
    config.workflow.employee_release = policy;
    Workshop::with_config(config).await
}

#[tokio::test]
async fn on_ready_frees_the_employee_at_pret() -> anyhow::Result<()> {
    let w = workshop_releasing(EmployeeRelease::OnReady).await?;
    ready_order(&w).await?;
    assert!(w.user(w.employee.user_id).await?.disponibilite);
    Ok(())
}

#[tokio::test]
async fn on_delivered_waits_for_livre() -> anyhow::Result<()> {
    let w = workshop_releasing(EmployeeRelease::OnDelivered).await?;
    let id = ready_order(&w).await?;
    assert!(!w.user(w.employee.user_id).await?.disponibilite);

    let r = w.workflow.deliver_commande(&w.admin, id).await?;
    assert!(r.employee_released);
    assert!(w.user(w.employee.user_id).await?.disponibilite);
    Ok(())
}

#[tokio::test]
async fn never_keeps_the_flag_for_the_admin() -> anyhow::Result<()> {
    let w = workshop_releasing(EmployeeRelease::Never).await?;
    let id = ready_order(&w).await?;
    w.workflow.deliver_commande(&w.admin, id).await?;
    assert!(!w.user(w.employee.user_id).await?.disponibilite);
    Ok(())
}

#[tokio::test]
async fn employee_with_other_work_in_flight_is_not_released() -> anyhow::Result<()> {
    let w = workshop_releasing(EmployeeRelease::OnReady).await?;
    // Both orders go to the same employee while they are still available.
    let first = w
        .workflow
        .create_commande(&w.admin, create_request(500, 0, w.due_in(10)))
        .await?
        .commande;
    let other = w
        .workflow
        .create_commande(&w.admin, create_request(700, 0, w.due_in(12)))
        .await?
        .commande;
    assert_eq!(other.assigned_to, Some(w.employee.user_id));
    w.workflow.accept_commande(&w.employee, first.id).await?;
    w.workflow.accept_commande(&w.employee, other.id).await?;

    w.workflow.confirm_preparation(&w.employee, first.id).await?;
    w.workflow.mark_ready_for_control(&w.employee, first.id).await?;
    let r = w
        .workflow
        .perform_control(
            &w.controleur,
            first.id,
            ControlVerdict {
                conforme: true,
                remarques: None,
            },
        )
        .await?;
    assert_eq!(r.commande.status, CommandeStatus::Pret);
    assert!(!r.employee_released);
    assert!(!w.user(w.employee.user_id).await?.disponibilite);
    Ok(())
}

#[tokio::test]
async fn payments_stop_at_the_price() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let id = w
        .workflow
        .create_commande(&w.admin, create_request(1_000, 400, w.due_in(6)))
        .await?
        .commande
        .id;

    let pay = |amount| NewPayment {
        amount,
        mode: PaymentMode::Especes,
    };
    w.workflow.register_payment(&w.admin, id, pay(500)).await?;

    let err = w
        .workflow
        .register_payment(&w.admin, id, pay(101))
        .await
        .expect_err("would exceed the price");
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    w.workflow.register_payment(&w.admin, id, pay(100)).await?;
    let detail = w.workflow.commande_detail(&w.admin, id).await?;
    let total: i64 = detail.paiements.iter().map(|p| p.amount).sum();
    assert_eq!(total, 1_000);

    let err = w
        .workflow
        .register_payment(&w.employee, id, pay(1))
        .await
        .expect_err("payments are admin-only");
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    Ok(())
}

#[tokio::test]
async fn edits_never_push_payments_above_the_price() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let id = w
        .workflow
        .create_commande(&w.admin, create_request(500, 100, w.due_in(6)))
        .await?
        .commande
        .id;
    w.workflow
        .register_payment(
            &w.admin,
            id,
            NewPayment {
                amount: 400,
                mode: PaymentMode::MobileMoney,
            },
        )
        .await?;

    // Lowering the advance would not refund it.
    let err = w
        .workflow
        .update_commande(
            &w.admin,
            id,
            UpdateCommande {
                price: Some(400),
                advance: Some(0),
                ..UpdateCommande::default()
            },
        )
        .await
        .expect_err("advance already cashed");
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let err = w
        .workflow
        .update_commande(
            &w.admin,
            id,
            UpdateCommande {
                price: Some(400),
                ..UpdateCommande::default()
            },
        )
        .await
        .expect_err("500 already paid");
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let detail = w.workflow.commande_detail(&w.admin, id).await?;
    assert_eq!(detail.commande.price, 500);
    assert_eq!(detail.commande.advance, 100);
    Ok(())
}

#[tokio::test]
async fn raising_the_advance_records_the_difference() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let id = w
        .workflow
        .create_commande(&w.admin, create_request(1_000, 200, w.due_in(6)))
        .await?
        .commande
        .id;

    let r = w
        .workflow
        .update_commande(
            &w.admin,
            id,
            UpdateCommande {
                advance: Some(350),
                payment_mode: Some(PaymentMode::Carte),
                ..UpdateCommande::default()
            },
        )
        .await?;
    let top_up = r.paiement.expect("top-up recorded");
    assert_eq!(top_up.amount, 150);
    assert_eq!(top_up.mode, PaymentMode::Carte);

    let detail = w.workflow.commande_detail(&w.admin, id).await?;
    let total: i64 = detail.paiements.iter().map(|p| p.amount).sum();
    assert_eq!(total, detail.commande.advance);
    assert_eq!(total, 350);
    Ok(())
}
