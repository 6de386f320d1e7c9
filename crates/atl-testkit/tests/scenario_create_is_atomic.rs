//! Scenario: order creation is all-or-nothing.
//!
//! # Invariants under test
//! - A failure at any write of `create_commande` (order, payment,
//!   notification, commit) leaves no client, style, order, payment or
//!   notification behind.
//! - A style created concurrently under the same name is reused, not
//!   duplicated.
//! - Without an available employee nothing is written.

use atl_db::FailPoint;
use atl_schemas::{ErrorKind, Role};
use atl_testkit::{create_request, Workshop};

#[tokio::test]
async fn every_fail_point_rolls_back_the_whole_creation() -> anyhow::Result<()> {
    for point in [
        FailPoint::InsertCommande,
        FailPoint::InsertPaiement,
        FailPoint::InsertNotification,
        FailPoint::Commit,
    ] {
        let w = Workshop::new().await?;
        let before = w.store.counts().await;

        w.store.fail_on(point);
        let err = w
            .workflow
            .create_commande(&w.admin, create_request(600, 150, w.due_in(9)))
            .await
            .expect_err("creation must fail under an armed fail point");
        assert_eq!(err.kind(), ErrorKind::Internal, "{point:?}");
        assert_eq!(w.store.counts().await, before, "{point:?} left rows behind");

        // The same request goes through once the fault is gone.
        w.store.clear_faults();
        let r = w
            .workflow
            .create_commande(&w.admin, create_request(600, 150, w.due_in(9)))
            .await?;
        let after = w.store.counts().await;
        assert_eq!(after.commandes, 1, "{point:?}");
        assert_eq!(after.paiements, 1, "{point:?}");
        assert_eq!(after.clients, before.clients + 1, "{point:?}");
        assert!(!r.notifications.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn racing_style_insert_reuses_the_winner() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    w.store.fail_on(atl_db::FailPoint::ConcurrentStyleInsert);

    let first = w
        .workflow
        .create_commande(&w.admin, create_request(400, 0, w.due_in(4)))
        .await?;
    w.store.clear_faults();
    let second = w
        .workflow
        .create_commande(&w.admin, create_request(450, 0, w.due_in(4)))
        .await?;

    assert_eq!(first.commande.style_id, second.commande.style_id);
    assert_eq!(w.store.counts().await.styles, 1);
    Ok(())
}

#[tokio::test]
async fn no_available_employee_writes_nothing() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    w.workflow
        .set_availability(&w.admin, w.employee.user_id, false)
        .await?;
    let before = w.store.counts().await;

    let err = w
        .workflow
        .create_commande(&w.admin, create_request(400, 0, w.due_in(4)))
        .await
        .expect_err("nobody to assign");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(w.store.counts().await, before);

    // A newly hired, available employee unblocks creation.
    let fresh = w.hire(Role::Employee, "Lamine").await?;
    let r = w
        .workflow
        .create_commande(&w.admin, create_request(400, 0, w.due_in(4)))
        .await?;
    assert_eq!(r.commande.assigned_to, Some(fresh.user_id));
    Ok(())
}
