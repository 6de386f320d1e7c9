//! Scenario: a failed control escalates, is retouched, then passes.
//!
//! # Invariants under test
//! - NON_CONFORME past the SLA becomes RETOUCHE with one NON_CONFORME
//!   penalty of 10% of the price.
//! - The remuneration generated on the later conforme control is the 40%
//!   share minus the penalties already recorded.
//! - A late order is forced to RETARD once and keeps its stage: it is
//!   delivered only after passing control, and its remuneration carries the
//!   delay penalty.
//! - A late order that was never produced cannot jump to control or
//!   delivery.

use std::sync::Arc;

use atl_runtime::Sweep;
use atl_schemas::{CommandeStatus, ErrorKind, PenaliteKind};
use atl_testkit::{create_request, Workshop};
use atl_workflow::{ControlVerdict, WorkflowError};
use chrono::Duration;

fn verdict(conforme: bool) -> ControlVerdict {
    ControlVerdict {
        conforme,
        remarques: (!conforme).then(|| "Ourlet de travers".to_string()),
    }
}

#[tokio::test]
async fn retouch_after_sla_then_conforme() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let sweep = Sweep::new(w.store.clone(), w.clock.clone(), &w.config)?;

    let id = w
        .workflow
        .create_commande(&w.admin, create_request(500, 100, w.due_in(20)))
        .await?
        .commande
        .id;
    w.workflow.accept_commande(&w.employee, id).await?;
    w.workflow.confirm_preparation(&w.employee, id).await?;
    w.workflow.mark_ready_for_control(&w.employee, id).await?;
    let r = w
        .workflow
        .perform_control(&w.controleur, id, verdict(false))
        .await?;
    assert_eq!(r.commande.status, CommandeStatus::NonConforme);
    assert!(r.remuneration.is_none());

    // Inside the SLA nothing happens.
    w.clock.advance(Duration::hours(23));
    let report = sweep.run_once().await?;
    assert_eq!(report.non_conformite_penalties, 0);
    assert_eq!(w.status_of(id).await?, CommandeStatus::NonConforme);

    // Past it, the order escalates once.
    w.clock.advance(Duration::hours(2));
    let report = sweep.run_once().await?;
    assert_eq!(report.non_conformite_penalties, 1);
    assert_eq!(w.status_of(id).await?, CommandeStatus::Retouche);
    let report = sweep.run_once().await?;
    assert_eq!(report.non_conformite_penalties, 0);

    let detail = w.workflow.commande_detail(&w.admin, id).await?;
    assert_eq!(detail.penalites.len(), 1);
    assert_eq!(detail.penalites[0].kind, PenaliteKind::NonConforme);
    assert_eq!(detail.penalites[0].amount, 50);

    // Retouched garment goes back to control and passes.
    w.workflow.mark_ready_for_control(&w.employee, id).await?;
    let r = w
        .workflow
        .perform_control(&w.controleur, id, verdict(true))
        .await?;
    assert_eq!(r.commande.status, CommandeStatus::Pret);
    assert_eq!(r.remuneration.map(|x| x.amount), Some(150));
    Ok(())
}

#[tokio::test]
async fn late_order_is_forced_to_retard_and_closed_after_control() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let sweep = Arc::new(Sweep::new(w.store.clone(), w.clock.clone(), &w.config)?);

    let id = w
        .workflow
        .create_commande(&w.admin, create_request(1_000, 0, w.due_in(2)))
        .await?
        .commande
        .id;
    w.workflow.accept_commande(&w.employee, id).await?;

    // Due + grace (3 days) is still tolerated.
    w.clock.advance(Duration::days(5));
    sweep.run_once().await?;
    assert_eq!(w.status_of(id).await?, CommandeStatus::Assignee);

    w.clock.advance(Duration::days(1));
    let report = sweep.run_once().await?;
    assert_eq!(report.delay_penalties, 1);
    assert_eq!(w.status_of(id).await?, CommandeStatus::Retard);

    w.clock.advance(Duration::days(1));
    let report = sweep.run_once().await?;
    assert_eq!(report.delay_penalties, 0, "one delay penalty per order");

    // Not ready yet: the garment was never produced or controlled.
    let err = w
        .workflow
        .deliver_commande(&w.admin, id)
        .await
        .expect_err("late order still in its first stage");
    assert!(matches!(err, WorkflowError::InvalidState(_)), "{err}");

    // The work continues from where it stood; the order stays RETARD.
    w.workflow.confirm_preparation(&w.employee, id).await?;
    w.workflow.mark_ready_for_control(&w.employee, id).await?;
    let r = w
        .workflow
        .perform_control(&w.controleur, id, verdict(true))
        .await?;
    assert_eq!(r.commande.status, CommandeStatus::Retard);
    assert_eq!(r.commande.late_stage, Some(CommandeStatus::Pret));
    // 40% of 1000, minus the 20% delay penalty.
    assert_eq!(r.remuneration.map(|x| x.amount), Some(200));

    let r = w.workflow.deliver_commande(&w.admin, id).await?;
    assert_eq!(r.commande.status, CommandeStatus::Livre);
    assert_eq!(r.commande.late_stage, None);
    Ok(())
}

#[tokio::test]
async fn late_order_never_accepted_cannot_skip_to_control_or_delivery() -> anyhow::Result<()> {
    let w = Workshop::new().await?;
    let sweep = Sweep::new(w.store.clone(), w.clock.clone(), &w.config)?;

    let id = w
        .workflow
        .create_commande(&w.admin, create_request(500, 0, w.due_in(1)))
        .await?
        .commande
        .id;
    w.clock.advance(Duration::days(6));
    sweep.run_once().await?;
    assert_eq!(w.status_of(id).await?, CommandeStatus::Retard);

    let err = w
        .workflow
        .mark_ready_for_control(&w.employee, id)
        .await
        .expect_err("never accepted nor produced");
    assert!(matches!(err, WorkflowError::InvalidState(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = w
        .workflow
        .deliver_commande(&w.admin, id)
        .await
        .expect_err("never controlled");
    assert!(matches!(err, WorkflowError::InvalidState(_)), "{err}");
    assert_eq!(w.status_of(id).await?, CommandeStatus::Retard);

    // Accepting still works and keeps the order late.
    let r = w.workflow.accept_commande(&w.employee, id).await?;
    assert_eq!(r.commande.status, CommandeStatus::Retard);
    assert_eq!(r.commande.late_stage, Some(CommandeStatus::Assignee));
    assert!(!w.user(w.employee.user_id).await?.disponibilite);
    Ok(())
}
