//! Store-backed penalty and remuneration application.
//!
//! Every function runs inside the caller's unit of work and expects the
//! commande to have been fetched (and therefore row-locked) through it.
//! Nothing here commits.

use atl_db::{StoreResult, StoreTx};
use atl_schemas::{
    Amount, Commande, CommandeStatus, Notification, NotificationKind, Penalite, PenaliteKind,
    Remuneration, RemunerationStatus, Role,
};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calc::{
    decrement_remuneration, delay_breached, delay_penalty_amount, days_until_due,
    non_conformite_penalty_amount, non_conformite_sla_elapsed, remuneration_amount, PenaltyRates,
};

/// Why [`generate_remuneration`] declined to create a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemunerationSkip {
    NoAssignedEmployee,
    NoPrice,
    AlreadyExists,
}

impl std::fmt::Display for RemunerationSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemunerationSkip::NoAssignedEmployee => write!(f, "no employee assigned"),
            RemunerationSkip::NoPrice => write!(f, "order has no price"),
            RemunerationSkip::AlreadyExists => write!(f, "remuneration already generated"),
        }
    }
}

/// Create the remuneration for the assigned employee.
///
/// Unmet preconditions are a recoverable skip, not an error: the returned
/// `Err(RemunerationSkip)` says why nothing was written.
pub async fn generate_remuneration(
    tx: &mut dyn StoreTx,
    commande: &Commande,
    rates: &PenaltyRates,
    now: DateTime<Utc>,
) -> StoreResult<Result<Remuneration, RemunerationSkip>> {
    let Some(employe_id) = commande.assigned_to else {
        return Ok(Err(RemunerationSkip::NoAssignedEmployee));
    };
    if commande.price <= 0 {
        return Ok(Err(RemunerationSkip::NoPrice));
    }
    if tx.fetch_remuneration_for_commande(commande.id).await?.is_some() {
        return Ok(Err(RemunerationSkip::AlreadyExists));
    }

    let penalties: Amount = tx
        .list_penalites(commande.id)
        .await?
        .iter()
        .map(|p| p.amount)
        .sum();

    let remuneration = Remuneration {
        id: Uuid::new_v4(),
        commande_id: commande.id,
        employe_id,
        amount: remuneration_amount(commande.price, penalties, rates),
        status: RemunerationStatus::EnAttente,
        created_at: now,
        updated_at: now,
    };
    tx.insert_remuneration(&remuneration).await?;

    info!(
        commande_id = %commande.id,
        employe_id = %employe_id,
        amount = remuneration.amount,
        penalties,
        "remuneration generated"
    );
    Ok(Ok(remuneration))
}

/// Subtract a late penalty from an existing remuneration, clamped at zero.
/// Returns the new amount, or `None` when no remuneration exists yet.
pub async fn update_remuneration_after_penalite(
    tx: &mut dyn StoreTx,
    commande_id: Uuid,
    penalty: Amount,
    now: DateTime<Utc>,
) -> StoreResult<Option<Amount>> {
    let Some(rem) = tx.fetch_remuneration_for_commande(commande_id).await? else {
        return Ok(None);
    };
    let amount = decrement_remuneration(rem.amount, penalty);
    tx.update_remuneration_amount(rem.id, amount, now).await?;
    debug!(%commande_id, before = rem.amount, after = amount, "remuneration decremented");
    Ok(Some(amount))
}

/// Delay penalty: more than the grace window past due and not delivered.
///
/// Forces the order to RETARD. Applies at most once per order: an order
/// already in RETARD, or already carrying a RETARD penalty, is left alone.
pub async fn apply_delay_penalty(
    tx: &mut dyn StoreTx,
    commande: &Commande,
    rates: &PenaltyRates,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> StoreResult<Option<Penalite>> {
    if commande.status.is_delivered() || commande.status == CommandeStatus::Retard {
        return Ok(None);
    }
    if !delay_breached(commande.due_date, today, rates) {
        return Ok(None);
    }
    let Some(employe_id) = commande.assigned_to else {
        debug!(commande_id = %commande.id, "overdue order has no employee; no delay penalty");
        return Ok(None);
    };
    let already = tx
        .list_penalites(commande.id)
        .await?
        .iter()
        .any(|p| p.kind == PenaliteKind::Retard);
    if already {
        return Ok(None);
    }
    if !tx
        .update_commande_status(commande.id, commande.status, CommandeStatus::Retard, now)
        .await?
    {
        return Ok(None);
    }

    let penalite = Penalite {
        id: Uuid::new_v4(),
        commande_id: commande.id,
        employe_id,
        kind: PenaliteKind::Retard,
        amount: delay_penalty_amount(commande.price, rates),
        reason: format!(
            "Retard supérieur à {} jours sur la livraison.",
            rates.delay_grace_days
        ),
        created_at: now,
    };
    tx.insert_penalite(&penalite).await?;
    update_remuneration_after_penalite(tx, commande.id, penalite.amount, now).await?;

    tx.insert_notification(&Notification {
        id: Uuid::new_v4(),
        commande_id: commande.id,
        recipient_id: employe_id,
        kind: NotificationKind::Penalite,
        message: format!(
            "Une pénalité de {}% a été appliquée pour retard.",
            rates.delay_penalty_bps / 100
        ),
        dedupe_key: Some("penalite:RETARD".to_string()),
        scheduled_for: None,
        created_at: now,
    })
    .await?;

    if let Some(admin) = tx.list_users_by_role(Role::Admin).await?.into_iter().next() {
        tx.insert_notification(&Notification {
            id: Uuid::new_v4(),
            commande_id: commande.id,
            recipient_id: admin.id,
            kind: NotificationKind::Retard,
            message: format!(
                "La commande {} est en retard de {} jour(s).",
                commande.id,
                -days_until_due(commande.due_date, today)
            ),
            dedupe_key: Some("retard:admin".to_string()),
            scheduled_for: None,
            created_at: now,
        })
        .await?;
    }

    info!(
        commande_id = %commande.id,
        from = %commande.status,
        to = %CommandeStatus::Retard,
        amount = penalite.amount,
        "delay penalty applied"
    );
    Ok(Some(penalite))
}

/// Non-conformity escalation: NON_CONFORME for at least the SLA.
///
/// Moves the order to RETOUCHE, so a second run finds nothing to do.
pub async fn apply_non_conformite_penalty(
    tx: &mut dyn StoreTx,
    commande: &Commande,
    rates: &PenaltyRates,
    now: DateTime<Utc>,
) -> StoreResult<Option<Penalite>> {
    if commande.status != CommandeStatus::NonConforme {
        return Ok(None);
    }
    if !non_conformite_sla_elapsed(commande.status_changed_at, now, rates) {
        return Ok(None);
    }
    let Some(employe_id) = commande.assigned_to else {
        return Ok(None);
    };
    if !tx
        .update_commande_status(
            commande.id,
            CommandeStatus::NonConforme,
            CommandeStatus::Retouche,
            now,
        )
        .await?
    {
        return Ok(None);
    }

    let penalite = Penalite {
        id: Uuid::new_v4(),
        commande_id: commande.id,
        employe_id,
        kind: PenaliteKind::NonConforme,
        amount: non_conformite_penalty_amount(commande.price, rates),
        reason: format!(
            "Retouche non effectuée dans le délai imparti ({}h)",
            rates.non_conformite_sla_hours
        ),
        created_at: now,
    };
    tx.insert_penalite(&penalite).await?;
    update_remuneration_after_penalite(tx, commande.id, penalite.amount, now).await?;

    // One escalation per NON_CONFORME episode.
    let episode = commande.status_changed_at.timestamp();
    tx.insert_notification(&Notification {
        id: Uuid::new_v4(),
        commande_id: commande.id,
        recipient_id: employe_id,
        kind: NotificationKind::Penalite,
        message: format!(
            "Pénalité {}% pour retouche non effectuée dans les {}h.",
            rates.non_conformite_penalty_bps / 100,
            rates.non_conformite_sla_hours
        ),
        dedupe_key: Some(format!("penalite:NON_CONFORME:{episode}")),
        scheduled_for: None,
        created_at: now,
    })
    .await?;

    info!(
        commande_id = %commande.id,
        from = %CommandeStatus::NonConforme,
        to = %CommandeStatus::Retouche,
        amount = penalite.amount,
        "non-conformity penalty applied"
    );
    Ok(Some(penalite))
}
