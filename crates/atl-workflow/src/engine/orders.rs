use atl_db::{StoreTx, UQ_STYLES_NAME};
use atl_schemas::{
    Actor, Amount, Client, Commande, CommandeStatus, Fourniture, NotificationKind, Paiement,
    PaymentMode, PaymentStatus, Style,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    draft, locked, persist, release_employee, require_admin, require_assigned_or_admin, Workflow,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{
    ClientRef, CreateCommande, NewFourniture, NewPayment, Receipt, StyleRef, UpdateCommande,
};

/// `price > 0` and `0 <= advance <= price`.
pub(crate) fn validate_amounts(price: Amount, advance: Amount) -> WorkflowResult<()> {
    if price <= 0 {
        return Err(WorkflowError::validation("Le prix doit être supérieur à zéro."));
    }
    if advance < 0 {
        return Err(WorkflowError::validation("L'avance ne peut pas être négative."));
    }
    if advance > price {
        return Err(WorkflowError::validation(
            "L'avance ne peut pas dépasser le prix de la commande.",
        ));
    }
    Ok(())
}

fn non_blank(value: &str, what: &str) -> WorkflowResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(WorkflowError::validation(format!("{what} est obligatoire.")));
    }
    Ok(v.to_string())
}

/// Sum of payments that were not cancelled.
async fn total_paid(tx: &mut dyn StoreTx, commande_id: Uuid) -> WorkflowResult<Amount> {
    Ok(tx
        .list_paiements(commande_id)
        .await?
        .iter()
        .filter(|p| p.status != PaymentStatus::Annule)
        .map(|p| p.amount)
        .sum())
}

impl Workflow {
    /// Create an order with everything it needs, atomically.
    ///
    /// Client, style, order, advance payment, the ASSIGNATION notification
    /// and the scheduled reminders are written in one unit of work: either
    /// all of them exist afterwards or none do.
    pub async fn create_commande(
        &self,
        actor: &Actor,
        req: CreateCommande,
    ) -> WorkflowResult<Receipt> {
        require_admin(actor, "créer une commande")?;
        validate_amounts(req.price, req.advance)?;
        let now = self.now();
        if req.due_date < self.local_date(now) {
            return Err(WorkflowError::validation(
                "La date de livraison ne peut pas être dans le passé.",
            ));
        }

        let mut tx = self.begin().await?;
        let client = resolve_client(tx.as_mut(), &req.client, now).await?;
        let style = resolve_style(tx.as_mut(), &req.style, now).await?;
        tx.link_client_style(client.id, style.id).await?;

        let employee = tx
            .first_available_employee()
            .await?
            .ok_or(WorkflowError::NoEmployeeAvailable)?;

        let commande = Commande {
            id: Uuid::new_v4(),
            status: CommandeStatus::EnAttente,
            price: req.price,
            advance: req.advance,
            due_date: req.due_date,
            description: req.description,
            audio_url: req.audio_url,
            images: req.images,
            client_id: client.id,
            style_id: style.id,
            created_by: actor.user_id,
            assigned_to: Some(employee.id),
            controleur_id: None,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            late_stage: None,
        };
        tx.insert_commande(&commande).await?;

        let mut receipt = Receipt::new(commande.clone());
        if req.advance > 0 {
            let p = Paiement {
                id: Uuid::new_v4(),
                commande_id: commande.id,
                client_id: client.id,
                amount: req.advance,
                mode: req.payment_mode,
                status: PaymentStatus::Valide,
                created_at: now,
            };
            tx.insert_paiement(&p).await?;
            receipt.paiement = Some(p);
        }

        let mut n = draft(
            commande.id,
            employee.id,
            NotificationKind::Assignation,
            format!(
                "Une nouvelle commande ({}) vous a été assignée, à livrer le {}.",
                style.name,
                commande.due_date.format("%d/%m/%Y")
            ),
            now,
        );
        n.dedupe_key = Some("assignation".to_string());
        persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        self.schedule_reminders(
            tx.as_mut(),
            &commande,
            employee.id,
            now,
            &mut receipt.notifications,
        )
        .await?;

        self.finish(tx, &receipt).await?;
        info!(
            commande_id = %commande.id,
            actor = %actor.user_id,
            employee = %employee.id,
            to = %commande.status,
            price = commande.price,
            advance = commande.advance,
            "commande created"
        );
        Ok(receipt)
    }

    /// Style by unique name, created when missing.
    pub async fn upsert_style(&self, actor: &Actor, name: &str) -> WorkflowResult<Style> {
        require_admin(actor, "créer un style")?;
        let mut tx = self.begin().await?;
        let style = resolve_style(tx.as_mut(), &StyleRef::Named(name.to_string()), self.now())
            .await?;
        tx.commit().await?;
        Ok(style)
    }

    /// Edit price, advance, due date and annotations. Never touches status.
    ///
    /// Future reminders are rescheduled when the due date moves.
    pub async fn update_commande(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        patch: UpdateCommande,
    ) -> WorkflowResult<Receipt> {
        require_admin(actor, "modifier une commande")?;
        let now = self.now();

        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        if commande.status.is_delivered() {
            return Err(WorkflowError::Conflict(
                "Une commande livrée ne peut plus être modifiée.".to_string(),
            ));
        }

        let price = patch.price.unwrap_or(commande.price);
        let advance = patch.advance.unwrap_or(commande.advance);
        validate_amounts(price, advance)?;
        // The advance is already in the payment ledger, which is append-only.
        if advance < commande.advance {
            return Err(WorkflowError::validation(
                "L'avance déjà encaissée ne peut pas être réduite.",
            ));
        }
        let top_up = advance - commande.advance;
        if total_paid(tx.as_mut(), commande.id).await? + top_up > price {
            return Err(WorkflowError::validation(
                "Les paiements enregistrés dépassent le nouveau prix.",
            ));
        }

        let due_moved = patch.due_date.is_some_and(|d| d != commande.due_date);
        if let Some(d) = patch.due_date {
            if due_moved && d < self.local_date(now) {
                return Err(WorkflowError::validation(
                    "La date de livraison ne peut pas être dans le passé.",
                ));
            }
            commande.due_date = d;
        }
        commande.price = price;
        commande.advance = advance;
        if let Some(v) = patch.description {
            commande.description = Some(v);
        }
        if let Some(v) = patch.audio_url {
            commande.audio_url = Some(v);
        }
        if let Some(v) = patch.images {
            commande.images = v;
        }
        commande.updated_at = now;
        tx.update_commande_details(&commande).await?;

        let mut receipt = Receipt::new(commande.clone());
        if top_up > 0 {
            let p = Paiement {
                id: Uuid::new_v4(),
                commande_id: commande.id,
                client_id: commande.client_id,
                amount: top_up,
                mode: patch.payment_mode.unwrap_or(PaymentMode::Especes),
                status: PaymentStatus::Valide,
                created_at: now,
            };
            tx.insert_paiement(&p).await?;
            receipt.paiement = Some(p);
        }
        if due_moved {
            let dropped = tx
                .delete_pending_notifications(commande.id, NotificationKind::RappelLivraison, now)
                .await?;
            debug!(commande_id = %commande.id, dropped, "pending reminders dropped");
            if let Some(employee) = commande.assigned_to {
                self.schedule_reminders(
                    tx.as_mut(),
                    &commande,
                    employee,
                    now,
                    &mut receipt.notifications,
                )
                .await?;
            }
        }

        self.finish(tx, &receipt).await?;
        info!(
            commande_id = %commande.id,
            actor = %actor.user_id,
            price = commande.price,
            advance = commande.advance,
            due_date = %commande.due_date,
            "commande details updated"
        );
        Ok(receipt)
    }

    /// Delete the order and everything it owns. An employee still working
    /// on it is released under the same rule as completion.
    pub async fn delete_commande(&self, actor: &Actor, commande_id: Uuid) -> WorkflowResult<()> {
        require_admin(actor, "supprimer une commande")?;
        let mut tx = self.begin().await?;
        let commande = locked(tx.as_mut(), commande_id).await?;

        let released = if commande.holds_employee()
            && self.settings.employee_release != atl_config::EmployeeRelease::Never
        {
            release_employee(tx.as_mut(), &commande).await?
        } else {
            false
        };
        if !tx.delete_commande(commande.id).await? {
            return Err(WorkflowError::not_found("commande", commande.id));
        }
        tx.commit().await?;
        info!(
            commande_id = %commande.id,
            actor = %actor.user_id,
            from = %commande.status,
            released,
            "commande deleted"
        );
        Ok(())
    }

    /// Record a payment. The total paid never exceeds the price.
    pub async fn register_payment(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        req: NewPayment,
    ) -> WorkflowResult<Receipt> {
        require_admin(actor, "enregistrer un paiement")?;
        if req.amount <= 0 {
            return Err(WorkflowError::validation("Le montant doit être supérieur à zéro."));
        }
        let now = self.now();

        let mut tx = self.begin().await?;
        let commande = locked(tx.as_mut(), commande_id).await?;
        let paid = total_paid(tx.as_mut(), commande.id).await?;
        if paid + req.amount > commande.price {
            return Err(WorkflowError::validation(format!(
                "Le paiement dépasse le reste à payer ({}).",
                commande.price - paid
            )));
        }
        let p = Paiement {
            id: Uuid::new_v4(),
            commande_id: commande.id,
            client_id: commande.client_id,
            amount: req.amount,
            mode: req.mode,
            status: PaymentStatus::Valide,
            created_at: now,
        };
        tx.insert_paiement(&p).await?;

        let mut receipt = Receipt::new(commande);
        receipt.paiement = Some(p);
        self.finish(tx, &receipt).await?;
        info!(
            commande_id = %commande_id,
            actor = %actor.user_id,
            amount = req.amount,
            "payment registered"
        );
        Ok(receipt)
    }

    pub async fn add_fourniture(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        req: NewFourniture,
    ) -> WorkflowResult<Receipt> {
        let designation = non_blank(&req.designation, "La désignation")?;
        if req.quantity <= 0 {
            return Err(WorkflowError::validation("La quantité doit être positive."));
        }
        let mut tx = self.begin().await?;
        let commande = locked(tx.as_mut(), commande_id).await?;
        require_assigned_or_admin(actor, &commande, "ajouter une fourniture")?;

        let f = Fourniture {
            id: Uuid::new_v4(),
            commande_id: commande.id,
            designation,
            quantity: req.quantity,
            created_at: self.now(),
        };
        tx.insert_fourniture(&f).await?;
        let mut receipt = Receipt::new(commande);
        receipt.fourniture = Some(f);
        self.finish(tx, &receipt).await?;
        Ok(receipt)
    }

    pub async fn list_fournitures(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<Vec<Fourniture>> {
        let mut tx = self.begin().await?;
        let commande = locked(tx.as_mut(), commande_id).await?;
        require_assigned_or_admin(actor, &commande, "consulter les fournitures")?;
        Ok(tx.list_fournitures(commande.id).await?)
    }
}

async fn resolve_client(
    tx: &mut dyn StoreTx,
    r: &ClientRef,
    now: DateTime<Utc>,
) -> WorkflowResult<Client> {
    match r {
        ClientRef::Existing(id) => tx
            .fetch_client(*id)
            .await?
            .ok_or(WorkflowError::not_found("client", *id)),
        ClientRef::New(new) => {
            let client = Client {
                id: Uuid::new_v4(),
                first_name: non_blank(&new.first_name, "Le prénom du client")?,
                last_name: non_blank(&new.last_name, "Le nom du client")?,
                telephone: non_blank(&new.telephone, "Le téléphone du client")?,
                adresse: new.adresse.clone(),
                gender: new.gender,
                image_url: new.image_url.clone(),
                created_at: now,
            };
            tx.insert_client(&client).await?;
            Ok(client)
        }
    }
}

/// Upsert by unique name. A concurrent insert of the same name surfaces as
/// a unique violation; the row that won is re-read and used.
async fn resolve_style(
    tx: &mut dyn StoreTx,
    r: &StyleRef,
    now: DateTime<Utc>,
) -> WorkflowResult<Style> {
    let name = match r {
        StyleRef::Existing(id) => {
            return tx
                .fetch_style(*id)
                .await?
                .ok_or(WorkflowError::not_found("style", *id));
        }
        StyleRef::Named(name) => non_blank(name, "Le nom du style")?,
    };
    if let Some(s) = tx.fetch_style_by_name(&name).await? {
        return Ok(s);
    }

    let style = Style {
        id: Uuid::new_v4(),
        name,
        created_at: now,
    };
    match tx.insert_style(&style).await {
        Ok(()) => Ok(style),
        Err(e) if e.is_unique_violation(UQ_STYLES_NAME) => {
            debug!(name = %style.name, "style created concurrently; using existing row");
            tx.fetch_style_by_name(&style.name).await?.ok_or_else(|| {
                WorkflowError::Conflict(format!("Le style « {} » est introuvable.", style.name))
            })
        }
        Err(e) => Err(e.into()),
    }
}
