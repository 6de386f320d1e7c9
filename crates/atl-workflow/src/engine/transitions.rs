use atl_config::EmployeeRelease;
use atl_penalty::generate_remuneration;
use atl_schemas::{Actor, Controle, Mesure, NotificationKind, Role};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    admin_recipient, draft, locked, persist, require_admin, require_assigned_or_admin, Workflow,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::state_machine::CommandeEvent;
use crate::types::{ControlVerdict, NewMeasurements, Receipt};

fn log_transition(receipt: &Receipt, actor: &Actor, what: &'static str) {
    match receipt.previous_status {
        Some(from) => info!(
            commande_id = %receipt.commande.id,
            actor = %actor.user_id,
            from = %from,
            to = %receipt.commande.status,
            notifications = receipt.notifications.len(),
            "{what}"
        ),
        None => info!(
            commande_id = %receipt.commande.id,
            actor = %actor.user_id,
            status = %receipt.commande.status,
            "{what}"
        ),
    }
}

impl Workflow {
    /// The assigned employee takes the order: EN_ATTENTE -> ASSIGNEE.
    ///
    /// Status, availability flag and the admin notification are one unit of
    /// work. Of two concurrent accepts only one can pass the status
    /// compare-and-set; the other gets `Conflict`.
    pub async fn accept_commande(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<Receipt> {
        const ACTION: &str = "accepter une commande";
        if actor.role != Role::Employee {
            return Err(WorkflowError::forbidden(ACTION, "réservé aux employés"));
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        if !commande.is_assigned_to(actor.user_id) {
            return Err(WorkflowError::forbidden(
                ACTION,
                "cette commande est assignée à un autre employé",
            ));
        }

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(tx.as_mut(), &mut commande, CommandeEvent::Accept, now)
            .await?;
        tx.set_user_availability(actor.user_id, false).await?;

        if let Some(admin) = admin_recipient(tx.as_mut(), &commande).await? {
            let n = draft(
                commande.id,
                admin,
                NotificationKind::Acceptation,
                format!("La commande {} a été acceptée par l'employé.", commande.id),
                now,
            );
            persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        }

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "commande accepted");
        Ok(receipt)
    }

    /// Store a set of named measurements for the order's client.
    ///
    /// ASSIGNEE -> MESURE_ENREGISTREE; later states keep their status.
    pub async fn record_measurements(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        req: NewMeasurements,
    ) -> WorkflowResult<Receipt> {
        if req.valeurs.is_empty() {
            return Err(WorkflowError::validation("Au moins une mesure est requise."));
        }
        for v in &req.valeurs {
            if v.name.trim().is_empty() || !v.value.is_finite() || v.value <= 0.0 {
                return Err(WorkflowError::validation(format!(
                    "Mesure invalide : « {} » = {}.",
                    v.name, v.value
                )));
            }
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        require_assigned_or_admin(actor, &commande, "enregistrer les mesures")?;

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(tx.as_mut(), &mut commande, CommandeEvent::RecordMeasurements, now)
            .await?;
        let mesure = Mesure {
            id: Uuid::new_v4(),
            client_id: commande.client_id,
            commande_id: Some(commande.id),
            label: req.label,
            valeurs: req.valeurs,
            created_by: actor.user_id,
            created_at: now,
        };
        tx.insert_mesure(&mesure).await?;
        receipt.mesure = Some(mesure);

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "measurements recorded");
        Ok(receipt)
    }

    /// Production starts: ASSIGNEE | MESURE_ENREGISTREE -> EN_PRODUCTION.
    pub async fn confirm_preparation(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<Receipt> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        require_assigned_or_admin(actor, &commande, "confirmer la préparation")?;

        if self.settings.require_measurements_before_production
            && tx.list_mesures_for_commande(commande.id).await?.is_empty()
        {
            return Err(WorkflowError::validation(
                "Les mesures doivent être enregistrées avant la production.",
            ));
        }

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(tx.as_mut(), &mut commande, CommandeEvent::ConfirmPreparation, now)
            .await?;
        if let Some(admin) = admin_recipient(tx.as_mut(), &commande).await? {
            let n = draft(
                commande.id,
                admin,
                NotificationKind::Preparation,
                format!("La commande {} est passée en production.", commande.id),
                now,
            );
            persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        }

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "preparation confirmed");
        Ok(receipt)
    }

    /// The assigned employee hands the garment to quality control.
    pub async fn mark_ready_for_control(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<Receipt> {
        const ACTION: &str = "envoyer au contrôle";
        if actor.role != Role::Employee {
            return Err(WorkflowError::forbidden(ACTION, "réservé à l'employé assigné"));
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        if !commande.is_assigned_to(actor.user_id) {
            return Err(WorkflowError::forbidden(ACTION, "réservé à l'employé assigné"));
        }

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(tx.as_mut(), &mut commande, CommandeEvent::ReadyForControl, now)
            .await?;

        let message = format!("La commande {} est prête pour le contrôle qualité.", commande.id);
        let mut recipients = Vec::with_capacity(2);
        if let Some(c) = commande.controleur_id {
            recipients.push(c);
        }
        if let Some(admin) = admin_recipient(tx.as_mut(), &commande).await? {
            recipients.push(admin);
        }
        for r in recipients {
            let n = draft(commande.id, r, NotificationKind::Controle, message.clone(), now);
            persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        }

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "commande sent to control");
        Ok(receipt)
    }

    /// Designate the controller for an order.
    pub async fn assign_controleur(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        controleur_id: Uuid,
    ) -> WorkflowResult<Receipt> {
        require_admin(actor, "assigner un contrôleur")?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        if commande.status.is_delivered() {
            return Err(WorkflowError::Conflict(
                "La commande est déjà livrée.".to_string(),
            ));
        }
        let controleur = tx
            .fetch_user(controleur_id)
            .await?
            .ok_or(WorkflowError::not_found("utilisateur", controleur_id))?;
        if controleur.role != Role::Controlleur {
            return Err(WorkflowError::validation(format!(
                "{} n'est pas contrôleur.",
                controleur.display_name()
            )));
        }

        commande.controleur_id = Some(controleur.id);
        commande.updated_at = now;
        tx.update_commande_details(&commande).await?;

        let mut receipt = Receipt::new(commande.clone());
        let n = draft(
            commande.id,
            controleur.id,
            NotificationKind::Controle,
            format!("Vous êtes chargé du contrôle de la commande {}.", commande.id),
            now,
        );
        persist(tx.as_mut(), n, &mut receipt.notifications).await?;

        self.finish(tx, &receipt).await?;
        info!(
            commande_id = %commande.id,
            actor = %actor.user_id,
            controleur = %controleur.id,
            "controleur assigned"
        );
        Ok(receipt)
    }

    /// Record a quality-control verdict.
    ///
    /// Conforme: EN_CONTROLE -> PRET, the employee is told, the admin is
    /// told the order can be delivered, and the remuneration is generated.
    /// Non conforme: EN_CONTROLE -> NON_CONFORME, which starts the retouch
    /// SLA; the remuneration is only reduced if the sweep escalates.
    pub async fn perform_control(
        &self,
        actor: &Actor,
        commande_id: Uuid,
        verdict: ControlVerdict,
    ) -> WorkflowResult<Receipt> {
        const ACTION: &str = "contrôler une commande";
        if actor.role != Role::Controlleur {
            return Err(WorkflowError::forbidden(ACTION, "réservé aux contrôleurs"));
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;
        match commande.controleur_id {
            Some(c) if c != actor.user_id => {
                return Err(WorkflowError::forbidden(
                    ACTION,
                    "un autre contrôleur est désigné pour cette commande",
                ));
            }
            Some(_) => {}
            None => {
                commande.controleur_id = Some(actor.user_id);
                commande.updated_at = now;
                tx.update_commande_details(&commande).await?;
            }
        }

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(
                tx.as_mut(),
                &mut commande,
                CommandeEvent::Control {
                    conforme: verdict.conforme,
                },
                now,
            )
            .await?;

        let controle = Controle {
            id: Uuid::new_v4(),
            commande_id: commande.id,
            controleur_id: actor.user_id,
            conforme: verdict.conforme,
            remarques: verdict.remarques.clone(),
            created_at: now,
        };
        tx.insert_controle(&controle).await?;
        receipt.controle = Some(controle);

        let employee = commande.assigned_to;
        if verdict.conforme {
            if let Some(e) = employee {
                let n = draft(
                    commande.id,
                    e,
                    NotificationKind::Validation,
                    format!("La commande {} a été validée au contrôle qualité.", commande.id),
                    now,
                );
                persist(tx.as_mut(), n, &mut receipt.notifications).await?;
            }
            if let Some(admin) = admin_recipient(tx.as_mut(), &commande).await? {
                let n = draft(
                    commande.id,
                    admin,
                    NotificationKind::LivraisonPret,
                    format!("La commande {} est prête à être livrée.", commande.id),
                    now,
                );
                persist(tx.as_mut(), n, &mut receipt.notifications).await?;
            }
            match generate_remuneration(tx.as_mut(), &commande, &self.rates, now).await? {
                Ok(r) => receipt.remuneration = Some(r),
                Err(skip) => {
                    warn!(commande_id = %commande.id, reason = %skip, "remuneration skipped")
                }
            }
            receipt.employee_released = self
                .release_on(tx.as_mut(), &commande, EmployeeRelease::OnReady)
                .await?;
        } else if let Some(e) = employee {
            let remarques = verdict
                .remarques
                .as_deref()
                .map(|r| format!(" Remarques : {r}"))
                .unwrap_or_default();
            let n = draft(
                commande.id,
                e,
                NotificationKind::NonConforme,
                format!(
                    "La commande {} n'est pas conforme et doit être retouchée sous {}h.{remarques}",
                    commande.id, self.rates.non_conformite_sla_hours
                ),
                now,
            );
            persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        }

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "control recorded");
        Ok(receipt)
    }

    /// Hand the garment over: PRET -> LIVRE, or RETARD -> LIVRE once the late
    /// order has passed control.
    pub async fn deliver_commande(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<Receipt> {
        require_admin(actor, "livrer une commande")?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let mut commande = locked(tx.as_mut(), commande_id).await?;

        let mut receipt = Receipt::new(commande.clone());
        receipt.previous_status = self
            .apply_event(tx.as_mut(), &mut commande, CommandeEvent::Deliver, now)
            .await?;

        // Normally already generated by the conforme control.
        match generate_remuneration(tx.as_mut(), &commande, &self.rates, now).await? {
            Ok(r) => receipt.remuneration = Some(r),
            Err(skip) => debug!(
                commande_id = %commande.id,
                reason = %skip,
                "remuneration not generated at delivery"
            ),
        }

        if let Some(e) = commande.assigned_to {
            let n = draft(
                commande.id,
                e,
                NotificationKind::Livree,
                format!("La commande {} a été livrée au client.", commande.id),
                now,
            );
            persist(tx.as_mut(), n, &mut receipt.notifications).await?;
        }
        receipt.employee_released = self
            .release_on(tx.as_mut(), &commande, EmployeeRelease::OnDelivered)
            .await?;

        receipt.commande = commande;
        self.finish(tx, &receipt).await?;
        log_transition(&receipt, actor, "commande delivered");
        Ok(receipt)
    }
}
