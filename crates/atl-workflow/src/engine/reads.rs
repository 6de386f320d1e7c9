use atl_schemas::{Actor, Commande, Notification, Role, User};
use uuid::Uuid;

use super::{locked, Workflow};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::CommandeDetail;

/// Upper bound on a notification listing.
const MAX_NOTIFICATIONS: u32 = 200;

impl Workflow {
    /// Resolve an authenticated user id to an actor.
    pub async fn resolve_actor(&self, user_id: Uuid) -> WorkflowResult<User> {
        let mut tx = self.begin().await?;
        tx.fetch_user(user_id)
            .await?
            .ok_or(WorkflowError::not_found("utilisateur", user_id))
    }

    /// Order with everything it owns. Admins see every order; staff see the
    /// orders they work on or control.
    pub async fn commande_detail(
        &self,
        actor: &Actor,
        commande_id: Uuid,
    ) -> WorkflowResult<CommandeDetail> {
        let mut tx = self.begin().await?;
        let commande = locked(tx.as_mut(), commande_id).await?;
        let visible = actor.is_admin()
            || commande.is_assigned_to(actor.user_id)
            || (actor.role == Role::Controlleur && commande.controleur_id == Some(actor.user_id));
        if !visible {
            return Err(WorkflowError::forbidden(
                "consulter une commande",
                "cette commande ne vous concerne pas",
            ));
        }

        Ok(CommandeDetail {
            client: tx.fetch_client(commande.client_id).await?,
            style: tx.fetch_style(commande.style_id).await?,
            notifications: tx.list_notifications_for_commande(commande.id).await?,
            paiements: tx.list_paiements(commande.id).await?,
            controles: tx.list_controles(commande.id).await?,
            penalites: tx.list_penalites(commande.id).await?,
            remuneration: tx.fetch_remuneration_for_commande(commande.id).await?,
            mesures: tx.list_mesures_for_commande(commande.id).await?,
            fournitures: tx.list_fournitures(commande.id).await?,
            commande,
        })
    }

    /// Orders the actor works on or controls.
    pub async fn my_commandes(&self, actor: &Actor) -> WorkflowResult<Vec<Commande>> {
        let mut tx = self.begin().await?;
        Ok(tx.list_commandes_assigned_to(actor.user_id).await?)
    }

    /// Newest first.
    pub async fn my_notifications(
        &self,
        actor: &Actor,
        limit: u32,
    ) -> WorkflowResult<Vec<Notification>> {
        let mut tx = self.begin().await?;
        Ok(tx
            .list_notifications_for_user(actor.user_id, limit.clamp(1, MAX_NOTIFICATIONS))
            .await?)
    }
}
