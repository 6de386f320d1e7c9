use atl_schemas::{is_expo_push_token, Actor, Role, User};
use tracing::info;
use uuid::Uuid;

use super::{require_admin, Workflow};
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::NewUser;

fn require_self_or_admin(actor: &Actor, user_id: Uuid, action: &'static str) -> WorkflowResult<()> {
    if actor.is_admin() || actor.user_id == user_id {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(
            action,
            "réservé à l'utilisateur concerné ou à un administrateur",
        ))
    }
}

impl Workflow {
    /// Register a staff member, or return the existing one for a known
    /// identity-provider subject.
    ///
    /// New users are EMPLOYEE unless an admin asks for another role.
    pub async fn register_user(&self, actor: Option<&Actor>, req: NewUser) -> WorkflowResult<User> {
        let role = req.role.unwrap_or(Role::Employee);
        if role != Role::Employee && !actor.is_some_and(Actor::is_admin) {
            return Err(WorkflowError::forbidden(
                "créer un utilisateur",
                "seul un administrateur peut attribuer ce rôle",
            ));
        }
        let email = req.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(WorkflowError::validation("Adresse e-mail invalide."));
        }
        if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
            return Err(WorkflowError::validation("Le nom et le prénom sont obligatoires."));
        }

        let mut tx = self.begin().await?;
        if let Some(ext) = req.external_id.as_deref() {
            if let Some(existing) = tx.fetch_user_by_external_id(ext).await? {
                return Ok(existing);
            }
        }
        let user = User {
            id: Uuid::new_v4(),
            external_id: req.external_id,
            email,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            role,
            disponibilite: true,
            push_token: None,
            created_at: self.now(),
        };
        tx.insert_user(&user).await?;
        tx.commit().await?;
        info!(user_id = %user.id, role = %user.role.as_str(), "user registered");
        Ok(user)
    }

    pub async fn change_role(
        &self,
        actor: &Actor,
        user_id: Uuid,
        role: Role,
    ) -> WorkflowResult<User> {
        require_admin(actor, "changer un rôle")?;
        let mut tx = self.begin().await?;
        if !tx.set_user_role(user_id, role).await? {
            return Err(WorkflowError::not_found("utilisateur", user_id));
        }
        let user = tx
            .fetch_user(user_id)
            .await?
            .ok_or(WorkflowError::not_found("utilisateur", user_id))?;
        tx.commit().await?;
        info!(user_id = %user_id, actor = %actor.user_id, role = %role.as_str(), "role changed");
        Ok(user)
    }

    pub async fn set_availability(
        &self,
        actor: &Actor,
        user_id: Uuid,
        disponibilite: bool,
    ) -> WorkflowResult<User> {
        require_self_or_admin(actor, user_id, "changer la disponibilité")?;
        let mut tx = self.begin().await?;
        if !tx.set_user_availability(user_id, disponibilite).await? {
            return Err(WorkflowError::not_found("utilisateur", user_id));
        }
        let user = tx
            .fetch_user(user_id)
            .await?
            .ok_or(WorkflowError::not_found("utilisateur", user_id))?;
        tx.commit().await?;
        info!(user_id = %user_id, actor = %actor.user_id, disponibilite, "availability changed");
        Ok(user)
    }

    /// Register or clear the Expo push token of a device.
    pub async fn set_push_token(
        &self,
        actor: &Actor,
        user_id: Uuid,
        token: Option<String>,
    ) -> WorkflowResult<User> {
        require_self_or_admin(actor, user_id, "enregistrer un jeton push")?;
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if let Some(t) = token.as_deref() {
            if !is_expo_push_token(t) {
                return Err(WorkflowError::validation("Jeton push Expo invalide."));
            }
        }
        let mut tx = self.begin().await?;
        if !tx.set_push_token(user_id, token.as_deref()).await? {
            return Err(WorkflowError::not_found("utilisateur", user_id));
        }
        let user = tx
            .fetch_user(user_id)
            .await?
            .ok_or(WorkflowError::not_found("utilisateur", user_id))?;
        tx.commit().await?;
        Ok(user)
    }
}
