use std::sync::Arc;

use anyhow::{Context, Result};
use atl_config::WorkshopConfig;
use atl_schemas::{Actor, Role};
use atl_workflow::{NewUser, SystemClock, Workflow};
use uuid::Uuid;

use super::open_store;

/// Shell access stands in for an ADMIN caller, which is how the first admin
/// account gets created.
pub async fn add(email: &str, first_name: &str, last_name: &str, role: Role) -> Result<()> {
    let store = open_store().await?;
    let workflow = Workflow::new(store, Arc::new(SystemClock), &WorkshopConfig::default())?;
    let operator = Actor::new(Uuid::nil(), Role::Admin);

    let user = workflow
        .register_user(
            Some(&operator),
            NewUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                external_id: None,
                role: Some(role),
            },
        )
        .await
        .with_context(|| format!("could not create user {email}"))?;

    println!("user_id={}", user.id);
    println!("role={}", user.role.as_str());
    Ok(())
}
