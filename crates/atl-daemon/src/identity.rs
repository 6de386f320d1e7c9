//! Request identity.
//!
//! Authentication happens upstream; the `x-atelier-user` header carries the
//! authenticated user id. The role always comes from the store, never from
//! the request.

use std::sync::Arc;

use atl_schemas::{Actor, ErrorKind};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-atelier-user";

/// The authenticated caller. Rejects with 401 when absent or unknown.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Actor);

/// Like [`CurrentUser`], but a request without the header is anonymous.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<Actor>);

fn header_user_id(parts: &Parts) -> Result<Option<Uuid>, ApiError> {
    let Some(raw) = parts.headers.get(USER_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(Some)
        .ok_or_else(|| ApiError::unauthenticated(format!("En-tête {USER_HEADER} invalide.")))
}

async fn resolve(state: &AppState, user_id: Uuid) -> Result<Actor, ApiError> {
    match state.workflow.resolve_actor(user_id).await {
        Ok(user) => Ok(user.actor()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(ApiError::unauthenticated("Utilisateur inconnu."))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = header_user_id(parts)?.ok_or_else(|| {
            ApiError::unauthenticated(format!("En-tête {USER_HEADER} manquant."))
        })?;
        Ok(CurrentUser(resolve(state, user_id).await?))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match header_user_id(parts)? {
            Some(id) => Ok(MaybeUser(Some(resolve(state, id).await?))),
            None => Ok(MaybeUser(None)),
        }
    }
}
