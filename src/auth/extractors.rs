use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{jwt::JwtKeys, policy::Actor};
use crate::{error::ApiError, state::AppState};

/// Resolves the bearer token into an [`Actor`].
///
/// No `Authorization` header means an anonymous actor; a header that does not
/// carry a valid access token for an active user is rejected with 401.
pub struct CurrentActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Ok(CurrentActor(Actor::Anonymous));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .ok_or_else(|| {
                ApiError::AuthenticationFailed("Invalid Authorization header".into())
            })?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token.trim()).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            ApiError::InvalidToken
        })?;

        match state.store.user_by_public_id(claims.sub).await? {
            Some(user) if user.is_active => Ok(CurrentActor(Actor::User(user))),
            _ => {
                warn!(user = %claims.sub, "token subject missing or inactive");
                Err(ApiError::InvalidToken)
            }
        }
    }
}
