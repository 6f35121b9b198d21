use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument};

use super::{
    dto::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest},
    jwt::{JwtKeys, TokenPair},
    services::{self, ProfileAttrs},
};
use crate::{error::ApiError, extract::JsonBody, state::AppState, users::dto::UserView};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register/", post(register))
        .route("/auth/login/", post(login))
        .route("/auth/refresh/", post(refresh))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let attrs = ProfileAttrs {
        first_name: payload.first_name,
        last_name: payload.last_name,
        bio: payload.bio,
        avatar: payload.avatar,
    };
    let user = services::create_user(
        state.store.as_ref(),
        payload.username.as_deref(),
        payload.email.as_deref(),
        payload.password.as_deref(),
        attrs,
    )
    .await?;

    let tokens = JwtKeys::from(&state.config.jwt)
        .issue_pair(user.public_id)
        .map_err(|e| ApiError::Internal(e.into()))?;

    info!(user = %user.public_id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserView::from(&user),
            tokens,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (user, tokens) =
        services::login(&state, payload.email.as_deref(), payload.password.as_deref()).await?;
    Ok(Json(AuthResponse {
        user: UserView::from(&user),
        tokens,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = services::refresh(&state, payload.refresh.as_deref()).await?;
    Ok(Json(tokens))
}
