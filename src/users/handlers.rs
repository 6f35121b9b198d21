use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{PatchUserRequest, UserView};
use crate::{
    auth::{
        extractors::CurrentActor,
        policy::{authorize, Action, Resource},
        services::{
            check_max_len, is_valid_email, is_valid_username, lookup_by_public_id,
            normalize_email, MAX_EMAIL_LEN, MAX_NAME_LEN,
        },
    },
    db::UserChanges,
    error::{ApiError, FieldErrors},
    extract::{JsonBody, ListQuery},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/", get(list_users))
        .route("/user/:id/", get(get_user).patch(patch_user))
}

#[instrument(skip(state, actor))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    authorize(&actor, Action::Read, Resource::User, None).into_result()?;
    let users = state
        .store
        .list_users(actor.is_superuser(), q.page()?)
        .await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

#[instrument(skip(state, actor))]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    authorize(&actor, Action::Read, Resource::User, None).into_result()?;
    let user = lookup_by_public_id(state.store.as_ref(), &id)
        .await?
        .filter(|u| !u.is_superuser || actor.is_superuser())
        .ok_or_else(ApiError::not_found)?;
    authorize(&actor, Action::Read, Resource::User, Some(user.public_id)).into_result()?;
    Ok(Json(UserView::from(&user)))
}

#[instrument(skip(state, actor, payload))]
pub async fn patch_user(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<PatchUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    authorize(&actor, Action::Update, Resource::User, None).into_result()?;
    let user = lookup_by_public_id(state.store.as_ref(), &id)
        .await?
        .filter(|u| !u.is_superuser || actor.is_superuser())
        .ok_or_else(ApiError::not_found)?;
    authorize(&actor, Action::Update, Resource::User, Some(user.public_id)).into_result()?;

    let changes = validate_changes(payload)?;
    let updated = state.store.update_user(user.id, changes).await?;
    info!(user = %updated.public_id, by = ?actor.public_id(), "user updated");
    Ok(Json(UserView::from(&updated)))
}

fn validate_changes(payload: PatchUserRequest) -> Result<UserChanges, ApiError> {
    let mut errors = FieldErrors::new();

    let username = match payload.username.as_deref() {
        None => None,
        Some(raw) => errors.require("username", Some(raw)).and_then(|u| {
            if is_valid_username(u) {
                Some(u.to_string())
            } else {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
                );
                None
            }
        }),
    };

    let email = match payload.email.as_deref() {
        None => None,
        Some(raw) => errors
            .require("email", Some(raw))
            .map(normalize_email)
            .and_then(|e| {
                if !check_max_len(&mut errors, "email", &e, MAX_EMAIL_LEN) {
                    None
                } else if is_valid_email(&e) {
                    Some(e)
                } else {
                    errors.add("email", "Enter a valid email address.");
                    None
                }
            }),
    };

    for (field, value) in [("first_name", &payload.first_name), ("last_name", &payload.last_name)] {
        if let Some(v) = value {
            check_max_len(&mut errors, field, v, MAX_NAME_LEN);
        }
    }

    errors.into_result()?;
    Ok(UserChanges {
        username,
        email,
        first_name: payload.first_name,
        last_name: payload.last_name,
        bio: payload.bio,
        avatar: payload.avatar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_validation_only_checks_present_fields() {
        let changes = validate_changes(PatchUserRequest {
            bio: Some("hello".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(changes.username.is_none() && changes.email.is_none());
        assert_eq!(changes.bio.as_deref(), Some("hello"));
    }

    #[test]
    fn patch_validation_rejects_bad_values() {
        let err = validate_changes(PatchUserRequest {
            username: Some("has space".into()),
            email: Some("nope".into()),
            ..Default::default()
        })
        .unwrap_err();
        match err {
            ApiError::Validation { fields, .. } => {
                assert!(fields.get("username").is_some());
                assert!(fields.get("email").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn patch_validation_caps_lengths() {
        let err = validate_changes(PatchUserRequest {
            username: Some("u".repeat(256)),
            email: Some(format!("{}@x.com", "e".repeat(254))),
            last_name: Some("l".repeat(256)),
            first_name: Some("f".repeat(255)),
            ..Default::default()
        })
        .unwrap_err();
        match err {
            ApiError::Validation { fields, .. } => {
                assert!(fields.get("username").is_some());
                assert_eq!(
                    fields.get("email").unwrap(),
                    ["Ensure this field has no more than 254 characters.".to_string()]
                );
                assert!(fields.get("last_name").is_some());
                assert!(fields.get("first_name").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn patch_validation_normalizes_email() {
        let changes = validate_changes(PatchUserRequest {
            email: Some(" New@X.com ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(changes.email.as_deref(), Some("new@x.com"));
    }
}
