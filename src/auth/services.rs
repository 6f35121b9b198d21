//! Identity store operations and the token exchange built on top of them.

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    jwt::{JwtKeys, TokenPair},
    password::{check_length, hash_password, verify_password},
};
use crate::{
    config::AdminConfig,
    db::{NewUser, Store, StoreError, StoreResult, User},
    error::{ApiError, FieldErrors},
    public_id::PublicId,
    state::AppState,
};

const INVALID_CREDENTIALS: &str = "No active account found with the given credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Column widths of the users table.
pub(crate) const MAX_USERNAME_LEN: usize = 255;
pub(crate) const MAX_EMAIL_LEN: usize = 254;
pub(crate) const MAX_NAME_LEN: usize = 255;

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
    }
    username.chars().count() <= MAX_USERNAME_LEN && USERNAME_RE.is_match(username)
}

/// Records a `max_length` error when `value` is longer than `max` characters.
pub(crate) fn check_max_len(errors: &mut FieldErrors, field: &str, value: &str, max: usize) -> bool {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("Ensure this field has no more than {max} characters."),
        );
        false
    } else {
        true
    }
}

pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Optional profile attributes accepted at account creation.
#[derive(Debug, Default, Clone)]
pub struct ProfileAttrs {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

/// Creates a regular account. Username, email and password are all required.
pub async fn create_user(
    store: &dyn Store,
    username: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
    attrs: ProfileAttrs,
) -> Result<User, ApiError> {
    create_account(store, username, email, password, attrs, false).await
}

/// Same as [`create_user`] with superuser and staff flags set.
pub async fn create_superuser(
    store: &dyn Store,
    username: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
    attrs: ProfileAttrs,
) -> Result<User, ApiError> {
    create_account(store, username, email, password, attrs, true).await
}

async fn create_account(
    store: &dyn Store,
    username: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
    attrs: ProfileAttrs,
    elevated: bool,
) -> Result<User, ApiError> {
    let mut errors = FieldErrors::new();

    let username = errors.require("username", username);
    if let Some(u) = username {
        if !is_valid_username(u) {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }
    }

    let email = errors.require("email", email).map(normalize_email);
    if let Some(e) = &email {
        if check_max_len(&mut errors, "email", e, MAX_EMAIL_LEN) && !is_valid_email(e) {
            errors.add("email", "Enter a valid email address.");
        }
    }

    let password = errors.require_untrimmed("password", password);
    if let Some(p) = password {
        if let Err(msg) = check_length(p) {
            errors.add("password", msg);
        }
    }

    for (field, value) in [("first_name", &attrs.first_name), ("last_name", &attrs.last_name)] {
        if let Some(v) = value {
            check_max_len(&mut errors, field, v, MAX_NAME_LEN);
        }
    }

    errors.into_result()?;
    let (Some(username), Some(email), Some(password)) = (username, email, password) else {
        return Err(ApiError::BadRequest("incomplete credentials".into()));
    };

    let password_hash = hash_password(password).context("hash password")?;
    let user = store
        .insert_user(NewUser {
            username: username.to_string(),
            email,
            first_name: attrs.first_name.unwrap_or_default(),
            last_name: attrs.last_name.unwrap_or_default(),
            password_hash,
            is_superuser: elevated,
            is_staff: elevated,
            bio: attrs.bio,
            avatar: attrs.avatar,
        })
        .await?;

    info!(user = %user.public_id, superuser = elevated, "account created");
    Ok(user)
}

/// Resolves a client-supplied identifier. Malformed input is simply not found.
pub async fn lookup_by_public_id(store: &dyn Store, raw: &str) -> StoreResult<Option<User>> {
    match PublicId::parse(raw) {
        Some(id) => store.user_by_public_id(id).await,
        None => Ok(None),
    }
}

/// Validates an email/password pair and issues a token pair for it.
pub async fn login(
    state: &AppState,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<(User, TokenPair), ApiError> {
    let mut errors = FieldErrors::new();
    let email = errors.require("email", email).map(normalize_email);
    let password = errors.require_untrimmed("password", password);
    errors.into_result()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::BadRequest("incomplete credentials".into()));
    };

    let Some(mut user) = state.store.user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(ApiError::AuthenticationFailed(INVALID_CREDENTIALS.into()));
    };

    let ok = verify_password(password, &user.password_hash).context("verify password")?;
    if !ok || !user.is_active {
        warn!(user = %user.public_id, "login rejected");
        return Err(ApiError::AuthenticationFailed(INVALID_CREDENTIALS.into()));
    }

    let tokens = JwtKeys::from(&state.config.jwt)
        .issue_pair(user.public_id)
        .context("sign token pair")?;

    if state.config.jwt.update_last_login {
        let now = OffsetDateTime::now_utc();
        state.store.touch_last_login(user.id, now).await?;
        user.last_login = Some(now);
    }

    info!(user = %user.public_id, "user logged in");
    Ok((user, tokens))
}

/// Exchanges a refresh token for a fresh pair.
pub async fn refresh(state: &AppState, token: Option<&str>) -> Result<TokenPair, ApiError> {
    let mut errors = FieldErrors::new();
    let token = errors.require("refresh", token);
    errors.into_result()?;
    let token = token.ok_or_else(|| ApiError::field("refresh", "This field is required."))?;

    let keys = JwtKeys::from(&state.config.jwt);
    let claims = keys.verify_refresh(token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        ApiError::InvalidToken
    })?;

    match state.store.user_by_public_id(claims.sub).await? {
        Some(user) if user.is_active => {
            let tokens = keys.issue_pair(user.public_id).context("sign token pair")?;
            info!(user = %user.public_id, "token pair refreshed");
            Ok(tokens)
        }
        _ => {
            warn!(user = %claims.sub, "refresh for missing or inactive user");
            Err(ApiError::InvalidToken)
        }
    }
}

/// Provisions the configured superuser unless an account with that email exists.
pub async fn ensure_superuser(store: &dyn Store, admin: &AdminConfig) -> anyhow::Result<()> {
    let email = normalize_email(&admin.email);
    if store
        .user_by_email(&email)
        .await
        .map_err(store_anyhow)?
        .is_some()
    {
        return Ok(());
    }
    create_superuser(
        store,
        Some(&admin.username),
        Some(&email),
        Some(&admin.password),
        ProfileAttrs::default(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("provision superuser {email}: {e}"))?;
    Ok(())
}

fn store_anyhow(e: StoreError) -> anyhow::Error {
    match e {
        StoreError::Backend(e) => e,
        other => anyhow::anyhow!(other),
    }
}
