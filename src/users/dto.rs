use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{db::User, public_id::PublicId};

/// Public part of the user returned to clients. Carries no credential material.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: PublicId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub email: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.public_id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            bio: u.bio.clone(),
            avatar: u.avatar.clone(),
            email: u.email.clone(),
            is_active: u.is_active,
            created: u.created,
            updated: u.updated,
        }
    }
}

/// PATCH body; `is_active`, `id` and timestamps are read-only and ignored.
#[derive(Debug, Default, Deserialize)]
pub struct PatchUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_has_hex_id_and_no_password() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: 7,
            public_id: PublicId::generate(),
            username: "u1".into(),
            email: "u1@x.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "$argon2id$secret".into(),
            is_active: true,
            is_superuser: false,
            is_staff: false,
            bio: None,
            avatar: None,
            last_login: None,
            created: now,
            updated: now,
        };
        let json = serde_json::to_value(UserView::from(&user)).unwrap();
        assert_eq!(json["id"], user.public_id.to_string());
        assert_eq!(json["email"], "u1@x.com");
        let text = json.to_string();
        assert!(!text.contains("password"));
        assert!(!text.contains("argon2"));
        assert!(json.get("created").unwrap().is_string());
    }
}
