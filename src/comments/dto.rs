use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{public_id::PublicId, users::dto::UserView};

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: PublicId,
    pub post: PublicId,
    pub author: UserView,
    pub body: String,
    pub edited: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

/// `post` and `author` are public ids.
#[derive(Debug, Default, Deserialize)]
pub struct CreateCommentRequest {
    pub post: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
}

/// Only the body is writable after creation.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCommentRequest {
    pub body: Option<String>,
}
