use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{public_id::PublicId, users::dto::UserView};

#[derive(Debug, Clone, Serialize)]
pub struct MediaView {
    pub id: PublicId,
    pub url: String,
    pub file_name: String,
    pub is_video: bool,
    pub size: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: PublicId,
    pub author: UserView,
    pub body: String,
    pub edited: bool,
    pub media: Vec<MediaView>,
    pub likes_count: i64,
    pub liked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

/// Base64 payload in a JSON create request.
#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub file_name: String,
    pub data: String,
}

/// JSON form of post creation; the multipart form carries the same fields.
#[derive(Debug, Default, Deserialize)]
pub struct CreatePostRequest {
    pub author: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaPayload>,
}

/// PUT requires `body`; PATCH treats every field as optional.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePostRequest {
    pub body: Option<String>,
}
