//! Records and the datastore seam.
//!
//! Every record carries an internal `id` (arena slot or BIGSERIAL) next to its
//! `public_id`. Only the latter ever leaves the process.

use axum::async_trait;
use time::OffsetDateTime;

use crate::public_id::PublicId;

pub mod memory;
pub mod postgres;

/// Upper bound on media attached to a single post.
pub const MAX_MEDIA_PER_POST: usize = 10;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub public_id: PublicId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub last_login: Option<OffsetDateTime>,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

/// Partial update of the editable profile fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

/// One-way edit marker carried by posts and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditState {
    #[default]
    Original,
    Edited,
}

impl EditState {
    /// The only transition there is: a body write leaves the record edited.
    pub fn after_body_write(self) -> Self {
        EditState::Edited
    }

    pub fn is_edited(self) -> bool {
        matches!(self, EditState::Edited)
    }
}

impl From<bool> for EditState {
    fn from(edited: bool) -> Self {
        if edited {
            EditState::Edited
        } else {
            EditState::Original
        }
    }
}

#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub public_id: PublicId,
    pub author_id: i64,
    pub body: String,
    pub edited: EditState,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Media {
    pub id: i64,
    pub public_id: PublicId,
    pub post_id: i64,
    pub file_key: String,
    pub file_name: String,
    pub is_video: bool,
    pub size: i64,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub file_key: String,
    pub file_name: String,
    pub is_video: bool,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: i64,
    pub public_id: PublicId,
    pub post_id: i64,
    pub author_id: i64,
    pub body: String,
    pub edited: EditState,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Created,
    CreatedDesc,
    Updated,
    #[default]
    UpdatedDesc,
}

impl SortOrder {
    /// Accepts the `ordering` query values `created`, `-created`, `updated`, `-updated`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "created" => Some(SortOrder::Created),
            "-created" => Some(SortOrder::CreatedDesc),
            "updated" => Some(SortOrder::Updated),
            "-updated" => Some(SortOrder::UpdatedDesc),
            _ => None,
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortOrder::Created => "created ASC, id ASC",
            SortOrder::CreatedDesc => "created DESC, id DESC",
            SortOrder::Updated => "updated ASC, id ASC",
            SortOrder::UpdatedDesc => "updated DESC, id DESC",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            order: SortOrder::default(),
            limit: 20,
            offset: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("{field} already exists")]
    Duplicate { field: &'static str },
    #[error("record is still referenced by {0}")]
    Restricted(&'static str),
    #[error("{field} exceeds the limit of {max}")]
    LimitExceeded { field: &'static str, max: usize },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Relational datastore used by every resource manager.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, new: NewUser) -> StoreResult<User>;
    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn user_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self, include_superusers: bool, page: Page) -> StoreResult<Vec<User>>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User>;
    async fn touch_last_login(&self, id: i64, at: OffsetDateTime) -> StoreResult<()>;
    /// Removes the user and their posts. Refused while comments point at them.
    async fn delete_user(&self, id: i64) -> StoreResult<()>;

    /// Inserts the post and its media atomically.
    async fn insert_post(
        &self,
        author_id: i64,
        body: &str,
        media: Vec<NewMedia>,
    ) -> StoreResult<(Post, Vec<Media>)>;
    async fn post_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Post>>;
    async fn list_posts(&self, page: Page) -> StoreResult<Vec<Post>>;
    /// Persists body and edit state. The stored edit flag is never cleared.
    async fn update_post(&self, post: &Post) -> StoreResult<Post>;
    /// Removes the post with its media and likes. Refused while comments exist.
    async fn delete_post(&self, id: i64) -> StoreResult<()>;
    async fn media_for_post(&self, post_id: i64) -> StoreResult<Vec<Media>>;
    async fn set_like(&self, user_id: i64, post_id: i64, liked: bool) -> StoreResult<()>;
    /// Like count for the post and whether `user_id` is among the likers.
    async fn like_state(&self, post_id: i64, user_id: Option<i64>) -> StoreResult<(i64, bool)>;

    async fn insert_comment(&self, post_id: i64, author_id: i64, body: &str) -> StoreResult<Comment>;
    async fn comment_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Comment>>;
    async fn list_comments(&self, post_id: i64, page: Page) -> StoreResult<Vec<Comment>>;
    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment>;
    async fn delete_comment(&self, id: i64) -> StoreResult<()>;
}
