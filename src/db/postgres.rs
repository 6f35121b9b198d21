use anyhow::Context;
use axum::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    Comment, Media, NewMedia, NewUser, Page, Post, Store, StoreError, StoreResult, User,
    UserChanges, MAX_MEDIA_PER_POST,
};
use crate::public_id::PublicId;

const USER_COLUMNS: &str = "id, public_id, username, email, first_name, last_name, \
     password_hash, is_active, is_superuser, is_staff, bio, avatar, last_login, created, updated";
const POST_COLUMNS: &str = "id, public_id, author_id, body, edited, created, updated";
const MEDIA_COLUMNS: &str =
    "id, public_id, post_id, file_key, file_name, is_video, size, created, updated";
const COMMENT_COLUMNS: &str =
    "id, public_id, post_id, author_id, body, edited, created, updated";

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    public_id: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    is_active: bool,
    is_superuser: bool,
    is_staff: bool,
    bio: Option<String>,
    avatar: Option<String>,
    last_login: Option<OffsetDateTime>,
    created: OffsetDateTime,
    updated: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            public_id: r.public_id.into(),
            username: r.username,
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            password_hash: r.password_hash,
            is_active: r.is_active,
            is_superuser: r.is_superuser,
            is_staff: r.is_staff,
            bio: r.bio,
            avatar: r.avatar,
            last_login: r.last_login,
            created: r.created,
            updated: r.updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct PostRow {
    id: i64,
    public_id: Uuid,
    author_id: i64,
    body: String,
    edited: bool,
    created: OffsetDateTime,
    updated: OffsetDateTime,
}

impl From<PostRow> for Post {
    fn from(r: PostRow) -> Self {
        Self {
            id: r.id,
            public_id: r.public_id.into(),
            author_id: r.author_id,
            body: r.body,
            edited: r.edited.into(),
            created: r.created,
            updated: r.updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct MediaRow {
    id: i64,
    public_id: Uuid,
    post_id: i64,
    file_key: String,
    file_name: String,
    is_video: bool,
    size: i64,
    created: OffsetDateTime,
    updated: OffsetDateTime,
}

impl From<MediaRow> for Media {
    fn from(r: MediaRow) -> Self {
        Self {
            id: r.id,
            public_id: r.public_id.into(),
            post_id: r.post_id,
            file_key: r.file_key,
            file_name: r.file_name,
            is_video: r.is_video,
            size: r.size,
            created: r.created,
            updated: r.updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: i64,
    public_id: Uuid,
    post_id: i64,
    author_id: i64,
    body: String,
    edited: bool,
    created: OffsetDateTime,
    updated: OffsetDateTime,
}

impl From<CommentRow> for Comment {
    fn from(r: CommentRow) -> Self {
        Self {
            id: r.id,
            public_id: r.public_id.into(),
            post_id: r.post_id,
            author_id: r.author_id,
            body: r.body,
            edited: r.edited.into(),
            created: r.created,
            updated: r.updated,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                let field = match db.constraint() {
                    Some(c) if c.contains("username") => "username",
                    Some(c) if c.contains("email") => "email",
                    _ => "record",
                };
                return StoreError::Duplicate { field };
            }
        }
        StoreError::Backend(anyhow::Error::new(e).context("postgres query failed"))
    }
}

/// Deletes blocked by an `ON DELETE RESTRICT` key surface as `Restricted`.
fn restrict_violation(e: sqlx::Error) -> StoreError {
    let restricted = e.as_database_error().is_some_and(|db| {
        db.is_foreign_key_violation() || db.code().as_deref() == Some("23001")
    });
    if restricted {
        StoreError::Restricted("comments")
    } else {
        e.into()
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, new: NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (public_id, username, email, first_name, last_name,
                               password_hash, is_superuser, is_staff, bio, avatar)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(PublicId::generate())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.password_hash)
        .bind(new.is_superuser)
        .bind(new.is_staff)
        .bind(&new.bio)
        .bind(&new.avatar)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn user_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE public_id = $1"
        ))
        .bind(public_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_users(&self, include_superusers: bool, page: Page) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1 OR NOT is_superuser)
            ORDER BY {}
            LIMIT $2 OFFSET $3
            "#,
            page.order.sql()
        ))
        .bind(include_superusers)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET username   = COALESCE($2, username),
                   email      = COALESCE($3, email),
                   first_name = COALESCE($4, first_name),
                   last_name  = COALESCE($5, last_name),
                   bio        = COALESCE($6, bio),
                   avatar     = COALESCE($7, avatar),
                   updated    = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.bio)
        .bind(&changes.avatar)
        .fetch_optional(&self.db)
        .await?;
        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    async fn touch_last_login(&self, id: i64, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(restrict_violation)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_post(
        &self,
        author_id: i64,
        body: &str,
        media: Vec<NewMedia>,
    ) -> StoreResult<(Post, Vec<Media>)> {
        if media.len() > MAX_MEDIA_PER_POST {
            return Err(StoreError::LimitExceeded {
                field: "media",
                max: MAX_MEDIA_PER_POST,
            });
        }

        let mut tx = self.db.begin().await?;
        let post: Post = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            INSERT INTO posts (public_id, author_id, body)
            VALUES ($1, $2, $3)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(PublicId::generate())
        .bind(author_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?
        .into();

        let mut attached = Vec::with_capacity(media.len());
        for m in media {
            let row = sqlx::query_as::<_, MediaRow>(&format!(
                r#"
                INSERT INTO post_media (public_id, post_id, file_key, file_name, is_video, size)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {MEDIA_COLUMNS}
                "#
            ))
            .bind(PublicId::generate())
            .bind(post.id)
            .bind(&m.file_key)
            .bind(&m.file_name)
            .bind(m.is_video)
            .bind(m.size)
            .fetch_one(&mut *tx)
            .await?;
            attached.push(row.into());
        }
        tx.commit().await?;

        Ok((post, attached))
    }

    async fn post_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE public_id = $1"
        ))
        .bind(public_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_posts(&self, page: Page) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY {} LIMIT $1 OFFSET $2",
            page.order.sql()
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_post(&self, post: &Post) -> StoreResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts
               SET body = $2, edited = edited OR $3, updated = now()
             WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(post.id)
        .bind(&post.body)
        .bind(post.edited.is_edited())
        .fetch_optional(&self.db)
        .await?;
        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    async fn delete_post(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(restrict_violation)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn media_for_post(&self, post_id: i64) -> StoreResult<Vec<Media>> {
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM post_media WHERE post_id = $1 ORDER BY id ASC"
        ))
        .bind(post_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_like(&self, user_id: i64, post_id: i64, liked: bool) -> StoreResult<()> {
        let query = if liked {
            "INSERT INTO post_likes (user_id, post_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        } else {
            "DELETE FROM post_likes WHERE user_id = $1 AND post_id = $2"
        };
        sqlx::query(query)
            .bind(user_id)
            .bind(post_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn like_state(&self, post_id: i64, user_id: Option<i64>) -> StoreResult<(i64, bool)> {
        let (count, liked): (i64, Option<bool>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), BOOL_OR(user_id = $2)
            FROM post_likes
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok((count, liked.unwrap_or(false)))
    }

    async fn insert_comment(&self, post_id: i64, author_id: i64, body: &str) -> StoreResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            INSERT INTO comments (public_id, post_id, author_id, body)
            VALUES ($1, $2, $3, $4)
            RETURNING {COMMENT_COLUMNS}
            "#
        ))
        .bind(PublicId::generate())
        .bind(post_id)
        .bind(author_id)
        .bind(body)
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            let dangling = e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation());
            if dangling {
                StoreError::NotFound
            } else {
                e.into()
            }
        })?;
        Ok(row.into())
    }

    async fn comment_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE public_id = $1"
        ))
        .bind(public_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_comments(&self, post_id: i64, page: Page) -> StoreResult<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE post_id = $1
            ORDER BY {}
            LIMIT $2 OFFSET $3
            "#,
            page.order.sql()
        ))
        .bind(post_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            UPDATE comments
               SET body = $2, edited = edited OR $3, updated = now()
             WHERE id = $1
            RETURNING {COMMENT_COLUMNS}
            "#
        ))
        .bind(comment.id)
        .bind(&comment.body)
        .bind(comment.edited.is_edited())
        .fetch_optional(&self.db)
        .await?;
        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    async fn delete_comment(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
