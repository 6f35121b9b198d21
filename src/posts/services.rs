use anyhow::anyhow;
use tracing::{error, info, warn};

use super::{
    dto::{MediaView, PostView},
    media::{self, CheckedMedia, MediaUpload, URL_TTL_SECS},
};
use crate::{
    auth::{policy::Actor, services::lookup_by_public_id},
    db::{Media, Post, Store, User, MAX_MEDIA_PER_POST},
    error::{ApiError, FieldErrors},
    public_id::PublicId,
    state::AppState,
    storage::StorageClient,
    users::dto::UserView,
};

/// Resolves a post from a path segment. Malformed ids are not found.
pub async fn resolve_post(store: &dyn Store, raw: &str) -> Result<Post, ApiError> {
    let Some(id) = PublicId::parse(raw) else {
        return Err(ApiError::not_found());
    };
    store
        .post_by_public_id(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

/// Validates the request, stores payloads, then persists post and media.
///
/// Nothing is uploaded until every field and every payload has been checked;
/// uploaded objects are removed again when persisting fails.
pub async fn create_post(
    state: &AppState,
    requester: &User,
    author: Option<&str>,
    body: Option<&str>,
    uploads: Vec<MediaUpload>,
) -> Result<(Post, Vec<Media>), ApiError> {
    let mut errors = FieldErrors::new();

    let body = errors.require("body", body).map(str::to_string);
    if let Some(raw) = errors.require("author", author) {
        match lookup_by_public_id(state.store.as_ref(), raw).await? {
            None => errors.add("author", format!("Invalid pk \"{raw}\" - object does not exist.")),
            Some(u) if u.id != requester.id => {
                errors.add("author", "You can't create a post for another user")
            }
            Some(_) => {}
        }
    }

    let mut checked = Vec::with_capacity(uploads.len());
    if uploads.len() > MAX_MEDIA_PER_POST {
        errors.add(
            "media",
            format!("Cannot upload more than {MAX_MEDIA_PER_POST} media files."),
        );
    } else {
        for upload in uploads {
            match media::check(upload) {
                Ok(c) => checked.push(c),
                Err(e) => errors.add("media", e.to_string()),
            }
        }
    }

    errors.into_result()?;
    let body = body.unwrap_or_default();

    let stored = upload_all(state.storage.as_ref(), &checked).await?;
    let records = checked.iter().map(CheckedMedia::record).collect();
    match state.store.insert_post(requester.id, &body, records).await {
        Ok((post, media)) => {
            info!(post = %post.public_id, author = %requester.public_id, media = media.len(), "post created");
            Ok((post, media))
        }
        Err(e) => {
            remove_objects(state.storage.as_ref(), stored.iter().map(String::as_str)).await;
            Err(e.into())
        }
    }
}

async fn upload_all(
    storage: &dyn StorageClient,
    checked: &[CheckedMedia],
) -> Result<Vec<String>, ApiError> {
    let mut stored = Vec::with_capacity(checked.len());
    for item in checked {
        if let Err(e) = storage
            .put_object(&item.key, item.body.clone(), item.content_type)
            .await
        {
            error!(error = ?e, key = %item.key, "media upload failed");
            remove_objects(storage, stored.iter().map(String::as_str)).await;
            return Err(ApiError::Internal(e));
        }
        stored.push(item.key.clone());
    }
    Ok(stored)
}

/// Best effort; orphaned objects are logged, never surfaced.
async fn remove_objects<'a>(storage: &dyn StorageClient, keys: impl Iterator<Item = &'a str>) {
    for key in keys {
        if let Err(e) = storage.delete_object(key).await {
            warn!(error = ?e, key, "failed to remove media object");
        }
    }
}

/// Applies a body write. `require_body` is set for PUT.
pub async fn update_post(
    store: &dyn Store,
    mut post: Post,
    body: Option<&str>,
    require_body: bool,
) -> Result<Post, ApiError> {
    let mut errors = FieldErrors::new();
    let body = match body {
        None if !require_body => None,
        other => errors.require("body", other),
    };
    errors.into_result()?;

    if let Some(body) = body {
        post.body = body.to_string();
        post.edited = post.edited.after_body_write();
    }
    let saved = store.update_post(&post).await?;
    info!(post = %saved.public_id, edited = saved.edited.is_edited(), "post updated");
    Ok(saved)
}

/// Deletes the post, then its stored media payloads.
pub async fn delete_post(state: &AppState, post: &Post) -> Result<(), ApiError> {
    let media = state.store.media_for_post(post.id).await?;
    state.store.delete_post(post.id).await?;
    remove_objects(
        state.storage.as_ref(),
        media.iter().map(|m| m.file_key.as_str()),
    )
    .await;
    info!(post = %post.public_id, media = media.len(), "post deleted");
    Ok(())
}

pub async fn set_like(
    store: &dyn Store,
    user: &User,
    post: &Post,
    liked: bool,
) -> Result<(), ApiError> {
    store.set_like(user.id, post.id, liked).await?;
    info!(post = %post.public_id, user = %user.public_id, liked, "like toggled");
    Ok(())
}

pub async fn author_of(store: &dyn Store, post: &Post) -> Result<User, ApiError> {
    store
        .user_by_id(post.author_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow!("post {} has no author", post.public_id)))
}

/// Builds the client representation of a post as seen by `viewer`.
pub async fn render(
    state: &AppState,
    post: &Post,
    media: Option<Vec<Media>>,
    viewer: &Actor,
) -> Result<PostView, ApiError> {
    let author = author_of(state.store.as_ref(), post).await?;

    let media = match media {
        Some(m) => m,
        None => state.store.media_for_post(post.id).await?,
    };
    let mut views = Vec::with_capacity(media.len());
    for m in media {
        let url = state.storage.presign_get(&m.file_key, URL_TTL_SECS).await?;
        views.push(MediaView {
            id: m.public_id,
            url,
            file_name: m.file_name,
            is_video: m.is_video,
            size: m.size,
            created: m.created,
            updated: m.updated,
        });
    }

    let (likes_count, liked) = state
        .store
        .like_state(post.id, viewer.user().map(|u| u.id))
        .await?;

    Ok(PostView {
        id: post.public_id,
        author: UserView::from(&author),
        body: post.body.clone(),
        edited: post.edited.is_edited(),
        media: views,
        likes_count,
        liked,
        created: post.created,
        updated: post.updated,
    })
}
