use anyhow::anyhow;
use tracing::info;

use super::dto::CommentView;
use crate::{
    auth::services::lookup_by_public_id,
    db::{Comment, Post, Store, User},
    error::{ApiError, FieldErrors},
    posts::services::resolve_post,
    public_id::PublicId,
    users::dto::UserView,
};

/// Resolves a comment under `post`. Comments of other posts are not found here.
pub async fn resolve_comment(store: &dyn Store, post: &Post, raw: &str) -> Result<Comment, ApiError> {
    let Some(id) = PublicId::parse(raw) else {
        return Err(ApiError::not_found());
    };
    store
        .comment_by_public_id(id)
        .await?
        .filter(|c| c.post_id == post.id)
        .ok_or_else(ApiError::not_found)
}

pub async fn create_comment(
    store: &dyn Store,
    requester: &User,
    url_post: &Post,
    post: Option<&str>,
    author: Option<&str>,
    body: Option<&str>,
) -> Result<Comment, ApiError> {
    let mut errors = FieldErrors::new();

    let body = errors.require("body", body).map(str::to_string);

    if let Some(raw) = errors.require("post", post) {
        match resolve_post(store, raw).await {
            Ok(p) if p.id == url_post.id => {}
            Ok(_) => errors.add("post", "Comment post must match the post in the URL."),
            Err(ApiError::NotFound(_)) => {
                errors.add("post", format!("Invalid pk \"{raw}\" - object does not exist."))
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(raw) = errors.require("author", author) {
        match lookup_by_public_id(store, raw).await? {
            None => errors.add("author", format!("Invalid pk \"{raw}\" - object does not exist.")),
            Some(u) if u.id != requester.id => {
                errors.add("author", "You can't create comment for another user")
            }
            Some(_) => {}
        }
    }

    errors.into_result()?;
    let comment = store
        .insert_comment(url_post.id, requester.id, &body.unwrap_or_default())
        .await?;
    info!(comment = %comment.public_id, post = %url_post.public_id, author = %requester.public_id, "comment created");
    Ok(comment)
}

/// Rewrites the body. The owning post never changes.
pub async fn update_comment(
    store: &dyn Store,
    mut comment: Comment,
    body: Option<&str>,
) -> Result<Comment, ApiError> {
    let mut errors = FieldErrors::new();
    let body = errors.require("body", body);
    errors.into_result()?;

    if let Some(body) = body {
        comment.body = body.to_string();
        comment.edited = comment.edited.after_body_write();
    }
    let saved = store.update_comment(&comment).await?;
    info!(comment = %saved.public_id, "comment updated");
    Ok(saved)
}

pub async fn delete_comment(store: &dyn Store, comment: &Comment) -> Result<(), ApiError> {
    store.delete_comment(comment.id).await?;
    info!(comment = %comment.public_id, "comment deleted");
    Ok(())
}

pub async fn author_of(store: &dyn Store, comment: &Comment) -> Result<User, ApiError> {
    store
        .user_by_id(comment.author_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow!("comment {} has no author", comment.public_id)))
}

pub async fn render(store: &dyn Store, comment: &Comment, post: &Post) -> Result<CommentView, ApiError> {
    let author = author_of(store, comment).await?;
    Ok(CommentView {
        id: comment.public_id,
        post: post.public_id,
        author: UserView::from(&author),
        body: comment.body.clone(),
        edited: comment.edited.is_edited(),
        created: comment.created,
        updated: comment.updated,
    })
}
