use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{CommentView, CreateCommentRequest, UpdateCommentRequest},
    services,
};
use crate::{
    auth::{
        extractors::CurrentActor,
        policy::{authorize, Action, Actor, Resource},
    },
    db::{Comment, Post},
    error::ApiError,
    extract::{JsonBody, ListQuery},
    posts::services::resolve_post,
    state::AppState,
};

pub fn comment_routes() -> Router<AppState> {
    Router::new()
        .route("/post/:id/comment/", get(list_comments).post(create_comment))
        .route(
            "/post/:id/comment/:comment_id/",
            get(get_comment).put(put_comment).delete(delete_comment),
        )
}

/// Loads post and comment, then checks `action` against the comment author.
async fn load_for(
    state: &AppState,
    actor: &Actor,
    action: Action,
    post_id: &str,
    comment_id: &str,
) -> Result<(Post, Comment), ApiError> {
    authorize(actor, action, Resource::Comment, None).into_result()?;
    let store = state.store.as_ref();
    let post = resolve_post(store, post_id).await?;
    let comment = services::resolve_comment(store, &post, comment_id).await?;
    let author = services::author_of(store, &comment).await?;
    authorize(actor, action, Resource::Comment, Some(author.public_id)).into_result()?;
    Ok((post, comment))
}

#[instrument(skip(state, actor))]
pub async fn list_comments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(post_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    authorize(&actor, Action::Read, Resource::Comment, None).into_result()?;
    let page = q.page()?;
    let store = state.store.as_ref();
    let post = resolve_post(store, &post_id).await?;
    let comments = store.list_comments(post.id, page).await?;
    let mut views = Vec::with_capacity(comments.len());
    for c in &comments {
        views.push(services::render(store, c, &post).await?);
    }
    Ok(Json(views))
}

#[instrument(skip(state, actor, payload))]
pub async fn create_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(post_id): Path<String>,
    JsonBody(payload): JsonBody<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), ApiError> {
    authorize(&actor, Action::Create, Resource::Comment, None).into_result()?;
    let Some(user) = actor.user() else {
        return Err(ApiError::Forbidden(
            "Authentication credentials were not provided.".into(),
        ));
    };
    let store = state.store.as_ref();
    let post = resolve_post(store, &post_id).await?;
    let comment = services::create_comment(
        store,
        user,
        &post,
        payload.post.as_deref(),
        payload.author.as_deref(),
        payload.body.as_deref(),
    )
    .await?;
    let view = services::render(store, &comment, &post).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, actor))]
pub async fn get_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((post_id, comment_id)): Path<(String, String)>,
) -> Result<Json<CommentView>, ApiError> {
    let (post, comment) = load_for(&state, &actor, Action::Read, &post_id, &comment_id).await?;
    Ok(Json(services::render(state.store.as_ref(), &comment, &post).await?))
}

#[instrument(skip(state, actor, payload))]
pub async fn put_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((post_id, comment_id)): Path<(String, String)>,
    JsonBody(payload): JsonBody<UpdateCommentRequest>,
) -> Result<Json<CommentView>, ApiError> {
    let (post, comment) = load_for(&state, &actor, Action::Update, &post_id, &comment_id).await?;
    let store = state.store.as_ref();
    let comment = services::update_comment(store, comment, payload.body.as_deref()).await?;
    Ok(Json(services::render(store, &comment, &post).await?))
}

#[instrument(skip(state, actor))]
pub async fn delete_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((post_id, comment_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (_, comment) = load_for(&state, &actor, Action::Delete, &post_id, &comment_id).await?;
    services::delete_comment(state.store.as_ref(), &comment).await?;
    Ok(StatusCode::NO_CONTENT)
}
