use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use tracing::{info, instrument, warn};

use super::{
    dto::{CreatePostRequest, PostView, UpdatePostRequest},
    media::{MediaError, MediaUpload, MAX_MEDIA_BYTES},
    services,
};
use crate::{
    auth::{
        extractors::CurrentActor,
        policy::{authorize, Action, Actor, Resource},
    },
    db::{Post, User, MAX_MEDIA_PER_POST},
    error::ApiError,
    extract::{JsonBody, ListQuery},
    state::AppState,
};

/// Room for a full set of media, base64-inflated, plus form fields.
const MAX_BODY_BYTES: usize = MAX_MEDIA_PER_POST * MAX_MEDIA_BYTES / 3 * 4 + 1024 * 1024;

pub fn post_routes() -> Router<AppState> {
    Router::new()
        .route("/post/", get(list_posts).post(create_post))
        .route(
            "/post/:id/",
            get(get_post)
                .put(put_post)
                .patch(patch_post)
                .delete(delete_post),
        )
        .route("/post/:id/like/", post(like_post))
        .route("/post/:id/remove_like/", post(remove_like))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Post creation input, from either `multipart/form-data` or JSON.
pub struct CreatePostForm {
    pub author: Option<String>,
    pub body: Option<String>,
    pub media: Vec<MediaUpload>,
}

#[async_trait]
impl FromRequest<AppState> for CreatePostForm {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let mp = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            read_multipart(mp).await
        } else {
            let JsonBody(payload) = JsonBody::<CreatePostRequest>::from_request(req, state).await?;
            from_json(payload)
        }
    }
}

async fn read_multipart(mut mp: Multipart) -> Result<CreatePostForm, ApiError> {
    let mut form = CreatePostForm {
        author: None,
        body: None,
        media: Vec::new(),
    };
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "author" | "body" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if name == "author" {
                    form.author = Some(text);
                } else {
                    form.body = Some(text);
                }
            }
            "media" | "media[]" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                form.media.push(MediaUpload { file_name, body });
            }
            other => warn!(field = other, "ignoring unknown multipart field"),
        }
    }
    Ok(form)
}

fn from_json(payload: CreatePostRequest) -> Result<CreatePostForm, ApiError> {
    let mut media = Vec::with_capacity(payload.media.len());
    for item in payload.media {
        let raw = STANDARD
            .decode(item.data.trim())
            .map_err(|_| MediaError::BadEncoding {
                file_name: item.file_name.clone(),
            })?;
        media.push(MediaUpload {
            file_name: item.file_name,
            body: Bytes::from(raw),
        });
    }
    Ok(CreatePostForm {
        author: payload.author,
        body: payload.body,
        media,
    })
}

/// Loads the post and runs the instance-level check against its author.
async fn load_for(
    state: &AppState,
    actor: &Actor,
    action: Action,
    id: &str,
) -> Result<Post, ApiError> {
    authorize(actor, action, Resource::Post, None).into_result()?;
    let post = services::resolve_post(state.store.as_ref(), id).await?;
    let author = services::author_of(state.store.as_ref(), &post).await?;
    authorize(actor, action, Resource::Post, Some(author.public_id)).into_result()?;
    Ok(post)
}

/// The policy has already rejected anonymous actors for every caller.
fn requester(actor: &Actor) -> Result<&User, ApiError> {
    actor.user().ok_or_else(|| {
        ApiError::Forbidden("Authentication credentials were not provided.".into())
    })
}

#[instrument(skip(state, actor))]
pub async fn list_posts(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    authorize(&actor, Action::Read, Resource::Post, None).into_result()?;
    let posts = state.store.list_posts(q.page()?).await?;
    let mut views = Vec::with_capacity(posts.len());
    for post in &posts {
        views.push(services::render(&state, post, None, &actor).await?);
    }
    Ok(Json(views))
}

#[instrument(skip(state, actor, form))]
pub async fn create_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    form: CreatePostForm,
) -> Result<(StatusCode, Json<PostView>), ApiError> {
    authorize(&actor, Action::Create, Resource::Post, None).into_result()?;
    let user = requester(&actor)?;
    let (post, media) = services::create_post(
        &state,
        user,
        form.author.as_deref(),
        form.body.as_deref(),
        form.media,
    )
    .await?;
    let view = services::render(&state, &post, Some(media), &actor).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, actor))]
pub async fn get_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<PostView>, ApiError> {
    let post = load_for(&state, &actor, Action::Read, &id).await?;
    Ok(Json(services::render(&state, &post, None, &actor).await?))
}

#[instrument(skip(state, actor, payload))]
pub async fn put_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<UpdatePostRequest>,
) -> Result<Json<PostView>, ApiError> {
    let post = load_for(&state, &actor, Action::Update, &id).await?;
    let post = services::update_post(state.store.as_ref(), post, payload.body.as_deref(), true).await?;
    Ok(Json(services::render(&state, &post, None, &actor).await?))
}

#[instrument(skip(state, actor, payload))]
pub async fn patch_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<UpdatePostRequest>,
) -> Result<Json<PostView>, ApiError> {
    let post = load_for(&state, &actor, Action::Update, &id).await?;
    let post =
        services::update_post(state.store.as_ref(), post, payload.body.as_deref(), false).await?;
    Ok(Json(services::render(&state, &post, None, &actor).await?))
}

#[instrument(skip(state, actor))]
pub async fn delete_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let post = load_for(&state, &actor, Action::Delete, &id).await?;
    services::delete_post(&state, &post).await?;
    info!(post = %post.public_id, by = ?actor.public_id(), "post removed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, actor))]
pub async fn like_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<PostView>, ApiError> {
    toggle_like(state, actor, id, true).await
}

#[instrument(skip(state, actor))]
pub async fn remove_like(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<PostView>, ApiError> {
    toggle_like(state, actor, id, false).await
}

async fn toggle_like(
    state: AppState,
    actor: Actor,
    id: String,
    liked: bool,
) -> Result<Json<PostView>, ApiError> {
    let post = load_for(&state, &actor, Action::Like, &id).await?;
    services::set_like(state.store.as_ref(), requester(&actor)?, &post, liked).await?;
    Ok(Json(services::render(&state, &post, None, &actor).await?))
}
