use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    db::{Page, SortOrder},
    error::ApiError,
};

/// `Json<T>` whose rejection is reported as a 400 `ApiError`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(error = %rejection, "rejected json body");
                Err(ApiError::BadRequest(rejection.body_text()))
            }
        }
    }
}

/// `?ordering=-created&limit=20&offset=0` on list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub ordering: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

const MAX_LIMIT: i64 = 100;

impl ListQuery {
    pub fn page(&self) -> Result<Page, ApiError> {
        let order = match self.ordering.as_deref() {
            None | Some("") => SortOrder::default(),
            Some(raw) => SortOrder::parse(raw).ok_or_else(|| {
                ApiError::field(
                    "ordering",
                    "Expected one of: created, -created, updated, -updated.",
                )
            })?,
        };
        Ok(Page {
            order,
            limit: self.limit.clamp(1, MAX_LIMIT),
            offset: self.offset.max(0),
        })
    }
}
