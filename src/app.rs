use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, comments, posts, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(users::router())
                .merge(posts::router())
                .merge(comments::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, ms, "response");
                        } else {
                            tracing::info!(%status, ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::services::{create_superuser, ProfileAttrs};

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Registers `name` and returns (access token, public id, refresh token).
    async fn register(app: &Router, name: &str) -> (String, String, String) {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/register/",
            None,
            Some(json!({
                "username": name,
                "email": format!("{name}@x.com"),
                "password": "pw123456",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["access"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
            body["refresh"].as_str().unwrap().to_string(),
        )
    }

    async fn new_post(app: &Router, token: &str, author: &str, media: usize) -> (StatusCode, Value) {
        let files: Vec<Value> = (0..media)
            .map(|i| json!({ "file_name": format!("p{i}.png"), "data": STANDARD.encode(b"png") }))
            .collect();
        send(
            app,
            Method::POST,
            "/api/post/",
            Some(token),
            Some(json!({ "author": author, "body": "hello", "media": files })),
        )
        .await
    }

    fn app() -> Router {
        build_app(AppState::fake().0)
    }

    #[tokio::test]
    async fn health_is_up() {
        let res = app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_returns_tokens_without_password() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register/",
            None,
            Some(json!({ "username": "u1", "email": "u1@x.com", "password": "pw123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!body["access"].as_str().unwrap().is_empty());
        assert!(!body["refresh"].as_str().unwrap().is_empty());
        let user = body["user"].as_object().unwrap();
        assert!(user.keys().all(|k| !k.contains("password")));
        assert_eq!(user["id"].as_str().unwrap().len(), 32);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register/",
            None,
            Some(json!({ "username": "u2", "email": "U1@x.com", "password": "pw123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["email"].is_array());
    }

    #[tokio::test]
    async fn login_and_refresh() {
        let app = app();
        register(&app, "u1").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login/",
            None,
            Some(json!({ "email": "u1@x.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_failed");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login/",
            None,
            Some(json!({ "email": "u1@x.com", "password": "pw123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let refresh = body["refresh"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/refresh/",
            None,
            Some(json!({ "refresh": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].is_string() && body["refresh"].is_string());
    }

    #[tokio::test]
    async fn tampered_refresh_is_token_not_valid() {
        let app = app();
        let (_, _, refresh) = register(&app, "u1").await;
        let mut chars: Vec<char> = refresh.chars().collect();
        let i = chars.len() - 10;
        chars[i] = if chars[i] == 'x' { 'y' } else { 'x' };
        let tampered: String = chars.into_iter().collect();

        for token in [tampered, "garbage".to_string()] {
            let (status, body) = send(
                &app,
                Method::POST,
                "/api/auth/refresh/",
                None,
                Some(json!({ "refresh": token })),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["code"], "token_not_valid");
        }
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let app = app();
        let (access, _, _) = register(&app, "u1").await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/refresh/",
            None,
            Some(json!({ "refresh": access })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn anonymous_reads_but_cannot_write() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/api/post/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/post/",
            None,
            Some(json!({ "author": "x", "body": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "permission_denied");

        let (status, _) = send(&app, Method::GET, "/api/user/", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bad_bearer_token_is_rejected() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/api/post/", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_not_valid");
    }

    #[tokio::test]
    async fn ten_media_accepted_eleven_rejected() {
        let app = app();
        let (token, me, _) = register(&app, "u1").await;

        let (status, body) = new_post(&app, &token, &me, 10).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["media"].as_array().unwrap().len(), 10);
        assert_eq!(body["author"]["id"], me.as_str());
        assert_eq!(body["edited"], false);

        let (status, body) = new_post(&app, &token, &me, 11).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["media"].is_array());

        let (_, list) = send(&app, Method::GET, "/api/post/", None, None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multipart_create() {
        let (state, storage) = AppState::fake();
        let app = build_app(state);
        let (token, me, _) = register(&app, "u1").await;

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"author\"\r\n\r\n{me}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"body\"\r\n\r\nfrom a form\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"media\"; filename=\"clip.MP4\"\r\n\
             Content-Type: video/mp4\r\n\r\nvideo-bytes\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let req = Request::post("/api/post/")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let view: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(view["body"], "from a form");
        assert_eq!(view["media"][0]["is_video"], true);
        assert_eq!(view["media"][0]["file_name"], "clip.MP4");
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn edited_flips_on_first_update_and_stays() {
        let app = app();
        let (token, me, _) = register(&app, "u1").await;
        let (_, post) = new_post(&app, &token, &me, 0).await;
        let uri = format!("/api/post/{}/", post["id"].as_str().unwrap());

        let (status, body) = send(&app, Method::PATCH, &uri, Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], false);

        let (status, body) =
            send(&app, Method::PUT, &uri, Some(&token), Some(json!({ "body": "v2" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], true);

        let (_, body) =
            send(&app, Method::PATCH, &uri, Some(&token), Some(json!({ "body": "v3" }))).await;
        assert_eq!(body["edited"], true);
        let (_, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!((body["body"].as_str(), &body["edited"]), (Some("v3"), &json!(true)));
    }

    #[tokio::test]
    async fn only_owner_mutates_post() {
        let app = app();
        let (t1, u1, _) = register(&app, "u1").await;
        let (t2, _, _) = register(&app, "u2").await;
        let (_, post) = new_post(&app, &t1, &u1, 0).await;
        let uri = format!("/api/post/{}/", post["id"].as_str().unwrap());

        let (status, _) =
            send(&app, Method::PUT, &uri, Some(&t2), Some(json!({ "body": "mine now" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, Method::DELETE, &uri, Some(&t2), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&t1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cannot_post_for_another_user() {
        let app = app();
        let (t1, _, _) = register(&app, "u1").await;
        let (_, u2, _) = register(&app, "u2").await;
        let (status, body) = new_post(&app, &t1, &u2, 0).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"]["author"][0], "You can't create a post for another user");
    }

    #[tokio::test]
    async fn likes_are_idempotent() {
        let app = app();
        let (t1, u1, _) = register(&app, "u1").await;
        let (t2, _, _) = register(&app, "u2").await;
        let (_, post) = new_post(&app, &t1, &u1, 0).await;
        let id = post["id"].as_str().unwrap();
        let like = format!("/api/post/{id}/like/");
        let unlike = format!("/api/post/{id}/remove_like/");

        let (status, _) = send(&app, Method::POST, &like, None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        send(&app, Method::POST, &like, Some(&t2), None).await;
        let (status, body) = send(&app, Method::POST, &like, Some(&t2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!((body["likes_count"].as_i64(), &body["liked"]), (Some(1), &json!(true)));

        let (_, body) = send(&app, Method::GET, &format!("/api/post/{id}/"), Some(&t1), None).await;
        assert_eq!((body["likes_count"].as_i64(), &body["liked"]), (Some(1), &json!(false)));

        send(&app, Method::POST, &unlike, Some(&t2), None).await;
        let (_, body) = send(&app, Method::POST, &unlike, Some(&t2), None).await;
        assert_eq!((body["likes_count"].as_i64(), &body["liked"]), (Some(0), &json!(false)));
    }

    #[tokio::test]
    async fn comment_for_another_user_is_rejected() {
        let app = app();
        let (t1, u1, _) = register(&app, "u1").await;
        let (_, u2, _) = register(&app, "u2").await;
        let (_, post) = new_post(&app, &t1, &u1, 0).await;
        let pid = post["id"].as_str().unwrap();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/post/{pid}/comment/"),
            Some(&t1),
            Some(json!({ "post": pid, "author": u2, "body": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["author"][0]
            .as_str()
            .unwrap()
            .contains("can't create comment for another user"));
    }

    #[tokio::test]
    async fn post_with_comments_cannot_be_deleted() {
        let app = app();
        let (t1, u1, _) = register(&app, "u1").await;
        let (t2, u2, _) = register(&app, "u2").await;
        let (_, post) = new_post(&app, &t1, &u1, 0).await;
        let pid = post["id"].as_str().unwrap();
        let comments = format!("/api/post/{pid}/comment/");

        let (status, comment) = send(
            &app,
            Method::POST,
            &comments,
            Some(&t2),
            Some(json!({ "post": pid, "author": u2, "body": "nice" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{comment}");
        assert_eq!(comment["post"], pid);
        assert_eq!(comment["author"]["id"], u2.as_str());

        let (_, list) = send(&app, Method::GET, &comments, None, None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let post_uri = format!("/api/post/{pid}/");
        let (status, body) = send(&app, Method::DELETE, &post_uri, Some(&t1), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");

        let comment_uri = format!("{comments}{}/", comment["id"].as_str().unwrap());
        let (status, _) = send(&app, Method::DELETE, &comment_uri, Some(&t1), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, Method::PUT, &comment_uri, Some(&t2), Some(json!({ "body": "nicer" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], true);

        let (status, _) = send(&app, Method::DELETE, &comment_uri, Some(&t2), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, &post_uri, Some(&t1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn users_see_only_regular_accounts_and_edit_themselves() {
        let (state, _) = AppState::fake();
        create_superuser(
            state.store.as_ref(),
            Some("root"),
            Some("root@x.com"),
            Some("pw123456"),
            ProfileAttrs::default(),
        )
        .await
        .unwrap();
        let app = build_app(state);
        let (t1, u1, _) = register(&app, "u1").await;
        let (_, u2, _) = register(&app, "u2").await;

        let (status, list) = send(&app, Method::GET, "/api/user/", Some(&t1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 2);

        let (status, body) = send(
            &app,
            Method::PATCH,
            &format!("/api/user/{u1}/"),
            Some(&t1),
            Some(json!({ "bio": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bio"], "hello");
        assert_eq!(body["id"], u1.as_str());

        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("/api/user/{u2}/"),
            Some(&t1),
            Some(json!({ "bio": "hijack" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_ids_are_not_found() {
        let app = app();
        let (token, _, _) = register(&app, "u1").await;
        for uri in ["/api/post/42/", "/api/post/not-an-id/comment/", "/api/user/1/"] {
            let (status, body) = send(&app, Method::GET, uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["code"], "not_found");
        }
    }

    #[tokio::test]
    async fn media_without_stored_object_still_lists() {
        let (state, storage) = AppState::fake();
        let app = build_app(state.clone());
        let (token, me, _) = register(&app, "u1").await;
        let author = state
            .store
            .user_by_public_id(crate::public_id::PublicId::parse(&me).unwrap())
            .await
            .unwrap()
            .unwrap();
        // Media row whose payload is gone, as after a restart of in-memory storage.
        state
            .store
            .insert_post(
                author.id,
                "orphaned",
                vec![crate::db::NewMedia {
                    file_key: "post_media/missing.png".into(),
                    file_name: "missing.png".into(),
                    is_video: false,
                    size: 3,
                }],
            )
            .await
            .unwrap();
        assert!(!storage.contains("post_media/missing.png").await);

        let (status, body) = send(&app, Method::GET, "/api/post/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body[0]["media"][0]["url"], "memory://post_media/missing.png");
    }

    #[tokio::test]
    async fn post_list_orders_and_paginates() {
        let app = app();
        let (token, me, _) = register(&app, "u1").await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (status, post) = new_post(&app, &token, &me, 0).await;
            assert_eq!(status, StatusCode::CREATED);
            ids.push(post["id"].as_str().unwrap().to_string());
        }

        let (status, page) = send(
            &app,
            Method::GET,
            "/api/post/?ordering=created&limit=1&offset=1",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page = page.as_array().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], ids[1].as_str());

        let (_, newest) = send(&app, Method::GET, "/api/post/?ordering=-created&limit=2", None, None).await;
        let newest: Vec<&str> = newest
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(newest, [ids[2].as_str(), ids[1].as_str()]);

        // Editing the oldest post moves it to the front of the default ordering.
        let uri = format!("/api/post/{}/", ids[0]);
        send(&app, Method::PATCH, &uri, Some(&token), Some(json!({ "body": "bumped" }))).await;
        let (_, default) = send(&app, Method::GET, "/api/post/", None, None).await;
        assert_eq!(default[0]["id"], ids[0].as_str());

        let (status, body) = send(&app, Method::GET, "/api/post/?ordering=body", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["ordering"].is_array());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = app();
        let req = Request::post("/api/auth/login/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
