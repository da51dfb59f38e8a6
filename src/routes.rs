// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{comments, confirm, likes},
    state::AppState,
    utils::jwt::{auth_middleware, identity_middleware},
};

/// Assembles the main application router.
///
/// * Comment submission is open to guests but resolves identity tokens.
/// * Liking requires an identity token.
/// * Everything else (listing, confirmation links, mute links) is public.
/// * Applies global middleware (Trace, CORS) and injects the shared state.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let submit_routes = Router::new()
        .route("/comments", post(comments::post_comment))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    let like_routes = Router::new()
        .route("/comments/{id}/like", post(likes::toggle_like))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let open_routes = Router::new()
        .route("/comments/latest", get(comments::latest_comments))
        .route("/comments/{id}/reply", get(comments::reply_target))
        .route("/confirm/{key}", get(confirm::confirm_comment))
        .route("/mute/{key}", get(confirm::mute_followups))
        .route(
            "/objects/{app_model}/{object_pk}/comments",
            get(comments::list_for_object),
        )
        .route(
            "/objects/{app_model}/{object_pk}/likes",
            get(likes::likes_for_object),
        );

    Router::new()
        .nest("/api", submit_routes.merge(like_routes).merge(open_routes))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
