// src/handlers/comments.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool};
use url::Url;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        comment::{
            Comment, CommentResponse, CreateCommentRequest, LatestCommentsParams, PendingComment,
            ReplyTarget,
        },
        target::ContentTarget,
    },
    notify,
    state::AppState,
    threading,
    utils::{html::clean_html, jwt::MaybeUser},
};

/// Submit a comment (root or reply).
///
/// Authenticated callers are published immediately (201). Guests get a
/// confirmation email carrying the whole comment in a signed key; nothing
/// is persisted until the link is visited (202).
pub async fn post_comment(
    State(state): State<AppState>,
    Extension(MaybeUser(identity)): Extension<MaybeUser>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let target = ContentTarget::parse(&payload.content_type)?;
    check_page_url(&state, &payload.page_url)?;

    // Identity from the host token when present, from the form otherwise.
    let (user_name, user_email, user_id) = match &identity {
        Some(claims) => (claims.name.clone(), claims.email.clone(), claims.user_id()),
        None => {
            let name = payload.name.clone().ok_or(AppError::BadRequest(
                "Guest comments require a name".to_string(),
            ))?;
            let email = payload.email.clone().ok_or(AppError::BadRequest(
                "Guest comments require an email".to_string(),
            ))?;
            (name, email, None)
        }
    };

    // Soft depth check at submission time, so a guest is not emailed a
    // confirmation link for a reply that can never be published. The
    // authoritative check runs inside the placement transaction.
    if payload.reply_to != 0 {
        let max_level = state.policy.max_level_for(&target.app_model());
        if max_level == 0 {
            return Err(AppError::MaxThreadLevel(0));
        }
        let parent = threading::fetch_comment(&state.pool, payload.reply_to)
            .await?
            .filter(|p| p.content_type == target.app_model() && p.object_pk == payload.object_pk)
            .ok_or(AppError::NotFound("Parent comment not found".to_string()))?;
        if parent.level >= max_level {
            return Err(AppError::MaxThreadLevel(max_level));
        }
    }

    let pending = PendingComment {
        content_type: target.app_model(),
        object_pk: payload.object_pk.clone(),
        page_url: payload.page_url.clone(),
        user_name,
        user_email,
        user_url: payload.url.clone(),
        user_id,
        comment: clean_html(&payload.comment),
        followup: payload.followup,
        reply_to: payload.reply_to,
        submit_date: Utc::now(),
    };

    if identity.is_some() {
        let comment =
            threading::publish(&state.pool, &state.thread_locks, &state.policy, &pending).await?;

        if let Err(e) =
            notify::notify_followers(&state.pool, &state.config, &state.mailer, &comment).await
        {
            tracing::warn!("Follow-up notification failed: {}", e);
        }

        return Ok((
            StatusCode::CREATED,
            Json(serde_json::json!(CommentResponse::from(comment))),
        ));
    }

    // Losing the confirmation email silently loses the comment, so a send
    // failure is a hard error here.
    notify::send_confirmation_request(&state.config, &state.mailer, &pending).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "pending" })),
    ))
}

/// List every comment for an object in `(thread_id, "order")` order, which
/// is exactly the depth-first render order of each thread.
pub async fn list_for_object(
    State(pool): State<SqlitePool>,
    Path((app_model, object_pk)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let target = ContentTarget::parse(&app_model)?;

    let comments = sqlx::query_as::<_, Comment>(
        r#"
        SELECT * FROM comments
        WHERE content_type = ? AND object_pk = ?
        ORDER BY thread_id, "order"
        "#,
    )
    .bind(target.app_model())
    .bind(&object_pk)
    .fetch_all(&pool)
    .await?;

    let responses: Vec<CommentResponse> = comments.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Newest comments across the requested content types.
pub async fn latest_comments(
    State(pool): State<SqlitePool>,
    Query(params): Query<LatestCommentsParams>,
) -> Result<impl IntoResponse, AppError> {
    let targets: Vec<ContentTarget> = params
        .app_models
        .split(',')
        .map(|s| ContentTarget::parse(s.trim()))
        .collect::<Result<_, _>>()?;

    if targets.is_empty() {
        return Err(AppError::BadRequest("app_models must not be empty".to_string()));
    }

    let count = params.count.unwrap_or(20).clamp(1, 100);

    let mut builder =
        QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM comments WHERE content_type IN (");
    let mut types = builder.separated(", ");
    for target in &targets {
        types.push_bind(target.app_model());
    }
    builder.push(") ORDER BY submit_date DESC, id DESC LIMIT ");
    builder.push_bind(count);

    let comments = builder
        .build_query_as::<Comment>()
        .fetch_all(&pool)
        .await?;

    let responses: Vec<CommentResponse> = comments.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Metadata for building a reply form. Answers 404 for unknown comments and
/// signals the depth ceiling distinctly when the target cannot be replied to.
pub async fn reply_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let comment = threading::fetch_comment(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound("Comment not found".to_string()))?;

    let max_thread_level = state.policy.max_level_for(&comment.content_type);
    if comment.level >= max_thread_level {
        return Err(AppError::MaxThreadLevel(max_thread_level));
    }

    Ok(Json(ReplyTarget {
        reply_level: comment.level + 1,
        max_thread_level,
        comment: comment.into(),
    }))
}

/// The page a comment claims to live on must be on the configured site
/// host; otherwise confirmation links would redirect off-site.
fn check_page_url(state: &AppState, page_url: &str) -> Result<(), AppError> {
    let site = Url::parse(&state.config.site_url)
        .map_err(|e| AppError::InternalServerError(format!("Bad SITE_URL: {}", e)))?;
    let page =
        Url::parse(page_url).map_err(|e| AppError::BadRequest(format!("Bad page_url: {}", e)))?;

    if page.host_str() != site.host_str() {
        return Err(AppError::BadRequest(
            "page_url must be on the configured site host".to_string(),
        ));
    }
    Ok(())
}
