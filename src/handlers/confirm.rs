// src/handlers/confirm.rs

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use sqlx::SqlitePool;

use crate::{
    config::Config,
    error::AppError,
    notify,
    state::AppState,
    threading,
    utils::signed::{decode_confirm_key, decode_mute_key},
};

/// Confirm a guest comment from the emailed key and publish it.
///
/// Invalid, tampered or expired keys answer 404, and so does a repeat visit:
/// the key is not single-use, but a comment with the same author, object and
/// submit date already existing means this one was confirmed before.
pub async fn confirm_comment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let pending = decode_confirm_key(&state.config.secret_key, &key)?;

    let already_confirmed: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM comments
        WHERE content_type = ? AND object_pk = ? AND user_email = ? AND submit_date = ?
        "#,
    )
    .bind(&pending.content_type)
    .bind(&pending.object_pk)
    .bind(&pending.user_email)
    .bind(pending.submit_date)
    .fetch_optional(&state.pool)
    .await?;

    if already_confirmed.is_some() {
        return Err(AppError::NotFound("Comment already confirmed".to_string()));
    }

    for observer in state.observers.iter() {
        if !observer.confirmation_received(&pending).await {
            tracing::info!(
                "Comment by {} on {} discarded by observer",
                pending.user_email,
                pending.content_type
            );
            return Ok(Json(serde_json::json!({ "status": "discarded" })).into_response());
        }
    }

    let comment =
        threading::publish(&state.pool, &state.thread_locks, &state.policy, &pending).await?;

    if let Err(e) =
        notify::notify_followers(&state.pool, &state.config, &state.mailer, &comment).await
    {
        tracing::warn!("Follow-up notification failed: {}", e);
    }

    let location = format!("{}#c{}", comment.page_url, comment.id);
    Ok(Redirect::to(&location).into_response())
}

/// Stop follow-up notifications for the (object, email) pair baked into the
/// key. Idempotent: re-clicking an old link reports zero rows muted.
pub async fn mute_followups(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let scope = decode_mute_key(&config.secret_key, &key)?;

    let result = sqlx::query(
        r#"
        UPDATE comments SET followup = 0
        WHERE content_type = ? AND object_pk = ? AND user_email = ? AND followup = 1
        "#,
    )
    .bind(&scope.content_type)
    .bind(&scope.object_pk)
    .bind(&scope.email)
    .execute(&pool)
    .await?;

    Ok(Json(serde_json::json!({ "muted": result.rows_affected() })))
}
