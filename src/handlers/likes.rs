// src/handlers/likes.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    cache::{LikeCache, LikeSummary},
    error::AppError,
    models::target::ContentTarget,
    state::AppState,
    threading,
    utils::jwt::Claims,
};

/// Toggle the calling user's like on a comment.
///
/// The membership row and the denormalized `likes_count` change in one
/// transaction; the object's cached like dictionary is invalidated in the
/// same request.
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let comment = threading::fetch_comment(&state.pool, comment_id)
        .await?
        .ok_or(AppError::NotFound("Comment not found".to_string()))?;

    let user_key = claims.sub.clone();

    let mut tx = state.pool.begin().await?;

    let existing: Option<i64> = sqlx::query_scalar(
        r#"SELECT 1 FROM comment_likes WHERE comment_id = ? AND user_key = ?"#,
    )
    .bind(comment_id)
    .bind(&user_key)
    .fetch_optional(&mut *tx)
    .await?;

    let is_liked = existing.is_some();

    let likes_count: i64 = if is_liked {
        sqlx::query(r#"DELETE FROM comment_likes WHERE comment_id = ? AND user_key = ?"#)
            .bind(comment_id)
            .bind(&user_key)
            .execute(&mut *tx)
            .await?;

        sqlx::query_scalar(
            r#"
            UPDATE comments SET likes_count = MAX(0, likes_count - 1)
            WHERE id = ? RETURNING likes_count
            "#,
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?
    } else {
        sqlx::query(r#"INSERT INTO comment_likes (comment_id, user_key) VALUES (?, ?)"#)
            .bind(comment_id)
            .bind(&user_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    // Concurrent request handled gracefully
                    return AppError::Conflict("Already liked".to_string());
                }
                AppError::InternalServerError(e.to_string())
            })?;

        sqlx::query_scalar(
            r#"
            UPDATE comments SET likes_count = likes_count + 1
            WHERE id = ? RETURNING likes_count
            "#,
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?
    };

    tx.commit().await?;

    state.like_cache.invalidate(&LikeCache::object_key(
        &comment.content_type,
        &comment.object_pk,
    ));

    Ok(Json(serde_json::json!({
        "liked": !is_liked,
        "likes_count": likes_count,
    })))
}

/// Per-object like dictionary `{comment_id: likes_count}` plus total,
/// served cache-first.
pub async fn likes_for_object(
    State(state): State<AppState>,
    Path((app_model, object_pk)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let target = ContentTarget::parse(&app_model)?;
    let key = LikeCache::object_key(&target.app_model(), &object_pk);

    if let Some(summary) = state.like_cache.get(&key) {
        return Ok(Json(summary));
    }

    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"SELECT id, likes_count FROM comments WHERE content_type = ? AND object_pk = ?"#,
    )
    .bind(target.app_model())
    .bind(&object_pk)
    .fetch_all(&state.pool)
    .await?;

    let total = rows.iter().map(|(_, n)| n).sum();
    let summary = LikeSummary {
        likes: rows.into_iter().collect::<HashMap<i64, i64>>(),
        total,
    };

    state.like_cache.put(key, summary.clone());
    Ok(Json(summary))
}
