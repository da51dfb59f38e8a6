// src/models/comment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::target::validate_app_model;

/// Represents the 'comments' table in the database.
///
/// Threading columns: `thread_id` is the id of the thread's root comment
/// (equal to `id` for roots), `parent_id` the replied-to comment (equal to
/// `id` for roots), `level` the depth (root = 0), and `order` the position
/// in the thread's depth-first display order. Only `order` is ever mutated
/// after placement, and only on *other* rows, to make room for new replies.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub content_type: String,
    pub object_pk: String,
    pub thread_id: i64,
    pub parent_id: i64,
    pub level: i64,
    pub order: i64,
    pub user_name: String,
    pub user_email: String,
    pub user_url: Option<String>,
    pub user_id: Option<i64>,
    pub page_url: String,
    pub comment: String,
    pub followup: bool,
    pub submit_date: DateTime<Utc>,
    pub likes_count: i64,
}

/// DTO for submitting a new comment (root or reply).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(custom(function = validate_app_model))]
    pub content_type: String,

    #[validate(length(min = 1, max = 64))]
    pub object_pk: String,

    /// Absolute URL of the host page carrying the thread. Used for the
    /// post-confirmation redirect and in notification emails.
    #[validate(url)]
    pub page_url: String,

    /// Guest author name; ignored when the caller presents an identity token.
    #[validate(length(min = 1, max = 50))]
    pub name: Option<String>,

    /// Guest author email; ignored when the caller presents an identity token.
    #[validate(email)]
    pub email: Option<String>,

    #[validate(url)]
    pub url: Option<String>,

    #[validate(length(min = 1, max = 5000, message = "Comment must be between 1 and 5000 characters"))]
    pub comment: String,

    /// Receive by email further comments in this conversation.
    #[serde(default)]
    pub followup: bool,

    /// Id of the comment being replied to; 0 means a new root comment.
    #[serde(default)]
    pub reply_to: i64,
}

/// A comment that is not (yet) persisted: the explicit value type carried
/// through a guest's email-confirmation round trip, embedded in the signed
/// confirmation key. `threading::publish` is the only path that makes one
/// durable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingComment {
    pub content_type: String,
    pub object_pk: String,
    pub page_url: String,
    pub user_name: String,
    pub user_email: String,
    pub user_url: Option<String>,
    pub user_id: Option<i64>,
    pub comment: String,
    pub followup: bool,
    pub reply_to: i64,
    pub submit_date: DateTime<Utc>,
}

/// DTO for displaying a comment. Never exposes the author's email.
#[derive(Debug, Serialize, FromRow)]
pub struct CommentResponse {
    pub id: i64,
    pub content_type: String,
    pub object_pk: String,
    pub thread_id: i64,
    pub parent_id: i64,
    pub level: i64,
    pub order: i64,
    pub user_name: String,
    pub user_url: Option<String>,
    pub user_id: Option<i64>,
    pub page_url: String,
    pub comment: String,
    pub submit_date: DateTime<Utc>,
    pub likes_count: i64,
}

impl From<Comment> for CommentResponse {
    fn from(c: Comment) -> Self {
        Self {
            id: c.id,
            content_type: c.content_type,
            object_pk: c.object_pk,
            thread_id: c.thread_id,
            parent_id: c.parent_id,
            level: c.level,
            order: c.order,
            user_name: c.user_name,
            user_url: c.user_url,
            user_id: c.user_id,
            page_url: c.page_url,
            comment: c.comment,
            submit_date: c.submit_date,
            likes_count: c.likes_count,
        }
    }
}

/// DTO for building a reply form: the comment being answered plus where the
/// reply will land in the tree.
#[derive(Debug, Serialize)]
pub struct ReplyTarget {
    pub comment: CommentResponse,
    pub reply_level: i64,
    pub max_thread_level: i64,
}

/// Query parameters for the latest-comments listing.
#[derive(Debug, Deserialize)]
pub struct LatestCommentsParams {
    /// Comma-separated `"app_label.model"` pairs to include.
    pub app_models: String,

    /// Number of items to return (default: 20, max: 100).
    pub count: Option<i64>,
}
