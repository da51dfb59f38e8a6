// src/notify.rs
//
// Email construction around the comment lifecycle: the guest confirmation
// request, and follow-up notices to earlier commenters who asked for them.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::email::Mailer;
use crate::error::AppError;
use crate::models::comment::{Comment, PendingComment};
use crate::utils::signed::{MuteScope, encode_confirm_key, encode_mute_key};

/// Hook invoked when a guest visits a confirmation link, before the comment
/// is published. Returning `false` discards the comment.
#[async_trait]
pub trait ConfirmationObserver: Send + Sync {
    async fn confirmation_received(&self, comment: &PendingComment) -> bool;
}

/// Sends the confirmation request for a guest comment. Nothing about the
/// comment is persisted; the whole payload travels inside the signed key.
pub async fn send_confirmation_request(
    config: &Config,
    mailer: &Arc<dyn Mailer>,
    pending: &PendingComment,
) -> Result<(), AppError> {
    let key = encode_confirm_key(&config.secret_key, pending, config.confirmation_ttl_hours)?;
    let confirm_url = format!("{}/api/confirm/{}", config.site_url, key);

    let subject = "Please confirm your comment".to_string();
    let body = format!(
        "Hello {},\n\n\
         You posted the following comment on {}:\n\n\
         {}\n\n\
         Please visit the link below to confirm it. If you did not post it,\n\
         simply ignore this message and nothing will be published.\n\n\
         {}\n",
        pending.user_name, pending.page_url, pending.comment, confirm_url
    );

    mailer.send(&pending.user_email, &subject, &body).await
}

/// Notifies earlier commenters on the same object who opted into follow-ups.
/// The new author never gets a notice about their own comment; every notice
/// carries a personal mute link. Delivery failures are logged, not
/// propagated: the comment is already published.
pub async fn notify_followers(
    pool: &SqlitePool,
    config: &Config,
    mailer: &Arc<dyn Mailer>,
    comment: &Comment,
) -> Result<(), AppError> {
    let followers: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT user_email, user_name FROM comments
        WHERE content_type = ? AND object_pk = ? AND followup = 1 AND user_email != ?
        "#,
    )
    .bind(&comment.content_type)
    .bind(&comment.object_pk)
    .bind(&comment.user_email)
    .fetch_all(pool)
    .await?;

    // Digest line for the conversation so far, newest commenters first.
    let recent_names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT user_name FROM comments
        WHERE content_type = ? AND object_pk = ?
        GROUP BY user_name ORDER BY MAX(id) DESC LIMIT 10
        "#,
    )
    .bind(&comment.content_type)
    .bind(&comment.object_pk)
    .fetch_all(pool)
    .await?;
    let actors = summarize_actors(&recent_names);

    for (email, name) in followers {
        let mute_key = encode_mute_key(
            &config.secret_key,
            MuteScope {
                content_type: comment.content_type.clone(),
                object_pk: comment.object_pk.clone(),
                email: email.clone(),
            },
        )?;

        let subject = "New comment in a conversation you follow".to_string();
        let body = format!(
            "Hello {},\n\n\
             There is a new comment following up yours.\n\n\
             {} wrote:\n\n\
             {}\n\n\
             Read it in context:\n{}#c{}\n\n\
             {} have commented on this conversation so far.\n\n\
             To stop receiving these notifications, visit:\n{}/api/mute/{}\n",
            name,
            comment.user_name,
            comment.comment,
            comment.page_url,
            comment.id,
            actors,
            config.site_url,
            mute_key
        );

        if let Err(e) = mailer.send(&email, &subject, &body).await {
            tracing::warn!("Failed to notify follower {}: {}", email, e);
        }
    }

    Ok(())
}

/// Renders a digest-style actor line: "A", "A and B", "A, B and C",
/// "A, B and N others".
pub fn summarize_actors(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [a] => a.clone(),
        [a, b] => format!("{} and {}", a, b),
        [a, b, c] => format!("{}, {} and {}", a, b, c),
        [a, b, rest @ ..] => format!("{}, {} and {} others", a, b, rest.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn summarize_actors_scales_with_count() {
        assert_eq!(summarize_actors(&names(&[])), "");
        assert_eq!(summarize_actors(&names(&["Ann"])), "Ann");
        assert_eq!(summarize_actors(&names(&["Ann", "Bob"])), "Ann and Bob");
        assert_eq!(
            summarize_actors(&names(&["Ann", "Bob", "Cleo"])),
            "Ann, Bob and Cleo"
        );
        assert_eq!(
            summarize_actors(&names(&["Ann", "Bob", "Cleo", "Dan", "Eve"])),
            "Ann, Bob and 3 others"
        );
    }
}
