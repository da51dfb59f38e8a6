// src/utils/signed.rs
//
// Signed keys carried in email links. A confirmation key embeds the entire
// pending comment (nothing is persisted until the link is visited); a mute
// key embeds the (object, email) scope to stop follow-ups for. Both are
// versioned HS256 claims signed with a purpose-salted derivative of the
// service secret, so the two kinds of key are not interchangeable and
// neither can be forged from an identity token.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::comment::PendingComment;

const KEY_VERSION: u8 = 1;
const CONFIRM_SALT: &str = "comment-confirmation";
const MUTE_SALT: &str = "followup-mute";

// Mute links live in old emails and should keep working; "no expiry"
// in practice.
const MUTE_TTL_DAYS: i64 = 3650;

#[derive(Debug, Serialize, Deserialize)]
struct ConfirmClaims {
    v: u8,
    comment: PendingComment,
    exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteScope {
    pub content_type: String,
    pub object_pk: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MuteClaims {
    v: u8,
    #[serde(flatten)]
    scope: MuteScope,
    exp: usize,
}

fn salted_key(secret: &str, salt: &str) -> Vec<u8> {
    format!("{}:{}", secret, salt).into_bytes()
}

pub fn encode_confirm_key(
    secret: &str,
    comment: &PendingComment,
    ttl_hours: i64,
) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::hours(ttl_hours)).timestamp() as usize;
    let claims = ConfirmClaims {
        v: KEY_VERSION,
        comment: comment.clone(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&salted_key(secret, CONFIRM_SALT)),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Recovers the pending comment from a confirmation key. Tampering,
/// truncation, expiry, a mute key passed where a confirmation key belongs,
/// or an unknown version all fail verification; the caller answers 404.
pub fn decode_confirm_key(secret: &str, key: &str) -> Result<PendingComment, AppError> {
    let data = decode::<ConfirmClaims>(
        key,
        &DecodingKey::from_secret(&salted_key(secret, CONFIRM_SALT)),
        &Validation::default(),
    )
    .map_err(|_| AppError::NotFound("Invalid confirmation key".to_string()))?;

    if data.claims.v != KEY_VERSION {
        return Err(AppError::NotFound("Invalid confirmation key".to_string()));
    }
    Ok(data.claims.comment)
}

pub fn encode_mute_key(secret: &str, scope: MuteScope) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(MUTE_TTL_DAYS)).timestamp() as usize;
    let claims = MuteClaims {
        v: KEY_VERSION,
        scope,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&salted_key(secret, MUTE_SALT)),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

pub fn decode_mute_key(secret: &str, key: &str) -> Result<MuteScope, AppError> {
    let data = decode::<MuteClaims>(
        key,
        &DecodingKey::from_secret(&salted_key(secret, MUTE_SALT)),
        &Validation::default(),
    )
    .map_err(|_| AppError::NotFound("Invalid mute key".to_string()))?;

    if data.claims.v != KEY_VERSION {
        return Err(AppError::NotFound("Invalid mute key".to_string()));
    }
    Ok(data.claims.scope)
}
