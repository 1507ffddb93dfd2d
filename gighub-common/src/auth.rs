//! Password hashing and bearer tokens
//!
//! Passwords are hashed with Argon2id (PHC string format). Bearer tokens are
//! 48 random alphanumeric characters handed to the client once; only their
//! SHA-256 hex digest is stored in `api_tokens`.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::User;
use crate::{Error, Result};

const TOKEN_LEN: usize = 48;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
}

/// False for a wrong password or an unparseable stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Random URL-safe string of `len` characters
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// SHA-256 digest of a token as 64 hex characters
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Issue a new bearer token for `user_id`, returning the plaintext token
pub async fn issue_token(db: &SqlitePool, user_id: i64, name: &str) -> Result<String> {
    let token = random_string(TOKEN_LEN);
    sqlx::query(
        "INSERT INTO api_tokens (user_id, name, token_hash, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(name)
    .bind(hash_token(&token))
    .bind(Utc::now())
    .execute(db)
    .await?;
    Ok(token)
}

/// Resolve a bearer token to its user, touching `last_used_at`
pub async fn user_for_token(db: &SqlitePool, token: &str) -> Result<Option<User>> {
    let digest = hash_token(token);

    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT u.id, u.name, u.email, u.password_hash, u.is_admin, u.created_at
        FROM api_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.token_hash = ?
        "#,
    )
    .bind(&digest)
    .fetch_optional(db)
    .await?;

    if user.is_some() {
        sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE token_hash = ?")
            .bind(Utc::now())
            .bind(&digest)
            .execute(db)
            .await?;
    }
    Ok(user)
}

/// Delete a token. Returns `true` when it existed.
pub async fn revoke_token(db: &SqlitePool, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM api_tokens WHERE token_hash = ?")
        .bind(hash_token(token))
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
