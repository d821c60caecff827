//! Password hashing and bearer-token sessions. Sessions are rows in the
//! `sessions` table; the token is an opaque uuid handed out at registration
//! and login.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::policy::{Actor, Role};

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Creates a user row and returns its id. Used by the registration handler
/// and by test setup for roles registration does not allow.
#[allow(clippy::too_many_arguments)]
pub fn create_user(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    email: &str,
    password: &str,
    role: Role,
    phone: Option<&str>,
    address: Option<&str>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let hash = hash_password(password)?;
    conn.execute(
        "INSERT INTO users(id, first_name, last_name, email, password_hash, role,
                           phone, address, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, first_name, last_name, email, &hash,
            role.as_str(), phone, address, &now, &now,
        ),
    )?;
    Ok(id)
}

pub fn create_session(conn: &Connection, user_id: &str) -> rusqlite::Result<String> {
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, user_id, Utc::now().to_rfc3339()),
    )?;
    Ok(token)
}

/// Resolves a bearer token to an actor. Inactive users cannot authenticate
/// even while their sessions still exist.
pub fn actor_for_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<Actor>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT u.id, u.role FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ? AND u.is_active = 1",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(id, role)| Role::parse(&role).map(|role| Actor { id, role })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("secret124", &hash));
    }

    #[test]
    fn session_resolves_to_actor() {
        let conn = crate::db::open_in_memory().unwrap();
        let id = create_user(
            &conn, "Priya", "Sharma", "priya@school.test", "secret123",
            Role::Teacher, None, None,
        )
        .unwrap();
        let token = create_session(&conn, &id).unwrap();
        let actor = actor_for_token(&conn, &token).unwrap().unwrap();
        assert_eq!(actor.id, id);
        assert_eq!(actor.role, Role::Teacher);
        assert!(actor_for_token(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn inactive_user_cannot_authenticate() {
        let conn = crate::db::open_in_memory().unwrap();
        let id = create_user(
            &conn, "Rajesh", "Kumar", "rajesh@school.test", "secret123",
            Role::Parent, None, None,
        )
        .unwrap();
        let token = create_session(&conn, &id).unwrap();
        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?", [&id])
            .unwrap();
        assert!(actor_for_token(&conn, &token).unwrap().is_none());
    }
}
