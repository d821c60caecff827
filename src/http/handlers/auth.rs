use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::policy::{Actor, Role};

use super::users::user_json;
use crate::http::error::{ApiError, ApiResult};
use crate::http::helpers::required_str;
use crate::http::types::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    role: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let first_name = required_str(payload.first_name, "firstName")?;
    let last_name = required_str(payload.last_name, "lastName")?;
    let email = required_str(payload.email, "email")?.to_lowercase();
    let password = required_str(payload.password, "password")?;
    let role_raw = required_str(payload.role, "role")?;

    if !email.contains('@') {
        return Err(ApiError::validation("email is not valid"));
    }
    if password.len() < 6 {
        return Err(ApiError::validation("password must be at least 6 characters"));
    }
    // Admin accounts are provisioned out of band, never self-registered.
    let role = match Role::parse(&role_raw) {
        Some(r @ (Role::Parent | Role::Teacher)) => r,
        _ => return Err(ApiError::validation("role must be parent or teacher")),
    };

    let conn = state.conn()?;
    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()?;
    if taken.is_some() {
        return Err(ApiError::validation("Email already registered"));
    }

    let id = auth::create_user(
        &conn,
        &first_name,
        &last_name,
        &email,
        &password,
        role,
        payload.phone.as_deref(),
        payload.address.as_deref(),
    )?;
    let token = auth::create_session(&conn, &id)?;
    let user = user_json(&conn, &id)?.unwrap_or(Value::Null);
    Ok((StatusCode::CREATED, Json(json!({ "token": token, "user": user }))))
}

#[derive(Deserialize)]
struct LoginPayload {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> ApiResult<Json<Value>> {
    let email = required_str(payload.email, "email")?.to_lowercase();
    let password = required_str(payload.password, "password")?;

    let conn = state.conn()?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ? AND is_active = 1",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((id, hash)) = row else {
        return Err(ApiError::unauthenticated("Invalid credentials"));
    };
    if !auth::verify_password(&password, &hash) {
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }

    let token = auth::create_session(&conn, &id)?;
    let user = user_json(&conn, &id)?.unwrap_or(Value::Null);
    Ok(Json(json!({ "token": token, "user": user })))
}

async fn me(State(state): State<AppState>, actor: Actor) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    user_json(&conn, &actor.id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}
