use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::policy::{self, Actor, Resource, Role};

use crate::http::error::{ApiError, ApiResult};
use crate::http::helpers::{now_rfc3339, one_of, required_str};
use crate::http::types::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
        .route("/:id", get(get_one).put(admin_update))
}

/// Full user projection, password excluded. `associatedIds` is derived from
/// the student/parent relation.
pub fn user_json(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, email, role, phone, address,
                    profile_picture, is_active, created_at, updated_at
             FROM users WHERE id = ?",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, i64>(8)?,
                    r.get::<_, String>(9)?,
                    r.get::<_, String>(10)?,
                ))
            },
        )
        .optional()?;
    let Some((id, first, last, email, role, phone, address, picture, active, created, updated)) =
        row
    else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT student_id FROM student_parents WHERE parent_id = ?")?;
    let associated: Vec<String> = stmt
        .query_map([&id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(json!({
        "id": id,
        "firstName": first,
        "lastName": last,
        "email": email,
        "role": role,
        "phone": phone,
        "address": address,
        "profilePicture": picture,
        "associatedIds": associated,
        "isActive": active != 0,
        "createdAt": created,
        "updatedAt": updated,
    })))
}

async fn list(State(state): State<AppState>, actor: Actor) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::User, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT id FROM users WHERE is_active = 1 AND {} ORDER BY last_name, first_name",
        scope.clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = stmt
        .query_map(params_from_iter(scope.params.iter()), |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(u) = user_json(&conn, &id)? {
            out.push(u);
        }
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    // Always visible to self; otherwise the roster predicate applies and an
    // out-of-scope user reads as absent.
    if id != actor.id {
        let scope = policy::visibility(Resource::User, &actor, &now_rfc3339());
        let sql = format!("SELECT 1 FROM users WHERE id = ? AND {}", scope.clause);
        let mut params = vec![id.clone()];
        params.extend(scope.params);
        let visible: Option<i64> = conn
            .query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))
            .optional()?;
        if visible.is_none() {
            return Err(ApiError::not_found("User not found"));
        }
    }
    user_json(&conn, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePayload {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    profile_picture: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<ProfilePayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    apply_profile_updates(&conn, &actor.id, &payload)?;
    user_json(&conn, &actor.id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

fn apply_profile_updates(
    conn: &Connection,
    user_id: &str,
    payload: &ProfilePayload,
) -> Result<(), ApiError> {
    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(v) = &payload.first_name {
        sets.push("first_name = ?");
        params.push(v.clone());
    }
    if let Some(v) = &payload.last_name {
        sets.push("last_name = ?");
        params.push(v.clone());
    }
    if let Some(v) = &payload.phone {
        sets.push("phone = ?");
        params.push(v.clone());
    }
    if let Some(v) = &payload.address {
        sets.push("address = ?");
        params.push(v.clone());
    }
    if let Some(v) = &payload.profile_picture {
        sets.push("profile_picture = ?");
        params.push(v.clone());
    }
    sets.push("updated_at = ?");
    params.push(now_rfc3339());
    params.push(user_id.to_string());
    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordPayload {
    current_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<PasswordPayload>,
) -> ApiResult<Json<Value>> {
    let current = required_str(payload.current_password, "currentPassword")?;
    let new = required_str(payload.new_password, "newPassword")?;
    if new.len() < 6 {
        return Err(ApiError::validation(
            "newPassword must be at least 6 characters",
        ));
    }

    let conn = state.conn()?;
    let hash: String =
        conn.query_row("SELECT password_hash FROM users WHERE id = ?", [&actor.id], |r| {
            r.get(0)
        })?;
    if !auth::verify_password(&current, &hash) {
        return Err(ApiError::unauthenticated("Current password is incorrect"));
    }
    let new_hash = auth::hash_password(&new)?;
    conn.execute(
        "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
        (&new_hash, now_rfc3339(), &actor.id),
    )?;
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminUserPayload {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    profile_picture: Option<String>,
    role: Option<String>,
    is_active: Option<bool>,
}

async fn admin_update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<AdminUserPayload>,
) -> ApiResult<Json<Value>> {
    if actor.role != Role::Admin {
        return Err(ApiError::forbidden("Access denied"));
    }
    let conn = state.conn()?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    if let Some(role) = &payload.role {
        one_of(role, &["parent", "teacher", "admin"], "role")?;
    }

    // Role, activation, and profile land together or not at all.
    let tx = conn.unchecked_transaction()?;
    if let Some(role) = &payload.role {
        tx.execute("UPDATE users SET role = ? WHERE id = ?", (role, &id))?;
    }
    if let Some(active) = payload.is_active {
        tx.execute(
            "UPDATE users SET is_active = ? WHERE id = ?",
            (active as i64, &id),
        )?;
    }
    apply_profile_updates(
        &tx,
        &id,
        &ProfilePayload {
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone: payload.phone,
            address: payload.address,
            profile_picture: payload.profile_picture,
        },
    )?;
    tx.commit()?;
    user_json(&conn, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}
