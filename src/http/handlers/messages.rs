use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::policy::{self, Actor, Resource, Role};

use crate::http::error::{ApiError, ApiResult};
use crate::http::expand;
use crate::http::helpers::{now_rfc3339, required_str};
use crate::http::types::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/conversations", get(conversations))
        .route("/unread-count", get(unread_count))
        .route("/:id", get(get_one))
        .route("/:id/read", put(mark_read))
}

struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    student_id: Option<String>,
    subject: Option<String>,
    content: String,
    attachments: String,
    is_read: bool,
    read_at: Option<String>,
    created_at: String,
}

const MESSAGE_COLS: &str = "id, sender_id, receiver_id, student_id, subject, content,
    attachments, is_read, read_at, created_at";

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: r.get(0)?,
        sender_id: r.get(1)?,
        receiver_id: r.get(2)?,
        student_id: r.get(3)?,
        subject: r.get(4)?,
        content: r.get(5)?,
        attachments: r.get(6)?,
        is_read: r.get::<_, i64>(7)? != 0,
        read_at: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn expand_message(conn: &Connection, m: &MessageRow) -> Result<Value, ApiError> {
    Ok(json!({
        "id": m.id,
        "senderId": expand::user_brief(conn, &m.sender_id)?,
        "receiverId": expand::user_brief(conn, &m.receiver_id)?,
        "studentId": expand::opt_student_brief(conn, m.student_id.as_deref())?,
        "subject": m.subject,
        "content": m.content,
        "attachments": expand::attachments_value(&m.attachments),
        "isRead": m.is_read,
        "readAt": m.read_at,
        "createdAt": m.created_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessageFilters {
    conversation_with: Option<String>,
    student_id: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<MessageFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Message, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.conversation_with {
        clauses.push("(sender_id = ? OR receiver_id = ?)".into());
        params.push(v.clone());
        params.push(v);
    }
    if let Some(v) = f.student_id {
        clauses.push("student_id = ?".into());
        params.push(v);
    }
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages WHERE {} ORDER BY created_at DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_message(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for m in &rows {
        out.push(expand_message(&conn, m)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Message, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| row_to_message(r))
        .optional()?;
    match row {
        Some(m) => Ok(Json(expand_message(&conn, &m)?)),
        None => Err(ApiError::not_found("Message not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    receiver_id: Option<String>,
    student_id: Option<String>,
    subject: Option<String>,
    content: Option<String>,
    attachments: Option<Value>,
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<MessagePayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Message, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let receiver_id = required_str(payload.receiver_id, "receiverId")?;
    let content = required_str(payload.content, "content")?;

    let conn = state.conn()?;
    let receiver_role: Option<String> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ? AND is_active = 1",
            [&receiver_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(receiver_role) = receiver_role else {
        return Err(ApiError::not_found("Receiver not found"));
    };

    // Messaging crosses the parent/teacher boundary only.
    match actor.role {
        Role::Parent if receiver_role != "teacher" => {
            return Err(ApiError::forbidden("Parents can only message teachers"));
        }
        Role::Teacher if receiver_role != "parent" => {
            return Err(ApiError::forbidden("Teachers can only message parents"));
        }
        _ => {}
    }

    if let Some(sid) = &payload.student_id {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [sid], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(ApiError::validation("studentId does not reference a student"));
        }
    }

    let id = Uuid::new_v4().to_string();
    let attachments = payload.attachments.unwrap_or_else(|| json!([]));
    conn.execute(
        "INSERT INTO messages(id, sender_id, receiver_id, student_id, subject, content,
                              attachments, is_read, read_at, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        (
            &id, &actor.id, &receiver_id, &payload.student_id, &payload.subject,
            &content, attachments.to_string(), now_rfc3339(),
        ),
    )?;

    let row = conn.query_row(
        &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?"),
        [&id],
        |r| row_to_message(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_message(&conn, &row)?)))
}

/// One entry per conversation partner, newest conversation first. Grouping is
/// done here rather than in SQL so the partner projection and unread count
/// come from the same pass.
async fn conversations(State(state): State<AppState>, actor: Actor) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM messages
         WHERE sender_id = ? OR receiver_id = ?
         ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map([&actor.id, &actor.id], |r| row_to_message(r))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in &rows {
        let partner = if m.sender_id == actor.id {
            &m.receiver_id
        } else {
            &m.sender_id
        };
        if !seen.insert(partner.clone()) {
            continue;
        }
        let unread: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
            [partner, &actor.id],
            |r| r.get(0),
        )?;
        out.push(json!({
            "partner": expand::user_brief(&conn, partner)?,
            "lastMessage": expand_message(&conn, m)?,
            "unreadCount": unread,
        }));
    }
    Ok(Json(json!(out)))
}

async fn unread_count(State(state): State<AppState>, actor: Actor) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND is_read = 0",
        [&actor.id],
        |r| r.get(0),
    )?;
    Ok(Json(json!({ "unreadCount": count })))
}

async fn mark_read(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let receiver: Option<String> = conn
        .query_row("SELECT receiver_id FROM messages WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(receiver) = receiver else {
        return Err(ApiError::not_found("Message not found"));
    };
    // Only the receiver acknowledges a message; the sender cannot forge the
    // read receipt.
    if receiver != actor.id {
        return Err(ApiError::forbidden("Access denied"));
    }
    conn.execute(
        "UPDATE messages SET is_read = 1, read_at = ? WHERE id = ?",
        (now_rfc3339(), &id),
    )?;
    let row = conn.query_row(
        &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?"),
        [&id],
        |r| row_to_message(r),
    )?;
    Ok(Json(expand_message(&conn, &row)?))
}
