use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::policy::{self, Actor, Resource};

use crate::http::error::{ApiError, ApiResult};
use crate::http::expand;
use crate::http::helpers::{check_timestamp, now_rfc3339, one_of, required_str};
use crate::http::types::AppState;

const AUDIENCES: &[&str] = &["all", "parents", "teachers", "specific"];
const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
}

struct AnnouncementRow {
    id: String,
    title: String,
    content: String,
    author_id: String,
    target_audience: String,
    priority: String,
    attachments: String,
    is_active: bool,
    expires_at: Option<String>,
    created_at: String,
    updated_at: String,
}

const ANNOUNCEMENT_COLS: &str = "id, title, content, author_id, target_audience, priority,
    attachments, is_active, expires_at, created_at, updated_at";

fn row_to_announcement(r: &rusqlite::Row<'_>) -> rusqlite::Result<AnnouncementRow> {
    Ok(AnnouncementRow {
        id: r.get(0)?,
        title: r.get(1)?,
        content: r.get(2)?,
        author_id: r.get(3)?,
        target_audience: r.get(4)?,
        priority: r.get(5)?,
        attachments: r.get(6)?,
        is_active: r.get::<_, i64>(7)? != 0,
        expires_at: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn expand_announcement(conn: &Connection, a: &AnnouncementRow) -> Result<Value, ApiError> {
    let mut stmt =
        conn.prepare("SELECT student_id FROM announcement_students WHERE announcement_id = ?")?;
    let student_ids: Vec<String> = stmt
        .query_map([&a.id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut targets = Vec::with_capacity(student_ids.len());
    for sid in &student_ids {
        targets.push(expand::student_brief(conn, sid)?);
    }
    Ok(json!({
        "id": a.id,
        "title": a.title,
        "content": a.content,
        "authorId": expand::user_brief(conn, &a.author_id)?,
        "targetAudience": a.target_audience,
        "targetStudentIds": targets,
        "priority": a.priority,
        "attachments": expand::attachments_value(&a.attachments),
        "isActive": a.is_active,
        "expiresAt": a.expires_at,
        "createdAt": a.created_at,
        "updatedAt": a.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnnouncementFilters {
    priority: Option<String>,
    target_audience: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<AnnouncementFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Announcement, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.priority {
        clauses.push("priority = ?".into());
        params.push(v);
    }
    // Audience filters narrow the visible set; they cannot widen it past the
    // policy clause.
    if let Some(v) = f.target_audience {
        clauses.push("target_audience = ?".into());
        params.push(v);
    }
    let sql = format!(
        "SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE {} ORDER BY created_at DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_announcement(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for a in &rows {
        out.push(expand_announcement(&conn, a)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Announcement, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| {
            row_to_announcement(r)
        })
        .optional()?;
    match row {
        Some(a) => Ok(Json(expand_announcement(&conn, &a)?)),
        None => Err(ApiError::not_found("Announcement not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnouncementPayload {
    title: Option<String>,
    content: Option<String>,
    target_audience: Option<String>,
    target_student_ids: Option<Vec<String>>,
    priority: Option<String>,
    attachments: Option<Value>,
    is_active: Option<bool>,
    expires_at: Option<String>,
}

fn check_targets(
    conn: &Connection,
    audience: &str,
    targets: &[String],
) -> Result<(), ApiError> {
    if audience == "specific" {
        if targets.is_empty() {
            return Err(ApiError::validation(
                "targetStudentIds is required for a specific audience",
            ));
        }
        for sid in targets {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM students WHERE id = ?", [sid], |r| r.get(0))
                .optional()?;
            if found.is_none() {
                return Err(ApiError::validation(
                    "targetStudentIds must reference existing students",
                ));
            }
        }
    } else if !targets.is_empty() {
        return Err(ApiError::validation(
            "targetStudentIds only applies to a specific audience",
        ));
    }
    Ok(())
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<AnnouncementPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Announcement, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let title = required_str(payload.title, "title")?;
    let content = required_str(payload.content, "content")?;
    let audience = payload.target_audience.unwrap_or_else(|| "all".into());
    one_of(&audience, AUDIENCES, "targetAudience")?;
    let priority = payload.priority.unwrap_or_else(|| "medium".into());
    one_of(&priority, PRIORITIES, "priority")?;
    if let Some(e) = &payload.expires_at {
        check_timestamp(e, "expiresAt")?;
    }
    let targets = payload.target_student_ids.unwrap_or_default();

    let conn = state.conn()?;
    check_targets(&conn, &audience, &targets)?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let attachments = payload.attachments.unwrap_or_else(|| json!([]));
    let is_active = payload.is_active.unwrap_or(true);

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO announcements(id, title, content, author_id, target_audience, priority,
                                   attachments, is_active, expires_at, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &title, &content, &actor.id, &audience, &priority,
            attachments.to_string(), is_active, &payload.expires_at, &now, &now,
        ),
    )?;
    for sid in &targets {
        tx.execute(
            "INSERT OR IGNORE INTO announcement_students(announcement_id, student_id) VALUES(?, ?)",
            (&id, sid),
        )?;
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE id = ?"),
        [&id],
        |r| row_to_announcement(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_announcement(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<AnnouncementPayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE id = ?"),
            [&id],
            |r| row_to_announcement(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Announcement not found"));
    };
    if !policy::owns(&actor, &existing.author_id) {
        return Err(ApiError::forbidden("Access denied"));
    }

    let audience = payload.target_audience.unwrap_or(existing.target_audience);
    one_of(&audience, AUDIENCES, "targetAudience")?;
    let priority = payload.priority.unwrap_or(existing.priority);
    one_of(&priority, PRIORITIES, "priority")?;
    let title = payload.title.unwrap_or(existing.title);
    let content = payload.content.unwrap_or(existing.content);
    let is_active = payload.is_active.unwrap_or(existing.is_active);
    let expires_at = match payload.expires_at {
        Some(e) => {
            check_timestamp(&e, "expiresAt")?;
            Some(e)
        }
        None => existing.expires_at,
    };
    let attachments = payload
        .attachments
        .map(|v| v.to_string())
        .unwrap_or(existing.attachments);

    if let Some(targets) = &payload.target_student_ids {
        check_targets(&conn, &audience, targets)?;
    } else if audience == "specific" {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM announcement_students WHERE announcement_id = ?",
            [&id],
            |r| r.get(0),
        )?;
        if count == 0 {
            return Err(ApiError::validation(
                "targetStudentIds is required for a specific audience",
            ));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE announcements SET title = ?, content = ?, target_audience = ?, priority = ?,
                                  attachments = ?, is_active = ?, expires_at = ?, updated_at = ?
         WHERE id = ?",
        (
            &title, &content, &audience, &priority, &attachments, is_active,
            &expires_at, now_rfc3339(), &id,
        ),
    )?;
    if let Some(targets) = &payload.target_student_ids {
        tx.execute(
            "DELETE FROM announcement_students WHERE announcement_id = ?",
            [&id],
        )?;
        for sid in targets {
            tx.execute(
                "INSERT OR IGNORE INTO announcement_students(announcement_id, student_id) VALUES(?, ?)",
                (&id, sid),
            )?;
        }
    } else if audience != "specific" {
        tx.execute(
            "DELETE FROM announcement_students WHERE announcement_id = ?",
            [&id],
        )?;
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {ANNOUNCEMENT_COLS} FROM announcements WHERE id = ?"),
        [&id],
        |r| row_to_announcement(r),
    )?;
    Ok(Json(expand_announcement(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let owner: Option<String> = conn
        .query_row(
            "SELECT author_id FROM announcements WHERE id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(owner) = owner else {
        return Err(ApiError::not_found("Announcement not found"));
    };
    if !policy::owns(&actor, &owner) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM announcement_students WHERE announcement_id = ?",
        [&id],
    )?;
    tx.execute("DELETE FROM announcements WHERE id = ?", [&id])?;
    tx.commit()?;
    Ok(Json(json!({ "message": "Announcement deleted successfully" })))
}
