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

const TYPES: &[&str] = &["positive", "negative", "neutral"];
const CATEGORIES: &[&str] = &["academic", "social", "behavioral", "participation", "other"];
const SEVERITIES: &[&str] = &["low", "medium", "high"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
}

struct BehaviorRow {
    id: String,
    student_id: String,
    teacher_id: String,
    kind: String,
    category: String,
    title: String,
    description: String,
    date: String,
    severity: String,
    subject: Option<String>,
    created_at: String,
    updated_at: String,
}

const BEHAVIOR_COLS: &str = "id, student_id, teacher_id, type, category, title, description,
    date, severity, subject, created_at, updated_at";

fn row_to_behavior(r: &rusqlite::Row<'_>) -> rusqlite::Result<BehaviorRow> {
    Ok(BehaviorRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        teacher_id: r.get(2)?,
        kind: r.get(3)?,
        category: r.get(4)?,
        title: r.get(5)?,
        description: r.get(6)?,
        date: r.get(7)?,
        severity: r.get(8)?,
        subject: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

fn expand_behavior(conn: &Connection, b: &BehaviorRow) -> Result<Value, ApiError> {
    Ok(json!({
        "id": b.id,
        "studentId": expand::student_brief(conn, &b.student_id)?,
        "teacherId": expand::user_brief(conn, &b.teacher_id)?,
        "type": b.kind,
        "category": b.category,
        "title": b.title,
        "description": b.description,
        "date": b.date,
        "severity": b.severity,
        "subject": b.subject,
        "createdAt": b.created_at,
        "updatedAt": b.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BehaviorFilters {
    student_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
    subject: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<BehaviorFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Behavior, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.student_id {
        clauses.push("student_id = ?".into());
        params.push(v);
    }
    if let Some(v) = f.kind {
        clauses.push("type = ?".into());
        params.push(v);
    }
    if let Some(v) = f.category {
        clauses.push("category = ?".into());
        params.push(v);
    }
    if let Some(v) = f.subject {
        clauses.push("subject = ?".into());
        params.push(v);
    }
    if let Some(v) = f.start_date {
        clauses.push("date >= ?".into());
        params.push(v);
    }
    if let Some(v) = f.end_date {
        clauses.push("date <= ?".into());
        params.push(v);
    }
    let sql = format!(
        "SELECT {BEHAVIOR_COLS} FROM behavior WHERE {} ORDER BY date DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_behavior(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for b in &rows {
        out.push(expand_behavior(&conn, b)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Behavior, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {BEHAVIOR_COLS} FROM behavior WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| row_to_behavior(r))
        .optional()?;
    match row {
        Some(b) => Ok(Json(expand_behavior(&conn, &b)?)),
        None => Err(ApiError::not_found("Behavior report not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BehaviorPayload {
    student_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
    title: Option<String>,
    description: Option<String>,
    date: Option<String>,
    severity: Option<String>,
    subject: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<BehaviorPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Behavior, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let student_id = required_str(payload.student_id, "studentId")?;
    let kind = required_str(payload.kind, "type")?;
    one_of(&kind, TYPES, "type")?;
    let category = required_str(payload.category, "category")?;
    one_of(&category, CATEGORIES, "category")?;
    let title = required_str(payload.title, "title")?;
    let description = required_str(payload.description, "description")?;
    let severity = payload.severity.unwrap_or_else(|| "medium".into());
    one_of(&severity, SEVERITIES, "severity")?;
    let date = payload.date.unwrap_or_else(now_rfc3339);
    check_timestamp(&date, "date")?;

    let conn = state.conn()?;
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if student_exists.is_none() {
        return Err(ApiError::validation("studentId does not reference a student"));
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO behavior(id, student_id, teacher_id, type, category, title, description,
                              date, severity, subject, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &student_id, &actor.id, &kind, &category, &title, &description,
            &date, &severity, &payload.subject, &now, &now,
        ),
    )?;

    let row = conn.query_row(
        &format!("SELECT {BEHAVIOR_COLS} FROM behavior WHERE id = ?"),
        [&id],
        |r| row_to_behavior(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_behavior(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<BehaviorPayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {BEHAVIOR_COLS} FROM behavior WHERE id = ?"),
            [&id],
            |r| row_to_behavior(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Behavior report not found"));
    };
    if !policy::owns(&actor, &existing.teacher_id) {
        return Err(ApiError::forbidden("Access denied"));
    }

    let kind = payload.kind.unwrap_or(existing.kind);
    one_of(&kind, TYPES, "type")?;
    let category = payload.category.unwrap_or(existing.category);
    one_of(&category, CATEGORIES, "category")?;
    let severity = payload.severity.unwrap_or(existing.severity);
    one_of(&severity, SEVERITIES, "severity")?;
    let title = payload.title.unwrap_or(existing.title);
    let description = payload.description.unwrap_or(existing.description);
    let date = payload.date.unwrap_or(existing.date);
    check_timestamp(&date, "date")?;
    let subject = payload.subject.or(existing.subject);

    conn.execute(
        "UPDATE behavior SET type = ?, category = ?, title = ?, description = ?, date = ?,
                             severity = ?, subject = ?, updated_at = ?
         WHERE id = ?",
        (
            &kind, &category, &title, &description, &date, &severity, &subject,
            now_rfc3339(), &id,
        ),
    )?;
    let row = conn.query_row(
        &format!("SELECT {BEHAVIOR_COLS} FROM behavior WHERE id = ?"),
        [&id],
        |r| row_to_behavior(r),
    )?;
    Ok(Json(expand_behavior(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let owner: Option<String> = conn
        .query_row("SELECT teacher_id FROM behavior WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(owner) = owner else {
        return Err(ApiError::not_found("Behavior report not found"));
    };
    if !policy::owns(&actor, &owner) {
        return Err(ApiError::forbidden("Access denied"));
    }
    conn.execute("DELETE FROM behavior WHERE id = ?", [&id])?;
    Ok(Json(json!({ "message": "Behavior report deleted successfully" })))
}
