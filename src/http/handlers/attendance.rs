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
use crate::http::helpers::{is_unique_violation, normalize_date, now_rfc3339, one_of, required_str};
use crate::http::types::AppState;

const STATUSES: &[&str] = &["present", "absent", "late", "excused"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
}

struct AttendanceRow {
    id: String,
    student_id: String,
    teacher_id: String,
    date: String,
    status: String,
    subject: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

const ATTENDANCE_COLS: &str =
    "id, student_id, teacher_id, date, status, subject, notes, created_at, updated_at";

fn row_to_attendance(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        teacher_id: r.get(2)?,
        date: r.get(3)?,
        status: r.get(4)?,
        subject: r.get(5)?,
        notes: r.get(6)?,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

fn expand_attendance(conn: &Connection, a: &AttendanceRow) -> Result<Value, ApiError> {
    Ok(json!({
        "id": a.id,
        "studentId": expand::student_brief(conn, &a.student_id)?,
        "teacherId": expand::user_brief(conn, &a.teacher_id)?,
        "date": a.date,
        "status": a.status,
        "subject": a.subject,
        "notes": a.notes,
        "createdAt": a.created_at,
        "updatedAt": a.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AttendanceFilters {
    student_id: Option<String>,
    status: Option<String>,
    subject: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<AttendanceFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Attendance, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.student_id {
        clauses.push("student_id = ?".into());
        params.push(v);
    }
    if let Some(v) = f.status {
        clauses.push("status = ?".into());
        params.push(v);
    }
    if let Some(v) = f.subject {
        clauses.push("subject = ?".into());
        params.push(v);
    }
    if let Some(v) = f.start_date {
        clauses.push("date >= ?".into());
        params.push(normalize_date(&v, "startDate")?);
    }
    if let Some(v) = f.end_date {
        clauses.push("date <= ?".into());
        params.push(normalize_date(&v, "endDate")?);
    }
    let sql = format!(
        "SELECT {ATTENDANCE_COLS} FROM attendance WHERE {} ORDER BY date DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_attendance(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for a in &rows {
        out.push(expand_attendance(&conn, a)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Attendance, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {ATTENDANCE_COLS} FROM attendance WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| {
            row_to_attendance(r)
        })
        .optional()?;
    match row {
        Some(a) => Ok(Json(expand_attendance(&conn, &a)?)),
        None => Err(ApiError::not_found("Attendance record not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendancePayload {
    student_id: Option<String>,
    date: Option<String>,
    status: Option<String>,
    subject: Option<String>,
    notes: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<AttendancePayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Attendance, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let student_id = required_str(payload.student_id, "studentId")?;
    let date = normalize_date(&required_str(payload.date, "date")?, "date")?;
    let status = required_str(payload.status, "status")?;
    one_of(&status, STATUSES, "status")?;
    let subject = payload.subject.unwrap_or_default();

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
    // Duplicate (student, date, subject) keys are rejected by the UNIQUE
    // constraint; that also holds when two submissions race.
    let inserted = conn.execute(
        "INSERT INTO attendance(id, student_id, teacher_id, date, status, subject, notes,
                                created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &student_id, &actor.id, &date, &status, &subject,
            &payload.notes, &now, &now,
        ),
    );
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(ApiError::validation(format!(
                "Attendance already recorded for {subject} on this date"
            )));
        }
        return Err(e.into());
    }

    let row = conn.query_row(
        &format!("SELECT {ATTENDANCE_COLS} FROM attendance WHERE id = ?"),
        [&id],
        |r| row_to_attendance(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_attendance(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<AttendancePayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {ATTENDANCE_COLS} FROM attendance WHERE id = ?"),
            [&id],
            |r| row_to_attendance(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Attendance record not found"));
    };
    if !policy::owns(&actor, &existing.teacher_id) {
        return Err(ApiError::forbidden("Access denied"));
    }

    let status = payload.status.unwrap_or(existing.status);
    one_of(&status, STATUSES, "status")?;
    let date = match payload.date {
        Some(d) => normalize_date(&d, "date")?,
        None => existing.date,
    };
    let subject = payload.subject.unwrap_or(existing.subject);
    let notes = payload.notes.or(existing.notes);

    let updated = conn.execute(
        "UPDATE attendance SET date = ?, status = ?, subject = ?, notes = ?, updated_at = ?
         WHERE id = ?",
        (&date, &status, &subject, &notes, now_rfc3339(), &id),
    );
    if let Err(e) = updated {
        if is_unique_violation(&e) {
            return Err(ApiError::validation(format!(
                "Attendance already recorded for {subject} on this date"
            )));
        }
        return Err(e.into());
    }

    let row = conn.query_row(
        &format!("SELECT {ATTENDANCE_COLS} FROM attendance WHERE id = ?"),
        [&id],
        |r| row_to_attendance(r),
    )?;
    Ok(Json(expand_attendance(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let owner: Option<String> = conn
        .query_row("SELECT teacher_id FROM attendance WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(owner) = owner else {
        return Err(ApiError::not_found("Attendance record not found"));
    };
    if !policy::owns(&actor, &owner) {
        return Err(ApiError::forbidden("Access denied"));
    }
    conn.execute("DELETE FROM attendance WHERE id = ?", [&id])?;
    Ok(Json(json!({ "message": "Attendance record deleted successfully" })))
}
