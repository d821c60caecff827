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
use crate::http::helpers::{check_timestamp, now_rfc3339, one_of, required_str};
use crate::http::types::AppState;

const STATUSES: &[&str] = &["pending", "confirmed", "cancelled", "completed"];
const LOCATIONS: &[&str] = &["in-person", "online", "phone"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
        .route("/:id/status", put(update_status))
}

struct MeetingRow {
    id: String,
    title: String,
    description: Option<String>,
    parent_id: String,
    teacher_id: String,
    student_id: String,
    scheduled_date: String,
    duration: i64,
    status: String,
    location: String,
    meeting_link: Option<String>,
    notes: Option<String>,
    requested_by: String,
    created_at: String,
    updated_at: String,
}

const MEETING_COLS: &str = "id, title, description, parent_id, teacher_id, student_id,
    scheduled_date, duration, status, location, meeting_link, notes, requested_by,
    created_at, updated_at";

fn row_to_meeting(r: &rusqlite::Row<'_>) -> rusqlite::Result<MeetingRow> {
    Ok(MeetingRow {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        parent_id: r.get(3)?,
        teacher_id: r.get(4)?,
        student_id: r.get(5)?,
        scheduled_date: r.get(6)?,
        duration: r.get(7)?,
        status: r.get(8)?,
        location: r.get(9)?,
        meeting_link: r.get(10)?,
        notes: r.get(11)?,
        requested_by: r.get(12)?,
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
    })
}

fn expand_meeting(conn: &Connection, m: &MeetingRow) -> Result<Value, ApiError> {
    Ok(json!({
        "id": m.id,
        "title": m.title,
        "description": m.description,
        "parentId": expand::user_brief(conn, &m.parent_id)?,
        "teacherId": expand::user_brief(conn, &m.teacher_id)?,
        "studentId": expand::student_brief(conn, &m.student_id)?,
        "scheduledDate": m.scheduled_date,
        "duration": m.duration,
        "status": m.status,
        "location": m.location,
        "meetingLink": m.meeting_link,
        "notes": m.notes,
        "requestedBy": m.requested_by,
        "createdAt": m.created_at,
        "updatedAt": m.updated_at,
    }))
}

/// Either participant may mutate a meeting, unlike the single-author rule on
/// academic records.
fn is_participant(actor: &Actor, m: &MeetingRow) -> bool {
    actor.role == Role::Admin || actor.id == m.parent_id || actor.id == m.teacher_id
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MeetingFilters {
    status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<MeetingFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Meeting, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.status {
        clauses.push("status = ?".into());
        params.push(v);
    }
    if let Some(v) = f.start_date {
        clauses.push("scheduled_date >= ?".into());
        params.push(v);
    }
    if let Some(v) = f.end_date {
        clauses.push("scheduled_date <= ?".into());
        params.push(v);
    }
    let sql = format!(
        "SELECT {MEETING_COLS} FROM meetings WHERE {} ORDER BY scheduled_date",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_meeting(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for m in &rows {
        out.push(expand_meeting(&conn, m)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Meeting, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {MEETING_COLS} FROM meetings WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| row_to_meeting(r))
        .optional()?;
    match row {
        Some(m) => Ok(Json(expand_meeting(&conn, &m)?)),
        None => Err(ApiError::not_found("Meeting not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingPayload {
    title: Option<String>,
    description: Option<String>,
    parent_id: Option<String>,
    teacher_id: Option<String>,
    student_id: Option<String>,
    scheduled_date: Option<String>,
    duration: Option<i64>,
    status: Option<String>,
    location: Option<String>,
    meeting_link: Option<String>,
    notes: Option<String>,
}

fn user_role(conn: &Connection, id: &str) -> Result<Option<String>, ApiError> {
    Ok(conn
        .query_row("SELECT role FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?)
}

fn is_parent_of(conn: &Connection, parent_id: &str, student_id: &str) -> Result<bool, ApiError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM student_parents WHERE student_id = ? AND parent_id = ?",
            (student_id, parent_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<MeetingPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Meeting, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let title = required_str(payload.title, "title")?;
    let student_id = required_str(payload.student_id, "studentId")?;
    let scheduled_date = required_str(payload.scheduled_date, "scheduledDate")?;
    check_timestamp(&scheduled_date, "scheduledDate")?;
    let location = payload.location.unwrap_or_else(|| "in-person".into());
    one_of(&location, LOCATIONS, "location")?;
    let duration = payload.duration.unwrap_or(30);
    if duration <= 0 {
        return Err(ApiError::validation("duration must be positive"));
    }

    let conn = state.conn()?;
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if student_exists.is_none() {
        return Err(ApiError::validation("studentId does not reference a student"));
    }

    // Participant eligibility: the actor fills their own side; the counter
    // party must hold the matching role and the student must belong to the
    // parent involved.
    let (parent_id, teacher_id) = match actor.role {
        Role::Parent => {
            if let Some(pid) = &payload.parent_id {
                if *pid != actor.id {
                    return Err(ApiError::forbidden(
                        "You can only create meetings as yourself",
                    ));
                }
            }
            let teacher_id = required_str(payload.teacher_id, "teacherId")?;
            if user_role(&conn, &teacher_id)?.as_deref() != Some("teacher") {
                return Err(ApiError::validation(
                    "teacherId must reference a teacher account",
                ));
            }
            if !is_parent_of(&conn, &actor.id, &student_id)? {
                return Err(ApiError::forbidden(
                    "Student not associated with your account",
                ));
            }
            (actor.id.clone(), teacher_id)
        }
        Role::Teacher => {
            if let Some(tid) = &payload.teacher_id {
                if *tid != actor.id {
                    return Err(ApiError::forbidden(
                        "You can only create meetings as yourself",
                    ));
                }
            }
            let parent_id = required_str(payload.parent_id, "parentId")?;
            if user_role(&conn, &parent_id)?.as_deref() != Some("parent") {
                return Err(ApiError::validation(
                    "parentId must reference a parent account",
                ));
            }
            if !is_parent_of(&conn, &parent_id, &student_id)? {
                return Err(ApiError::forbidden(
                    "Student not associated with that parent",
                ));
            }
            (parent_id, actor.id.clone())
        }
        // Already rejected by the create gate above.
        Role::Admin => return Err(ApiError::forbidden("Access denied")),
    };

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO meetings(id, title, description, parent_id, teacher_id, student_id,
                              scheduled_date, duration, status, location, meeting_link,
                              notes, requested_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)",
        (
            &id, &title, &payload.description, &parent_id, &teacher_id, &student_id,
            &scheduled_date, duration, &location, &payload.meeting_link,
            &payload.notes, actor.role.as_str(), &now, &now,
        ),
    )?;

    let row = conn.query_row(
        &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
        [&id],
        |r| row_to_meeting(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_meeting(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<MeetingPayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
            [&id],
            |r| row_to_meeting(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Meeting not found"));
    };
    if !is_participant(&actor, &existing) {
        return Err(ApiError::forbidden("Access denied"));
    }

    let status = payload.status.unwrap_or(existing.status);
    one_of(&status, STATUSES, "status")?;
    let location = payload.location.unwrap_or(existing.location);
    one_of(&location, LOCATIONS, "location")?;
    let duration = payload.duration.unwrap_or(existing.duration);
    if duration <= 0 {
        return Err(ApiError::validation("duration must be positive"));
    }
    let title = payload.title.unwrap_or(existing.title);
    let scheduled_date = match payload.scheduled_date {
        Some(d) => {
            check_timestamp(&d, "scheduledDate")?;
            d
        }
        None => existing.scheduled_date,
    };
    let description = payload.description.or(existing.description);
    let meeting_link = payload.meeting_link.or(existing.meeting_link);
    let notes = payload.notes.or(existing.notes);

    conn.execute(
        "UPDATE meetings SET title = ?, description = ?, scheduled_date = ?, duration = ?,
                             status = ?, location = ?, meeting_link = ?, notes = ?,
                             updated_at = ?
         WHERE id = ?",
        (
            &title, &description, &scheduled_date, duration, &status, &location,
            &meeting_link, &notes, now_rfc3339(), &id,
        ),
    )?;
    let row = conn.query_row(
        &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
        [&id],
        |r| row_to_meeting(r),
    )?;
    Ok(Json(expand_meeting(&conn, &row)?))
}

#[derive(Deserialize)]
struct StatusPayload {
    status: Option<String>,
}

/// Narrow transition endpoint: either participant moves the meeting through
/// its lifecycle without touching other fields.
async fn update_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<StatusPayload>,
) -> ApiResult<Json<Value>> {
    let status = required_str(payload.status, "status")?;
    one_of(&status, STATUSES, "status")?;

    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
            [&id],
            |r| row_to_meeting(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Meeting not found"));
    };
    if !is_participant(&actor, &existing) {
        return Err(ApiError::forbidden("Access denied"));
    }

    conn.execute(
        "UPDATE meetings SET status = ?, updated_at = ? WHERE id = ?",
        (&status, now_rfc3339(), &id),
    )?;
    let row = conn.query_row(
        &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
        [&id],
        |r| row_to_meeting(r),
    )?;
    Ok(Json(expand_meeting(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {MEETING_COLS} FROM meetings WHERE id = ?"),
            [&id],
            |r| row_to_meeting(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Meeting not found"));
    };
    if !is_participant(&actor, &existing) {
        return Err(ApiError::forbidden("Access denied"));
    }
    conn.execute("DELETE FROM meetings WHERE id = ?", [&id])?;
    Ok(Json(json!({ "message": "Meeting deleted successfully" })))
}
