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

const STATUSES: &[&str] = &["draft", "published", "closed"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
}

struct AssignmentRow {
    id: String,
    title: String,
    description: Option<String>,
    subject: String,
    teacher_id: String,
    due_date: String,
    max_grade: f64,
    attachments: String,
    status: String,
    created_at: String,
    updated_at: String,
}

const ASSIGNMENT_COLS: &str = "id, title, description, subject, teacher_id, due_date, max_grade,
    attachments, status, created_at, updated_at";

fn row_to_assignment(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssignmentRow> {
    Ok(AssignmentRow {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        subject: r.get(3)?,
        teacher_id: r.get(4)?,
        due_date: r.get(5)?,
        max_grade: r.get(6)?,
        attachments: r.get(7)?,
        status: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn expand_assignment(conn: &Connection, a: &AssignmentRow) -> Result<Value, ApiError> {
    let mut stmt =
        conn.prepare("SELECT student_id FROM assignment_students WHERE assignment_id = ?")?;
    let student_ids: Vec<String> = stmt
        .query_map([&a.id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut students = Vec::with_capacity(student_ids.len());
    for sid in &student_ids {
        students.push(expand::student_brief(conn, sid)?);
    }
    Ok(json!({
        "id": a.id,
        "title": a.title,
        "description": a.description,
        "subject": a.subject,
        "teacherId": expand::user_brief(conn, &a.teacher_id)?,
        "studentIds": students,
        "dueDate": a.due_date,
        "maxGrade": a.max_grade,
        "attachments": expand::attachments_value(&a.attachments),
        "status": a.status,
        "createdAt": a.created_at,
        "updatedAt": a.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AssignmentFilters {
    student_id: Option<String>,
    subject: Option<String>,
    status: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<AssignmentFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Assignment, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.student_id {
        clauses.push(
            "EXISTS (SELECT 1 FROM assignment_students ax
                     WHERE ax.assignment_id = assignments.id AND ax.student_id = ?)"
                .into(),
        );
        params.push(v);
    }
    if let Some(v) = f.subject {
        clauses.push("subject = ?".into());
        params.push(v);
    }
    // A status filter narrows the scope but cannot reveal drafts the policy
    // already excludes.
    if let Some(v) = f.status {
        clauses.push("status = ?".into());
        params.push(v);
    }
    let sql = format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments WHERE {} ORDER BY due_date DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_assignment(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for a in &rows {
        out.push(expand_assignment(&conn, a)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Assignment, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| {
            row_to_assignment(r)
        })
        .optional()?;
    match row {
        Some(a) => Ok(Json(expand_assignment(&conn, &a)?)),
        None => Err(ApiError::not_found("Assignment not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentPayload {
    title: Option<String>,
    description: Option<String>,
    subject: Option<String>,
    student_ids: Option<Vec<String>>,
    due_date: Option<String>,
    max_grade: Option<f64>,
    attachments: Option<Value>,
    status: Option<String>,
}

fn check_students_exist(conn: &Connection, ids: &[String]) -> Result<(), ApiError> {
    for sid in ids {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [sid], |r| r.get(0))
            .optional()?;
        if found.is_none() {
            return Err(ApiError::validation(
                "studentIds must reference existing students",
            ));
        }
    }
    Ok(())
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<AssignmentPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Assignment, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let title = required_str(payload.title, "title")?;
    let subject = required_str(payload.subject, "subject")?;
    let due_date = required_str(payload.due_date, "dueDate")?;
    check_timestamp(&due_date, "dueDate")?;
    let status = payload.status.unwrap_or_else(|| "published".into());
    one_of(&status, STATUSES, "status")?;
    let max_grade = payload.max_grade.unwrap_or(100.0);
    if max_grade <= 0.0 {
        return Err(ApiError::validation("maxGrade must be positive"));
    }
    let student_ids = payload.student_ids.unwrap_or_default();

    let conn = state.conn()?;
    check_students_exist(&conn, &student_ids)?;

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let attachments = payload.attachments.unwrap_or_else(|| json!([]));

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO assignments(id, title, description, subject, teacher_id, due_date,
                                 max_grade, attachments, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &title, &payload.description, &subject, &actor.id, &due_date,
            max_grade, attachments.to_string(), &status, &now, &now,
        ),
    )?;
    for sid in &student_ids {
        tx.execute(
            "INSERT OR IGNORE INTO assignment_students(assignment_id, student_id) VALUES(?, ?)",
            (&id, sid),
        )?;
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = ?"),
        [&id],
        |r| row_to_assignment(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_assignment(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<AssignmentPayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = ?"),
            [&id],
            |r| row_to_assignment(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Assignment not found"));
    };
    if !policy::owns(&actor, &existing.teacher_id) {
        return Err(ApiError::forbidden("Access denied"));
    }

    let status = payload.status.unwrap_or(existing.status);
    one_of(&status, STATUSES, "status")?;
    let max_grade = payload.max_grade.unwrap_or(existing.max_grade);
    if max_grade <= 0.0 {
        return Err(ApiError::validation("maxGrade must be positive"));
    }
    let title = payload.title.unwrap_or(existing.title);
    let subject = payload.subject.unwrap_or(existing.subject);
    let due_date = match payload.due_date {
        Some(d) => {
            check_timestamp(&d, "dueDate")?;
            d
        }
        None => existing.due_date,
    };
    let description = payload.description.or(existing.description);
    let attachments = payload
        .attachments
        .map(|v| v.to_string())
        .unwrap_or(existing.attachments);
    if let Some(students) = &payload.student_ids {
        check_students_exist(&conn, students)?;
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE assignments SET title = ?, description = ?, subject = ?, due_date = ?,
                                max_grade = ?, attachments = ?, status = ?, updated_at = ?
         WHERE id = ?",
        (
            &title, &description, &subject, &due_date, max_grade, &attachments,
            &status, now_rfc3339(), &id,
        ),
    )?;
    if let Some(students) = &payload.student_ids {
        tx.execute(
            "DELETE FROM assignment_students WHERE assignment_id = ?",
            [&id],
        )?;
        for sid in students {
            tx.execute(
                "INSERT OR IGNORE INTO assignment_students(assignment_id, student_id) VALUES(?, ?)",
                (&id, sid),
            )?;
        }
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = ?"),
        [&id],
        |r| row_to_assignment(r),
    )?;
    Ok(Json(expand_assignment(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let owner: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM assignments WHERE id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(owner) = owner else {
        return Err(ApiError::not_found("Assignment not found"));
    };
    if !policy::owns(&actor, &owner) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM assignment_students WHERE assignment_id = ?",
        [&id],
    )?;
    tx.execute("DELETE FROM assignments WHERE id = ?", [&id])?;
    tx.commit()?;
    Ok(Json(json!({ "message": "Assignment deleted successfully" })))
}
