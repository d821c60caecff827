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
use crate::http::helpers::{check_timestamp, now_rfc3339, one_of, required, required_str};
use crate::http::types::AppState;

const GRADE_TYPES: &[&str] = &[
    "assignment",
    "quiz",
    "exam",
    "project",
    "participation",
    "other",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete_one))
}

struct GradeRow {
    id: String,
    student_id: String,
    teacher_id: String,
    subject: String,
    assignment_id: Option<String>,
    grade: f64,
    max_grade: f64,
    grade_type: String,
    comments: Option<String>,
    date: String,
    created_at: String,
    updated_at: String,
}

const GRADE_COLS: &str = "id, student_id, teacher_id, subject, assignment_id, grade, max_grade,
    grade_type, comments, date, created_at, updated_at";

fn row_to_grade(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        teacher_id: r.get(2)?,
        subject: r.get(3)?,
        assignment_id: r.get(4)?,
        grade: r.get(5)?,
        max_grade: r.get(6)?,
        grade_type: r.get(7)?,
        comments: r.get(8)?,
        date: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

fn expand_grade(conn: &Connection, g: &GradeRow) -> Result<Value, ApiError> {
    let assignment = match &g.assignment_id {
        Some(aid) => {
            let title: Option<String> = conn
                .query_row("SELECT title FROM assignments WHERE id = ?", [aid], |r| {
                    r.get(0)
                })
                .optional()?;
            match title {
                Some(t) => json!({ "id": aid, "title": t }),
                None => Value::Null,
            }
        }
        None => Value::Null,
    };
    let percentage = if g.max_grade > 0.0 {
        (g.grade / g.max_grade * 1000.0).round() / 10.0
    } else {
        0.0
    };
    Ok(json!({
        "id": g.id,
        "studentId": expand::student_brief(conn, &g.student_id)?,
        "teacherId": expand::user_brief(conn, &g.teacher_id)?,
        "subject": g.subject,
        "assignmentId": assignment,
        "grade": g.grade,
        "maxGrade": g.max_grade,
        "percentage": percentage,
        "gradeType": g.grade_type,
        "comments": g.comments,
        "date": g.date,
        "createdAt": g.created_at,
        "updatedAt": g.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GradeFilters {
    student_id: Option<String>,
    subject: Option<String>,
    grade_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<GradeFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Grade, &actor, &now_rfc3339());
    let mut clauses = vec![scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.student_id {
        clauses.push("student_id = ?".into());
        params.push(v);
    }
    if let Some(v) = f.subject {
        clauses.push("subject = ?".into());
        params.push(v);
    }
    if let Some(v) = f.grade_type {
        clauses.push("grade_type = ?".into());
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
        "SELECT {GRADE_COLS} FROM grades WHERE {} ORDER BY date DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_grade(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for g in &rows {
        out.push(expand_grade(&conn, g)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Grade, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {GRADE_COLS} FROM grades WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| row_to_grade(r))
        .optional()?;
    match row {
        Some(g) => Ok(Json(expand_grade(&conn, &g)?)),
        None => Err(ApiError::not_found("Grade not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradePayload {
    student_id: Option<String>,
    subject: Option<String>,
    grade: Option<f64>,
    max_grade: Option<f64>,
    grade_type: Option<String>,
    comments: Option<String>,
    assignment_id: Option<String>,
    date: Option<String>,
}

fn check_bounds(grade: f64, max_grade: f64) -> Result<(), ApiError> {
    if max_grade <= 0.0 {
        return Err(ApiError::validation("maxGrade must be positive"));
    }
    if grade < 0.0 || grade > max_grade {
        return Err(ApiError::validation(
            "grade must be between 0 and maxGrade",
        ));
    }
    Ok(())
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<GradePayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Grade, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let student_id = required_str(payload.student_id, "studentId")?;
    let subject = required_str(payload.subject, "subject")?;
    let grade = required(payload.grade, "grade")?;
    let max_grade = payload.max_grade.unwrap_or(100.0);
    check_bounds(grade, max_grade)?;
    let grade_type = payload.grade_type.unwrap_or_else(|| "assignment".into());
    one_of(&grade_type, GRADE_TYPES, "gradeType")?;
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
    if let Some(aid) = &payload.assignment_id {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM assignments WHERE id = ?", [aid], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(ApiError::validation(
                "assignmentId does not reference an assignment",
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    // The author is always the actor; a client-supplied teacherId is ignored.
    conn.execute(
        "INSERT INTO grades(id, student_id, teacher_id, subject, assignment_id, grade,
                            max_grade, grade_type, comments, date, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &student_id, &actor.id, &subject, &payload.assignment_id, grade,
            max_grade, &grade_type, &payload.comments, &date, &now, &now,
        ),
    )?;

    let row = conn.query_row(
        &format!("SELECT {GRADE_COLS} FROM grades WHERE id = ?"),
        [&id],
        |r| row_to_grade(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_grade(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<GradePayload>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let existing = conn
        .query_row(
            &format!("SELECT {GRADE_COLS} FROM grades WHERE id = ?"),
            [&id],
            |r| row_to_grade(r),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Err(ApiError::not_found("Grade not found"));
    };
    if !policy::owns(&actor, &existing.teacher_id) {
        return Err(ApiError::forbidden("Access denied"));
    }

    // Shallow merge: absent fields keep their stored value.
    let grade = payload.grade.unwrap_or(existing.grade);
    let max_grade = payload.max_grade.unwrap_or(existing.max_grade);
    check_bounds(grade, max_grade)?;
    let grade_type = payload.grade_type.unwrap_or(existing.grade_type);
    one_of(&grade_type, GRADE_TYPES, "gradeType")?;
    let subject = payload.subject.unwrap_or(existing.subject);
    let comments = payload.comments.or(existing.comments);
    let date = payload.date.unwrap_or(existing.date);
    check_timestamp(&date, "date")?;
    let student_id = match payload.student_id {
        Some(sid) => {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM students WHERE id = ?", [&sid], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(ApiError::validation("studentId does not reference a student"));
            }
            sid
        }
        None => existing.student_id,
    };
    let assignment_id = match payload.assignment_id {
        Some(aid) => {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM assignments WHERE id = ?", [&aid], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(ApiError::validation(
                    "assignmentId does not reference an assignment",
                ));
            }
            Some(aid)
        }
        None => existing.assignment_id,
    };

    conn.execute(
        "UPDATE grades SET student_id = ?, assignment_id = ?, subject = ?, grade = ?,
                           max_grade = ?, grade_type = ?, comments = ?, date = ?,
                           updated_at = ?
         WHERE id = ?",
        (
            &student_id, &assignment_id, &subject, grade, max_grade, &grade_type,
            &comments, &date, now_rfc3339(), &id,
        ),
    )?;
    let row = conn.query_row(
        &format!("SELECT {GRADE_COLS} FROM grades WHERE id = ?"),
        [&id],
        |r| row_to_grade(r),
    )?;
    Ok(Json(expand_grade(&conn, &row)?))
}

async fn delete_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let owner: Option<String> = conn
        .query_row("SELECT teacher_id FROM grades WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(owner) = owner else {
        return Err(ApiError::not_found("Grade not found"));
    };
    if !policy::owns(&actor, &owner) {
        return Err(ApiError::forbidden("Access denied"));
    }
    conn.execute("DELETE FROM grades WHERE id = ?", [&id])?;
    Ok(Json(json!({ "message": "Grade deleted successfully" })))
}
