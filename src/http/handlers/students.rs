use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::policy::{self, Actor, Resource, Role};

use crate::http::error::{ApiError, ApiResult};
use crate::http::expand;
use crate::http::helpers::{normalize_date, now_rfc3339, required_str};
use crate::http::types::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update))
}

struct StudentRow {
    id: String,
    first_name: String,
    last_name: String,
    student_no: String,
    birth_date: String,
    grade_level: String,
    section: Option<String>,
    subjects: String,
    profile_picture: Option<String>,
    enrollment_date: String,
    is_active: i64,
    created_at: String,
    updated_at: String,
}

const STUDENT_COLS: &str = "id, first_name, last_name, student_no, birth_date, grade_level,
    section, subjects, profile_picture, enrollment_date, is_active, created_at, updated_at";

fn row_to_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        student_no: r.get(3)?,
        birth_date: r.get(4)?,
        grade_level: r.get(5)?,
        section: r.get(6)?,
        subjects: r.get(7)?,
        profile_picture: r.get(8)?,
        enrollment_date: r.get(9)?,
        is_active: r.get(10)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

fn expand_student(conn: &Connection, s: &StudentRow) -> Result<Value, ApiError> {
    let mut stmt =
        conn.prepare("SELECT parent_id FROM student_parents WHERE student_id = ?")?;
    let parent_ids: Vec<String> = stmt
        .query_map([&s.id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut stmt =
        conn.prepare("SELECT teacher_id FROM student_teachers WHERE student_id = ?")?;
    let teacher_ids: Vec<String> = stmt
        .query_map([&s.id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut parents = Vec::with_capacity(parent_ids.len());
    for pid in &parent_ids {
        parents.push(expand::user_brief(conn, pid)?);
    }
    let mut teachers = Vec::with_capacity(teacher_ids.len());
    for tid in &teacher_ids {
        teachers.push(expand::user_brief(conn, tid)?);
    }

    let subjects: Value = serde_json::from_str(&s.subjects).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "id": s.id,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "studentId": s.student_no,
        "dateOfBirth": s.birth_date,
        "grade": s.grade_level,
        "section": s.section,
        "subjects": subjects,
        "parentIds": parents,
        "teacherIds": teachers,
        "profilePicture": s.profile_picture,
        "enrollmentDate": s.enrollment_date,
        // A student with no linked parents is an explicit state, visible on
        // the roster, not a write-time error.
        "unlinked": parent_ids.is_empty(),
        "isActive": s.is_active != 0,
        "createdAt": s.created_at,
        "updatedAt": s.updated_at,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StudentFilters {
    grade: Option<String>,
    section: Option<String>,
    unlinked: Option<bool>,
}

async fn list(
    State(state): State<AppState>,
    actor: Actor,
    Query(f): Query<StudentFilters>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Student, &actor, &now_rfc3339());
    let mut clauses = vec!["is_active = 1".to_string(), scope.clause];
    let mut params = scope.params;
    if let Some(v) = f.grade {
        clauses.push("grade_level = ?".to_string());
        params.push(v);
    }
    if let Some(v) = f.section {
        clauses.push("section = ?".to_string());
        params.push(v);
    }
    if let Some(unlinked) = f.unlinked {
        let sub = "EXISTS (SELECT 1 FROM student_parents sp WHERE sp.student_id = students.id)";
        clauses.push(if unlinked {
            format!("NOT {sub}")
        } else {
            sub.to_string()
        });
    }
    let sql = format!(
        "SELECT {STUDENT_COLS} FROM students WHERE {} ORDER BY last_name, first_name",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_student(r))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for s in &rows {
        out.push(expand_student(&conn, s)?);
    }
    Ok(Json(json!(out)))
}

async fn get_one(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = state.conn()?;
    let scope = policy::visibility(Resource::Student, &actor, &now_rfc3339());
    let sql = format!(
        "SELECT {STUDENT_COLS} FROM students WHERE id = ? AND {}",
        scope.clause
    );
    let mut params = vec![id];
    params.extend(scope.params);
    let row = conn
        .query_row(&sql, params_from_iter(params.iter()), |r| row_to_student(r))
        .optional()?;
    match row {
        Some(s) => Ok(Json(expand_student(&conn, &s)?)),
        None => Err(ApiError::not_found("Student not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentPayload {
    first_name: Option<String>,
    last_name: Option<String>,
    student_id: Option<String>,
    date_of_birth: Option<String>,
    grade: Option<String>,
    section: Option<String>,
    subjects: Option<Vec<String>>,
    parent_ids: Option<Vec<String>>,
    teacher_ids: Option<Vec<String>>,
    profile_picture: Option<String>,
    is_active: Option<bool>,
}

fn check_users_have_role(
    conn: &Connection,
    ids: &[String],
    role: Role,
    name: &str,
) -> Result<(), ApiError> {
    for id in ids {
        let found: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        match found {
            Some(r) if r == role.as_str() => {}
            _ => {
                return Err(ApiError::validation(format!(
                    "{name} must reference existing {} accounts",
                    role.as_str()
                )))
            }
        }
    }
    Ok(())
}

async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<StudentPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !policy::can_create(Resource::Student, actor.role) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let first_name = required_str(payload.first_name, "firstName")?;
    let last_name = required_str(payload.last_name, "lastName")?;
    let student_no = required_str(payload.student_id, "studentId")?;
    let birth_date = normalize_date(
        &required_str(payload.date_of_birth, "dateOfBirth")?,
        "dateOfBirth",
    )?;
    let grade_level = required_str(payload.grade, "grade")?;

    let mut parent_ids = payload.parent_ids.unwrap_or_default();
    // Parent self-service: the actor becomes a parent of the new student
    // whether or not the payload says so.
    if actor.role == Role::Parent && !parent_ids.contains(&actor.id) {
        parent_ids.push(actor.id.clone());
    }

    let conn = state.conn()?;
    check_users_have_role(&conn, &parent_ids, Role::Parent, "parentIds")?;

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_no = ?",
            [&student_no],
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(ApiError::validation("Student ID already exists"));
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let subjects = serde_json::to_string(&payload.subjects.unwrap_or_default())
        .map_err(|e| ApiError::Internal(e.into()))?;

    // Student row and parent links land in one transaction; there is no
    // window where the back-reference is missing.
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO students(id, first_name, last_name, student_no, birth_date, grade_level,
                              section, subjects, enrollment_date, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &first_name, &last_name, &student_no, &birth_date, &grade_level,
            &payload.section, &subjects, &now, &now, &now,
        ),
    )?;
    for pid in &parent_ids {
        tx.execute(
            "INSERT OR IGNORE INTO student_parents(student_id, parent_id) VALUES(?, ?)",
            (&id, pid),
        )?;
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?"),
        [&id],
        |r| row_to_student(r),
    )?;
    Ok((StatusCode::CREATED, Json(expand_student(&conn, &row)?)))
}

async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<StudentPayload>,
) -> ApiResult<Json<Value>> {
    if !matches!(actor.role, Role::Teacher | Role::Admin) {
        return Err(ApiError::forbidden("Access denied"));
    }
    let conn = state.conn()?;
    let current_no: Option<String> = conn
        .query_row("SELECT student_no FROM students WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(current_no) = current_no else {
        return Err(ApiError::not_found("Student not found"));
    };
    if let Some(requested) = &payload.student_id {
        if *requested != current_no {
            return Err(ApiError::validation("studentId is immutable"));
        }
    }
    if let Some(parents) = &payload.parent_ids {
        check_users_have_role(&conn, parents, Role::Parent, "parentIds")?;
    }
    if let Some(teachers) = &payload.teacher_ids {
        check_users_have_role(&conn, teachers, Role::Teacher, "teacherIds")?;
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(v) = payload.first_name {
        sets.push("first_name = ?");
        params.push(v);
    }
    if let Some(v) = payload.last_name {
        sets.push("last_name = ?");
        params.push(v);
    }
    if let Some(v) = payload.date_of_birth {
        sets.push("birth_date = ?");
        params.push(normalize_date(&v, "dateOfBirth")?);
    }
    if let Some(v) = payload.grade {
        sets.push("grade_level = ?");
        params.push(v);
    }
    if let Some(v) = payload.section {
        sets.push("section = ?");
        params.push(v);
    }
    if let Some(v) = payload.profile_picture {
        sets.push("profile_picture = ?");
        params.push(v);
    }
    if let Some(v) = payload.subjects {
        sets.push("subjects = ?");
        params.push(serde_json::to_string(&v).map_err(|e| ApiError::Internal(e.into()))?);
    }
    if let Some(v) = payload.is_active {
        sets.push("is_active = ?");
        params.push(if v { "1".into() } else { "0".into() });
    }
    sets.push("updated_at = ?");
    params.push(now_rfc3339());
    params.push(id.clone());

    let tx = conn.unchecked_transaction()?;
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    tx.execute(&sql, params_from_iter(params.iter()))?;
    if let Some(parents) = &payload.parent_ids {
        tx.execute("DELETE FROM student_parents WHERE student_id = ?", [&id])?;
        for pid in parents {
            tx.execute(
                "INSERT OR IGNORE INTO student_parents(student_id, parent_id) VALUES(?, ?)",
                (&id, pid),
            )?;
        }
    }
    if let Some(teachers) = &payload.teacher_ids {
        tx.execute("DELETE FROM student_teachers WHERE student_id = ?", [&id])?;
        for tid in teachers {
            tx.execute(
                "INSERT OR IGNORE INTO student_teachers(student_id, teacher_id) VALUES(?, ?)",
                (&id, tid),
            )?;
        }
    }
    tx.commit()?;

    let row = conn.query_row(
        &format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?"),
        [&id],
        |r| row_to_student(r),
    )?;
    Ok(Json(expand_student(&conn, &row)?))
}
