//! Reference expansion: foreign keys expand to a display-relevant projection
//! after the policy-filtered query, never to the full record.

use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

pub fn user_brief(conn: &Connection, id: &str) -> rusqlite::Result<Value> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, email, role FROM users WHERE id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "firstName": r.get::<_, String>(1)?,
                    "lastName": r.get::<_, String>(2)?,
                    "email": r.get::<_, String>(3)?,
                    "role": r.get::<_, String>(4)?,
                }))
            },
        )
        .optional()?;
    Ok(row.unwrap_or(Value::Null))
}

pub fn student_brief(conn: &Connection, id: &str) -> rusqlite::Result<Value> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, student_no, grade_level FROM students WHERE id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "firstName": r.get::<_, String>(1)?,
                    "lastName": r.get::<_, String>(2)?,
                    "studentId": r.get::<_, String>(3)?,
                    "grade": r.get::<_, String>(4)?,
                }))
            },
        )
        .optional()?;
    Ok(row.unwrap_or(Value::Null))
}

pub fn opt_student_brief(conn: &Connection, id: Option<&str>) -> rusqlite::Result<Value> {
    match id {
        Some(id) => student_brief(conn, id),
        None => Ok(Value::Null),
    }
}

/// Inline attachments are stored as a JSON column on the owning record.
pub fn attachments_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!([]))
}
