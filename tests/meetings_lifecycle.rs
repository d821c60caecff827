mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{id_of, TestApp};
use portald::policy::Role;

#[tokio::test]
async fn parent_requests_a_meeting_and_the_teacher_confirms_it() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (t1, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let sid = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;

    let (status, meeting) = app
        .post(
            "/api/meetings",
            &p1_token,
            json!({
                "title": "Progress check-in",
                "teacherId": t1,
                "studentId": sid,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{meeting}");
    let mid = id_of(&meeting);
    assert_eq!(meeting["status"], "pending");
    assert_eq!(meeting["duration"], 30);
    assert_eq!(meeting["location"], "in-person");
    assert_eq!(meeting["requestedBy"], "parent");
    assert_eq!(meeting["parentId"]["id"], p1.as_str());

    let (status, body) = app
        .put(
            &format!("/api/meetings/{mid}/status"),
            &t1_token,
            json!({ "status": "confirmed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    // Either participant may move the meeting along.
    let (status, body) = app
        .put(
            &format!("/api/meetings/{mid}/status"),
            &p1_token,
            json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn eligibility_checks_gate_meeting_creation() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (p2, _) = app.seed_user(Role::Parent, "Ben", "Cole", "ben@school.test");
    let (t1, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let mine = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;
    let other = app
        .create_student(&admin, "STU0002", "Omar", "Khan", &[&p2])
        .await;

    // A parent cannot request on behalf of someone else.
    let (status, body) = app
        .post(
            "/api/meetings",
            &p1_token,
            json!({
                "title": "X",
                "parentId": p2,
                "teacherId": t1,
                "studentId": mine,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only create meetings as yourself");

    // Nor about a student that is not theirs.
    let (status, body) = app
        .post(
            "/api/meetings",
            &p1_token,
            json!({
                "title": "X",
                "teacherId": t1,
                "studentId": other,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Student not associated with your account");

    // A teacher must name a parent actually linked to the student.
    let (status, body) = app
        .post(
            "/api/meetings",
            &t1_token,
            json!({
                "title": "X",
                "parentId": p2,
                "studentId": mine,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    // The counter party id must carry the matching role.
    let (status, _) = app
        .post(
            "/api/meetings",
            &p1_token,
            json!({
                "title": "X",
                "teacherId": p2,
                "studentId": mine,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_participants_or_admin_touch_a_meeting() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (t1, _) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let (_, t2_token) = app.seed_user(Role::Teacher, "Noel", "Frey", "noel@school.test");
    let sid = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;

    let (status, meeting) = app
        .post(
            "/api/meetings",
            &p1_token,
            json!({
                "title": "Check-in",
                "teacherId": t1,
                "studentId": sid,
                "scheduledDate": "2026-05-04T15:30:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let mid = id_of(&meeting);

    // A third-party teacher neither sees nor mutates it.
    let (status, _) = app.get(&format!("/api/meetings/{mid}"), &t2_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .put(
            &format!("/api/meetings/{mid}/status"),
            &t2_token,
            json!({ "status": "cancelled" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &format!("/api/meetings/{mid}"),
            &p1_token,
            json!({ "location": "online", "meetingLink": "https://meet.example/abc" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location"], "online");

    let (status, body) = app.delete(&format!("/api/meetings/{mid}"), &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Meeting deleted successfully");
}
