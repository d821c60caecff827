mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{id_of, TestApp};
use portald::policy::Role;

#[tokio::test]
async fn drafts_stay_invisible_to_parents_even_with_a_status_filter() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let sid = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;

    let (status, draft) = app
        .post(
            "/api/assignments",
            &t1_token,
            json!({
                "title": "Fractions worksheet",
                "subject": "Mathematics",
                "dueDate": "2026-04-10T00:00:00Z",
                "studentIds": [sid],
                "status": "draft",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{draft}");
    let draft_id = id_of(&draft);

    let (status, published) = app
        .post(
            "/api/assignments",
            &t1_token,
            json!({
                "title": "Reading log",
                "subject": "English",
                "dueDate": "2026-04-12T00:00:00Z",
                "studentIds": [sid],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{published}");

    let (status, body) = app.get("/api/assignments", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().expect("array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Reading log");

    // The filter narrows within the visible set; it cannot surface the draft.
    let (status, body) = app.get("/api/assignments?status=draft", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());

    let (status, _) = app
        .get(&format!("/api/assignments/{draft_id}"), &p1_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn untargeted_assignments_do_not_reach_the_parent() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    app.create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;
    let other = app
        .create_student(&admin, "STU0002", "Omar", "Khan", &[])
        .await;

    let (status, _) = app
        .post(
            "/api/assignments",
            &t1_token,
            json!({
                "title": "Map quiz",
                "subject": "Geography",
                "dueDate": "2026-04-15T00:00:00Z",
                "studentIds": [other],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.get("/api/assignments", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());
}

#[tokio::test]
async fn teachers_see_and_mutate_only_their_own_assignments() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let (_, t2_token) = app.seed_user(Role::Teacher, "Noel", "Frey", "noel@school.test");
    let sid = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[])
        .await;

    let (status, created) = app
        .post(
            "/api/assignments",
            &t1_token,
            json!({
                "title": "Lab report",
                "subject": "Science",
                "dueDate": "2026-04-20T00:00:00Z",
                "studentIds": [sid],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let aid = id_of(&created);

    let (status, body) = app.get("/api/assignments", &t2_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());

    let (status, _) = app
        .put(
            &format!("/api/assignments/{aid}"),
            &t2_token,
            json!({ "status": "closed" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &format!("/api/assignments/{aid}"),
            &t1_token,
            json!({ "status": "closed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (status, body) = app.delete(&format!("/api/assignments/{aid}"), &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Assignment deleted successfully");
}
