mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{id_of, TestApp};
use portald::policy::Role;

#[tokio::test]
async fn audience_selection_routes_announcements_to_the_right_roles() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let sid = app
        .create_student(&admin, "STU0001", "Mira", "Patel", &[&p1])
        .await;

    for (title, audience, targets) in [
        ("Sports day", "all", json!([])),
        ("PTA evening", "parents", json!([])),
        ("Staff meeting", "teachers", json!([])),
        ("Field trip form", "specific", json!([sid])),
    ] {
        let (status, body) = app
            .post(
                "/api/announcements",
                &t1_token,
                json!({
                    "title": title,
                    "content": "Details inside.",
                    "targetAudience": audience,
                    "targetStudentIds": targets,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{title}: {body}");
    }

    let (status, body) = app.get("/api/announcements", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .map(|a| a["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Sports day"));
    assert!(titles.contains(&"PTA evening"));
    assert!(titles.contains(&"Field trip form"));
    assert!(!titles.contains(&"Staff meeting"));

    let (status, body) = app.get("/api/announcements", &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .map(|a| a["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Sports day"));
    assert!(titles.contains(&"Staff meeting"));
    assert!(!titles.contains(&"PTA evening"));
}

#[tokio::test]
async fn expiry_is_a_read_time_condition() {
    let app = TestApp::new();
    let (_, admin) = app.seed_user(Role::Admin, "Root", "Admin", "admin@school.test");
    let (_, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");

    let (status, ann) = app
        .post(
            "/api/announcements",
            &t1_token,
            json!({
                "title": "Old notice",
                "content": "Long gone.",
                "targetAudience": "all",
                "expiresAt": "2020-01-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{ann}");
    let aid = id_of(&ann);

    let (status, body) = app.get("/api/announcements", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());
    let (status, _) = app.get(&format!("/api/announcements/{aid}"), &p1_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Admins still see it for housekeeping.
    let (status, body) = app.get("/api/announcements", &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 1);

    // Deactivation hides it the same way.
    let (status, fresh) = app
        .post(
            "/api/announcements",
            &t1_token,
            json!({ "title": "Fresh", "content": "C", "targetAudience": "all" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let fresh_id = id_of(&fresh);
    let (status, _) = app
        .put(
            &format!("/api/announcements/{fresh_id}"),
            &t1_token,
            json!({ "isActive": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.get("/api/announcements", &p1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());
}

#[tokio::test]
async fn specific_audience_requires_targets_and_mutations_require_authorship() {
    let app = TestApp::new();
    let (_, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let (_, t2_token) = app.seed_user(Role::Teacher, "Noel", "Frey", "noel@school.test");
    let (_, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");

    let (status, _) = app
        .post(
            "/api/announcements",
            &t1_token,
            json!({ "title": "T", "content": "C", "targetAudience": "specific" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/announcements",
            &p1_token,
            json!({ "title": "T", "content": "C", "targetAudience": "all" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, ann) = app
        .post(
            "/api/announcements",
            &t1_token,
            json!({ "title": "Mine", "content": "C", "targetAudience": "teachers" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let aid = id_of(&ann);

    let (status, _) = app
        .put(
            &format!("/api/announcements/{aid}"),
            &t2_token,
            json!({ "title": "Hijacked" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.delete(&format!("/api/announcements/{aid}"), &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Announcement deleted successfully");
}
