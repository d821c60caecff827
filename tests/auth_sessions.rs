mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;
use portald::policy::Role;

#[tokio::test]
async fn register_login_and_me_round_trip() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "firstName": "Anita",
                "lastName": "Rao",
                "email": "Anita.Rao@School.Test",
                "password": "secret123",
                "role": "parent",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["token"].as_str().expect("token").to_string();
    assert_eq!(body["user"]["role"], "parent");
    // Email is stored lowercased.
    assert_eq!(body["user"]["email"], "anita.rao@school.test");
    assert!(body["user"].get("password").is_none());
    assert!(body["user"].get("passwordHash").is_none());

    let (status, me) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "anita.rao@school.test");

    let (status, login) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "anita.rao@school.test", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(login["token"].as_str().is_some());
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let app = TestApp::new();
    let payload = json!({
        "firstName": "Dev",
        "lastName": "Mehta",
        "email": "dev@school.test",
        "password": "secret123",
        "role": "teacher",
    });
    let (status, _) = app
        .request(Method::POST, "/api/auth/register", None, Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app
        .request(Method::POST, "/api/auth/register", None, Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already registered");
}

#[tokio::test]
async fn admin_role_cannot_self_register() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "firstName": "Eve",
                "lastName": "Admin",
                "email": "eve@school.test",
                "password": "secret123",
                "role": "admin",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_unauthenticated() {
    let app = TestApp::new();
    app.seed_user(Role::Parent, "Sana", "Iyer", "sana@school.test");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "sana@school.test", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, _) = app.request(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/auth/me", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_change_requires_current_password() {
    let app = TestApp::new();
    let (_, token) = app.seed_user(Role::Teacher, "Vikram", "Singh", "vikram@school.test");

    let (status, body) = app
        .put(
            "/api/users/password",
            &token,
            json!({ "currentPassword": "wrong", "newPassword": "different7" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Current password is incorrect");

    let (status, _) = app
        .put(
            "/api/users/password",
            &token,
            json!({ "currentPassword": "secret123", "newPassword": "different7" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "vikram@school.test", "password": "different7" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}
