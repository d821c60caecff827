#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use portald::auth;
use portald::db;
use portald::http::{app, AppState};
use portald::policy::Role;

/// In-process harness: the real router over an in-memory store. Requests go
/// through the whole stack, auth extractor included.
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let conn = db::open_in_memory().expect("open in-memory store");
        let state = AppState::new(conn);
        let router = app(state.clone());
        TestApp { state, router }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let request = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse body json")
        };
        (status, value)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(token), Some(body))
            .await
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, path, Some(token), Some(body))
            .await
    }

    pub async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, path, Some(token), None).await
    }

    /// Seeds a user directly in the store, bypassing registration. Needed for
    /// admin accounts, which the registration endpoint refuses to create.
    pub fn seed_user(&self, role: Role, first: &str, last: &str, email: &str) -> (String, String) {
        let conn = self.state.conn().expect("store lock");
        let id = auth::create_user(&conn, first, last, email, "secret123", role, None, None)
            .expect("create user");
        let token = auth::create_session(&conn, &id).expect("create session");
        (id, token)
    }

    pub async fn create_student(
        &self,
        token: &str,
        student_no: &str,
        first: &str,
        last: &str,
        parent_ids: &[&str],
    ) -> String {
        let (status, body) = self
            .post(
                "/api/students",
                token,
                json!({
                    "firstName": first,
                    "lastName": last,
                    "studentId": student_no,
                    "dateOfBirth": "2014-03-01",
                    "grade": "5",
                    "section": "A",
                    "parentIds": parent_ids,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create student: {body}");
        body["id"].as_str().expect("student id").to_string()
    }
}

pub fn id_of(body: &Value) -> String {
    body["id"].as_str().expect("record id").to_string()
}
