mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{id_of, TestApp};
use portald::policy::Role;

#[tokio::test]
async fn messaging_crosses_the_parent_teacher_boundary_only() {
    let app = TestApp::new();
    let (_, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (p2, _) = app.seed_user(Role::Parent, "Ben", "Cole", "ben@school.test");
    let (t1, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");
    let (t2, _) = app.seed_user(Role::Teacher, "Noel", "Frey", "noel@school.test");

    let (status, _) = app
        .post(
            "/api/messages",
            &p1_token,
            json!({ "receiverId": t1, "content": "How is Mira settling in?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post(
            "/api/messages",
            &p1_token,
            json!({ "receiverId": p2, "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Parents can only message teachers");

    let (status, body) = app
        .post(
            "/api/messages",
            &t1_token,
            json!({ "receiverId": t2, "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Teachers can only message parents");

    let (status, body) = app
        .post(
            "/api/messages",
            &p1_token,
            json!({ "receiverId": "nobody", "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Receiver not found");
}

#[tokio::test]
async fn read_receipts_belong_to_the_receiver() {
    let app = TestApp::new();
    let (_, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (t1, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");

    let (status, sent) = app
        .post(
            "/api/messages",
            &p1_token,
            json!({ "receiverId": t1, "subject": "Homework", "content": "Question about p.12" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let mid = id_of(&sent);
    assert_eq!(sent["isRead"], false);

    let (status, body) = app.get("/api/messages/unread-count", &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unreadCount"], 1);

    // The sender cannot mark their own message as read.
    let (status, _) = app
        .put(&format!("/api/messages/{mid}/read"), &p1_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(&format!("/api/messages/{mid}/read"), &t1_token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isRead"], true);
    assert!(body["readAt"].as_str().is_some());

    let (status, body) = app.get("/api/messages/unread-count", &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unreadCount"], 0);
}

#[tokio::test]
async fn conversations_group_by_partner_with_unread_counts() {
    let app = TestApp::new();
    let (p1, p1_token) = app.seed_user(Role::Parent, "Asha", "Patel", "asha@school.test");
    let (p2, p2_token) = app.seed_user(Role::Parent, "Ben", "Cole", "ben@school.test");
    let (t1, t1_token) = app.seed_user(Role::Teacher, "Maya", "Das", "maya@school.test");

    for content in ["first", "second"] {
        let (status, _) = app
            .post(
                "/api/messages",
                &p1_token,
                json!({ "receiverId": t1, "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = app
        .post(
            "/api/messages",
            &p2_token,
            json!({ "receiverId": t1, "content": "third" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.get("/api/messages/conversations", &t1_token).await;
    assert_eq!(status, StatusCode::OK);
    let convs = body.as_array().expect("array");
    assert_eq!(convs.len(), 2);
    // Newest conversation first.
    assert_eq!(convs[0]["partner"]["id"], p2.as_str());
    assert_eq!(convs[0]["unreadCount"], 1);
    assert_eq!(convs[1]["partner"]["id"], p1.as_str());
    assert_eq!(convs[1]["unreadCount"], 2);
    assert_eq!(convs[1]["lastMessage"]["content"], "second");

    // Third parties see none of it.
    let (status, body) = app
        .get(&format!("/api/messages?conversationWith={t1}"), &p2_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().expect("array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["content"], "third");
}
