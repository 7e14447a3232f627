//! 认证 API 集成测试

use axum::http::{header, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use trip_auth::repository::UserRepository;

mod common;
use common::{
    body_json, create_test_app, json_request, register_admin, register_user, send, TEST_PASSWORD,
};

#[tokio::test]
async fn test_register_returns_user_and_tokens() {
    let (_, _, app) = create_test_app();

    let (status, json) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({
                "email": "a@x.com",
                "username": "alice",
                "password": TEST_PASSWORD,
                "first_name": "Alice"
            })),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user"]["email"], "a@x.com");
    assert_eq!(json["user"]["role"], "user");
    assert!(json["user"].get("password_hash").is_none());
    assert!(json["tokens"]["access_token"].is_string());
    assert!(json["tokens"]["refresh_token"].is_string());
    assert_eq!(json["tokens"]["token_type"], "bearer");
    assert_eq!(json["tokens"]["expires_in"], 1800);
}

#[tokio::test]
async fn test_register_duplicate_email_conflicts() {
    let (_, state, app) = create_test_app();
    register_user(&state, "a@x.com", "alice").await;

    let (status, json) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({ "email": "a@x.com", "username": "other", "password": TEST_PASSWORD })),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["message"], "Email already registered");
}

#[tokio::test]
async fn test_register_invalid_email_is_unprocessable() {
    let (_, _, app) = create_test_app();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({ "email": "not-an-email", "username": "alice", "password": TEST_PASSWORD })),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_login_wrong_password() {
    let (_, state, app) = create_test_app();
    register_user(&state, "a@x.com", "alice").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": "WrongPassword" })),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let json = body_json(response).await;
    assert_eq!(json["error"]["request_id"], request_id.as_str());
}

#[tokio::test]
async fn test_login_unknown_user_matches_wrong_password() {
    let (_, state, app) = create_test_app();
    register_user(&state, "a@x.com", "alice").await;

    let (wrong_status, wrong) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": "WrongPassword" })),
            None,
        ),
    )
    .await;
    let (missing_status, missing) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "nobody@x.com", "password": TEST_PASSWORD })),
            None,
        ),
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong["error"]["message"], missing["error"]["message"]);
}

#[tokio::test]
async fn test_login_disabled_account() {
    let (store, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;
    store.set_active(registered.user.id, false).await.unwrap();

    let (status, json) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": TEST_PASSWORD })),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["message"], "Account is disabled");
}

#[tokio::test]
async fn test_refresh_endpoint_rotates() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;
    let r1 = registered.tokens.refresh_token;

    let (status, json) = send(
        &app,
        json_request("POST", "/api/v1/auth/refresh", Some(json!({ "refresh_token": r1 })), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["access_token"].is_string());
    assert_eq!(json["token_type"], "bearer");
    assert_ne!(json["refresh_token"], r1.as_str());

    let (replay_status, replay) = send(
        &app,
        json_request("POST", "/api/v1/auth/refresh", Some(json!({ "refresh_token": r1 })), None),
    )
    .await;
    assert_eq!(replay_status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay["error"]["message"], "Invalid refresh token");
}

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let (_, _, app) = create_test_app();

    let (status, _) = send(&app, json_request("GET", "/api/v1/auth/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, json_request("GET", "/api/v1/auth/me", None, Some("garbage"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_profile() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;

    let (status, json) = send(
        &app,
        json_request("GET", "/api/v1/auth/me", None, Some(&registered.tokens.access_token)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["username"], "alice");
    assert_eq!(json["id"], registered.user.id.to_string());
}

#[tokio::test]
async fn test_refresh_token_is_not_a_bearer_credential() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;

    let (status, _) = send(
        &app,
        json_request("GET", "/api/v1/auth/me", None, Some(&registered.tokens.refresh_token)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_access_token() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;
    let access = registered.tokens.access_token.clone();

    let (status, json) = send(&app, json_request("POST", "/api/v1/auth/logout", None, Some(&access))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Successfully logged out");

    let (status, json) = send(&app, json_request("GET", "/api/v1/auth/me", None, Some(&access))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["message"], "Token has been revoked");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": registered.tokens.refresh_token })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sessions_lists_devices_without_hashes() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": TEST_PASSWORD })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app,
        json_request("GET", "/api/v1/auth/sessions", None, Some(&registered.tokens.access_token)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let sessions = json.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.get("token_hash").is_none()));
}

#[tokio::test]
async fn test_sessions_require_active_account() {
    let (store, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;
    store.set_active(registered.user.id, false).await.unwrap();

    let (status, json) = send(
        &app,
        json_request("GET", "/api/v1/auth/sessions", None, Some(&registered.tokens.access_token)),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["message"], "Account is disabled");
}

#[tokio::test]
async fn test_admin_routes_forbidden_for_regular_users() {
    let (_, state, app) = create_test_app();
    let registered = register_user(&state, "a@x.com", "alice").await;

    let (status, _) = send(
        &app,
        json_request("GET", "/api/v1/admin/users", None, Some(&registered.tokens.access_token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_lists_and_deactivates_users() {
    let (_, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;
    let alice = register_user(&state, "a@x.com", "alice").await;

    let (status, json) = send(
        &app,
        json_request("GET", "/api/v1/admin/users?limit=10", None, Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["limit"], 10);

    let uri = format!("/api/v1/admin/users/{}/deactivate", alice.user.id);
    let (status, json) = send(&app, json_request("POST", &uri, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], false);

    let (status, json) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": alice.tokens.refresh_token })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["message"], "Account is disabled");

    let uri = format!("/api/v1/admin/users/{}/activate", alice.user.id);
    let (status, json) = send(&app, json_request("POST", &uri, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], true);
}

#[tokio::test]
async fn test_admin_promotes_user_who_can_then_use_admin_routes() {
    let (_, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;
    let alice = register_user(&state, "a@x.com", "alice").await;
    let alice_token = alice.tokens.access_token.clone();

    let (status, _) = send(&app, json_request("GET", "/api/v1/admin/users", None, Some(&alice_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/v1/admin/users/{}", alice.user.id);
    let (status, json) = send(
        &app,
        json_request(
            "PUT",
            &uri,
            Some(json!({ "role": "admin", "is_verified": true, "first_name": "Alice" })),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "admin");
    assert_eq!(json["is_verified"], true);
    assert_eq!(json["first_name"], "Alice");
    assert!(json.get("password_hash").is_none());

    // 角色在每次请求时从存储读取，现有访问令牌立即生效
    let (status, json) = send(&app, json_request("GET", "/api/v1/admin/users", None, Some(&alice_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
}

#[tokio::test]
async fn test_moderator_is_not_an_admin() {
    let (_, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;
    let bob = register_user(&state, "b@x.com", "bob").await;

    let uri = format!("/api/v1/admin/users/{}", bob.user.id);
    let (status, json) = send(
        &app,
        json_request("PUT", &uri, Some(json!({ "role": "moderator" })), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "moderator");

    let (status, _) = send(
        &app,
        json_request("GET", "/api/v1/admin/stats", None, Some(&bob.tokens.access_token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_update_rejects_bad_input() {
    let (store, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;
    let admin_id = store
        .find_by_email("admin@example.com")
        .await
        .unwrap()
        .unwrap()
        .id;

    let own = format!("/api/v1/admin/users/{}", admin_id);
    let (status, _) = send(
        &app,
        json_request("PUT", &own, Some(json!({ "role": "user" })), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let missing = format!("/api/v1/admin/users/{}", uuid::Uuid::new_v4());
    let (status, _) = send(
        &app,
        json_request("PUT", &missing, Some(json!({ "is_verified": true })), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_stats_counts_users() {
    let (store, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;
    let alice = register_user(&state, "a@x.com", "alice").await;
    store.set_active(alice.user.id, false).await.unwrap();

    let (status, json) = send(&app, json_request("GET", "/api/v1/admin/stats", None, Some(&admin_token))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stats"]["total_users"], 2);
    assert_eq!(json["stats"]["active_users"], 1);
    assert_eq!(json["admin_user"]["email"], "admin@example.com");
    assert_eq!(json["admin_user"]["role"], "admin");
}

#[tokio::test]
async fn test_admin_unknown_user_is_not_found() {
    let (_, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;

    let uri = format!("/api/v1/admin/users/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&app, json_request("GET", &uri, None, Some(&admin_token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cleanup_reports_counts() {
    let (_, state, app) = create_test_app();
    let admin_token = register_admin(&state).await;

    let (status, json) = send(
        &app,
        json_request("POST", "/api/v1/admin/cleanup", None, Some(&admin_token)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["refresh_tokens"], 0);
    assert_eq!(json["blacklisted_tokens"], 0);
}

#[tokio::test]
async fn test_health_and_ready() {
    let (_, _, app) = create_test_app();

    let (status, json) = send(&app, json_request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, json) = send(&app, json_request("GET", "/ready", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}
