use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::test_support;

fn with_lock_token(mut request: Request<Body>, token: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-lock-token", token.parse().expect("lock token header"));
    request
}

async fn validate_copy(app: axum::Router, copy_id: &str, token: &str) {
    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/copies/{copy_id}/ready"),
            Some(token),
            None,
        ))
        .await
        .expect("validate copy");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["status"], "ready");
}

async fn acquire_lock(app: axum::Router, copy_id: &str, token: &str) -> String {
    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/copies/{copy_id}/lock"),
            Some(token),
            None,
        ))
        .await
        .expect("acquire lock");

    let status = response.status();
    let lock = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {lock}");
    lock["token"].as_str().expect("lock token").to_string()
}

#[tokio::test]
async fn grading_flow_validates_locks_annotates_and_releases() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector1", "pass-1").await;
    let token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Bac blanc", &teacher.id).await;
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 2).await;

    validate_copy(ctx.app.clone(), &copy.id, &token).await;
    let lock_token = acquire_lock(ctx.app.clone(), &copy.id, &token).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/grading/copies/{}", copy.id),
            Some(&token),
            None,
        ))
        .await
        .expect("get copy");
    let status = response.status();
    let fetched = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {fetched}");
    assert_eq!(fetched["status"], "locked");
    assert_eq!(fetched["locked_by"], teacher.id.as_str());

    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::POST,
                &format!("/api/v1/grading/copies/{}/annotations", copy.id),
                Some(&token),
                Some(json!({
                    "page_index": 0,
                    "x": 0.1, "y": 0.2, "w": 0.3, "h": 0.1,
                    "kind": "commentaire",
                    "content": "Revoir la question 2"
                })),
            ),
            &lock_token,
        ))
        .await
        .expect("create annotation");
    let status = response.status();
    let annotation = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {annotation}");
    assert_eq!(annotation["copy_id"], copy.id.as_str());

    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::PUT,
                &format!("/api/v1/grading/copies/{}/scores", copy.id),
                Some(&token),
                Some(json!({ "question_id": "q1", "score": 3.5 })),
            ),
            &lock_token,
        ))
        .await
        .expect("upsert score");
    let status = response.status();
    let score = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {score}");

    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::PUT,
                &format!("/api/v1/grading/copies/{}/draft", copy.id),
                Some(&token),
                Some(json!({ "payload": { "pending_scores": { "q2": 1.0 } } })),
            ),
            &lock_token,
        ))
        .await
        .expect("put draft");
    let status = response.status();
    let draft = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {draft}");
    assert_eq!(draft["payload"]["pending_scores"]["q2"], 1.0);

    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::DELETE,
                &format!("/api/v1/grading/copies/{}/lock/release", copy.id),
                Some(&token),
                None,
            ),
            &lock_token,
        ))
        .await
        .expect("release lock");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // No active lease means the copy is back to READY.
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/grading/copies/{}", copy.id),
            Some(&token),
            None,
        ))
        .await
        .expect("get copy after release");
    let status = response.status();
    let released = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {released}");
    assert_eq!(released["status"], "ready");
    assert!(released["locked_by"].is_null());
}

#[tokio::test]
async fn draft_writes_require_an_active_lock() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector2", "pass-2").await;
    let token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Brevet blanc", &teacher.id).await;
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;
    validate_copy(ctx.app.clone(), &copy.id, &token).await;

    // Without the lock token header.
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            &format!("/api/v1/grading/copies/{}/draft", copy.id),
            Some(&token),
            Some(json!({ "payload": {} })),
        ))
        .await
        .expect("put draft without token");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // With a token but no lease on the copy.
    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::PUT,
                &format!("/api/v1/grading/copies/{}/draft", copy.id),
                Some(&token),
                Some(json!({ "payload": {} })),
            ),
            "stale-token",
        ))
        .await
        .expect("put draft unlocked");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Deleting a draft goes through the same gate.
    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::DELETE,
                &format!("/api/v1/grading/copies/{}/draft", copy.id),
                Some(&token),
                None,
            ),
            "stale-token",
        ))
        .await
        .expect("delete draft unlocked");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn competing_corrector_cannot_steal_or_use_a_lock() {
    let ctx = test_support::setup_test_context().await;

    let owner = test_support::insert_teacher(ctx.state.db(), "owner", "pass-owner").await;
    let rival = test_support::insert_teacher(ctx.state.db(), "rival", "pass-rival").await;
    let owner_token = test_support::bearer_token(&owner.id, ctx.state.settings());
    let rival_token = test_support::bearer_token(&rival.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Interro", &owner.id).await;
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;
    validate_copy(ctx.app.clone(), &copy.id, &owner_token).await;
    let lock_token = acquire_lock(ctx.app.clone(), &copy.id, &owner_token).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/copies/{}/lock", copy.id),
            Some(&rival_token),
            None,
        ))
        .await
        .expect("rival lock attempt");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Even with the right token value, the lease belongs to the owner.
    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::PUT,
                &format!("/api/v1/grading/copies/{}/scores", copy.id),
                Some(&rival_token),
                Some(json!({ "question_id": "q1", "score": 1.0 })),
            ),
            &lock_token,
        ))
        .await
        .expect("rival score attempt");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // A wrong token from the owner is rejected too.
    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::PUT,
                &format!("/api/v1/grading/copies/{}/scores", copy.id),
                Some(&owner_token),
                Some(json!({ "question_id": "q1", "score": 1.0 })),
            ),
            "not-the-token",
        ))
        .await
        .expect("wrong token score attempt");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn staging_copies_cannot_be_locked() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector3", "pass-3").await;
    let token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "DS n°2", &teacher.id).await;
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/copies/{}/lock", copy.id),
            Some(&token),
            None,
        ))
        .await
        .expect("lock staging copy");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT, "response: {body}");
    assert!(body["detail"].as_str().unwrap_or("").contains("cannot be locked"));
}

#[tokio::test]
async fn quarantined_copies_are_hidden_from_the_listing() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector4", "pass-4").await;
    let token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Concours blanc", &teacher.id).await;
    let kept = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;
    let flagged =
        test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0002", 1).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/copies/{}/quarantine", flagged.id),
            Some(&token),
            Some(json!({ "reason": "double en-tête" })),
        ))
        .await
        .expect("quarantine copy");
    let status = response.status();
    let quarantined = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {quarantined}");
    assert_eq!(quarantined["status"], "quarantine");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/exams/{}/copies", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("list copies");
    let status = response.status();
    let listing = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {listing}");
    let ids: Vec<&str> = listing
        .as_array()
        .expect("copy list")
        .iter()
        .filter_map(|entry| entry["id"].as_str())
        .collect();
    assert_eq!(ids, vec![kept.id.as_str()]);
}

#[tokio::test]
async fn dispatch_is_reserved_to_admins() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector5", "pass-5").await;
    let admin = test_support::insert_admin(ctx.state.db(), "chief", "pass-chief").await;
    let teacher_token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let admin_token = test_support::bearer_token(&admin.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Bac blanc n°2", &teacher.id).await;
    repositories::exams::add_corrector(ctx.state.db(), &exam.id, &teacher.id)
        .await
        .expect("add corrector");
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;
    validate_copy(ctx.app.clone(), &copy.id, &teacher_token).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/dispatch", exam.id),
            Some(&teacher_token),
            None,
        ))
        .await
        .expect("teacher dispatch attempt");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/dispatch", exam.id),
            Some(&admin_token),
            None,
        ))
        .await
        .expect("admin dispatch");
    let status = response.status();
    let dispatched = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {dispatched}");
    let assignments = dispatched["assignments"].as_array().expect("assignments");
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0]["corrector_id"], teacher.id.as_str());
}

#[tokio::test]
async fn finalize_refuses_copies_that_are_already_graded() {
    let ctx = test_support::setup_test_context().await;

    let teacher = test_support::insert_teacher(ctx.state.db(), "corrector6", "pass-6").await;
    let token = test_support::bearer_token(&teacher.id, ctx.state.settings());
    let exam = test_support::insert_exam(ctx.state.db(), "Partiel", &teacher.id).await;
    let copy = test_support::insert_copy_with_pages(ctx.state.db(), &exam.id, "C-0001", 1).await;

    let now = primitive_now_utc();
    let mut tx = ctx.state.db().begin().await.expect("begin");
    repositories::copies::mark_graded(&mut tx, &copy.id, "copies/final/fake.pdf", now)
        .await
        .expect("mark graded");
    tx.commit().await.expect("commit");

    let response = ctx
        .app
        .clone()
        .oneshot(with_lock_token(
            test_support::json_request(
                Method::POST,
                &format!("/api/v1/grading/copies/{}/finalize", copy.id),
                Some(&token),
                None,
            ),
            "whatever-token",
        ))
        .await
        .expect("finalize graded copy");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "response: {body}");
    assert!(body["detail"].as_str().unwrap_or("").contains("LOCKED"));
}
