use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use strider_core::Status;
use tower::ServiceExt;

use crate::integration::common::{TEST_API_KEY, setup_test_app, setup_test_app_no_auth};

fn authorized(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["scheduler"], "started");
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(Request::get("/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(
            Request::post("/v1/stop")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.scheduler.status(), Status::Started);
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn no_api_key_returns_403() {
    let app = setup_test_app_no_auth();

    let response = app
        .router
        .oneshot(
            Request::get("/v1/status")
                .header("authorization", "Bearer any-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"], "forbidden");
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn status_and_summary_describe_the_scheduler() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(authorized("GET", "/v1/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "started");

    let response = app
        .router
        .oneshot(authorized("GET", "/v1/summary"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "started");
    assert_eq!(json["module_counts"]["downloaders"], 1);
    assert_eq!(json["downloaders"][0]["id"], "D1");
    assert_eq!(json["request_policy"]["accepted_domains"][0], "example.com");
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn idle_reports_finished_crawl() {
    let app = setup_test_app();

    let mut idle = false;
    for _ in 0..50 {
        let response = app
            .router
            .clone()
            .oneshot(authorized("GET", "/v1/idle"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        if json_body(response).await["idle"] == true {
            idle = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(idle, "single-page crawl should become idle");
    app.scheduler.stop().unwrap();
}

#[tokio::test]
async fn stop_stops_scheduler_and_second_stop_conflicts() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(authorized("POST", "/v1/stop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "stopped");
    assert_eq!(app.scheduler.status(), Status::Stopped);

    let response = app
        .router
        .oneshot(authorized("POST", "/v1/stop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "invalid_state");
}
