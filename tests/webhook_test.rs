//! Terminal-run webhook delivery tests.

mod common;

use common::{fast_config, TestHarness};

use rf_core::RunStatus;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn harness_with_webhook(server: &MockServer) -> TestHarness {
    let mut config = fast_config();
    config.webhook.url = Some(format!("{}/hook", server.uri()));
    config.webhook.timeout_secs = 5;
    TestHarness::with_config(config)
}

async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<wiremock::Request> {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= n {
            return received;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected {n} webhook request(s), got {}", received.len());
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn completed_run_delivers_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness_with_webhook(&server).await;
    harness.submit("r1", "u1", 1).unwrap();
    assert_eq!(harness.wait_terminal("r1").await, RunStatus::Completed);

    let requests = wait_for_requests(&server, 1).await;
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["event"], "run_completed");
    assert_eq!(body["data"]["run_id"], "r1");
    assert_eq!(body["data"]["final_ref"], "media/final.mp4");
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn failed_run_delivers_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness_with_webhook(&server).await;
    harness.inference.reject("image 0");
    harness.submit("r1", "u1", 1).unwrap();
    assert_eq!(harness.wait_terminal("r1").await, RunStatus::Failed);

    let requests = wait_for_requests(&server, 1).await;
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["event"], "run_failed");
    assert_eq!(body["data"]["failures"][0]["activity"], "generate_image");
}

#[tokio::test]
async fn transient_webhook_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness_with_webhook(&server).await;
    harness.submit("r1", "u1", 1).unwrap();
    assert_eq!(harness.wait_terminal("r1").await, RunStatus::Completed);

    let requests = wait_for_requests(&server, 2).await;
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn webhook_failure_does_not_affect_run_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness_with_webhook(&server).await;
    harness.submit("r1", "u1", 1).unwrap();
    assert_eq!(harness.wait_terminal("r1").await, RunStatus::Completed);

    // Delivery keeps failing but the run stays completed.
    wait_for_requests(&server, 2).await;
    let conn = harness.conn();
    let run = rf_db::queries::runs::get_run(&conn, &rf_core::RunId::new("r1"))
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}
