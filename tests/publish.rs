//! HTTP publishing tests.
//!
//! Uses wiremock for the FHIR endpoint. Covers content negotiation, status
//! mapping, directory re-posting and publishing from a bundling run.

use std::sync::Arc;
use std::time::Duration;

use knowledge_bundler::orchestrator::bundle_path;
use knowledge_bundler::{
    post_bundles_in_dir, BundleOptions, CandidateOutcome, Encoding, HttpPublisher, Orchestrator,
    PublishError, Publisher, RepositoryLayout,
};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn write(path: &std::path::Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn create_repository() -> (TempDir, RepositoryLayout) {
    let dir = TempDir::new().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    write(
        &layout.measures_dir().join("measure-X.json"),
        r#"{"resourceType":"Measure","id":"X","name":"X"}"#,
    );
    write(
        &layout.libraries_dir().join("library-X.json"),
        r#"{"resourceType":"Library","id":"X","name":"X"}"#,
    );
    (dir, layout)
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpPublisher
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_publish_posts_with_content_type() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/fhir"))
        .and(header("content-type", "application/fhir+json"))
        .and(body_partial_json(serde_json::json!({"resourceType": "Bundle"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let publisher = HttpPublisher::new().unwrap();
    publisher
        .publish(
            &format!("{}/fhir", mock_server.uri()),
            br#"{"resourceType":"Bundle","type":"transaction"}"#.to_vec(),
            Encoding::Json,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_maps_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unprocessable bundle"))
        .mount(&mock_server)
        .await;

    let publisher = HttpPublisher::new().unwrap();
    let err = publisher
        .publish(&mock_server.uri(), b"{}".to_vec(), Encoding::Json)
        .await
        .unwrap_err();

    match err {
        PublishError::Status { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "unprocessable bundle");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_timeout_is_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let publisher = HttpPublisher::with_timeout(Duration::from_millis(100)).unwrap();
    let err = publisher
        .publish(&mock_server.uri(), b"{}".to_vec(), Encoding::Json)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Transport(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory Posting
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_post_bundles_in_dir() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/fhir"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    write(&dir.path().join("A/A-bundle.json"), r#"{"resourceType":"Bundle","id":"A-bundle"}"#);
    write(&dir.path().join("B/B-bundle.json"), r#"{"resourceType":"Bundle","id":"B-bundle"}"#);
    write(&dir.path().join("B/B-files/library-B.json"), r#"{"resourceType":"Library"}"#);

    let publisher = HttpPublisher::new().unwrap();
    let summary = post_bundles_in_dir(dir.path(), &format!("{}/fhir", mock_server.uri()), &publisher)
        .await
        .unwrap();

    assert_eq!(summary.posted.len(), 2);
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.all_posted());
}

// ─────────────────────────────────────────────────────────────────────────────
// Publishing From a Run
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_publishes_written_bundle() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/fhir"))
        .and(body_partial_json(serde_json::json!({"id": "X-bundle", "type": "transaction"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (dir, layout) = create_repository();
    let options = BundleOptions {
        publish_to: Some(format!("{}/fhir", mock_server.uri())),
        ..BundleOptions::default()
    };
    let orchestrator = Orchestrator::for_repository(dir.path(), options)
        .unwrap()
        .with_publisher(Arc::new(HttpPublisher::new().unwrap()));

    let summary = orchestrator.run_detailed(["X"]).await.unwrap();
    assert_eq!(summary.candidates["X"].published, Some(true));
    assert!(bundle_path(&layout, "X", Encoding::Json).exists());
}

#[tokio::test]
async fn test_server_error_does_not_change_outcome() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let (dir, _layout) = create_repository();
    let options = BundleOptions {
        publish_to: Some(mock_server.uri()),
        ..BundleOptions::default()
    };
    let orchestrator = Orchestrator::for_repository(dir.path(), options)
        .unwrap()
        .with_publisher(Arc::new(HttpPublisher::new().unwrap()));

    let summary = orchestrator.run_detailed(["X"]).await.unwrap();
    assert_eq!(summary.report.outcome_of("X"), Some(CandidateOutcome::Bundled));
    assert_eq!(summary.candidates["X"].published, Some(false));
}
