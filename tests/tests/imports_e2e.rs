//! End-to-end tests for the import pipeline.
//!
//! POST /imports → background run → GET /imports/:id → GET /imports/:id/records
//!
//! Source files are served by `MockFetcher`; records land in the memory store.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use import_core::{IngestionRun, RunStatus};
use integration_tests::{
    fixtures::{self, CatalogRow, OTHER_OWNER, OWNER},
    mocks::MockFetcher,
    setup::{test_config, TestContext},
};
use serde_json::Value;
use worker::{HttpFetcher, PipelineConfig};

const OWNER_HEADER: &str = api::extractors::OWNER_HEADER;

/// Three rows, one with an invalid price: the run processes all three and
/// stores two records.
#[tokio::test]
async fn test_csv_import_skips_invalid_rows() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("catalog.csv");
    ctx.fetcher.put(
        &url,
        fixtures::csv(&[
            CatalogRow::new("A", "X", "10", "5"),
            CatalogRow::new("B", "Y", "abc", ""),
            CatalogRow::new("C", "Z", "20", ""),
        ]),
    );

    let response = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("catalog.csv", &url))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let started: IngestionRun = response.json();
    assert_eq!(started.status, RunStatus::Running);
    assert_eq!(started.owner_id, OWNER);
    assert_eq!(started.total_rows, None);
    assert_eq!(started.processed_rows, 0);

    ctx.wait_for_terminal(started.id).await;

    let body: Value = server
        .get(&format!("/imports/{}", started.id))
        .add_header(OWNER_HEADER, OWNER)
        .await
        .json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["totalRows"], 3);
    assert_eq!(body["processedRows"], 3);
    assert!(body["completedAt"].is_string());
    assert!(body["errorMessage"].is_null());

    let records: Value = server
        .get(&format!("/imports/{}/records", started.id))
        .add_header(OWNER_HEADER, OWNER)
        .await
        .json();
    assert_eq!(records["total"], 2);
    assert_eq!(records["items"][0]["name"], "A");
    assert_eq!(records["items"][0]["stock"], 5);
    assert_eq!(records["items"][1]["name"], "C");
    assert_eq!(records["items"][1]["stock"], 0);
    assert!(records["items"][1]["description"].is_null());
}

/// 250 xlsx rows are written in three batches and paged back in order.
#[tokio::test]
async fn test_xlsx_import_in_batches() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("catalog.xlsx");
    ctx.fetcher.put(&url, fixtures::xlsx(&fixtures::catalog_rows(250)));

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("catalog.xlsx", &url))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error_message);
    assert_eq!(run.total_rows, Some(250));
    assert_eq!(run.processed_rows, 250);
    assert_eq!(ctx.store.record_count(run.id), 250);

    let page: Value = server
        .get(&format!("/imports/{}/records", run.id))
        .add_header(OWNER_HEADER, OWNER)
        .add_query_param("page", 3)
        .add_query_param("pageSize", 100)
        .await
        .json();
    assert_eq!(page["total"], 250);
    assert_eq!(page["items"].as_array().unwrap().len(), 50);
    assert_eq!(page["items"][0]["name"], "Item 200");
    assert_eq!(page["items"][0]["price"], 201.25);
}

/// Duplicate (name, category) rows count as processed but are stored once.
#[tokio::test]
async fn test_duplicate_rows_are_skipped() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("dupes.csv");
    ctx.fetcher.put(
        &url,
        fixtures::csv(&[
            CatalogRow::new("Lamp", "Lighting", "10", "1"),
            CatalogRow::new("Lamp", "Lighting", "12", "2"),
            CatalogRow::new("Lamp", "Outdoor", "15", "3"),
        ]),
    );

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("dupes.csv", &url))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.processed_rows, 3);
    assert_eq!(ctx.store.record_count(run.id), 2);
}

/// A header-only file completes with zero rows.
#[tokio::test]
async fn test_empty_sheet_completes() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("empty.xlsx");
    ctx.fetcher.put(&url, fixtures::xlsx(&[]));

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("empty.xlsx", &url))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_rows, Some(0));
    assert_eq!(run.processed_rows, 0);
}

/// An unreachable source fails the run without counting any rows.
#[tokio::test]
async fn test_unreachable_source_fails_run() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body(
            "missing.xlsx",
            &fixtures::source_url("missing.xlsx"),
        ))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.total_rows, None);
    assert_eq!(run.processed_rows, 0);
    assert!(run.error_message.unwrap().contains("404"));
    assert!(run.completed_at.is_some());
}

/// A fetch slower than the timeout fails the run.
#[tokio::test]
async fn test_fetch_timeout_fails_run() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("slow.csv");
    ctx.fetcher.put(&url, fixtures::csv(&fixtures::catalog_rows(3)));
    ctx.fetcher
        .set_delay(Some(std::time::Duration::from_secs(10)));

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("slow.csv", &url))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.processed_rows, 0);
    assert_eq!(run.total_rows, None);
    assert!(run.error_message.unwrap().contains("timed out"));
    assert_eq!(ctx.store.record_count(run.id), 0);
}

/// Context whose runs fetch through the real fetcher, with local sources
/// confined to `root`.
fn local_context(root: &Path) -> TestContext {
    let config = PipelineConfig {
        local_root: Some(root.to_path_buf()),
        ..test_config()
    };
    let http = HttpFetcher::new(config.fetch_timeout(), config.max_source_bytes)
        .unwrap()
        .with_local_root(config.local_root.clone());
    TestContext::with_fetcher(Arc::new(MockFetcher::new()), Arc::new(http), config)
}

/// Source files under the configured directory go through the real fetcher.
#[tokio::test]
async fn test_local_file_import() {
    let root = tempfile::tempdir().unwrap();
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile_in(root.path())
        .unwrap();
    file.write_all(fixtures::csv(&fixtures::catalog_rows(5)).as_bytes())
        .unwrap();

    let ctx = local_context(root.path());
    let server = ctx.server();

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body(
            "catalog.csv",
            file.path().to_str().unwrap(),
        ))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error_message);
    assert_eq!(ctx.store.record_count(run.id), 5);
}

/// Server files outside the source directory never become records.
#[tokio::test]
async fn test_local_file_outside_root_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let uploads = root.path().join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    let secret = root.path().join("secrets.csv");
    std::fs::write(&secret, "name,category,price\nAPI_KEY_abc123,prod-secrets,1\n").unwrap();

    let ctx = local_context(&uploads);
    let server = ctx.server();

    for locator in [
        secret.to_str().unwrap().to_string(),
        format!("file://{}", secret.display()),
        "../secrets.csv".to_string(),
    ] {
        let run: IngestionRun = server
            .post("/imports")
            .add_header(OWNER_HEADER, OWNER)
            .json(&fixtures::start_body("secrets.csv", &locator))
            .await
            .json();

        let run = ctx.wait_for_terminal(run.id).await;
        assert_eq!(run.status, RunStatus::Failed, "{} was read", locator);
        assert!(run
            .error_message
            .as_deref()
            .unwrap()
            .contains("outside the allowed directory"));
        assert_eq!(ctx.store.record_count(run.id), 0);
    }
}

/// Without a source directory, local paths are not fetched at all.
#[tokio::test]
async fn test_local_file_refused_by_default() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(fixtures::csv(&fixtures::catalog_rows(2)).as_bytes())
        .unwrap();

    let config = test_config();
    let http = HttpFetcher::new(config.fetch_timeout(), config.max_source_bytes).unwrap();
    let ctx = TestContext::with_fetcher(Arc::new(MockFetcher::new()), Arc::new(http), config);

    let run: IngestionRun = ctx
        .server()
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body(
            "catalog.csv",
            file.path().to_str().unwrap(),
        ))
        .await
        .json();

    let run = ctx.wait_for_terminal(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.as_deref().unwrap().contains("disabled"));
    assert_eq!(ctx.store.record_count(run.id), 0);
}

/// Runs and records are only visible to their owner.
#[tokio::test]
async fn test_runs_are_owner_scoped() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let url = fixtures::source_url("mine.csv");
    ctx.fetcher.put(&url, fixtures::csv(&fixtures::catalog_rows(2)));

    let run: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("mine.csv", &url))
        .await
        .json();
    ctx.wait_for_terminal(run.id).await;

    for path in [
        format!("/imports/{}", run.id),
        format!("/imports/{}/records", run.id),
    ] {
        let response = server.get(&path).add_header(OWNER_HEADER, OTHER_OWNER).await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["code"], "RUN_001");
    }

    let response = server
        .post(&format!("/imports/{}/retry", run.id))
        .add_header(OWNER_HEADER, OTHER_OWNER)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let theirs: Value = server
        .get("/imports")
        .add_header(OWNER_HEADER, OTHER_OWNER)
        .await
        .json();
    assert_eq!(theirs["total"], 0);

    let mine: Value = server.get("/imports").add_header(OWNER_HEADER, OWNER).await.json();
    assert_eq!(mine["total"], 1);
}

/// Run listings filter by status; record listings filter by field.
#[tokio::test]
async fn test_list_filters() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let good = fixtures::source_url("good.csv");
    ctx.fetcher.put(
        &good,
        fixtures::csv(&[
            CatalogRow::new("Desk lamp", "Lighting", "24.50", "3").with_description("Brass"),
            CatalogRow::new("Bulb", "Lighting", "3", "40"),
            CatalogRow::new("Rug", "Floor", "120", "1"),
        ]),
    );

    let ok: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("good.csv", &good))
        .await
        .json();
    let bad: IngestionRun = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("bad.csv", &fixtures::source_url("bad.csv")))
        .await
        .json();
    ctx.wait_for_terminal(ok.id).await;
    ctx.wait_for_terminal(bad.id).await;

    let failed: Value = server
        .get("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .add_query_param("field", "status")
        .add_query_param("op", "eq")
        .add_query_param("value", "failed")
        .await
        .json();
    assert_eq!(failed["total"], 1);
    assert_eq!(failed["items"][0]["id"], bad.id.to_string());

    let pricey: Value = server
        .get(&format!("/imports/{}/records", ok.id))
        .add_header(OWNER_HEADER, OWNER)
        .add_query_param("field", "price")
        .add_query_param("op", "gt")
        .add_query_param("value", "20")
        .await
        .json();
    assert_eq!(pricey["total"], 2);

    let lamps: Value = server
        .get(&format!("/imports/{}/records", ok.id))
        .add_header(OWNER_HEADER, OWNER)
        .add_query_param("field", "name")
        .add_query_param("op", "contains")
        .add_query_param("value", "LAMP")
        .await
        .json();
    assert_eq!(lamps["total"], 1);
    assert_eq!(lamps["items"][0]["description"], "Brass");

    let response = server
        .get(&format!("/imports/{}/records", ok.id))
        .add_header(OWNER_HEADER, OWNER)
        .add_query_param("field", "supplier")
        .add_query_param("value", "x")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

/// Requests without an owner are rejected before touching any run.
#[tokio::test]
async fn test_missing_owner_is_unauthorized() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/imports")
        .json(&fixtures::start_body("a.csv", &fixtures::source_url("a.csv")))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "AUTH_001");

    let response = server.get("/imports").add_header(OWNER_HEADER, "   ").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

/// Malformed start requests are rejected with validation details.
#[tokio::test]
async fn test_invalid_start_request() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .json(&fixtures::start_body("", &fixtures::source_url("a.csv")))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert!(body["details"][0].as_str().unwrap().starts_with("file_name"));

    let response = server
        .post("/imports")
        .add_header(OWNER_HEADER, OWNER)
        .text("not json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .get("/imports/not-a-uuid")
        .add_header(OWNER_HEADER, OWNER)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(ctx.fetcher.fetch_count(), 0);
}
