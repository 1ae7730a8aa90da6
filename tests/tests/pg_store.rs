//! Tests for the PostgreSQL record store against a real database.
//!
//! Each test starts its own container (or uses `IMPORT_TEST_DATABASE_URL`)
//! and works under a fresh owner id, so tests never see each other's runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use import_core::{Error, IngestionRun, InsertOutcome, ListQuery, NewRecord, RunId, RunStatus};
use integration_tests::{
    containers::TestPostgres,
    fixtures,
    mocks::{FlakyStore, MockFetcher},
    setup::test_config,
};
use record_store::{PgStore, RecordStore, RetryOutcome};
use uuid::Uuid;
use worker::RunManager;

fn owner() -> String {
    format!("owner-{}", Uuid::new_v4())
}

async fn created(store: &PgStore, owner: &str) -> IngestionRun {
    let run = IngestionRun::new(owner, "catalog.csv", "https://files.example.com/catalog.csv");
    store.create_run(&run).await.unwrap();
    run
}

fn record(run_id: RunId, row: u64, name: &str, category: &str) -> NewRecord {
    NewRecord {
        run_id,
        source_row: row,
        name: name.to_string(),
        category: category.to_string(),
        price: 12.5,
        stock: 3,
        description: None,
    }
}

async fn record_total(store: &dyn RecordStore, run_id: RunId) -> u64 {
    store
        .list_records(run_id, &ListQuery::default())
        .await
        .unwrap()
        .total
}

#[tokio::test]
async fn test_create_and_read_run() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();

    let run = created(&store, &owner).await;
    let read = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(read.id, run.id);
    assert_eq!(read.owner_id, owner);
    assert_eq!(read.status, RunStatus::Running);
    assert_eq!(read.total_rows, None);
    assert_eq!(read.processed_rows, 0);
    assert_eq!(read.attempt, 1);
    assert!(store.get_run(Uuid::new_v4()).await.unwrap().is_none());
    store.ping().await.unwrap();
}

#[tokio::test]
async fn test_progress_is_clamped_and_completion_forces_total() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let run = created(&store, &owner()).await;
    let attempt = run.current_attempt();

    assert!(store.set_total(attempt, 150).await.unwrap());
    assert!(store.advance(attempt, 100).await.unwrap());
    assert!(store.advance(attempt, 100).await.unwrap());
    let read = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(read.total_rows, Some(150));
    assert_eq!(read.processed_rows, 150);

    assert!(store.mark_completed(attempt).await.unwrap());
    let done = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.processed_rows, 150);
    assert!(done.completed_at.is_some());
    assert!(done.error_message.is_none());

    // Without a recorded total, completion adopts the processed count.
    let open = created(&store, &owner()).await;
    assert!(store.advance(open.current_attempt(), 7).await.unwrap());
    assert!(store.mark_completed(open.current_attempt()).await.unwrap());
    let open = store.get_run(open.id).await.unwrap().unwrap();
    assert_eq!(open.total_rows, Some(7));
    assert_eq!(open.processed_rows, 7);
}

#[tokio::test]
async fn test_terminal_run_is_not_resurrected() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let run = created(&store, &owner()).await;
    let attempt = run.current_attempt();

    store.set_total(attempt, 10).await.unwrap();
    store.advance(attempt, 4).await.unwrap();
    assert!(store.mark_failed(attempt, "store unavailable").await.unwrap());

    assert!(!store.advance(attempt, 5).await.unwrap());
    assert!(!store.set_total(attempt, 20).await.unwrap());
    assert!(!store.mark_completed(attempt).await.unwrap());
    assert!(!store.mark_failed(attempt, "again").await.unwrap());
    assert!(!store.heartbeat(attempt).await.unwrap());

    let read = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(read.status, RunStatus::Failed);
    assert_eq!(read.processed_rows, 4);
    assert_eq!(read.error_message.as_deref(), Some("store unavailable"));
}

#[tokio::test]
async fn test_insert_skips_duplicates_within_run() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();
    let run = created(&store, &owner).await;
    let other = created(&store, &owner).await;

    let outcome = store
        .insert_records(
            run.current_attempt(),
            &[
                record(run.id, 3, "Lamp", "Lighting"),
                record(run.id, 1, "Lamp", "Outdoor"),
                record(run.id, 2, "Lamp", "Lighting"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome { inserted: 2, skipped: 1 });

    let again = store
        .insert_records(run.current_attempt(), &[record(run.id, 4, "Lamp", "Outdoor")])
        .await
        .unwrap();
    assert_eq!(again, InsertOutcome { inserted: 0, skipped: 1 });

    let elsewhere = store
        .insert_records(other.current_attempt(), &[record(other.id, 1, "Lamp", "Lighting")])
        .await
        .unwrap();
    assert_eq!(elsewhere.inserted, 1);

    let page = store.list_records(run.id, &ListQuery::default()).await.unwrap();
    assert_eq!(page.total, 2);
    let rows: Vec<u64> = page.items.iter().map(|r| r.source_row).collect();
    assert_eq!(rows, vec![1, 3]);

    assert_eq!(store.delete_records(run.id).await.unwrap(), 2);
    assert_eq!(record_total(&store, run.id).await, 0);
    assert_eq!(record_total(&store, other.id).await, 1);
}

#[tokio::test]
async fn test_begin_retry_checks_owner_and_state() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();
    let run = created(&store, &owner).await;

    assert_eq!(
        store.begin_retry(run.id, "someone-else").await.unwrap(),
        RetryOutcome::NotFound
    );
    assert_eq!(
        store.begin_retry(run.id, &owner).await.unwrap(),
        RetryOutcome::NotRetriable(RunStatus::Running)
    );

    store.set_total(run.current_attempt(), 10).await.unwrap();
    store.advance(run.current_attempt(), 10).await.unwrap();
    store.mark_failed(run.current_attempt(), "boom").await.unwrap();

    match store.begin_retry(run.id, &owner).await.unwrap() {
        RetryOutcome::Rewound(rewound) => {
            assert_eq!(rewound.status, RunStatus::Running);
            assert_eq!(rewound.attempt, 2);
            assert_eq!(rewound.total_rows, None);
            assert_eq!(rewound.processed_rows, 0);
            assert!(rewound.error_message.is_none());
            assert!(rewound.completed_at.is_none());
        }
        other => panic!("expected rewind, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_retries_rewind_once() {
    let pg = TestPostgres::start().await;
    let store = Arc::new(pg.store().await);
    let owner = owner();
    let run = created(&store, &owner).await;
    store.mark_failed(run.current_attempt(), "boom").await.unwrap();

    let run_id = run.id;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            store.begin_retry(run_id, &owner).await.unwrap()
        }));
    }

    let mut rewound = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RetryOutcome::Rewound(_) => rewound += 1,
            RetryOutcome::NotRetriable(status) => assert_eq!(status, RunStatus::Running),
            RetryOutcome::NotFound => panic!("run should be found"),
        }
    }
    assert_eq!(rewound, 1);
    assert_eq!(store.get_run(run_id).await.unwrap().unwrap().attempt, 2);
}

#[tokio::test]
async fn test_superseded_attempt_cannot_write() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();
    let run = created(&store, &owner).await;
    let first = run.current_attempt();
    store.mark_failed(first, "boom").await.unwrap();

    let RetryOutcome::Rewound(rewound) = store.begin_retry(run.id, &owner).await.unwrap() else {
        panic!("run should be retriable");
    };
    let second = rewound.current_attempt();

    assert!(!store.set_total(first, 5).await.unwrap());
    assert!(!store.advance(first, 5).await.unwrap());
    assert!(!store.mark_completed(first).await.unwrap());
    let err = store
        .insert_records(first, &[record(run.id, 1, "Lamp", "Lighting")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Superseded(a) if a == first));
    assert_eq!(record_total(&store, run.id).await, 0);

    assert!(store.set_total(second, 1).await.unwrap());
    let outcome = store
        .insert_records(second, &[record(run.id, 1, "Lamp", "Lighting")])
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_fail_stale_runs_spares_live_leases() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();

    let mut stale = IngestionRun::new(owner.as_str(), "old.csv", "old.csv");
    stale.heartbeat_at = Utc::now() - chrono::Duration::hours(2);
    store.create_run(&stale).await.unwrap();
    let live = created(&store, &owner).await;

    let cutoff = Utc::now() - chrono::Duration::hours(1);
    assert!(store.fail_stale_runs(cutoff, "interrupted").await.unwrap() >= 1);

    let stale = store.get_run(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, RunStatus::Failed);
    assert_eq!(stale.error_message.as_deref(), Some("interrupted"));
    assert_eq!(
        store.get_run(live.id).await.unwrap().unwrap().status,
        RunStatus::Running
    );

    let mut renewed = IngestionRun::new(owner.as_str(), "renewed.csv", "renewed.csv");
    renewed.heartbeat_at = Utc::now() - chrono::Duration::hours(2);
    store.create_run(&renewed).await.unwrap();
    assert!(store.heartbeat(renewed.current_attempt()).await.unwrap());
    store.fail_stale_runs(cutoff, "interrupted").await.unwrap();
    assert_eq!(
        store.get_run(renewed.id).await.unwrap().unwrap().status,
        RunStatus::Running
    );
}

#[tokio::test]
async fn test_list_runs_filters_and_pages_in_sql() {
    let pg = TestPostgres::start().await;
    let store = pg.store().await;
    let owner = owner();

    let mut failed_ids = Vec::new();
    for i in 0..5 {
        let run = IngestionRun::new(owner.as_str(), format!("batch_{}%.csv", i), "x.csv");
        store.create_run(&run).await.unwrap();
        if i % 2 == 0 {
            store.mark_failed(run.current_attempt(), "bad").await.unwrap();
            failed_ids.push(run.id);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    created(&store, "someone-else").await;

    let page = store.list_runs(&owner, &ListQuery::default()).await.unwrap();
    assert_eq!(page.total, 5);
    assert!(page
        .items
        .windows(2)
        .all(|pair| pair[0].started_at >= pair[1].started_at));

    let failed = ListQuery {
        field: Some("status".into()),
        op: Some("eq".into()),
        value: Some("failed".into()),
        ..Default::default()
    };
    let page = store.list_runs(&owner, &failed).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.items.iter().all(|run| failed_ids.contains(&run.id)));

    let literal_percent = ListQuery {
        field: Some("fileName".into()),
        op: Some("contains".into()),
        value: Some("_3%".into()),
        ..Default::default()
    };
    let page = store.list_runs(&owner, &literal_percent).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].file_name, "batch_3%.csv");

    let second_page = ListQuery {
        page: Some(2),
        page_size: Some(2),
        ..Default::default()
    };
    let page = store.list_runs(&owner, &second_page).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
}

/// Batch 3 fails against the real store; a retry replaces the partial
/// records with the full set.
#[tokio::test]
async fn test_write_failure_then_retry_on_postgres() {
    let pg = TestPostgres::start().await;
    let store = Arc::new(FlakyStore::wrapping(pg.store().await));
    let fetcher = Arc::new(MockFetcher::new());
    let manager = RunManager::new(store.clone(), fetcher.clone(), test_config());
    let owner = owner();

    let url = fixtures::source_url("big.csv");
    fetcher.put(&url, fixtures::csv(&fixtures::catalog_rows(250)));
    store.fail_insert_after(3);

    let run = manager.start(&owner, "big.csv", &url).await.unwrap();
    let failed = wait_for_terminal(store.as_ref(), run.id).await;
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.total_rows, Some(250));
    assert_eq!(failed.processed_rows, 200);
    assert!(failed.error_message.unwrap().contains("batch 3"));
    assert_eq!(record_total(store.as_ref(), run.id).await, 200);

    let rewound = manager.retry(run.id, &owner).await.unwrap();
    assert_eq!(rewound.attempt, 2);

    let done = wait_for_terminal(store.as_ref(), run.id).await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.processed_rows, 250);
    assert_eq!(record_total(store.as_ref(), run.id).await, 250);
}

async fn wait_for_terminal(store: &dyn RecordStore, run_id: RunId) -> IngestionRun {
    for _ in 0..1000 {
        let run = store.get_run(run_id).await.unwrap().unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not reach a terminal state", run_id);
}
