//! End-to-end scenarios through the tracker facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::admin::ReportSource;
use crate::auth::{AuthSession, AuthState};
use crate::config::TrackerConfig;
use crate::db::OrderBy;
use crate::models::{AccountKey, Application, ApplicationStatus, EntityType, Record, RecordId};
use crate::remote::{BackendOp, MemoryBackend, RemoteBackend, RowMapper};
use crate::{RemoteError, Tracker};

fn config() -> TrackerConfig {
    TrackerConfig {
        remote_timeout: Duration::from_secs(2),
        remote_max_attempts: 1,
        queue_max_retries: 3,
        queue_drain_interval: Duration::from_secs(3600),
        queue_min_drain_interval: Duration::ZERO,
        ..TrackerConfig::default()
    }
}

fn session(id: &str) -> AuthSession {
    AuthSession {
        session_id: id.to_string(),
        access_token: format!("token-{id}"),
        expires_at: chrono::Utc::now().timestamp() + 3600,
        email: None,
    }
}

fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_account("s1", AccountKey(42));
    backend
}

async fn tracker(config: TrackerConfig, backend: &Arc<MemoryBackend>) -> Tracker {
    Tracker::init(config, Some(Arc::clone(backend) as Arc<dyn RemoteBackend>))
        .await
        .unwrap()
}

fn application(company: &str, status: ApplicationStatus) -> Record {
    let application = Application::new(company, "Engineer")
        .unwrap()
        .with_status(status);
    Record::from_entity(RecordId::new(), &application).unwrap()
}

async fn wait_for_empty_queue(tracker: &Tracker) -> bool {
    for _ in 0..200 {
        let snapshot = tracker.queue_snapshot().await.unwrap();
        if snapshot.pending + snapshot.in_flight == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Run one full drain pass of our own, waiting out any pass the worker holds.
async fn settle(tracker: &Tracker) {
    for _ in 0..200 {
        if tracker.sync().await.iter().all(|report| !report.skipped) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("sync queue never settled");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_offline_then_sync_pushes_once() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();
    tracker.set_online(false);

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    let listed = tracker
        .list(EntityType::Applications, OrderBy::CreatedDesc)
        .await
        .unwrap();
    assert_eq!(listed, vec![saved.clone()]);
    assert_eq!(backend.calls(BackendOp::Upsert), 0);

    tracker.set_online(true);
    assert!(wait_for_empty_queue(&tracker).await);
    settle(&tracker).await;
    assert_eq!(backend.calls(BackendOp::Upsert), 1);

    let row = backend.row("applications", saved.id.as_str()).unwrap();
    assert_eq!(row["user_id"], serde_json::json!(42));
    assert_eq!(row["status"], serde_json::json!("Applied"));
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_remote_pull_is_ignored() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Offer))
        .await
        .unwrap();
    settle(&tracker).await;

    let mut stale = saved.clone();
    stale.updated_at -= 10;
    stale
        .fields
        .insert("status".to_string(), serde_json::json!("Rejected"));
    backend.insert_row(
        "applications",
        RowMapper::new(EntityType::Applications).to_remote(&stale, AccountKey(42), 0),
    );

    let report = tracker.refresh(EntityType::Applications).await.unwrap();
    assert_eq!(report.local_kept, 1);
    let local = tracker
        .get(EntityType::Applications, &saved.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.field_str("status"), Some("Offer"));
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_newer_remote_copy_wins_and_refreshes_cache() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    settle(&tracker).await;
    tracker
        .list(EntityType::Applications, OrderBy::CreatedDesc)
        .await
        .unwrap();

    let mut newer = saved.clone();
    newer.updated_at += 60_000;
    newer
        .fields
        .insert("status".to_string(), serde_json::json!("Interviewing"));
    backend.insert_row(
        "applications",
        RowMapper::new(EntityType::Applications).to_remote(&newer, AccountKey(42), 0),
    );

    // The cache miss above may have started a background pull of its own.
    tracker.refresh(EntityType::Applications).await.unwrap();
    let listed = tracker
        .list(EntityType::Applications, OrderBy::CreatedDesc)
        .await
        .unwrap();
    assert_eq!(listed[0].field_str("status"), Some("Interviewing"));
    assert_eq!(listed[0].updated_at, newer.updated_at);
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_identity_survives_reload_but_not_sign_out() {
    let tmp = tempdir().unwrap();
    let backend = backend();
    let config = TrackerConfig {
        db_path: Some(tmp.path().join("pursuit.db")),
        ..config()
    };

    let first = tracker(config.clone(), &backend).await;
    first.sign_in(&session("s1")).await.unwrap();
    first
        .save(application("Acme", ApplicationStatus::Saved))
        .await
        .unwrap();
    settle(&first).await;
    assert_eq!(backend.calls(BackendOp::FindAccount), 1);
    first.teardown().await;

    backend.reset_calls();
    let second = tracker(config, &backend).await;
    second.sign_in(&session("s1")).await.unwrap();
    second
        .save(application("Globex", ApplicationStatus::Saved))
        .await
        .unwrap();
    settle(&second).await;
    assert_eq!(backend.calls(BackendOp::FindAccount), 0);
    assert_eq!(backend.rows("applications").len(), 2);

    second.sign_out().await.unwrap();
    second.sign_in(&session("s1")).await.unwrap();
    second
        .save(application("Initech", ApplicationStatus::Saved))
        .await
        .unwrap();
    settle(&second).await;
    assert_eq!(backend.calls(BackendOp::FindAccount), 1);
    second.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_bound_abandons_and_keeps_local_data() {
    let backend = backend();
    let tracker = tracker(
        TrackerConfig {
            queue_max_retries: 2,
            ..config()
        },
        &backend,
    )
    .await;
    backend.fail_times(BackendOp::Upsert, 10, &RemoteError::transient("connection reset"));
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    settle(&tracker).await;
    assert_eq!(backend.calls(BackendOp::Upsert), 1);
    tracker.force_refresh().await.unwrap();

    let snapshot = tracker.queue_snapshot().await.unwrap();
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.abandoned, 1);
    assert_eq!(backend.calls(BackendOp::Upsert), 2);
    assert!(tracker
        .get(EntityType::Applications, &saved.id)
        .await
        .unwrap()
        .is_some());
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_offline_operations_never_reach_remote() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.set_online(false);
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    tracker
        .list(EntityType::Applications, OrderBy::UpdatedDesc)
        .await
        .unwrap();
    assert!(tracker.delete(EntityType::Applications, &saved.id).await.unwrap());
    tracker.sync().await;
    tracker.force_refresh().await.unwrap();

    assert_eq!(backend.total_calls(), 0);
    assert_eq!(tracker.queue_snapshot().await.unwrap().pending, 2);
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_write_invalidates_cached_listing() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.set_online(false);

    tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    assert_eq!(
        tracker
            .list(EntityType::Applications, OrderBy::CreatedDesc)
            .await
            .unwrap()
            .len(),
        1
    );
    tracker
        .list(EntityType::Applications, OrderBy::CreatedDesc)
        .await
        .unwrap();
    assert_eq!(tracker.cache_status().hits, 1);

    tracker
        .save(application("Globex", ApplicationStatus::Saved))
        .await
        .unwrap();
    assert_eq!(
        tracker
            .list(EntityType::Applications, OrderBy::CreatedDesc)
            .await
            .unwrap()
            .len(),
        2
    );
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tombstone_not_resurrected_by_pull() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    settle(&tracker).await;

    backend.fail_times(BackendOp::Delete, 10, &RemoteError::transient("connection reset"));
    tracker.delete(EntityType::Applications, &saved.id).await.unwrap();
    settle(&tracker).await;
    assert!(backend.row("applications", saved.id.as_str()).is_some());

    let report = tracker.refresh(EntityType::Applications).await.unwrap();
    assert_eq!(report.local_kept, 1);
    assert_eq!(report.requeued, 0);
    assert!(tracker
        .get(EntityType::Applications, &saved.id)
        .await
        .unwrap()
        .is_none());
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_confirmed_delete_removes_remote_row_and_tombstone() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();

    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    settle(&tracker).await;
    tracker.delete(EntityType::Applications, &saved.id).await.unwrap();
    settle(&tracker).await;
    assert!(wait_for_empty_queue(&tracker).await);

    assert!(backend.row("applications", saved.id.as_str()).is_none());
    assert!(tracker
        .store()
        .get_any(EntityType::Applications, &saved.id)
        .await
        .unwrap()
        .is_none());
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_auth_rejection_requires_reauth_and_keeps_queue() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    let states = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&states);
    let _subscription = tracker.subscribe_auth(move |state| {
        if state.needs_reauth() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    backend.fail_next(BackendOp::FindAccount, RemoteError::auth("jwt expired"));
    tracker.set_online(false);
    tracker.sign_in(&session("s1")).await.unwrap();
    tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    tracker.set_online(true);
    settle(&tracker).await;

    assert!(tracker.auth_state().needs_reauth());
    assert_eq!(states.load(Ordering::SeqCst), 1);
    let snapshot = tracker.queue_snapshot().await.unwrap();
    assert_eq!(snapshot.pending, 1);
    assert_eq!(snapshot.abandoned, 0);

    tracker.sign_in(&session("s1")).await.unwrap();
    assert_eq!(tracker.auth_state(), AuthState::SignedIn { session_id: "s1".to_string() });
    settle(&tracker).await;
    assert!(wait_for_empty_queue(&tracker).await);
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_report_falls_back_to_local() {
    let backend = backend();
    let tracker = tracker(config(), &backend).await;
    tracker.sign_in(&session("s1")).await.unwrap();
    tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    settle(&tracker).await;

    let remote = tracker.admin().await.unwrap();
    assert_eq!(remote.source, ReportSource::Remote);
    assert_eq!(remote.totals.applications, 1);

    backend.set_online(false);
    let local = tracker.admin().await.unwrap();
    assert_eq!(local.source, ReportSource::LocalFallback);
    assert_eq!(local.totals.accounts, 1);
    tracker.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_remote_config_runs_local_only() {
    let config = TrackerConfig::from_lookup(|name| {
        (name == "PURSUIT_REMOTE_URL").then(|| "https://db.example.com".to_string())
    })
    .unwrap();
    let tracker = Tracker::init(config, None).await.unwrap();
    assert!(tracker.is_local_only());

    tracker.sign_in(&session("s1")).await.unwrap();
    let saved = tracker
        .save(application("Acme", ApplicationStatus::Applied))
        .await
        .unwrap();
    tracker.force_refresh().await.unwrap();

    assert_eq!(tracker.queue_snapshot().await.unwrap().pending, 1);
    assert!(tracker
        .get(EntityType::Applications, &saved.id)
        .await
        .unwrap()
        .is_some());
    let report = tracker.admin().await.unwrap();
    assert_eq!(report.source, ReportSource::LocalFallback);
    tracker.teardown().await;
}
