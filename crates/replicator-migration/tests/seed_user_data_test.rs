// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User-data seeding tests: heartbeat cursor and resume behaviour.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MockCluster, NAMESPACE, fast_retry};
use replicator_engine::{Heartbeat, MemoryPersistence, ProgressEvent};
use replicator_migration::{
    ClientError, SEED_ACTIVITY_ID, SeedHeartbeat, UserDataParams, UserDataSeeder, UserDataStatus,
};
use tokio::sync::broadcast;

fn seed_params() -> UserDataParams {
    UserDataParams {
        page_size: 2,
        rps: 1000.0,
    }
}

fn heartbeat() -> (Heartbeat<SeedHeartbeat>, broadcast::Receiver<ProgressEvent>) {
    let (tx, rx) = broadcast::channel(64);
    let heartbeat = Heartbeat::new(
        Arc::new(MemoryPersistence::new()),
        tx,
        "seed-run",
        SEED_ACTIVITY_ID,
    );
    (heartbeat, rx)
}

fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<SeedHeartbeat> {
    let mut beats = Vec::new();
    while let Ok(event) = rx.try_recv() {
        beats.push(event.details_as::<SeedHeartbeat>().unwrap());
    }
    beats
}

#[tokio::test]
async fn test_retry_resumes_at_heartbeat_cursor() {
    let cluster = MockCluster::new().with_user_data_pages(&[&["a", "b"], &[]]);
    *cluster.publish_fail_once.lock().unwrap() = Some("b".to_string());
    let cluster = Arc::new(cluster);
    let seeder = UserDataSeeder::from_collaborators(&cluster.collaborators());
    let (heartbeat, mut rx) = heartbeat();

    let err = seeder
        .seed_attempt(NAMESPACE, &seed_params(), &heartbeat)
        .await
        .unwrap_err();
    assert!(err.message.contains("mock publish error: b"));

    let beats = drain(&mut rx);
    assert_eq!(
        beats,
        vec![
            SeedHeartbeat {
                next_page_token: None,
                index_in_page: 0,
            },
            SeedHeartbeat {
                next_page_token: None,
                index_in_page: 1,
            },
        ]
    );
    assert_eq!(heartbeat.last().await.unwrap(), Some(beats[1].clone()));

    seeder
        .seed_attempt(NAMESPACE, &seed_params(), &heartbeat)
        .await
        .unwrap();

    assert_eq!(cluster.published(), vec!["a", "b", "b"]);
    assert_eq!(cluster.describe_calls.load(Ordering::SeqCst), 2);
    assert_eq!(cluster.user_data_requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_run_retries_until_done() {
    let cluster = MockCluster::new().with_user_data_pages(&[&["a", "b"], &["c"]]);
    *cluster.publish_fail_once.lock().unwrap() = Some("c".to_string());
    let cluster = Arc::new(cluster);
    let seeder = UserDataSeeder::from_collaborators(&cluster.collaborators());
    let (heartbeat, _rx) = heartbeat();

    let status = seeder
        .run(NAMESPACE, &seed_params(), &heartbeat, &fast_retry(3))
        .await;

    assert_eq!(status, UserDataStatus::succeeded());
    // Entries before the cursor are not published again.
    assert_eq!(cluster.published(), vec!["a", "b", "c", "c"]);
    let cursor = heartbeat.last().await.unwrap().unwrap();
    assert_eq!(cursor.index_in_page, 0);
    assert!(cursor.next_page_token.is_some());
}

#[tokio::test]
async fn test_terminal_error_reports_failed_status() {
    let mut cluster = MockCluster::new();
    cluster.describe_error = Some(ClientError::terminal("namespace is required"));
    let cluster = Arc::new(cluster);
    let seeder = UserDataSeeder::from_collaborators(&cluster.collaborators());
    let (heartbeat, _rx) = heartbeat();

    let status = seeder
        .run(NAMESPACE, &seed_params(), &heartbeat, &fast_retry(3))
        .await;

    assert!(status.is_failure());
    assert_eq!(status.failure_message, "namespace is required");
    assert_eq!(cluster.describe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_namespace_seeds_nothing() {
    let cluster = Arc::new(MockCluster::new());
    let seeder = UserDataSeeder::from_collaborators(&cluster.collaborators());
    let (heartbeat, mut rx) = heartbeat();

    let status = seeder
        .run(NAMESPACE, &UserDataParams::default(), &heartbeat, &fast_retry(0))
        .await;

    assert_eq!(status, UserDataStatus::succeeded());
    assert!(cluster.published().is_empty());
    assert!(drain(&mut rx).is_empty());
}
