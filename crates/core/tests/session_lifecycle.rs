mod common;

use std::{sync::Arc, time::Duration};

use common::{Call, RecordingEngine};
use maestro_core::{
    AudioChunk, BoundedChannel, MaestroError, SessionConfig, SessionManager, SessionState,
};
use tokio::time::sleep;

fn manager(engine: &RecordingEngine, inbound_capacity: usize) -> (SessionManager, Arc<BoundedChannel<AudioChunk>>) {
    let inbound = Arc::new(BoundedChannel::new(inbound_capacity));
    let manager = SessionManager::new(
        "room",
        Arc::new(engine.clone()),
        SessionConfig::default(),
        inbound.clone(),
    );
    (manager, inbound)
}

#[tokio::test(start_paused = true)]
async fn concurrent_ensure_shares_one_connect() {
    let engine = RecordingEngine::new();
    let (manager, _inbound) = manager(&engine, 8);
    assert_eq!(manager.state(), SessionState::Absent);

    let (first, second) = tokio::join!(manager.ensure(), manager.ensure());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.connects(), 1);
    assert_eq!(manager.state(), SessionState::Live);

    manager.ensure().await.unwrap();
    assert_eq!(engine.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_leaves_session_absent() {
    let engine = RecordingEngine::new();
    engine.fail_next_connects(1);
    let (manager, _inbound) = manager(&engine, 8);

    let err = manager.ensure().await.err().expect("connect should fail");
    assert!(matches!(err, MaestroError::SessionUnavailable(_)));
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(manager.current().is_none());

    manager.ensure().await.unwrap();
    assert_eq!(engine.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn receive_loop_drops_oldest_inbound_audio() {
    let engine = RecordingEngine::new();
    let (manager, inbound) = manager(&engine, 2);
    manager.ensure().await.unwrap();

    assert!(engine.emit_audio(vec![vec![1], vec![2], Vec::new(), vec![3], vec![4]]));
    sleep(Duration::from_millis(20)).await;

    assert_eq!(inbound.try_pop().as_deref(), Some(&[3_u8][..]));
    assert_eq!(inbound.try_pop().as_deref(), Some(&[4_u8][..]));
    assert!(inbound.try_pop().is_none());
    assert_eq!(inbound.dropped(), 2);
}

#[tokio::test(start_paused = true)]
async fn crash_clears_handle_and_closes_session() {
    let engine = RecordingEngine::new();
    let (manager, _inbound) = manager(&engine, 8);
    manager.ensure().await.unwrap();

    assert!(engine.crash_session("socket closed"));
    sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.state(), SessionState::Absent);
    assert!(manager.current().is_none());
    assert_eq!(engine.count(&Call::Close), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_prevents_reconnect() {
    let engine = RecordingEngine::new();
    let (manager, _inbound) = manager(&engine, 8);
    manager.ensure().await.unwrap();

    manager.shutdown();
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(matches!(
        manager.ensure().await,
        Err(MaestroError::SessionStopped)
    ));
    assert_eq!(engine.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_is_raised_by_connect_attempt() {
    let engine = RecordingEngine::new();
    let inbound = Arc::new(BoundedChannel::new(8));
    let config = SessionConfig {
        api_key_env: Some("MAESTRO_TEST_CREDENTIAL_THAT_IS_NEVER_SET".to_string()),
        ..SessionConfig::default()
    };
    let manager = SessionManager::new("room", Arc::new(engine.clone()), config, inbound);

    match manager.ensure().await {
        Err(MaestroError::MissingCredential { var }) => {
            assert_eq!(var, "MAESTRO_TEST_CREDENTIAL_THAT_IS_NEVER_SET");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should require a credential"),
    }
    assert_eq!(engine.connects(), 0);
    assert_eq!(manager.state(), SessionState::Absent);
}

#[tokio::test(start_paused = true)]
async fn failing_close_still_clears_session() {
    let engine = RecordingEngine::new();
    engine.fail_closes();
    let (manager, _inbound) = manager(&engine, 8);
    manager.ensure().await.unwrap();

    assert!(engine.crash_session("socket closed"));
    sleep(Duration::from_millis(20)).await;

    assert_eq!(engine.count(&Call::Close), 1);
    assert_eq!(manager.state(), SessionState::Absent);
    assert!(manager.current().is_none());

    manager.ensure().await.unwrap();
    assert_eq!(engine.connects(), 2);
}
