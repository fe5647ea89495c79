//! Integration tests for the Remote variant against an in-process
//! reference backend: CRUD through the remote task store, realtime
//! invalidation between two clients, and change feed teardown.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use kanban::backend::ws::{WsBackend, WsOptions};
use kanban::persistence::TaskStore;
use kanban::persistence::remote::RemoteTaskStore;
use kanban::session::{IdentityProvider, RemoteIdentity, Session};
use kanban::storage::MemoryStorage;
use kanban::sync::SyncEngine;
use kanban_backend::server::{BackendState, start_server_with_state};
use kanban_proto::task::Task;
use kanban_proto::user::UserId;

type Engine = SyncEngine<RemoteTaskStore<Arc<WsBackend>>>;

async fn start_backend() -> (Arc<BackendState>, String) {
    let state = Arc::new(BackendState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test backend");
    (state, format!("ws://{addr}/ws"))
}

async fn connect(url: &str) -> Arc<WsBackend> {
    Arc::new(WsBackend::connect(url, WsOptions::default()).await.unwrap())
}

async fn register(url: &str, name: &str, email: &str) -> Session {
    let identity = RemoteIdentity::new(connect(url).await, MemoryStorage::new());
    identity.register(name, email).await.unwrap()
}

async fn engine_for(url: &str, session: Session) -> Engine {
    SyncEngine::new(RemoteTaskStore::new(connect(url).await), session)
}

fn texts(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.text.clone()).collect()
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn taro_pending_completed_scenario() {
    let (_state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;
    let engine = engine_for(&url, taro).await;
    let handle = engine.start().await;

    let milk = engine.create("Buy milk").await.unwrap();
    let dog = engine.create("Walk dog").await.unwrap();
    assert_eq!(texts(&engine.pending()), vec!["Buy milk", "Walk dog"]);
    assert!(engine.completed().is_empty());

    assert!(engine.toggle(milk.id).await);
    assert_eq!(texts(&engine.pending()), vec!["Walk dog"]);
    assert_eq!(texts(&engine.completed()), vec!["Buy milk"]);

    assert!(engine.delete(dog.id).await);
    assert!(engine.pending().is_empty());
    assert_eq!(texts(&engine.completed()), vec!["Buy milk"]);
    handle.close();
}

#[tokio::test]
async fn tasks_are_scoped_to_their_owner() {
    let (_state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;
    let hanako = register(&url, "Hanako Sato", "sato@example.com").await;

    let store = RemoteTaskStore::new(connect(&url).await);
    let task = store.create(taro.owner(), "Taro's task").await.unwrap().unwrap();

    assert!(store.load(hanako.owner()).await.unwrap().is_empty());
    assert!(!store.toggle(hanako.owner(), task.id).await.unwrap());
    assert!(!store.delete(hanako.owner(), task.id).await.unwrap());
    assert_eq!(store.load(taro.owner()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn change_from_another_client_triggers_reload() {
    let (_state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;

    let watcher = engine_for(&url, taro.clone()).await;
    let handle = watcher.start().await;
    assert!(handle.is_live());
    assert!(watcher.pending().is_empty());

    let writer = engine_for(&url, taro).await;
    let task = writer.create("From elsewhere").await.unwrap();
    assert!(eventually(|| texts(&watcher.pending()) == vec!["From elsewhere"]).await);

    writer.add_comment(task.id, "ping").await.unwrap();
    assert!(
        eventually(|| watcher
            .pending()
            .first()
            .is_some_and(|t| t.comments.len() == 1))
        .await
    );
    assert_eq!(watcher.pending()[0].comments[0].author_name, "Taro Tanaka");

    handle.close();
}

#[tokio::test]
async fn other_owners_changes_do_not_show_up() {
    let (_state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;
    let hanako = register(&url, "Hanako Sato", "sato@example.com").await;

    let watcher = engine_for(&url, taro.clone()).await;
    let _handle = watcher.start().await;
    let other = engine_for(&url, hanako).await;
    other.create("Hanako's task").await.unwrap();

    // A later change of Taro's own proves the earlier one was seen and filtered.
    let own = engine_for(&url, taro).await;
    own.create("Taro's task").await.unwrap();
    assert!(eventually(|| texts(&watcher.pending()) == vec!["Taro's task"]).await);
}

#[tokio::test]
async fn closing_the_handle_tears_down_both_subscriptions() {
    let (state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;

    let engine = engine_for(&url, taro.clone()).await;
    let handle = engine.start().await;
    assert_eq!(state.subscription_count(), 2);

    handle.close();
    assert!(eventually(|| state.subscription_count() == 0).await);

    let mut updates = engine.subscribe_updates();
    updates.borrow_and_update();
    let writer = engine_for(&url, taro).await;
    writer.create("unseen").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!updates.has_changed().unwrap());
    assert!(engine.pending().is_empty());
}

#[tokio::test]
async fn dropping_the_handle_also_tears_down() {
    let (state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;

    let engine = engine_for(&url, taro).await;
    {
        let _handle = engine.start().await;
        assert_eq!(state.subscription_count(), 2);
    }
    assert!(eventually(|| state.subscription_count() == 0).await);
}

#[tokio::test]
async fn drag_order_is_not_durable_remotely() {
    let (_state, url) = start_backend().await;
    let taro = register(&url, "Taro Tanaka", "tanaka@example.com").await;
    let engine = engine_for(&url, taro).await;

    let a = engine.create("A").await.unwrap();
    let b = engine.create("B").await.unwrap();
    assert!(engine.drag_start(b.id));
    assert!(engine.drag_end(Some(a.id)).await);
    assert_eq!(texts(&engine.pending()), vec!["B", "A"]);

    engine.reload().await;
    assert_eq!(texts(&engine.pending()), vec!["A", "B"]);
}

#[tokio::test]
async fn unknown_user_id_yields_empty_board() {
    let (_state, url) = start_backend().await;
    let store = RemoteTaskStore::new(connect(&url).await);
    assert!(store.load(&UserId::new("nobody")).await.unwrap().is_empty());
}
