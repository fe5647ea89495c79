//! Integration tests for the Local variant: file-backed key space, local
//! identity, task store and sync engine wired together the way the CLI
//! wires them.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use kanban::persistence::TaskStore;
use kanban::persistence::local::{LocalTaskStore, tasks_key};
use kanban::session::{IdentityProvider, LocalIdentity, Session};
use kanban::storage::{FileStorage, KeyValueStore};
use kanban::sync::SyncEngine;
use kanban_proto::task::Task;
use kanban_proto::user::UserId;

fn texts(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.text.as_str()).collect()
}

async fn login(
    dir: &std::path::Path,
    user_id: &str,
) -> (Session, SyncEngine<LocalTaskStore<Arc<FileStorage>>>) {
    let kv = Arc::new(FileStorage::open(dir).unwrap());
    let identity = LocalIdentity::new(Arc::clone(&kv));
    let session = identity.login(&UserId::new(user_id)).await.unwrap();
    let engine = SyncEngine::new(LocalTaskStore::new(kv), session.clone());
    (session, engine)
}

#[tokio::test]
async fn taro_pending_completed_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (session, engine) = login(dir.path(), "1").await;
    assert_eq!(session.user.name, "Taro Tanaka");
    let _handle = engine.start().await;

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
}

#[tokio::test]
async fn tasks_are_scoped_to_their_owner() {
    let dir = tempfile::tempdir().unwrap();
    let (_, taro) = login(dir.path(), "1").await;
    taro.create("Taro's task").await.unwrap();

    let (_, hanako) = login(dir.path(), "2").await;
    hanako.reload().await;
    assert!(hanako.board().tasks().is_empty());

    let kv = FileStorage::open(dir.path()).unwrap();
    let store = LocalTaskStore::new(kv);
    assert_eq!(store.load(&UserId::new("1")).await.unwrap().len(), 1);
    assert!(store.load(&UserId::new("2")).await.unwrap().is_empty());
}

#[tokio::test]
async fn session_and_board_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (_, engine) = login(dir.path(), "1").await;
        for text in ["A", "B", "C", "D"] {
            engine.create(text).await.unwrap();
        }
        let board = engine.board();
        let ids = board.order();
        assert!(engine.drag_start(ids[1]));
        assert!(engine.drag_end(Some(ids[3])).await);
        let task = engine.board().tasks()[0].id;
        engine.add_comment(task, "first!").await.unwrap();
    }

    let kv = Arc::new(FileStorage::open(dir.path()).unwrap());
    let identity = LocalIdentity::new(Arc::clone(&kv));
    let session = identity.restore().await.unwrap().expect("session restored");
    assert_eq!(session.user.id, UserId::new("1"));

    let engine = SyncEngine::new(LocalTaskStore::new(kv), session);
    engine.start().await.close();
    assert_eq!(texts(&engine.pending()), vec!["A", "C", "D", "B"]);
    let a = &engine.pending()[0];
    assert_eq!(a.comments.len(), 1);
    assert_eq!(a.comments[0].author_name, "Taro Tanaka");
}

#[tokio::test]
async fn legacy_lists_without_comments_are_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let kv = FileStorage::open(dir.path()).unwrap();
    let owner = UserId::new("1");
    kv.set(
        &tasks_key(&owner),
        r#"[{"id":5,"text":"Legacy","completed":true}]"#,
    )
    .unwrap();

    let store = LocalTaskStore::new(kv);
    let first = store.load(&owner).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].comments.is_empty());
    assert!(first[0].completed);

    let second = store.load(&owner).await.unwrap();
    assert_eq!(first, second);

    let next = store.create(&owner, "New").await.unwrap().unwrap();
    assert!(next.id.get() > 5);
}

#[tokio::test]
async fn logout_then_restore_has_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(FileStorage::open(dir.path()).unwrap());
    let identity = LocalIdentity::new(kv);
    identity.login(&UserId::new("3")).await.unwrap();
    identity.logout().await.unwrap();
    assert!(identity.restore().await.unwrap().is_none());
}
