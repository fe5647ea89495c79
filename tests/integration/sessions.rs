//! Integration tests for login, registration and session restore in both
//! storage variants.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use kanban::backend::Backend;
use kanban::backend::ws::{WsBackend, WsOptions};
use kanban::session::{
    CURRENT_USER_ID_KEY, IdentityProvider, LocalIdentity, RemoteIdentity, SessionError,
};
use kanban::storage::{FileStorage, KeyValueStore, MemoryStorage};
use kanban_backend::server::start_server;
use kanban_proto::backend::{Table, Value};
use kanban_proto::user::UserId;

type Remote = RemoteIdentity<Arc<WsBackend>, Arc<MemoryStorage>>;

async fn remote() -> (Arc<WsBackend>, Remote, Arc<MemoryStorage>) {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test backend");
    let backend = Arc::new(
        WsBackend::connect(&format!("ws://{addr}/ws"), WsOptions::default())
            .await
            .unwrap(),
    );
    let kv = Arc::new(MemoryStorage::new());
    let identity = RemoteIdentity::new(Arc::clone(&backend), Arc::clone(&kv));
    (backend, identity, kv)
}

#[tokio::test]
async fn local_duplicate_email_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let identity = LocalIdentity::new(FileStorage::open(dir.path()).unwrap());

    identity
        .register("Saburo", "saburo@example.com")
        .await
        .unwrap();
    let err = identity
        .register("Another Saburo", " Saburo@Example.com ")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateEmail(_)));
    assert_eq!(identity.users().await.len(), 4);
}

#[tokio::test]
async fn remote_duplicate_email_is_rejected() {
    let (_backend, identity, _kv) = remote().await;

    identity
        .register("Taro Tanaka", "tanaka@example.com")
        .await
        .unwrap();
    let err = identity
        .register("Impostor", "TANAKA@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateEmail(_)));
    assert!(err.to_string().contains("already exists"));
    assert_eq!(identity.users().await.len(), 1);
}

#[tokio::test]
async fn remote_register_login_restore_logout() {
    let (_backend, identity, kv) = remote().await;
    assert!(identity.restore().await.unwrap().is_none());

    let taro = identity
        .register("  Taro Tanaka ", "tanaka@example.com")
        .await
        .unwrap();
    assert_eq!(taro.user.name, "Taro Tanaka");
    assert_eq!(
        kv.get(CURRENT_USER_ID_KEY).unwrap().as_deref(),
        Some(taro.user.id.as_str())
    );

    let hanako = identity
        .register("Hanako Sato", "sato@example.com")
        .await
        .unwrap();
    assert_eq!(identity.restore().await.unwrap().unwrap(), hanako);

    let back = identity.login(&taro.user.id).await.unwrap();
    assert_eq!(back, taro);
    assert_eq!(identity.restore().await.unwrap().unwrap(), taro);

    identity.logout().await.unwrap();
    assert!(identity.restore().await.unwrap().is_none());
}

#[tokio::test]
async fn remote_restore_clears_marker_of_deleted_user() {
    let (backend, identity, kv) = remote().await;
    let taro = identity
        .register("Taro Tanaka", "tanaka@example.com")
        .await
        .unwrap();

    backend
        .delete(Table::Users, Value::Text(taro.user.id.as_str().to_string()))
        .await
        .unwrap();

    assert!(identity.restore().await.unwrap().is_none());
    assert!(kv.get(CURRENT_USER_ID_KEY).unwrap().is_none());
}

#[tokio::test]
async fn remote_login_unknown_user_fails() {
    let (_backend, identity, _kv) = remote().await;
    let err = identity.login(&UserId::new("missing")).await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownUser(_)));
}

#[tokio::test]
async fn remote_register_requires_fields() {
    let (_backend, identity, _kv) = remote().await;
    assert!(matches!(
        identity.register("", "x@example.com").await,
        Err(SessionError::MissingFields)
    ));
    assert!(identity.users().await.is_empty());
}
