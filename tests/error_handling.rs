//! Error handling and edge case tests.

use ledgerkv::{
    AccountIdentity, BackendFailure, BlockNumber, Client, ClientConfig, EntityCreate, EntityKey,
    EntityUpdate, ExtendRequest, MemoryBackend, MemoryBackendConfig, StoreError,
};
use std::sync::Arc;
use std::time::Duration;

const OWNER: &str = "0x1111111111111111111111111111111111111111";

fn test_client(backend: MemoryBackend, config: ClientConfig) -> (Arc<MemoryBackend>, Client<MemoryBackend>) {
    let backend = Arc::new(backend);
    let identity = AccountIdentity::from_address(OWNER).unwrap();
    let client = Client::new(Arc::clone(&backend), identity, config);
    (backend, client)
}

fn default_client() -> (Arc<MemoryBackend>, Client<MemoryBackend>) {
    test_client(MemoryBackend::at_block(100), ClientConfig::default())
}

fn create_one(client: &Client<MemoryBackend>, btl: u64) -> EntityKey {
    client
        .create_entities(&[EntityCreate::new(b"payload".to_vec(), btl)])
        .unwrap()[0]
        .entity_key
}

// --- Not Found ---

#[test]
fn test_unknown_key_is_not_found() {
    let (_backend, client) = default_client();
    let key = EntityKey::from_bytes(b"never created");

    match client.get_entity_metadata(&key) {
        Err(StoreError::NotFound(k)) => assert_eq!(k, key),
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert!(client.get_storage_value(&key).unwrap_err().is_not_found());
}

#[test]
fn test_extend_unknown_key_names_the_key() {
    let (_backend, client) = default_client();
    let known = create_one(&client, 10);
    let unknown = EntityKey::from_bytes(b"missing");

    match client.extend_entities(&[ExtendRequest::new(known, 5), ExtendRequest::new(unknown, 5)]) {
        Err(StoreError::ExtendFailed { key, source }) => {
            assert_eq!(key, unknown);
            assert!(source.is_not_found());
        }
        other => panic!("Expected ExtendFailed, got {:?}", other),
    }
    // Nothing was applied.
    assert_eq!(
        client.get_entity_metadata(&known).unwrap().expires_at_block,
        BlockNumber(110)
    );
}

#[test]
fn test_extend_expired_entity_fails() {
    let (backend, client) = default_client();
    let key = create_one(&client, 3);
    backend.advance_blocks(3).unwrap();

    let err = client
        .extend_entities(&[ExtendRequest::new(key, 10)])
        .unwrap_err();
    assert!(err.is_not_found());
}

// --- Validation ---

#[test]
fn test_zero_btl_rejected() {
    let (backend, client) = default_client();
    let result = client.create_entities(&[EntityCreate::new(b"x".to_vec(), 0)]);
    match result {
        Err(StoreError::BatchFailed { index, source }) => {
            assert_eq!(index, 0);
            assert!(matches!(*source, StoreError::Validation(_)));
        }
        other => panic!("Expected BatchFailed, got {:?}", other),
    }
    assert_eq!(backend.entity_count(), 0);
}

#[test]
fn test_extend_by_zero_rejected() {
    let (_backend, client) = default_client();
    let key = create_one(&client, 10);
    match client.extend_entities(&[ExtendRequest::new(key, 0)]) {
        Err(StoreError::ExtendFailed { key: k, source }) => {
            assert_eq!(k, key);
            assert!(matches!(*source, StoreError::Validation(_)));
        }
        other => panic!("Expected ExtendFailed, got {:?}", other),
    }
}

#[test]
fn test_invalid_annotation_key_rejected() {
    let (_backend, client) = default_client();
    let result = client.create_entities(&[EntityCreate::new(b"x".to_vec(), 5).with_string("bad key", "v")]);
    assert!(matches!(result, Err(StoreError::BatchFailed { index: 0, .. })));
}

#[test]
fn test_annotation_keys_must_be_queryable() {
    let (backend, client) = default_client();
    let result = client.create_entities(&[
        EntityCreate::new(b"ok".to_vec(), 5).with_string("proposalId", "p-1"),
        EntityCreate::new(b"x".to_vec(), 5).with_string("proposal-id", "p-1"),
    ]);
    match result {
        Err(StoreError::BatchFailed { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, StoreError::Validation(ref m) if m.contains("proposal-id")));
        }
        other => panic!("Expected BatchFailed, got {:?}", other),
    }
    assert_eq!(backend.entity_count(), 0);

    let key = create_one(&client, 10);
    let result = client.update_entities(&[
        EntityUpdate::new(key, b"y".to_vec(), 5).with_numeric("vote-weight", 3),
    ]);
    assert!(matches!(result, Err(StoreError::BatchFailed { index: 0, .. })));
    assert_eq!(client.get_storage_value(&key).unwrap(), b"payload".to_vec());
}

#[test]
fn test_btl_above_backend_maximum() {
    let (backend, client) = test_client(
        MemoryBackend::new(MemoryBackendConfig {
            max_btl: Some(100),
            ..Default::default()
        }),
        ClientConfig::default(),
    );

    let result = client.create_entities(&[
        EntityCreate::new(b"ok".to_vec(), 100),
        EntityCreate::new(b"too long".to_vec(), 101),
    ]);
    assert!(matches!(result, Err(StoreError::BatchFailed { index: 1, .. })));
    // All or nothing: the valid first item was not created either.
    assert_eq!(backend.entity_count(), 0);
}

#[test]
fn test_invalid_owner_address() {
    assert!(matches!(
        AccountIdentity::from_address("1111111111111111111111111111111111111111"),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        AccountIdentity::from_address("0x1234"),
        Err(StoreError::Validation(_))
    ));
}

// --- Query Syntax ---

#[test]
fn test_query_syntax_errors_carry_position() {
    let (_backend, client) = default_client();

    match client.query_entities("num = 1 && weight > 2") {
        Err(StoreError::QuerySyntax { offset, fragment, .. }) => {
            assert_eq!(offset, 18);
            assert!(fragment.starts_with('>'));
        }
        other => panic!("Expected QuerySyntax, got {:?}", other),
    }

    for bad in ["", "   ", "num =", "= 1", "(num = 1", "num = 1 &&", r#"name = "open"#, "num != 1"] {
        assert!(
            matches!(client.query_entities(bad), Err(StoreError::QuerySyntax { .. })),
            "query {:?} should be rejected",
            bad
        );
    }
}

// --- Ownership ---

#[test]
fn test_update_by_non_owner_rejected() {
    let backend = Arc::new(MemoryBackend::at_block(0));
    let alice = Client::new(
        Arc::clone(&backend),
        AccountIdentity::from_address(OWNER).unwrap(),
        ClientConfig::default(),
    );
    let mallory = Client::new(
        Arc::clone(&backend),
        AccountIdentity::from_address("0x3333333333333333333333333333333333333333").unwrap(),
        ClientConfig::default(),
    );
    let key = create_one(&alice, 10);

    assert!(matches!(
        mallory.update_entities(&[EntityUpdate::new(key, b"x".to_vec(), 5)]),
        Err(StoreError::BatchFailed { index: 0, .. })
    ));
    assert!(matches!(
        mallory.delete_entities(&[key]),
        Err(StoreError::BatchFailed { index: 0, .. })
    ));
    assert!(alice.get_entity_metadata(&key).is_ok());
}

#[test]
fn test_delete_batch_is_all_or_nothing() {
    let (backend, client) = default_client();
    let a = create_one(&client, 10);
    let b = create_one(&client, 10);
    let missing = EntityKey::from_bytes(b"missing");

    let err = client.delete_entities(&[a, missing, b]).unwrap_err();
    assert!(matches!(err, StoreError::BatchFailed { index: 1, .. }));
    assert!(err.is_not_found());
    assert_eq!(backend.entity_count(), 2);
}

#[test]
fn test_duplicate_keys_in_update_batch() {
    let (_backend, client) = default_client();
    let key = create_one(&client, 10);
    let result = client.update_entities(&[
        EntityUpdate::new(key, b"a".to_vec(), 5),
        EntityUpdate::new(key, b"b".to_vec(), 5),
    ]);
    assert!(matches!(result, Err(StoreError::BatchFailed { index: 1, .. })));
    assert_eq!(client.get_storage_value(&key).unwrap(), b"payload".to_vec());
}

// --- Backend Failures ---

#[test]
fn test_slow_backend_times_out() {
    let (_backend, client) = test_client(
        MemoryBackend::new(MemoryBackendConfig {
            latency: Some(Duration::from_millis(200)),
            ..Default::default()
        }),
        ClientConfig {
            request_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );

    match client.current_block() {
        Err(StoreError::Backend { kind, .. }) => assert_eq!(kind, BackendFailure::Timeout),
        other => panic!("Expected timeout, got {:?}", other),
    }
}

#[test]
fn test_backend_failure_surfaces_without_retry() {
    let (backend, client) = default_client();
    backend.fail_next_call(BackendFailure::Unavailable, "connection refused");

    match client.create_entities(&[EntityCreate::new(b"x".to_vec(), 5)]) {
        Err(StoreError::Backend { kind, message }) => {
            assert_eq!(kind, BackendFailure::Unavailable);
            assert_eq!(message, "connection refused");
        }
        other => panic!("Expected backend failure, got {:?}", other),
    }
    assert_eq!(backend.entity_count(), 0);

    // The failure was one-shot; the next call goes through.
    assert_eq!(client.create_entities(&[EntityCreate::new(b"x".to_vec(), 5)]).unwrap().len(), 1);
}

// --- Shutdown ---

#[test]
fn test_calls_after_shutdown() {
    let (_backend, client) = default_client();
    let key = create_one(&client, 10);
    client.shutdown();

    assert!(matches!(client.get_entity_metadata(&key), Err(StoreError::ShutDown)));
    assert!(matches!(client.query_entities("num = 1"), Err(StoreError::ShutDown)));
    assert!(matches!(
        client.create_entities(&[EntityCreate::new(b"x".to_vec(), 5)]),
        Err(StoreError::ShutDown)
    ));
}
