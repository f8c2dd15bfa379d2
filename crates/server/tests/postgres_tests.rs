//! PostgreSQL integration tests using testcontainers.
//!
//! These tests cover behavior that only shows up with a pooled, multi-connection
//! backend. They require Docker to be running. Set SKIP_POSTGRES_TESTS=1 to skip.

mod common;

use common::fixtures::{distinct_hashes, new_upload};
use common::postgres_or_skip;
use std::collections::BTreeSet;
use std::sync::Arc;
use stitch_metadata::MetadataStore;
use time::OffsetDateTime;

#[tokio::test]
async fn test_postgres_concurrent_registrations_get_distinct_versions() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let store: Arc<dyn MetadataStore> = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .register_upload(&new_upload("shared.txt", &["h1", "h2"]))
                .await
                .unwrap()
                .session
                .version
        }));
    }

    let mut versions = BTreeSet::new();
    for handle in handles {
        versions.insert(handle.await.unwrap());
    }
    assert_eq!(versions, (1..=12).collect::<BTreeSet<i64>>());
}

#[tokio::test]
async fn test_postgres_concurrent_confirmations_across_sessions() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();

    let hashes = distinct_hashes(8);
    let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
    let mut uploads = Vec::new();
    for i in 0..4 {
        let upload = new_upload(&format!("file-{i}.bin"), &refs);
        store.register_upload(&upload).await.unwrap();
        uploads.push(upload.upload_id);
    }

    let mut handles = Vec::new();
    for upload_id in &uploads {
        for hash in &hashes {
            let store: Arc<dyn MetadataStore> = store.clone();
            let upload_id = *upload_id;
            let hash = hash.clone();
            handles.push(tokio::spawn(async move {
                let outcome = store
                    .confirm_chunk(upload_id, &hash, OffsetDateTime::now_utc())
                    .await
                    .unwrap();
                (upload_id, outcome.transitioned)
            }));
        }
    }

    let mut transitioned = Vec::new();
    for handle in handles {
        let (upload_id, did_transition) = handle.await.unwrap();
        if did_transition {
            transitioned.push(upload_id);
        }
    }
    transitioned.sort();
    let mut expected = uploads.clone();
    expected.sort();
    assert_eq!(transitioned, expected);
}

#[tokio::test]
async fn test_postgres_registration_is_atomic() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();

    sqlx::query(
        "CREATE FUNCTION reject_poison() RETURNS trigger AS $$ \
         BEGIN \
           IF NEW.chunk_hash = 'poison' THEN RAISE EXCEPTION 'poisoned chunk'; END IF; \
           RETURN NEW; \
         END; $$ LANGUAGE plpgsql",
    )
    .execute(metadata.pool())
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON upload_chunks \
         FOR EACH ROW EXECUTE FUNCTION reject_poison()",
    )
    .execute(metadata.pool())
    .await
    .unwrap();

    let upload = new_upload("atomic.txt", &["h1", "poison", "h3"]);
    assert!(store.register_upload(&upload).await.is_err());
    assert!(store.get_session(upload.upload_id).await.unwrap().is_none());
    assert!(store.get_chunks(upload.upload_id).await.unwrap().is_empty());

    let ok = store
        .register_upload(&new_upload("atomic.txt", &["h1"]))
        .await
        .unwrap();
    assert_eq!(ok.session.version, 1);
}

#[tokio::test]
async fn test_postgres_get_chunk_prefers_lowest_index() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();

    let upload = new_upload("dup.bin", &["x", "same", "same"]);
    store.register_upload(&upload).await.unwrap();

    let chunk = store
        .get_chunk(upload.upload_id, "same")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chunk.chunk_index, 1);
}
