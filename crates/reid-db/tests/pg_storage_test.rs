//! Integration tests for the Postgres-backed ANN store and review queue.
//!
//! **IMPORTANT**: These tests require a migrated PostgreSQL database with the
//! pgvector extension. Run with `cargo test -- --ignored`.

use reid_db::{
    l2_normalize, AnnBackend, Database, IndexFilter, ItemMetadata, NewVerificationEntry,
    StoredEmbedding, VerificationPriority, VerificationRepository, VerificationSource,
    DEFAULT_TEST_DATABASE_URL,
};
use uuid::Uuid;

async fn setup_test_db() -> Database {
    let _ = dotenvy::dotenv();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn record(model: &str, seed: f32, species: &str) -> StoredEmbedding {
    let raw: Vec<f32> = (0..768).map(|i| ((i as f32) * seed).sin() + 1.5).collect();
    StoredEmbedding {
        item_id: Uuid::new_v4(),
        model: model.to_string(),
        content_hash: None,
        vector: l2_normalize(&raw),
        metadata: ItemMetadata {
            display_name: Some(format!("individual-{}", seed)),
            species: Some(species.to_string()),
            location: None,
        },
    }
}

#[tokio::test]
#[ignore]
async fn test_ann_upsert_and_nearest() {
    let db = setup_test_db().await;
    let model = format!("test-model-{}", Uuid::new_v4());

    let a = record(&model, 0.1, "Panthera tigris");
    let b = record(&model, 0.7, "Panthera tigris");
    db.embeddings.upsert(&a).await.unwrap();
    db.embeddings.upsert(&b).await.unwrap();
    // Upsert of the same key replaces rather than duplicates.
    db.embeddings.upsert(&a).await.unwrap();

    let hits = db
        .embeddings
        .nearest(&model, &a.vector, 5, None, &IndexFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, a.item_id);
    assert!(hits[0].1 < 1e-4);

    let excluded = db
        .embeddings
        .nearest(&model, &a.vector, 5, Some(a.item_id), &IndexFilter::default())
        .await
        .unwrap();
    assert!(excluded.iter().all(|(id, _)| *id != a.item_id));

    let filtered = db
        .embeddings
        .nearest(&model, &a.vector, 5, None, &IndexFilter::species("lynx lynx"))
        .await
        .unwrap();
    assert!(filtered.is_empty());

    let all = db.embeddings.load_all().await.unwrap();
    let loaded = all.iter().find(|r| r.item_id == a.item_id).unwrap();
    assert_eq!(loaded.vector.len(), 768);
    assert_eq!(loaded.metadata, a.metadata);
}

#[tokio::test]
#[ignore]
async fn test_verification_enqueue_dedup() {
    let db = setup_test_db().await;
    let entity = Uuid::new_v4();
    let request = NewVerificationEntry {
        entity_type: "individual".to_string(),
        entity_id: entity,
        investigation_id: Some(Uuid::new_v4()),
        source: VerificationSource::AutoDiscovery,
        priority: VerificationPriority::High,
        notes: Some("integration test".to_string()),
    };

    let first = db
        .verification
        .insert_if_absent(request.clone())
        .await
        .unwrap();
    let second = db.verification.insert_if_absent(request).await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);

    let entry = db.verification.get(first.id).await.unwrap().unwrap();
    assert!(entry.requires_review);
    assert_eq!(entry.priority, VerificationPriority::High);
}
