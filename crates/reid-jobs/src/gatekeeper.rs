//! Verification gatekeeper: routes uncertain results to human review.
//!
//! Every entry is created pending with mandatory review; nothing is ever
//! auto-approved. Enqueueing is idempotent per `(entity_type, entity_id)`
//! while an open entry exists, so retries and concurrent investigations of
//! the same observation collapse onto one queue item.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use uuid::Uuid;

use reid_core::defaults::{VERIFY_HIGH_CONFIDENCE, VERIFY_MEDIUM_CONFIDENCE};
use reid_core::{
    Enqueued, Error, NewVerificationEntry, Result, VerificationEntry, VerificationPriority,
    VerificationRepository, VerificationSource,
};

/// Entity type for a subject no known individual matched.
pub const ENTITY_INDIVIDUAL: &str = "individual";
/// Entity type for a subject the models could not agree on.
pub const ENTITY_DISAGREEMENT: &str = "disagreement";

/// Review priority for an observation.
///
/// User uploads are always medium. Auto-discovered observations are ranked by
/// detection confidence.
pub fn derive_priority(
    source: VerificationSource,
    detection_confidence: f32,
) -> VerificationPriority {
    match source {
        VerificationSource::UserUpload => VerificationPriority::Medium,
        VerificationSource::AutoDiscovery if detection_confidence >= VERIFY_HIGH_CONFIDENCE => {
            VerificationPriority::High
        }
        VerificationSource::AutoDiscovery if detection_confidence >= VERIFY_MEDIUM_CONFIDENCE => {
            VerificationPriority::Medium
        }
        VerificationSource::AutoDiscovery => VerificationPriority::Low,
    }
}

/// Enqueues review entries through a [`VerificationRepository`].
#[derive(Clone)]
pub struct Gatekeeper {
    repo: Arc<dyn VerificationRepository>,
}

impl Gatekeeper {
    pub fn new(repo: Arc<dyn VerificationRepository>) -> Self {
        Self { repo }
    }

    /// Queue an entity for review and return the open entry's id.
    pub async fn enqueue(&self, entry: NewVerificationEntry) -> Result<Enqueued> {
        if entry.entity_type.trim().is_empty() {
            return Err(Error::InvalidInput(
                "verification entity type must not be empty".to_string(),
            ));
        }
        let start = Instant::now();
        let entity_type = entry.entity_type.clone();
        let entity_id = entry.entity_id;
        let priority = entry.priority;

        let enqueued = self.repo.insert_if_absent(entry).await?;

        if enqueued.created {
            info!(
                subsystem = "gatekeeper",
                component = "queue",
                op = "enqueue",
                queue_id = %enqueued.id,
                entity_type = %entity_type,
                entity_id = %entity_id,
                priority = %priority,
                duration_ms = start.elapsed().as_millis() as u64,
                "Queued for human review"
            );
        } else {
            debug!(
                subsystem = "gatekeeper",
                component = "queue",
                op = "enqueue",
                queue_id = %enqueued.id,
                entity_type = %entity_type,
                entity_id = %entity_id,
                "Open review entry already exists"
            );
        }
        Ok(enqueued)
    }

    /// Convenience wrapper deriving the priority from source and confidence.
    pub async fn enqueue_observation(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        investigation_id: Option<Uuid>,
        source: VerificationSource,
        detection_confidence: f32,
        notes: Option<String>,
    ) -> Result<(Enqueued, VerificationPriority)> {
        let priority = derive_priority(source, detection_confidence);
        let enqueued = self
            .enqueue(NewVerificationEntry {
                entity_type: entity_type.to_string(),
                entity_id,
                investigation_id,
                source,
                priority,
                notes,
            })
            .await?;
        Ok((enqueued, priority))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<VerificationEntry>> {
        self.repo.get(id).await
    }

    /// Open entries, highest priority first.
    pub async fn pending(&self, limit: i64) -> Result<Vec<VerificationEntry>> {
        self.repo.list_pending(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::VerificationStatus;
    use reid_db::MemoryVerificationRepository;

    fn gatekeeper() -> Gatekeeper {
        Gatekeeper::new(Arc::new(MemoryVerificationRepository::new()))
    }

    #[test]
    fn test_priority_derivation() {
        use VerificationPriority::*;
        use VerificationSource::*;
        assert_eq!(derive_priority(UserUpload, 0.99), Medium);
        assert_eq!(derive_priority(UserUpload, 0.10), Medium);
        assert_eq!(derive_priority(AutoDiscovery, 0.95), High);
        assert_eq!(derive_priority(AutoDiscovery, 0.94), Medium);
        assert_eq!(derive_priority(AutoDiscovery, 0.85), Medium);
        assert_eq!(derive_priority(AutoDiscovery, 0.84), Low);
    }

    #[tokio::test]
    async fn test_enqueue_twice_returns_same_id() {
        let gk = gatekeeper();
        let entity = Uuid::new_v4();

        let (first, _) = gk
            .enqueue_observation(
                ENTITY_INDIVIDUAL,
                entity,
                Some(Uuid::new_v4()),
                VerificationSource::UserUpload,
                0.9,
                None,
            )
            .await
            .unwrap();
        let (second, _) = gk
            .enqueue_observation(
                ENTITY_INDIVIDUAL,
                entity,
                Some(Uuid::new_v4()),
                VerificationSource::AutoDiscovery,
                0.99,
                Some("rescan".to_string()),
            )
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(gk.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entity_type_is_part_of_dedup_key() {
        let gk = gatekeeper();
        let entity = Uuid::new_v4();
        let source = VerificationSource::UserUpload;
        let (a, _) = gk
            .enqueue_observation(ENTITY_INDIVIDUAL, entity, None, source, 0.9, None)
            .await
            .unwrap();
        let (b, _) = gk
            .enqueue_observation(ENTITY_DISAGREEMENT, entity, None, source, 0.9, None)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_entries_pending_with_mandatory_review() {
        let gk = gatekeeper();
        let (enqueued, priority) = gk
            .enqueue_observation(
                ENTITY_INDIVIDUAL,
                Uuid::new_v4(),
                None,
                VerificationSource::AutoDiscovery,
                0.97,
                None,
            )
            .await
            .unwrap();
        assert_eq!(priority, VerificationPriority::High);

        let entry = gk.get(enqueued.id).await.unwrap().unwrap();
        assert_eq!(entry.status, VerificationStatus::Pending);
        assert!(entry.requires_review);
        assert_eq!(entry.priority, VerificationPriority::High);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_single_entry() {
        let gk = gatekeeper();
        let entity = Uuid::new_v4();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gk = gk.clone();
                tokio::spawn(async move {
                    gk.enqueue_observation(
                        ENTITY_INDIVIDUAL,
                        entity,
                        None,
                        VerificationSource::UserUpload,
                        0.9,
                        None,
                    )
                    .await
                    .unwrap()
                    .0
                    .id
                })
            })
            .collect();
        let ids: Vec<Uuid> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(gk.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_entity_type_rejected() {
        let err = gatekeeper()
            .enqueue(NewVerificationEntry {
                entity_type: " ".to_string(),
                entity_id: Uuid::new_v4(),
                investigation_id: None,
                source: VerificationSource::UserUpload,
                priority: VerificationPriority::Low,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
