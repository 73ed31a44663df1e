//! Staggered cascade: cheap models first, stop as soon as one is decisive.

use tracing::debug;

use reid_core::IndexFilter;

use super::{EnsembleDecision, MatchEngine, ModelRun};

impl MatchEngine {
    /// Stages run in configured order. Queries use a zero threshold so a
    /// stage can see, and reject on, low similarities.
    pub(super) async fn run_cascade(
        &self,
        crop: &[u8],
        filter: &IndexFilter,
        audit: &mut Vec<String>,
    ) -> (EnsembleDecision, Vec<ModelRun>) {
        let mut runs = Vec::new();

        for (position, stage) in self.config.cascade.iter().enumerate() {
            let stage_name = format!("stage {} ({})", position + 1, stage.model);

            let Some(embedder) = self.embedder(&stage.model) else {
                audit.push(format!("{} skipped: model not available", stage_name));
                continue;
            };

            let run = self.run_model(embedder.as_ref(), crop, 0.0, filter).await;
            if !run.is_ok() {
                audit.push(format!("{} skipped: model call failed", stage_name));
                runs.push(run);
                continue;
            }

            let Some(top) = run.top().cloned() else {
                audit.push(format!("{}: no match", stage_name));
                runs.push(run);
                continue;
            };
            runs.push(run);

            if top.similarity > stage.accept_threshold {
                debug!(
                    subsystem = "ensemble",
                    component = "cascade",
                    op = "accept",
                    stage = position + 1,
                    model = %stage.model,
                    similarity = top.similarity,
                    "Cascade accepted match"
                );
                return (
                    EnsembleDecision::Identified {
                        item_id: top.item_id,
                        display_name: top.display_name,
                        confidence: top.similarity,
                        vote_count: 1,
                        total_models: runs.len(),
                        deciding_model: Some(stage.model.clone()),
                    },
                    runs,
                );
            }

            if top.similarity < stage.reject_threshold {
                debug!(
                    subsystem = "ensemble",
                    component = "cascade",
                    op = "reject",
                    stage = position + 1,
                    model = %stage.model,
                    similarity = top.similarity,
                    "Cascade rejected, new individual"
                );
                return (
                    EnsembleDecision::NewIndividual {
                        requires_verification: false,
                    },
                    runs,
                );
            }

            audit.push(format!(
                "{} inconclusive at {:.3} (accept > {:.2}, reject < {:.2})",
                stage_name, top.similarity, stage.accept_threshold, stage.reject_threshold
            ));
        }

        audit.push("cascade exhausted without a decisive stage".to_string());
        (
            EnsembleDecision::NewIndividual {
                requires_verification: true,
            },
            runs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{CascadeStage, EnsembleConfig, MatchStrategy};
    use super::*;
    use crate::index::SimilarityIndex;
    use reid_core::Embedder;
    use reid_inference::mock::MockEmbedder;
    use std::sync::Arc;
    use uuid::Uuid;

    const CROP: &[u8] = b"crop";

    fn stages() -> Vec<CascadeStage> {
        vec![
            CascadeStage::new("fast", 0.90, 0.60).unwrap(),
            CascadeStage::new("mid", 0.88, 0.65).unwrap(),
            CascadeStage::new("slow", 0.85, 0.70).unwrap(),
        ]
    }

    async fn setup(item: Uuid) -> Arc<SimilarityIndex> {
        let index = Arc::new(SimilarityIndex::new());
        for model in ["fast", "mid", "slow"] {
            enroll(&index, model, item, 1, "Raja").await;
        }
        index
    }

    #[tokio::test]
    async fn test_first_stage_accepts_without_later_stages() {
        let raja = Uuid::new_v4();
        let index = setup(raja).await;
        let fast = embedder_near("fast", CROP, 1, cosine_for(0.92));
        let mid = MockEmbedder::new("mid", DIM);
        let slow = MockEmbedder::new("slow", DIM);
        let embedders: Vec<Arc<dyn Embedder>> =
            vec![Arc::new(fast), Arc::new(mid.clone()), Arc::new(slow.clone())];

        let config = EnsembleConfig::default().with_cascade(stages());
        let engine = MatchEngine::new(index, embedders, config);
        let outcome = engine
            .identify_with(CROP, MatchStrategy::Cascade, &IndexFilter::default())
            .await;

        match &outcome.decision {
            EnsembleDecision::Identified {
                item_id,
                confidence,
                deciding_model,
                total_models,
                ..
            } => {
                assert_eq!(*item_id, raja);
                assert!((confidence - 0.92).abs() < 1e-3);
                assert_eq!(deciding_model.as_deref(), Some("fast"));
                assert_eq!(*total_models, 1);
            }
            other => panic!("expected identified, got {:?}", other),
        }
        assert_eq!(mid.call_count(), 0);
        assert_eq!(slow.call_count(), 0);
        assert_eq!(outcome.runs.len(), 1);
    }

    #[tokio::test]
    async fn test_low_similarity_rejects_as_new_individual() {
        let raja = Uuid::new_v4();
        let index = setup(raja).await;
        let mid = MockEmbedder::new("mid", DIM);
        let embedders: Vec<Arc<dyn Embedder>> = vec![
            Arc::new(embedder_near("fast", CROP, 1, cosine_for(0.55))),
            Arc::new(mid.clone()),
        ];
        let config = EnsembleConfig::default().with_cascade(stages());
        let engine = MatchEngine::new(index, embedders, config);
        let outcome = engine
            .identify_with(CROP, MatchStrategy::Cascade, &IndexFilter::default())
            .await;

        assert_eq!(
            outcome.decision,
            EnsembleDecision::NewIndividual {
                requires_verification: false
            }
        );
        assert_eq!(mid.call_count(), 0);
    }

    #[tokio::test]
    async fn test_inconclusive_stages_continue_and_exhaust() {
        let raja = Uuid::new_v4();
        let index = setup(raja).await;
        let embedders: Vec<Arc<dyn Embedder>> = vec![
            Arc::new(embedder_near("fast", CROP, 1, cosine_for(0.75))),
            Arc::new(embedder_near("mid", CROP, 1, cosine_for(0.80))),
            Arc::new(embedder_near("slow", CROP, 1, cosine_for(0.80))),
        ];
        let config = EnsembleConfig::default().with_cascade(stages());
        let engine = MatchEngine::new(index, embedders, config);
        let outcome = engine
            .identify_with(CROP, MatchStrategy::Cascade, &IndexFilter::default())
            .await;

        assert_eq!(
            outcome.decision,
            EnsembleDecision::NewIndividual {
                requires_verification: true
            }
        );
        assert_eq!(outcome.runs.len(), 3);
        let inconclusive = outcome
            .audit
            .iter()
            .filter(|a| a.contains("inconclusive"))
            .count();
        assert_eq!(inconclusive, 3);
        assert!(outcome.audit.iter().any(|a| a.starts_with("stage 2 (mid)")));
    }

    #[tokio::test]
    async fn test_missing_and_failing_stages_are_skipped() {
        let raja = Uuid::new_v4();
        let index = setup(raja).await;
        // No "fast" embedder; "mid" fails; "slow" decides.
        let embedders: Vec<Arc<dyn Embedder>> = vec![
            Arc::new(MockEmbedder::new("mid", DIM).failing("oom")),
            Arc::new(embedder_near("slow", CROP, 1, cosine_for(0.9))),
        ];
        let config = EnsembleConfig::default().with_cascade(stages());
        let engine = MatchEngine::new(index, embedders, config);
        let outcome = engine
            .identify_with(CROP, MatchStrategy::Cascade, &IndexFilter::default())
            .await;

        assert_eq!(outcome.decision.identified_item(), Some(raja));
        assert!(outcome
            .audit
            .iter()
            .any(|a| a == "stage 1 (fast) skipped: model not available"));
        assert!(outcome
            .audit
            .iter()
            .any(|a| a == "stage 2 (mid) skipped: model call failed"));
        match outcome.decision {
            EnsembleDecision::Identified { total_models, .. } => assert_eq!(total_models, 2),
            _ => unreachable!(),
        }
    }
}
