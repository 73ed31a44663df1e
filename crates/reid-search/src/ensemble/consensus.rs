//! Parallel consensus: every model votes with its top match.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::debug;
use uuid::Uuid;

use reid_core::IndexFilter;

use super::{EnsembleDecision, MatchEngine, ModelRun, VoteTally};

impl MatchEngine {
    pub(super) async fn run_consensus(
        &self,
        crop: &[u8],
        filter: &IndexFilter,
    ) -> (EnsembleDecision, Vec<ModelRun>) {
        let runs = join_all(
            self.embedders
                .iter()
                .map(|e| self.run_model(e.as_ref(), crop, self.config.threshold, filter)),
        )
        .await;
        let decision = decide_consensus(&runs, self.embedders.len());
        (decision, runs)
    }
}

/// Majority vote over the top match of each successful run.
///
/// The denominator is the number of models that produced a match; a winner
/// needs strictly more than half of it, so an even split is a disagreement.
pub fn decide_consensus(runs: &[ModelRun], pool_size: usize) -> EnsembleDecision {
    let mut tallies: HashMap<Uuid, VoteTally> = HashMap::new();
    let mut voters = 0usize;

    for run in runs.iter().filter(|r| r.is_ok()) {
        let Some(top) = run.top() else { continue };
        voters += 1;
        let tally = tallies.entry(top.item_id).or_insert_with(|| VoteTally {
            item_id: top.item_id,
            display_name: top.display_name.clone(),
            votes: 0,
            mean_similarity: 0.0,
            models: Vec::new(),
        });
        // Running sum; divided below.
        tally.votes += 1;
        tally.mean_similarity += top.similarity;
        tally.models.push(run.model.clone());
    }

    if voters == 0 {
        return EnsembleDecision::NewIndividual {
            requires_verification: true,
        };
    }

    let mut ranked: Vec<VoteTally> = tallies
        .into_values()
        .map(|mut t| {
            t.mean_similarity /= t.votes as f32;
            t
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| b.mean_similarity.total_cmp(&a.mean_similarity))
            .then_with(|| a.item_id.cmp(&b.item_id))
    });

    debug!(
        subsystem = "ensemble",
        component = "consensus",
        op = "vote",
        voters,
        pool_size,
        candidates = ranked.len(),
        leader_votes = ranked[0].votes,
        "Consensus tally"
    );

    let leader = &ranked[0];
    if leader.votes * 2 > voters {
        return EnsembleDecision::Identified {
            item_id: leader.item_id,
            display_name: leader.display_name.clone(),
            confidence: leader.mean_similarity,
            vote_count: leader.votes,
            total_models: pool_size,
            deciding_model: None,
        };
    }

    ranked.truncate(2);
    EnsembleDecision::Disagreement { candidates: ranked }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{EnsembleConfig, MatchStrategy};
    use super::*;
    use crate::index::SimilarityIndex;
    use reid_core::{Embedder, MatchCandidate};
    use reid_inference::mock::MockEmbedder;
    use std::sync::Arc;

    fn run(model: &str, top: Option<(Uuid, f32)>) -> ModelRun {
        ModelRun {
            model: model.to_string(),
            matches: top
                .map(|(item_id, similarity)| {
                    vec![MatchCandidate {
                        item_id,
                        model: model.to_string(),
                        similarity,
                        display_name: None,
                        metadata: Default::default(),
                    }]
                })
                .unwrap_or_default(),
            error: None,
            duration_ms: 1,
            embedding: None,
        }
    }

    fn failed(model: &str) -> ModelRun {
        ModelRun {
            error: Some("down".to_string()),
            ..run(model, None)
        }
    }

    #[test]
    fn test_three_of_four_agree() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let runs = vec![
            run("m1", Some((a, 0.9))),
            run("m2", Some((a, 0.8))),
            run("m3", Some((a, 0.85))),
            run("m4", Some((b, 0.99))),
        ];
        match decide_consensus(&runs, 4) {
            EnsembleDecision::Identified {
                item_id,
                confidence,
                vote_count,
                total_models,
                ..
            } => {
                assert_eq!(item_id, a);
                assert_eq!(vote_count, 3);
                assert_eq!(total_models, 4);
                assert!((confidence - 0.85).abs() < 1e-5);
            }
            other => panic!("expected identified, got {:?}", other),
        }
    }

    #[test]
    fn test_even_split_is_disagreement() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let runs = vec![
            run("m1", Some((a, 0.80))),
            run("m2", Some((b, 0.90))),
            run("m3", Some((a, 0.82))),
            run("m4", Some((b, 0.88))),
        ];
        match decide_consensus(&runs, 4) {
            EnsembleDecision::Disagreement { candidates } => {
                assert_eq!(candidates.len(), 2);
                // Equal votes, higher mean first.
                assert_eq!(candidates[0].item_id, b);
                assert_eq!(candidates[0].votes, 2);
                assert!((candidates[0].mean_similarity - 0.89).abs() < 1e-5);
                assert_eq!(candidates[1].item_id, a);
            }
            other => panic!("expected disagreement, got {:?}", other),
        }
    }

    #[test]
    fn test_disagreement_keeps_top_two() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let runs = vec![
            run("m1", Some((ids[0], 0.8))),
            run("m2", Some((ids[1], 0.9))),
            run("m3", Some((ids[2], 0.85))),
        ];
        let EnsembleDecision::Disagreement { candidates } = decide_consensus(&runs, 3) else {
            panic!("expected disagreement");
        };
        assert_eq!(
            candidates.iter().map(|c| c.item_id).collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
    }

    #[test]
    fn test_denominator_counts_only_voters() {
        let a = Uuid::new_v4();
        let runs = vec![
            run("m1", Some((a, 0.9))),
            run("m2", None),
            failed("m3"),
            failed("m4"),
        ];
        match decide_consensus(&runs, 4) {
            EnsembleDecision::Identified {
                vote_count,
                total_models,
                ..
            } => assert_eq!((vote_count, total_models), (1, 4)),
            other => panic!("expected identified, got {:?}", other),
        }
    }

    #[test]
    fn test_no_votes_is_new_individual() {
        let runs = vec![run("m1", None), failed("m2")];
        assert_eq!(
            decide_consensus(&runs, 2),
            EnsembleDecision::NewIndividual {
                requires_verification: true
            }
        );
        assert_eq!(decide_consensus(&[], 0).kind(), "new_individual");
    }

    #[tokio::test]
    async fn test_engine_consensus_with_failing_model() {
        let index = Arc::new(SimilarityIndex::new());
        let raja = Uuid::new_v4();
        let kali = Uuid::new_v4();
        for model in ["m1", "m2", "m3", "m4", "m5"] {
            enroll(&index, model, raja, 1, "Raja").await;
            enroll(&index, model, kali, 2, "Kali").await;
        }
        let crop = b"crop";
        let embedders: Vec<Arc<dyn Embedder>> = vec![
            Arc::new(embedder_near("m1", crop, 1, cosine_for(0.95))),
            Arc::new(embedder_near("m2", crop, 1, cosine_for(0.90))),
            Arc::new(embedder_near("m3", crop, 1, cosine_for(0.85))),
            Arc::new(embedder_near("m4", crop, 2, cosine_for(0.97))),
            Arc::new(MockEmbedder::new("m5", DIM).failing("gpu lost")),
        ];
        let engine = MatchEngine::new(index, embedders, EnsembleConfig::default());
        let outcome = engine
            .identify_with(crop, MatchStrategy::Consensus, &IndexFilter::default())
            .await;

        match &outcome.decision {
            EnsembleDecision::Identified {
                item_id,
                vote_count,
                total_models,
                display_name,
                confidence,
                ..
            } => {
                assert_eq!(*item_id, raja);
                assert_eq!(*vote_count, 3);
                assert_eq!(*total_models, 5);
                assert_eq!(display_name.as_deref(), Some("Raja"));
                assert!((confidence - 0.90).abs() < 1e-3);
            }
            other => panic!("expected identified, got {:?}", other),
        }
        assert_eq!(outcome.runs.len(), 5);
        assert_eq!(outcome.runs.iter().filter(|r| !r.is_ok()).count(), 1);
        assert!(outcome.audit.iter().any(|a| a.contains("m5")));
    }
}
