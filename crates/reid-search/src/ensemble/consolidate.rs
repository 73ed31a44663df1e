//! Cross-model consolidation and visual re-ranking.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use reid_core::{ConsolidatedCandidate, Result, VisualVerifier};

use super::{EnsembleConfig, ModelRun};

struct Accumulator {
    weighted_sum: f32,
    weight_total: f32,
    plain_sum: f32,
    model_count: usize,
    display_name: Option<String>,
}

/// Group every successful run's matches by item and average them with the
/// configured per-model weights.
///
/// Matches below the configured threshold are ignored, so cascade runs (which
/// query without a threshold) contribute only real matches. Ordering is
/// similarity descending, then more contributing models first, then item id.
pub fn consolidate(runs: &[ModelRun], config: &EnsembleConfig) -> Vec<ConsolidatedCandidate> {
    let mut groups: HashMap<Uuid, Accumulator> = HashMap::new();

    for run in runs.iter().filter(|r| r.is_ok()) {
        let weight = config.weight_for(&run.model);
        for candidate in run.matches.iter().filter(|m| m.similarity >= config.threshold) {
            let acc = groups.entry(candidate.item_id).or_insert_with(|| Accumulator {
                weighted_sum: 0.0,
                weight_total: 0.0,
                plain_sum: 0.0,
                model_count: 0,
                display_name: None,
            });
            acc.weighted_sum += weight * candidate.similarity;
            acc.weight_total += weight;
            acc.plain_sum += candidate.similarity;
            acc.model_count += 1;
            if acc.display_name.is_none() {
                acc.display_name = candidate.display_name.clone();
            }
        }
    }

    let mut consolidated: Vec<ConsolidatedCandidate> = groups
        .into_iter()
        .map(|(item_id, acc)| {
            // All-zero weights degrade to a plain mean.
            let similarity = if acc.weight_total > 0.0 {
                acc.weighted_sum / acc.weight_total
            } else {
                acc.plain_sum / acc.model_count as f32
            };
            ConsolidatedCandidate {
                item_id,
                similarity,
                model_count: acc.model_count,
                display_name: acc.display_name,
                verification_score: None,
            }
        })
        .collect();

    consolidated.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.model_count.cmp(&a.model_count))
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    consolidated
}

/// Re-order the top `top_n` candidates by a visual verifier's score.
///
/// If any verification call fails, the list is returned unchanged.
pub async fn rerank(
    mut candidates: Vec<ConsolidatedCandidate>,
    crop: &[u8],
    verifier: &dyn VisualVerifier,
    top_n: usize,
) -> Vec<ConsolidatedCandidate> {
    let n = top_n.min(candidates.len());
    if n == 0 {
        return candidates;
    }

    let scores: Result<Vec<f32>> = join_all(
        candidates[..n]
            .iter()
            .map(|c| verifier.verify(crop, c.item_id)),
    )
    .await
    .into_iter()
    .collect();

    let scores = match scores {
        Ok(scores) => scores,
        Err(e) => {
            warn!(
                subsystem = "ensemble",
                component = "rerank",
                op = "verify",
                error = %e,
                "Visual verification failed, keeping consolidated order"
            );
            return candidates;
        }
    };

    for (candidate, score) in candidates[..n].iter_mut().zip(scores) {
        candidate.verification_score = Some(score);
    }
    // Stable: equal scores keep their consolidated order.
    candidates[..n].sort_by(|a, b| {
        b.verification_score
            .unwrap_or(0.0)
            .total_cmp(&a.verification_score.unwrap_or(0.0))
    });
    debug!(
        subsystem = "ensemble",
        component = "rerank",
        op = "verify",
        reranked = n,
        "Re-ranked candidates"
    );
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::MatchCandidate;
    use reid_inference::mock::MockVisualVerifier;

    fn run(model: &str, matches: &[(Uuid, f32)]) -> ModelRun {
        ModelRun {
            model: model.to_string(),
            matches: matches
                .iter()
                .map(|(item_id, similarity)| MatchCandidate {
                    item_id: *item_id,
                    model: model.to_string(),
                    similarity: *similarity,
                    display_name: Some(format!("n-{}", model)),
                    metadata: Default::default(),
                })
                .collect(),
            error: None,
            duration_ms: 0,
            embedding: None,
        }
    }

    fn candidate(item_id: Uuid, similarity: f32) -> ConsolidatedCandidate {
        ConsolidatedCandidate {
            item_id,
            similarity,
            model_count: 1,
            display_name: None,
            verification_score: None,
        }
    }

    #[test]
    fn test_weighted_average_and_ordering() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let config = EnsembleConfig::default().with_weight("m1", 3.0);
        let runs = vec![
            run("m1", &[(a, 0.9), (b, 0.8)]),
            run("m2", &[(a, 0.8)]),
        ];
        let out = consolidate(&runs, &config);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].item_id, a);
        // (3 * 0.9 + 1 * 0.8) / 4
        assert!((out[0].similarity - 0.875).abs() < 1e-5);
        assert_eq!(out[0].model_count, 2);
        assert_eq!(out[0].display_name.as_deref(), Some("n-m1"));
        assert!((out[1].similarity - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_ties_prefer_more_models() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let runs = vec![run("m1", &[(a, 0.8), (b, 0.8)]), run("m2", &[(b, 0.8)])];
        let out = consolidate(&runs, &EnsembleConfig::default());
        assert_eq!(out[0].item_id, b);
        assert_eq!(out[0].model_count, 2);
    }

    #[test]
    fn test_failed_runs_and_weak_matches_excluded() {
        let a = Uuid::new_v4();
        let mut failed = run("m1", &[(a, 0.99)]);
        failed.error = Some("boom".to_string());
        let weak = run("m2", &[(a, 0.5)]);
        assert!(consolidate(&[failed, weak], &EnsembleConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let a = Uuid::new_v4();
        let config = EnsembleConfig::default()
            .with_weight("m1", 0.0)
            .with_weight("m2", 0.0);
        let out = consolidate(&[run("m1", &[(a, 0.9)]), run("m2", &[(a, 0.8)])], &config);
        assert!((out[0].similarity - 0.85).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_rerank_reorders_top_n_only() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let candidates = vec![
            candidate(ids[0], 0.95),
            candidate(ids[1], 0.90),
            candidate(ids[2], 0.85),
            candidate(ids[3], 0.80),
        ];
        let verifier = MockVisualVerifier::new(0.1)
            .with_score(ids[1], 0.9)
            .with_score(ids[2], 0.5);

        let out = rerank(candidates, b"crop", &verifier, 3).await;
        let order: Vec<Uuid> = out.iter().map(|c| c.item_id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0], ids[3]]);
        assert_eq!(out[0].verification_score, Some(0.9));
        assert_eq!(out[3].verification_score, None);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_order() {
        let ids: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let candidates = vec![candidate(ids[0], 0.9), candidate(ids[1], 0.8)];
        let out = rerank(candidates.clone(), b"crop", &MockVisualVerifier::failing("down"), 3).await;
        assert_eq!(out, candidates);
    }
}
