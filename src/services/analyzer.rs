use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::statistics::{
    difference_interval, proportion_interval, two_proportion_z_test, ConfidenceInterval,
};
use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{
        Experiment, ExperimentAssignment, ExperimentInteractionRecord, ExperimentStatus, CONTROL,
        TREATMENT,
    },
    store::ExperimentStore,
};

/// Aggregated outcome for one variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantResult {
    pub variant: String,
    pub participant_count: u64,
    pub interaction_count: u64,
    /// Conversion interactions, counting repeats
    pub conversion_count: u64,
    /// Participants with at least one conversion
    pub converted_participants: u64,
    /// `converted_participants / participant_count` capped at 1, 0 without participants
    pub conversion_rate: f64,
    pub average_value: Option<f64>,
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentResults {
    pub experiment_id: Uuid,
    pub experiment_name: String,
    pub status: ExperimentStatus,
    pub confidence_level: f64,
    pub total_participants: u64,
    pub variants: Vec<VariantResult>,
}

impl ExperimentResults {
    pub fn variant(&self, name: &str) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.variant == name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Positive,
    Negative,
    Neutral,
}

/// Two-proportion z-test between the control and the treatment variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignificanceResult {
    pub experiment_id: Uuid,
    pub control_variant: String,
    pub treatment_variant: String,
    pub control_rate: f64,
    pub treatment_rate: f64,
    /// `(control_rate - treatment_rate) / pooled_se`
    pub z_score: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub confidence_level: f64,
    /// Direction of treatment relative to control
    pub effect: Effect,
    /// Interval for `treatment_rate - control_rate`
    pub difference_interval: ConfidenceInterval,
}

/// Turns assignments and experiment interactions into per-variant statistics
#[derive(Clone)]
pub struct ExperimentAnalyzer {
    store: Arc<dyn ExperimentStore>,
    confidence_level: f64,
}

impl ExperimentAnalyzer {
    pub fn new(store: Arc<dyn ExperimentStore>, confidence_level: f64) -> Self {
        Self {
            store,
            confidence_level,
        }
    }

    pub async fn results(
        &self,
        ctx: &RequestContext,
        experiment_id: Uuid,
    ) -> AppResult<ExperimentResults> {
        let experiment = ctx
            .run("get_experiment", self.store.get_experiment(experiment_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;

        let assignments = ctx
            .run("list_assignments", self.store.list_assignments(experiment_id))
            .await?;
        let records = ctx
            .run(
                "list_experiment_interactions",
                self.store.list_experiment_interactions(experiment_id),
            )
            .await?;

        Ok(aggregate(
            &experiment,
            &assignments,
            &records,
            self.confidence_level,
        ))
    }

    /// Fails with `InsufficientData` unless two variants have participants
    pub async fn significance(
        &self,
        ctx: &RequestContext,
        experiment_id: Uuid,
    ) -> AppResult<SignificanceResult> {
        let results = self.results(ctx, experiment_id).await?;
        let populated: Vec<&VariantResult> = results
            .variants
            .iter()
            .filter(|v| v.participant_count > 0)
            .collect();

        let [control, treatment, ..] = populated.as_slice() else {
            return Err(AppError::InsufficientData(format!(
                "experiment {} needs participants in two variants, found {}",
                experiment_id,
                populated.len()
            )));
        };

        let test = two_proportion_z_test(
            control.conversion_rate,
            control.participant_count,
            treatment.conversion_rate,
            treatment.participant_count,
        );

        let effect = if treatment.conversion_rate > control.conversion_rate {
            Effect::Positive
        } else if treatment.conversion_rate < control.conversion_rate {
            Effect::Negative
        } else {
            Effect::Neutral
        };

        let result = SignificanceResult {
            experiment_id,
            control_variant: control.variant.clone(),
            treatment_variant: treatment.variant.clone(),
            control_rate: control.conversion_rate,
            treatment_rate: treatment.conversion_rate,
            z_score: test.z_score,
            p_value: test.p_value,
            is_significant: test.p_value < 1.0 - self.confidence_level,
            confidence_level: self.confidence_level,
            effect,
            difference_interval: difference_interval(
                control.conversion_rate,
                control.participant_count,
                treatment.conversion_rate,
                treatment.participant_count,
                self.confidence_level,
            ),
        };

        tracing::info!(
            experiment_id = %experiment_id,
            z_score = result.z_score,
            p_value = result.p_value,
            significant = result.is_significant,
            "Significance computed"
        );
        Ok(result)
    }
}

/// Pure aggregation over a snapshot of assignments and measurements
///
/// Control comes first, then treatment, then any other label in order of its
/// first appearance. Each record counts under the variant it was tagged with
/// when it was written, not the user's current assignment. Records from users
/// never assigned to the experiment are ignored.
pub fn aggregate(
    experiment: &Experiment,
    assignments: &[ExperimentAssignment],
    records: &[ExperimentInteractionRecord],
    confidence_level: f64,
) -> ExperimentResults {
    let mut order: Vec<String> = vec![CONTROL.to_string(), TREATMENT.to_string()];
    let labels = assignments
        .iter()
        .map(|a| &a.variant)
        .chain(records.iter().map(|r| &r.variant));
    for label in labels {
        if !order.contains(label) {
            order.push(label.clone());
        }
    }

    let assigned: HashMap<&str, &str> = assignments
        .iter()
        .map(|a| (a.user_id.as_str(), a.variant.as_str()))
        .collect();

    let variants = order
        .into_iter()
        .map(|variant| {
            let participant_count = assigned.values().filter(|v| **v == variant).count() as u64;

            let rows: Vec<&ExperimentInteractionRecord> = records
                .iter()
                .filter(|r| r.variant == variant && assigned.contains_key(r.user_id.as_str()))
                .collect();

            let conversions: Vec<&&ExperimentInteractionRecord> = rows
                .iter()
                .filter(|r| r.interaction_type.is_conversion())
                .collect();
            let converted: HashSet<&str> =
                conversions.iter().map(|r| r.user_id.as_str()).collect();

            let values: Vec<f64> = rows.iter().filter_map(|r| r.value).collect();
            let average_value = if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            };

            let conversion_rate = if participant_count == 0 {
                0.0
            } else {
                (converted.len() as f64 / participant_count as f64).min(1.0)
            };

            VariantResult {
                participant_count,
                interaction_count: rows.len() as u64,
                conversion_count: conversions.len() as u64,
                converted_participants: converted.len() as u64,
                conversion_rate,
                average_value,
                confidence_interval: proportion_interval(
                    conversion_rate,
                    participant_count,
                    confidence_level,
                ),
                variant,
            }
        })
        .collect();

    ExperimentResults {
        experiment_id: experiment.id,
        experiment_name: experiment.name.clone(),
        status: experiment.status,
        confidence_level,
        total_participants: assignments.len() as u64,
        variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{InteractionType, NewExperiment},
        store::MemoryStore,
    };
    use chrono::Utc;

    fn experiment() -> Experiment {
        let mut experiment = NewExperiment {
            name: "ranking".to_string(),
            description: String::new(),
            algorithm: "content".to_string(),
            parameters: HashMap::new(),
            target_percentage: 50.0,
            success_metrics: vec![],
        }
        .into_experiment(Utc::now());
        experiment.status = ExperimentStatus::Active;
        experiment
    }

    fn record(
        experiment_id: Uuid,
        user_id: &str,
        variant: &str,
        kind: InteractionType,
    ) -> ExperimentInteractionRecord {
        ExperimentInteractionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            experiment_id,
            variant: variant.to_string(),
            interaction_type: kind,
            value: None,
            item_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// `users` participants per variant, of whom the first `converted` convert
    async fn seed(
        store: &MemoryStore,
        experiment_id: Uuid,
        variant: &str,
        users: usize,
        converted: usize,
    ) {
        for n in 0..users {
            let user = format!("{}-{}", variant, n);
            store
                .upsert_assignment(&user, experiment_id, variant)
                .await
                .unwrap();
            store
                .append_experiment_interaction(&record(
                    experiment_id,
                    &user,
                    variant,
                    InteractionType::View,
                ))
                .await
                .unwrap();
            if n < converted {
                store
                    .append_experiment_interaction(&record(
                        experiment_id,
                        &user,
                        variant,
                        InteractionType::Complete,
                    ))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_results_and_significance() {
        let store = MemoryStore::new();
        let experiment = experiment();
        store.insert_experiment(&experiment).await.unwrap();
        seed(&store, experiment.id, CONTROL, 100, 20).await;
        seed(&store, experiment.id, TREATMENT, 100, 35).await;

        let analyzer = ExperimentAnalyzer::new(Arc::new(store), 0.95);
        let ctx = RequestContext::new();

        let results = analyzer.results(&ctx, experiment.id).await.unwrap();
        let control = results.variant(CONTROL).unwrap();
        let treatment = results.variant(TREATMENT).unwrap();
        assert_eq!(results.total_participants, 200);
        assert_eq!(control.participant_count, 100);
        assert_eq!(control.interaction_count, 120);
        assert_eq!(control.conversion_count, 20);
        assert!((control.conversion_rate - 0.20).abs() < 1e-12);
        assert!((treatment.conversion_rate - 0.35).abs() < 1e-12);

        let significance = analyzer.significance(&ctx, experiment.id).await.unwrap();
        assert_eq!(significance.effect, Effect::Positive);
        assert!(significance.p_value < 0.05);
        assert!(significance.is_significant);
        assert!(significance.z_score < 0.0);
    }

    #[tokio::test]
    async fn test_significance_needs_two_populated_variants() {
        let store = MemoryStore::new();
        let experiment = experiment();
        store.insert_experiment(&experiment).await.unwrap();
        seed(&store, experiment.id, CONTROL, 10, 2).await;

        let analyzer = ExperimentAnalyzer::new(Arc::new(store), 0.95);
        let result = analyzer
            .significance(&RequestContext::new(), experiment.id)
            .await;
        assert!(matches!(result, Err(AppError::InsufficientData(_))));
    }

    #[tokio::test]
    async fn test_unknown_experiment() {
        let analyzer = ExperimentAnalyzer::new(Arc::new(MemoryStore::new()), 0.95);
        let result = analyzer
            .results(&RequestContext::new(), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_repeat_conversions_do_not_inflate_rate() {
        let experiment = experiment();
        let assignments = vec![ExperimentAssignment {
            user_id: "u1".to_string(),
            experiment_id: experiment.id,
            variant: CONTROL.to_string(),
            assigned_at: Utc::now(),
        }];
        let records: Vec<_> = (0..3)
            .map(|_| record(experiment.id, "u1", CONTROL, InteractionType::Like))
            .chain(std::iter::once(record(
                experiment.id,
                "stranger",
                CONTROL,
                InteractionType::Like,
            )))
            .collect();

        let results = aggregate(&experiment, &assignments, &records, 0.95);
        let control = results.variant(CONTROL).unwrap();
        assert_eq!(control.conversion_count, 3);
        assert_eq!(control.conversion_rate, 1.0);
        assert_eq!(results.variant(TREATMENT).unwrap().participant_count, 0);
    }

    #[test]
    fn test_records_count_under_their_tagged_variant() {
        let experiment = experiment();
        let assignments = vec![ExperimentAssignment {
            user_id: "u1".to_string(),
            experiment_id: experiment.id,
            variant: CONTROL.to_string(),
            assigned_at: Utc::now(),
        }];
        let records = vec![record(experiment.id, "u1", TREATMENT, InteractionType::Like)];

        let results = aggregate(&experiment, &assignments, &records, 0.95);
        let control = results.variant(CONTROL).unwrap();
        let treatment = results.variant(TREATMENT).unwrap();
        assert_eq!(control.participant_count, 1);
        assert_eq!(control.interaction_count, 0);
        assert_eq!(control.conversion_rate, 0.0);
        assert_eq!(treatment.participant_count, 0);
        assert_eq!(treatment.interaction_count, 1);
        assert_eq!(treatment.conversion_count, 1);
        assert_eq!(treatment.conversion_rate, 0.0);
    }

    #[test]
    fn test_swapping_variants_flips_z_sign() {
        let experiment = experiment();
        let build = |first: &str, second: &str| {
            let mut assignments = Vec::new();
            let mut records = Vec::new();
            for n in 0..50 {
                for (variant, converts) in [(first, n < 10), (second, n < 25)] {
                    let user = format!("{}-{}", variant, n);
                    assignments.push(ExperimentAssignment {
                        user_id: user.clone(),
                        experiment_id: experiment.id,
                        variant: variant.to_string(),
                        assigned_at: Utc::now(),
                    });
                    if converts {
                        records.push(record(experiment.id, &user, variant, InteractionType::Click));
                    }
                }
            }
            aggregate(&experiment, &assignments, &records, 0.95)
        };

        let forward = build(CONTROL, TREATMENT);
        let backward = build(TREATMENT, CONTROL);
        let z = |r: &ExperimentResults| {
            let c = r.variant(CONTROL).unwrap();
            let t = r.variant(TREATMENT).unwrap();
            two_proportion_z_test(
                c.conversion_rate,
                c.participant_count,
                t.conversion_rate,
                t.participant_count,
            )
        };
        let a = z(&forward);
        let b = z(&backward);
        assert!((a.z_score + b.z_score).abs() < 1e-12);
        assert!((a.p_value - b.p_value).abs() < 1e-12);
    }
}
