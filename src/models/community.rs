//! Community training: a single expectation-propagation run.
//!
//! `CommunityTrainingAlgorithm` wraps one inference run over one batch
//! of rating observations. The outer training loop owns cross-batch
//! bookkeeping; this type owns the factor graph of a single batch:
//! per-observation trait products, the affinity sum, and the noisy
//! ordinal threshold comparisons that tie the latent score to the
//! observed rating level.

use std::f64;
use std::sync::Arc;

use ndarray::{Array1, Array2};

use data::RatingBatch;
use features::SparseFeatureMatrix;
use gaussian::{self, Gaussian};
use models::parameters::{FeatureParameterDistribution, InstanceMetadata, ParameterDistributions};
use models::{
    FeatureHyperparameters, ItemHyperparameters, NoiseHyperparameters, UserHyperparameters,
};

/// Message-passing rounds used to stabilize feature-weight marginals
/// when they take part in inference. A tunable default rather than a
/// derived value.
pub const FEATURE_WEIGHT_ROUNDS: usize = 6;

/// The prior means of the ordinal rating thresholds.
///
/// The first threshold sits at negative infinity and the last at
/// positive infinity; interior thresholds are evenly spaced around
/// zero. This encoding lets a rating observation decompose into two
/// greater-than comparisons against adjacent thresholds.
pub fn user_threshold_prior_means(threshold_count: usize) -> Vec<f64> {
    assert!(
        threshold_count >= 2,
        "at least two thresholds are required"
    );

    (0..threshold_count)
        .map(|index| {
            if index == 0 {
                f64::NEG_INFINITY
            } else if index == threshold_count - 1 {
                f64::INFINITY
            } else {
                index as f64 - (threshold_count / 2) as f64 + 0.5
            }
        })
        .collect()
}

/// The multiplicative contribution of a single observation to each of
/// the beliefs it touches.
#[derive(Clone, Debug)]
struct ObservationMessages {
    user_traits: Vec<Gaussian>,
    item_traits: Vec<Gaussian>,
    user_bias: Gaussian,
    item_bias: Gaussian,
    lower_threshold: Gaussian,
    upper_threshold: Gaussian,
}

impl ObservationMessages {
    fn uniform(trait_count: usize) -> Self {
        ObservationMessages {
            user_traits: vec![Gaussian::uniform(); trait_count],
            item_traits: vec![Gaussian::uniform(); trait_count],
            user_bias: Gaussian::uniform(),
            item_bias: Gaussian::uniform(),
            lower_threshold: Gaussian::uniform(),
            upper_threshold: Gaussian::uniform(),
        }
    }
}

/// One expectation-propagation run over one batch of observations.
#[derive(Debug)]
pub struct CommunityTrainingAlgorithm {
    sweep_count: usize,
    trait_count: usize,
    shared_user_thresholds: bool,
    noise: NoiseHyperparameters,
    user_hyper: UserHyperparameters,
    item_hyper: ItemHyperparameters,
    feature_hyper: FeatureHyperparameters,
    metadata: Option<Arc<InstanceMetadata>>,
    prior: Option<ParameterDistributions>,
    instance: Option<RatingBatch>,
    constraints: Option<ParameterDistributions>,
    initializers: Option<ParameterDistributions>,
    marginals: Option<ParameterDistributions>,
}

impl CommunityTrainingAlgorithm {
    /// Build an algorithm instance.
    pub fn new(
        sweep_count: usize,
        trait_count: usize,
        shared_user_thresholds: bool,
        noise: NoiseHyperparameters,
        user_hyper: UserHyperparameters,
        item_hyper: ItemHyperparameters,
        feature_hyper: FeatureHyperparameters,
    ) -> Self {
        assert!(sweep_count > 0, "sweep count must be positive");
        assert!(trait_count > 0, "trait count must be positive");

        CommunityTrainingAlgorithm {
            sweep_count: sweep_count,
            trait_count: trait_count,
            shared_user_thresholds: shared_user_thresholds,
            noise: noise,
            user_hyper: user_hyper,
            item_hyper: item_hyper,
            feature_hyper: feature_hyper,
            metadata: None,
            prior: None,
            instance: None,
            constraints: None,
            initializers: None,
            marginals: None,
        }
    }

    /// Set the instance metadata and rebuild the prior beliefs it
    /// implies. Clears any state left over from a previous run.
    pub fn set_observed_metadata(&mut self, metadata: Arc<InstanceMetadata>) {
        let mut prior = ParameterDistributions::uniform(&metadata, self.trait_count);

        for belief in prior.user_traits.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.user_hyper.trait_variance);
        }
        for belief in prior.user_biases.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.user_hyper.bias_variance);
        }

        let threshold_means = user_threshold_prior_means(metadata.num_rating_levels() + 1);

        for mut row in prior.user_thresholds.genrows_mut() {
            for (belief, &mean) in row.iter_mut().zip(threshold_means.iter()) {
                *belief = if mean.is_infinite() {
                    Gaussian::point_mass(mean)
                } else {
                    Gaussian::from_mean_and_variance(mean, self.user_hyper.threshold_prior_variance)
                };
            }
        }

        for belief in prior.item_traits.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.item_hyper.trait_variance);
        }
        for belief in prior.item_biases.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.item_hyper.bias_variance);
        }

        for belief in prior.user_features.trait_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.trait_weight_variance);
        }
        for belief in prior.user_features.bias_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.bias_weight_variance);
        }
        for belief in prior.item_features.trait_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.trait_weight_variance);
        }
        for belief in prior.item_features.bias_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.bias_weight_variance);
        }

        self.metadata = Some(metadata);
        self.prior = Some(prior);
        self.instance = None;
        self.constraints = None;
        self.initializers = None;
        self.marginals = None;
    }

    /// Set the batch of observations for this run.
    pub fn set_observed_instance_data(&mut self, batch: RatingBatch) {
        self.instance = Some(batch);
        self.marginals = None;
    }

    /// Set the messages from the rest of the graph. These are
    /// multiplied into the prior so this batch sees the combined
    /// evidence of its peers without its own past contribution.
    pub fn constrain_entity_parameters(&mut self, constraints: ParameterDistributions) {
        self.constraints = Some(constraints);
    }

    /// Seed the first sweep's belief context so a restarted run
    /// converges consistently instead of starting from scratch.
    pub fn initialize_entity_parameters(&mut self, initializers: ParameterDistributions) {
        self.initializers = Some(initializers);
    }

    /// Run the configured number of sweeps and return the updated
    /// marginals. Feature-weight marginals are computed only on
    /// request: they need several extra message rounds to stabilize.
    pub fn infer_parameters(&mut self, infer_features: bool) -> ParameterDistributions {
        let metadata = self
            .metadata
            .clone()
            .expect("set_observed_metadata must be called before inference");
        let batch = self
            .instance
            .take()
            .expect("set_observed_instance_data must be called before inference");
        let prior = self.prior.clone().expect("prior follows metadata");

        let mut base = prior.clone();
        if let Some(ref constraints) = self.constraints {
            base.set_entity_parameters_to_product(&prior, constraints);
        }

        let mut current = match self.initializers {
            Some(ref initializers) => {
                let neutral = ParameterDistributions::uniform(&metadata, self.trait_count);
                let mut context = base.clone();
                context.set_entity_parameters_to_product(
                    initializers,
                    self.constraints.as_ref().unwrap_or(&neutral),
                );
                context
            }
            None => base.clone(),
        };

        let mut messages = vec![ObservationMessages::uniform(self.trait_count); batch.len()];

        for _ in 0..self.sweep_count {
            for (message, &user_id, &item_id, &value) in izip!(
                messages.iter_mut(),
                &batch.user_ids,
                &batch.item_ids,
                &batch.values
            ) {
                self.update_observation(&mut current, message, user_id, item_id, value);
            }

            current = self.accumulate_marginals(&base, &batch, &messages);
        }

        if infer_features {
            current.user_features = self.infer_feature_weights(
                &current.user_traits,
                &current.user_biases,
                metadata.user_features(),
                self.user_hyper.trait_variance,
                self.user_hyper.bias_variance,
            );
            current.item_features = self.infer_feature_weights(
                &current.item_traits,
                &current.item_biases,
                metadata.item_features(),
                self.item_hyper.trait_variance,
                self.item_hyper.bias_variance,
            );
        }

        self.marginals = Some(current.clone());

        current
    }

    /// The information this run contributed beyond its starting
    /// point: each entity array's marginal divided by its prior.
    /// Requires `infer_parameters` to have run; performs no inference
    /// itself.
    pub fn output_messages(&self) -> ParameterDistributions {
        let marginals = self
            .marginals
            .as_ref()
            .expect("infer_parameters must be called before output messages");
        let prior = self.prior.as_ref().expect("prior follows metadata");
        let metadata = self.metadata.as_ref().expect("metadata must be set");

        let mut output = ParameterDistributions::uniform(metadata, self.trait_count);
        output.set_entity_parameters_to_ratio(marginals, prior, false);

        output
    }

    fn update_observation(
        &self,
        current: &mut ParameterDistributions,
        messages: &mut ObservationMessages,
        user_id: usize,
        item_id: usize,
        value: usize,
    ) {
        let threshold_row = if self.shared_user_thresholds { 0 } else { user_id };
        let lower_index = value;
        let upper_index = value + 1;

        let user_traits_cavity: Vec<Gaussian> = (0..self.trait_count)
            .map(|k| cavity(&current.user_traits[[user_id, k]], &messages.user_traits[k]))
            .collect();
        let item_traits_cavity: Vec<Gaussian> = (0..self.trait_count)
            .map(|k| cavity(&current.item_traits[[item_id, k]], &messages.item_traits[k]))
            .collect();
        let user_bias_cavity = cavity(&current.user_biases[user_id], &messages.user_bias);
        let item_bias_cavity = cavity(&current.item_biases[item_id], &messages.item_bias);
        let lower_cavity = cavity(
            &current.user_thresholds[[threshold_row, lower_index]],
            &messages.lower_threshold,
        );
        let upper_cavity = cavity(
            &current.user_thresholds[[threshold_row, upper_index]],
            &messages.upper_threshold,
        );

        let product_moments: Vec<(f64, f64)> = user_traits_cavity
            .iter()
            .zip(item_traits_cavity.iter())
            .map(|(user_trait, item_trait)| product_moments(user_trait, item_trait))
            .collect();

        let mut affinity_mean = user_bias_cavity.mean() + item_bias_cavity.mean();
        let mut affinity_variance = user_bias_cavity.variance() + item_bias_cavity.variance();

        for &(mean, variance) in &product_moments {
            affinity_mean += mean;
            affinity_variance += variance;
        }

        let score_mean = affinity_mean;
        let score_variance = affinity_variance + self.noise.affinity_variance;

        // The rating observation as two one-sided comparisons: the
        // noisy score exceeds the lower threshold and falls short of
        // the upper one.
        let (lower_score_message, lower_threshold_message) =
            self.comparison_messages(score_mean, score_variance, &lower_cavity, true);
        let (upper_score_message, upper_threshold_message) =
            self.comparison_messages(score_mean, score_variance, &upper_cavity, false);

        apply_update(
            &mut current.user_thresholds[[threshold_row, lower_index]],
            &mut messages.lower_threshold,
            &lower_cavity,
            lower_threshold_message,
        );
        apply_update(
            &mut current.user_thresholds[[threshold_row, upper_index]],
            &mut messages.upper_threshold,
            &upper_cavity,
            upper_threshold_message,
        );

        let score_message = lower_score_message.product(&upper_score_message);

        if score_message.is_uniform() {
            return;
        }

        let score_message_mean = score_message.mean();
        let score_message_variance = score_message.variance() + self.noise.affinity_variance;

        for k in 0..self.trait_count {
            let (product_mean, product_variance) = product_moments[k];

            let product_message = moment_message(
                score_message_mean - (affinity_mean - product_mean),
                score_message_variance + (affinity_variance - product_variance),
            );

            let user_trait_message = product_backward(&product_message, &item_traits_cavity[k]);
            let item_trait_message = product_backward(&product_message, &user_traits_cavity[k]);

            apply_update(
                &mut current.user_traits[[user_id, k]],
                &mut messages.user_traits[k],
                &user_traits_cavity[k],
                user_trait_message,
            );
            apply_update(
                &mut current.item_traits[[item_id, k]],
                &mut messages.item_traits[k],
                &item_traits_cavity[k],
                item_trait_message,
            );
        }

        let user_bias_message = moment_message(
            score_message_mean - (affinity_mean - user_bias_cavity.mean()),
            score_message_variance + (affinity_variance - user_bias_cavity.variance()),
        );
        let item_bias_message = moment_message(
            score_message_mean - (affinity_mean - item_bias_cavity.mean()),
            score_message_variance + (affinity_variance - item_bias_cavity.variance()),
        );

        apply_update(
            &mut current.user_biases[user_id],
            &mut messages.user_bias,
            &user_bias_cavity,
            user_bias_message,
        );
        apply_update(
            &mut current.item_biases[item_id],
            &mut messages.item_bias,
            &item_bias_cavity,
            item_bias_message,
        );
    }

    /// Messages from one noisy greater-than comparison between the
    /// latent score and a threshold. `score_above` selects which side
    /// of the comparison the score sits on. A comparison against an
    /// infinite threshold is vacuous and contributes nothing.
    fn comparison_messages(
        &self,
        score_mean: f64,
        score_variance: f64,
        threshold: &Gaussian,
        score_above: bool,
    ) -> (Gaussian, Gaussian) {
        if threshold.is_point_mass() && threshold.mean().is_infinite() {
            return (Gaussian::uniform(), Gaussian::uniform());
        }

        let threshold_mean = threshold.mean();
        let threshold_variance = threshold.variance();

        let difference_mean = if score_above {
            score_mean - threshold_mean
        } else {
            threshold_mean - score_mean
        };
        let difference_variance =
            score_variance + threshold_variance + self.noise.threshold_variance;

        let (truncated_mean, truncated_variance) =
            gaussian::truncate_positive(difference_mean, difference_variance);

        let difference_prior = Gaussian::from_mean_and_variance(difference_mean, difference_variance);
        let difference_posterior =
            Gaussian::from_mean_and_variance(truncated_mean, truncated_variance);
        let difference_message = difference_posterior.ratio(&difference_prior, false);

        if !(difference_message.precision() > 1e-12)
            || !difference_message.precision().is_finite()
        {
            return (Gaussian::uniform(), Gaussian::uniform());
        }

        let message_mean = difference_message.mean();
        let message_variance = difference_message.variance();

        let score_message_mean = if score_above {
            message_mean + threshold_mean
        } else {
            threshold_mean - message_mean
        };
        let score_message = moment_message(
            score_message_mean,
            message_variance + threshold_variance + self.noise.threshold_variance,
        );

        let threshold_message = if threshold.is_point_mass() {
            Gaussian::uniform()
        } else {
            let threshold_message_mean = if score_above {
                score_mean - message_mean
            } else {
                score_mean + message_mean
            };

            moment_message(
                threshold_message_mean,
                score_variance + message_variance + self.noise.threshold_variance,
            )
        };

        (score_message, threshold_message)
    }

    /// Rebuild marginals as (prior ∗ constraints) ∗ all stored
    /// messages, so cross-batch bookkeeping stays exact regardless of
    /// how the sweep's belief context was seeded.
    fn accumulate_marginals(
        &self,
        base: &ParameterDistributions,
        batch: &RatingBatch,
        messages: &[ObservationMessages],
    ) -> ParameterDistributions {
        let mut result = base.clone();

        for (message, &user_id, &item_id, &value) in izip!(
            messages.iter(),
            &batch.user_ids,
            &batch.item_ids,
            &batch.values
        ) {
            let threshold_row = if self.shared_user_thresholds { 0 } else { user_id };

            for k in 0..self.trait_count {
                result.user_traits[[user_id, k]] =
                    result.user_traits[[user_id, k]].product(&message.user_traits[k]);
                result.item_traits[[item_id, k]] =
                    result.item_traits[[item_id, k]].product(&message.item_traits[k]);
            }

            result.user_biases[user_id] = result.user_biases[user_id].product(&message.user_bias);
            result.item_biases[item_id] = result.item_biases[item_id].product(&message.item_bias);

            result.user_thresholds[[threshold_row, value]] =
                result.user_thresholds[[threshold_row, value]].product(&message.lower_threshold);
            result.user_thresholds[[threshold_row, value + 1]] =
                result.user_thresholds[[threshold_row, value + 1]].product(&message.upper_threshold);
        }

        restore_properness(&mut result, base);

        result
    }

    /// Regress posterior entity traits and biases onto their sparse
    /// features through linear-Gaussian messages, producing the
    /// feature-weight marginals used for cold-start inference.
    fn infer_feature_weights(
        &self,
        traits: &Array2<Gaussian>,
        biases: &Array1<Gaussian>,
        features: &SparseFeatureMatrix,
        residual_trait_variance: f64,
        residual_bias_variance: f64,
    ) -> FeatureParameterDistribution {
        let feature_count = features.feature_count();
        let mut block = FeatureParameterDistribution::uniform(self.trait_count, feature_count);

        if feature_count == 0 {
            return block;
        }

        for belief in block.trait_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.trait_weight_variance);
        }
        for belief in block.bias_weights.iter_mut() {
            *belief = Gaussian::from_mean_and_variance(0.0, self.feature_hyper.bias_weight_variance);
        }

        // One message slot per entity per non-zero feature per target
        // (trait_count trait rows plus the bias row).
        let slots_per_feature = self.trait_count + 1;
        let mut messages: Vec<Vec<Gaussian>> = (0..features.entity_count())
            .map(|entity| {
                vec![Gaussian::uniform(); features.row(entity).indices().len() * slots_per_feature]
            })
            .collect();

        for _ in 0..FEATURE_WEIGHT_ROUNDS {
            for entity in 0..features.entity_count() {
                let row = features.row(entity);

                for (position, (&feature, &weight_input)) in
                    row.indices().iter().zip(row.values().iter()).enumerate()
                {
                    if weight_input == 0.0 {
                        continue;
                    }

                    for k in 0..self.trait_count {
                        let slot = position * slots_per_feature + k;
                        let observed = traits[[entity, k]];
                        let marginal = block.trait_weights[[k, feature]];
                        let stored = messages[entity][slot];

                        let updated = {
                            let lookup = |other: usize| block.trait_weights[[k, other]];

                            regression_message(
                                marginal,
                                &stored,
                                &observed,
                                residual_trait_variance,
                                feature,
                                weight_input,
                                row,
                                &lookup,
                            )
                        };

                        if let Some((new_marginal, new_message)) = updated {
                            block.trait_weights[[k, feature]] = new_marginal;
                            messages[entity][slot] = new_message;
                        }
                    }

                    let slot = position * slots_per_feature + self.trait_count;
                    let observed = biases[entity];
                    let marginal = block.bias_weights[feature];
                    let stored = messages[entity][slot];

                    let updated = {
                        let lookup = |other: usize| block.bias_weights[other];

                        regression_message(
                            marginal,
                            &stored,
                            &observed,
                            residual_bias_variance,
                            feature,
                            weight_input,
                            row,
                            &lookup,
                        )
                    };

                    if let Some((new_marginal, new_message)) = updated {
                        block.bias_weights[feature] = new_marginal;
                        messages[entity][slot] = new_message;
                    }
                }
            }
        }

        block
    }
}

/// One linear-regression message update for a single weight: compute
/// the residual of the observed entity parameter against all other
/// weights, convert it into a message for this weight, and fold it
/// into the weight's marginal. Returns the updated marginal and
/// message, or nothing when the update would leave an unusable
/// belief.
fn regression_message<F>(
    marginal: Gaussian,
    stored_message: &Gaussian,
    observed: &Gaussian,
    residual_variance: f64,
    feature: usize,
    feature_value: f64,
    row: &::features::SparseFeatureVector,
    weight_lookup: &F,
) -> Option<(Gaussian, Gaussian)>
where
    F: Fn(usize) -> Gaussian,
{
    if !observed.variance().is_finite() {
        return None;
    }

    let weight_cavity = cavity(&marginal, stored_message);

    let mut predicted_mean = 0.0;
    let mut predicted_variance = residual_variance;

    for (&other, &other_value) in row.indices().iter().zip(row.values().iter()) {
        if other == feature {
            continue;
        }

        let weight = weight_lookup(other);
        predicted_mean += weight.mean() * other_value;
        predicted_variance += weight.variance() * other_value * other_value;
    }

    let message = moment_message(
        (observed.mean() - predicted_mean) / feature_value,
        (observed.variance() + predicted_variance) / (feature_value * feature_value),
    );

    let updated = weight_cavity.product(&message);

    if updated.is_proper() && updated.precision() > 1e-12 && updated.precision().is_finite() {
        Some((updated, message))
    } else {
        None
    }
}

/// The moment-matched belief over the product of two independent
/// Gaussian variables.
pub(crate) fn product_moments(left: &Gaussian, right: &Gaussian) -> (f64, f64) {
    let (left_mean, left_variance) = (left.mean(), left.variance());
    let (right_mean, right_variance) = (right.mean(), right.variance());

    (
        left_mean * right_mean,
        left_variance * right_variance
            + left_variance * right_mean * right_mean
            + right_variance * left_mean * left_mean,
    )
}

/// The variational message through a product factor to one operand,
/// given a message on the product and the belief over the other
/// operand.
fn product_backward(product_message: &Gaussian, other: &Gaussian) -> Gaussian {
    if product_message.is_uniform() {
        return Gaussian::uniform();
    }

    let product_variance = product_message.variance();

    if !product_variance.is_finite() || product_variance <= 0.0 {
        return Gaussian::uniform();
    }

    let other_mean = other.mean();
    let other_variance = other.variance();

    let precision = (other_mean * other_mean + other_variance) / product_variance;
    let mean_times_precision = product_message.mean() * other_mean / product_variance;

    if !precision.is_finite() || !mean_times_precision.is_finite() {
        return Gaussian::uniform();
    }

    Gaussian::from_natural(mean_times_precision, precision)
}

/// The cavity belief: the marginal with one stored message removed.
/// Falls back to the marginal itself when removal would leave an
/// unusable belief.
fn cavity(marginal: &Gaussian, message: &Gaussian) -> Gaussian {
    let result = marginal.ratio(message, false);

    if result.is_point_mass() || result.precision() > 1e-12 {
        result
    } else {
        *marginal
    }
}

fn moment_message(mean: f64, variance: f64) -> Gaussian {
    if mean.is_finite() && variance.is_finite() && variance > 0.0 {
        Gaussian::from_mean_and_variance(mean, variance)
    } else {
        Gaussian::uniform()
    }
}

/// Replace the marginal with cavity ∗ message when the result is a
/// usable belief; otherwise keep the previous marginal and message.
fn apply_update(
    marginal: &mut Gaussian,
    stored_message: &mut Gaussian,
    cavity_belief: &Gaussian,
    new_message: Gaussian,
) {
    if new_message.is_uniform() {
        return;
    }

    let updated = cavity_belief.product(&new_message);

    if updated.is_point_mass()
        || (updated.is_proper() && updated.precision() > 1e-12 && updated.precision().is_finite())
    {
        *marginal = updated;
        *stored_message = new_message;
    }
}

/// Message accumulation can drive a marginal improper when a
/// negative-precision message survives; such entries fall back to
/// their base beliefs.
fn restore_properness(result: &mut ParameterDistributions, base: &ParameterDistributions) {
    for (belief, fallback) in result
        .user_traits
        .iter_mut()
        .zip(base.user_traits.iter())
        .chain(result.user_biases.iter_mut().zip(base.user_biases.iter()))
        .chain(
            result
                .user_thresholds
                .iter_mut()
                .zip(base.user_thresholds.iter()),
        )
        .chain(result.item_traits.iter_mut().zip(base.item_traits.iter()))
        .chain(result.item_biases.iter_mut().zip(base.item_biases.iter()))
    {
        if !belief.is_point_mass() && !(belief.precision() > 0.0) {
            *belief = *fallback;
        }
    }
}

#[cfg(test)]
mod tests {

    use std::sync::Arc;

    use super::*;
    use data::RatingBatch;
    use features::{SparseFeatureMatrix, SparseFeatureVector};
    use models::parameters::InstanceMetadata;

    fn build_algorithm(shared_thresholds: bool) -> CommunityTrainingAlgorithm {
        CommunityTrainingAlgorithm::new(
            1,
            2,
            shared_thresholds,
            NoiseHyperparameters::default(),
            UserHyperparameters::default(),
            ItemHyperparameters::default(),
            FeatureHyperparameters::default(),
        )
    }

    #[test]
    fn threshold_prior_means_match_ordinal_encoding() {
        let means = user_threshold_prior_means(5);

        assert!(means[0].is_infinite() && means[0] < 0.0);
        assert!((means[1] + 0.5).abs() < 1e-12);
        assert!((means[2] - 0.5).abs() < 1e-12);
        assert!((means[3] - 1.5).abs() < 1e-12);
        assert!(means[4].is_infinite() && means[4] > 0.0);
    }

    #[test]
    fn zero_observations_reproduce_the_prior() {
        let metadata = Arc::new(InstanceMetadata::without_features(2, 2, 5));
        let mut algorithm = build_algorithm(false);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch::empty());

        let posterior = algorithm.infer_parameters(false);

        assert!((posterior.user_traits()[[0, 0]].variance() - 1.0).abs() < 1e-12);
        assert!((posterior.user_traits()[[0, 0]].mean() - 0.0).abs() < 1e-12);
        assert!(posterior.user_thresholds()[[0, 0]].is_point_mass());
        assert!(posterior.user_thresholds()[[0, 5]].is_point_mass());
        assert!((posterior.user_thresholds()[[0, 1]].mean() + 1.5).abs() < 1e-12);
    }

    #[test]
    fn zero_observation_output_messages_are_uniform() {
        let metadata = Arc::new(InstanceMetadata::without_features(2, 2, 5));
        let mut algorithm = build_algorithm(false);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch::empty());
        algorithm.infer_parameters(false);

        let messages = algorithm.output_messages();

        assert!(messages.user_traits().iter().all(|x| x.is_uniform()));
        assert!(messages.item_biases().iter().all(|x| x.is_uniform()));
    }

    #[test]
    fn a_high_rating_raises_the_user_bias() {
        let metadata = Arc::new(InstanceMetadata::without_features(1, 1, 5));
        let mut algorithm = build_algorithm(false);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch {
            user_ids: vec![0],
            item_ids: vec![0],
            values: vec![4],
        });

        let posterior = algorithm.infer_parameters(false);

        assert!(posterior.user_biases()[0].mean() > 0.01);
        assert!(posterior.user_biases()[0].precision() > 1.0);
    }

    #[test]
    fn a_low_rating_lowers_the_user_bias() {
        let metadata = Arc::new(InstanceMetadata::without_features(1, 1, 5));
        let mut algorithm = build_algorithm(false);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch {
            user_ids: vec![0],
            item_ids: vec![0],
            values: vec![0],
        });

        let posterior = algorithm.infer_parameters(false);

        assert!(posterior.user_biases()[0].mean() < -0.01);
    }

    #[test]
    fn shared_thresholds_update_the_first_row() {
        let metadata = Arc::new(InstanceMetadata::without_features(3, 1, 5));
        let mut algorithm = build_algorithm(true);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch {
            user_ids: vec![2],
            item_ids: vec![0],
            values: vec![2],
        });

        let posterior = algorithm.infer_parameters(false);

        let updated = posterior.user_thresholds()[[0, 2]];
        let untouched = posterior.user_thresholds()[[2, 2]];

        assert!(updated.precision() > untouched.precision());
    }

    #[test]
    fn feature_weights_track_entity_biases() {
        let user_features = SparseFeatureMatrix::new(
            vec![
                SparseFeatureVector::new(vec![0], vec![1.0], 1).unwrap(),
                SparseFeatureVector::new(vec![0], vec![1.0], 1).unwrap(),
            ],
            1,
        ).unwrap();
        let metadata = Arc::new(
            InstanceMetadata::new(2, 1, 5, user_features, SparseFeatureMatrix::empty(1)).unwrap(),
        );

        let mut algorithm = build_algorithm(false);

        algorithm.set_observed_metadata(metadata);
        algorithm.set_observed_instance_data(RatingBatch {
            user_ids: vec![0, 1],
            item_ids: vec![0, 0],
            values: vec![4, 4],
        });

        let posterior = algorithm.infer_parameters(true);
        let weights = posterior.user_features();

        assert_eq!(weights.feature_count(), 1);
        assert!(weights.bias_weights()[0].mean() > 0.0);
        assert!(weights.bias_weights()[0].variance().is_finite());
    }
}
