//! The matchbox community recommender.
//!
//! Training runs the outer expectation-propagation loop: a prior pass
//! with no observations, a fixed number of iterations that fan the
//! batches out in parallel and recombine their messages sequentially,
//! and a final pass that also infers feature-weight marginals. The
//! trained posterior answers warm prediction queries by entity id;
//! cold entities are served from the average entity beliefs, adjusted
//! by learned feature weights when features are available.

use std::collections::HashMap;
use std::f64;
use std::sync::{Arc, Mutex};

use rand;
use rand::distributions::{Distribution, Normal, Uniform};
use rand::{Rng, SeedableRng, XorShiftRng};
use rayon::prelude::*;

use data::{RatingBatch, Ratings};
use features::{SparseFeatureMatrix, SparseFeatureVector};
use gaussian::{self, Gaussian};
use models::community::{self, CommunityTrainingAlgorithm};
use models::parameters::{
    InstanceMetadata, ItemParameterDistribution, ParameterDistributions, UserParameterDistribution,
};
use models::{
    FeatureHyperparameters, ItemHyperparameters, NoiseHyperparameters, UserHyperparameters,
};
use sampling::HistogramSampler;
use {FittingError, ItemId, PredictionError, RatingLevel, RatingPredictionModel, UserId};

// Sweeps per batch run. Feature weights take their own rounds in the
// final pass instead.
const BATCH_SWEEPS: usize = 1;

const RELATED_CANDIDATE_COUNT: usize = 512;

/// Hyperparameters describing the community model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    trait_count: usize,
    iteration_count: usize,
    batch_count: usize,
    shared_user_thresholds: bool,
    noise: NoiseHyperparameters,
    user: UserHyperparameters,
    item: ItemHyperparameters,
    feature: FeatureHyperparameters,
    rng: XorShiftRng,
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new(trait_count: usize) -> Self {
        Hyperparameters {
            trait_count: trait_count,
            iteration_count: 20,
            batch_count: 1,
            shared_user_thresholds: false,
            noise: NoiseHyperparameters::default(),
            user: UserHyperparameters::default(),
            item: ItemHyperparameters::default(),
            feature: FeatureHyperparameters::default(),
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Set the number of outer training iterations.
    pub fn iteration_count(mut self, iteration_count: usize) -> Self {
        self.iteration_count = iteration_count;
        self
    }

    /// Set the number of training batches per iteration.
    pub fn batch_count(mut self, batch_count: usize) -> Self {
        self.batch_count = batch_count;
        self
    }

    /// Model all users as sharing one set of rating thresholds.
    pub fn shared_user_thresholds(mut self, shared: bool) -> Self {
        self.shared_user_thresholds = shared;
        self
    }

    /// Set the observation noise variances.
    pub fn noise(mut self, noise: NoiseHyperparameters) -> Self {
        self.noise = noise;
        self
    }

    /// Set the user prior variances.
    pub fn user(mut self, user: UserHyperparameters) -> Self {
        self.user = user;
        self
    }

    /// Set the item prior variances.
    pub fn item(mut self, item: ItemHyperparameters) -> Self {
        self.item = item;
        self
    }

    /// Set the feature-weight prior variances.
    pub fn feature(mut self, feature: FeatureHyperparameters) -> Self {
        self.feature = feature;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    /// Set hyperparameters randomly: useful for hyperparameter search.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Hyperparameters {
            trait_count: Uniform::new(1, 9).sample(rng),
            iteration_count: Uniform::new(5, 41).sample(rng),
            batch_count: Uniform::new(1, 5).sample(rng),
            shared_user_thresholds: Uniform::new(0.0, 1.0).sample(rng) < 0.5,
            noise: NoiseHyperparameters {
                affinity_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
                threshold_variance: (10.0_f64).powf(Uniform::new(-2.0, 0.0).sample(rng)),
            },
            user: UserHyperparameters {
                trait_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
                bias_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
                threshold_prior_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
            },
            item: ItemHyperparameters {
                trait_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
                bias_variance: (10.0_f64).powf(Uniform::new(-1.0, 1.0).sample(rng)),
            },
            feature: FeatureHyperparameters::default(),
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Build the recommender model.
    pub fn build(self) -> MatchboxRecommender {
        MatchboxRecommender {
            hyper: self,
            model: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TrainedModel {
    posterior: ParameterDistributions,
    num_users: usize,
    num_items: usize,
    num_rating_levels: usize,
    user_average: UserParameterDistribution,
    item_average: ItemParameterDistribution,
    user_rating_counts: Vec<usize>,
    item_rating_counts: Vec<usize>,
    user_subset: Vec<UserId>,
    item_subset: Vec<ItemId>,
}

/// The matchbox community recommender model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchboxRecommender {
    hyper: Hyperparameters,
    model: Option<TrainedModel>,
}

struct BatchOutcome {
    batch_index: usize,
    posterior: ParameterDistributions,
    message: ParameterDistributions,
}

struct AlgorithmPool {
    instances: Mutex<HashMap<usize, Vec<CommunityTrainingAlgorithm>>>,
}

impl AlgorithmPool {
    fn new() -> Self {
        AlgorithmPool {
            instances: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, observation_count: usize) -> Option<CommunityTrainingAlgorithm> {
        self.instances
            .lock()
            .unwrap()
            .get_mut(&observation_count)
            .and_then(|pool| pool.pop())
    }

    fn release(&self, observation_count: usize, algorithm: CommunityTrainingAlgorithm) {
        self.instances
            .lock()
            .unwrap()
            .entry(observation_count)
            .or_insert_with(Vec::new)
            .push(algorithm);
    }
}

impl MatchboxRecommender {
    /// Build a recommender from hyperparameters.
    pub fn new(hyper: Hyperparameters) -> Self {
        hyper.build()
    }

    /// The number of users the model was trained on, if trained.
    pub fn num_users(&self) -> Option<usize> {
        match self.model {
            Some(ref model) => Some(model.num_users),
            None => None,
        }
    }

    /// The number of items the model was trained on, if trained.
    pub fn num_items(&self) -> Option<usize> {
        match self.model {
            Some(ref model) => Some(model.num_items),
            None => None,
        }
    }

    /// Fit the model. Single-shot: fitting an already-trained model
    /// is an error, and a failed call leaves the model untrained.
    ///
    /// Feature matrices are optional; when absent the corresponding
    /// cold-start queries fall back to the average entity beliefs.
    pub fn fit(
        &mut self,
        ratings: &Ratings,
        user_features: Option<&SparseFeatureMatrix>,
        item_features: Option<&SparseFeatureMatrix>,
    ) -> Result<(), FittingError> {
        if self.model.is_some() {
            return Err(FittingError::AlreadyTrained);
        }
        if self.hyper.trait_count == 0 {
            return Err(FittingError::InvalidHyperparameters(
                "trait count must be positive",
            ));
        }
        if self.hyper.iteration_count == 0 {
            return Err(FittingError::InvalidHyperparameters(
                "iteration count must be positive",
            ));
        }
        if self.hyper.batch_count == 0 {
            return Err(FittingError::InvalidHyperparameters(
                "batch count must be positive",
            ));
        }
        if ratings.is_empty() {
            return Err(FittingError::NoObservations);
        }
        if self.hyper.batch_count > ratings.len() {
            return Err(FittingError::InvalidHyperparameters(
                "batch count exceeds the number of observations",
            ));
        }

        let metadata = Arc::new(InstanceMetadata::new(
            ratings.num_users(),
            ratings.num_items(),
            ratings.num_rating_levels(),
            user_features
                .cloned()
                .unwrap_or_else(|| SparseFeatureMatrix::empty(ratings.num_users())),
            item_features
                .cloned()
                .unwrap_or_else(|| SparseFeatureMatrix::empty(ratings.num_items())),
        )?);

        let trait_count = self.hyper.trait_count;
        let batch_count = self.hyper.batch_count;

        // The prior pass: a run with no observations, so that later
        // messages can be divided by an accurately represented prior
        // rather than an assumed closed form.
        let mut algorithm = self.build_algorithm(BATCH_SWEEPS);
        algorithm.set_observed_metadata(Arc::clone(&metadata));
        algorithm.set_observed_instance_data(RatingBatch::empty());
        let prior = algorithm.infer_parameters(false);

        let mut global_posterior = prior.clone();

        // With every trait mean at zero the product messages cannot
        // tell traits apart; the first iteration's initializers carry
        // randomized trait means to break the symmetry.
        {
            let normal = Normal::new(0.0, 1.0);

            let user_scale = self.hyper.user.trait_variance.sqrt();
            for belief in global_posterior.user_traits.iter_mut() {
                let mean = normal.sample(&mut self.hyper.rng) * user_scale;
                *belief = Gaussian::from_mean_and_variance(mean, belief.variance());
            }

            let item_scale = self.hyper.item.trait_variance.sqrt();
            for belief in global_posterior.item_traits.iter_mut() {
                let mean = normal.sample(&mut self.hyper.rng) * item_scale;
                *belief = Gaussian::from_mean_and_variance(mean, belief.variance());
            }
        }

        let mut posteriors_divided_by_priors = ParameterDistributions::uniform(&metadata, trait_count);
        let mut batch_output_messages =
            vec![ParameterDistributions::uniform(&metadata, trait_count); batch_count];

        let pool = AlgorithmPool::new();

        for _ in 0..self.hyper.iteration_count {
            let outcomes: Result<Vec<BatchOutcome>, FittingError> = (0..batch_count)
                .into_par_iter()
                .map(|batch_index| {
                    let batch = ratings.batch(batch_index, batch_count);
                    batch
                        .validate(
                            metadata.num_users(),
                            metadata.num_items(),
                            metadata.num_rating_levels(),
                        )
                        .map_err(FittingError::from)?;

                    // What every batch except this one believes: the
                    // combined evidence with this batch's own last
                    // contribution divided back out.
                    let mut constraints = ParameterDistributions::uniform(&metadata, trait_count);
                    constraints.set_entity_parameters_to_ratio(
                        &posteriors_divided_by_priors,
                        &batch_output_messages[batch_index],
                        true,
                    );

                    let mut initializers = ParameterDistributions::uniform(&metadata, trait_count);
                    initializers.set_entity_parameters_to_ratio(
                        &global_posterior,
                        &constraints,
                        true,
                    );

                    let observation_count = batch.len();
                    let mut algorithm = pool
                        .acquire(observation_count)
                        .unwrap_or_else(|| self.build_algorithm(BATCH_SWEEPS));

                    algorithm.set_observed_metadata(Arc::clone(&metadata));
                    algorithm.set_observed_instance_data(batch);
                    algorithm.constrain_entity_parameters(constraints.clone());
                    algorithm.initialize_entity_parameters(initializers);

                    let posterior = algorithm.infer_parameters(false);

                    let mut message = algorithm.output_messages();
                    let contribution = message.clone();
                    message.set_entity_parameters_to_ratio(&contribution, &constraints, false);

                    pool.release(observation_count, algorithm);

                    Ok(BatchOutcome {
                        batch_index: batch_index,
                        posterior: posterior,
                        message: message,
                    })
                })
                .collect();

            // collect() surfaces the first failing batch's error
            // directly, preserving its identity to the caller.
            let outcomes = outcomes?;

            posteriors_divided_by_priors.set_entity_parameters_to_uniform();
            let mut posterior_product = ParameterDistributions::uniform(&metadata, trait_count);

            for outcome in &outcomes {
                let combined = posteriors_divided_by_priors.clone();
                posteriors_divided_by_priors
                    .set_entity_parameters_to_product(&combined, &outcome.message);

                let combined = posterior_product.clone();
                posterior_product.set_entity_parameters_to_product(&combined, &outcome.posterior);

                batch_output_messages[outcome.batch_index] = outcome.message.clone();
            }

            // The geometric mean of the batch posteriors; these are
            // un-normalized belief products, so the arithmetic mean
            // would be wrong.
            global_posterior
                .set_entity_parameters_to_power(&posterior_product, 1.0 / batch_count as f64);
        }

        // The final pass re-derives a consistent posterior from the
        // combined messages and infers the feature weights, without
        // touching per-batch instance data again.
        let mut algorithm = self.build_algorithm(BATCH_SWEEPS);
        algorithm.set_observed_metadata(Arc::clone(&metadata));
        algorithm.set_observed_instance_data(RatingBatch::empty());
        algorithm.constrain_entity_parameters(posteriors_divided_by_priors.clone());
        algorithm.initialize_entity_parameters(global_posterior.clone());

        let mut posterior = algorithm.infer_parameters(true);

        // Shared thresholds are modeled as one entity during training
        // but exposed per user.
        if self.hyper.shared_user_thresholds {
            let shared_row: Vec<Gaussian> = posterior.user_thresholds().row(0).to_vec();

            for user_id in 1..posterior.num_users() {
                for (index, belief) in shared_row.iter().enumerate() {
                    posterior.user_thresholds[[user_id, index]] = *belief;
                }
            }
        }

        let mut user_rating_counts = vec![0; metadata.num_users()];
        let mut item_rating_counts = vec![0; metadata.num_items()];

        for rating in ratings.data() {
            user_rating_counts[rating.user_id()] += 1;
            item_rating_counts[rating.item_id()] += 1;
        }

        let user_average = average_user_parameters(&posterior);
        let item_average = average_item_parameters(&posterior);

        self.model = Some(TrainedModel {
            posterior: posterior,
            num_users: metadata.num_users(),
            num_items: metadata.num_items(),
            num_rating_levels: metadata.num_rating_levels(),
            user_average: user_average,
            item_average: item_average,
            user_rating_counts: user_rating_counts,
            item_rating_counts: item_rating_counts,
            user_subset: (0..metadata.num_users()).collect(),
            item_subset: (0..metadata.num_items()).collect(),
        });

        Ok(())
    }

    fn build_algorithm(&self, sweep_count: usize) -> CommunityTrainingAlgorithm {
        CommunityTrainingAlgorithm::new(
            sweep_count,
            self.hyper.trait_count,
            self.hyper.shared_user_thresholds,
            self.hyper.noise.clone(),
            self.hyper.user.clone(),
            self.hyper.item.clone(),
            self.hyper.feature.clone(),
        )
    }

    fn trained_model(&self) -> Result<&TrainedModel, PredictionError> {
        self.model.as_ref().ok_or(PredictionError::NotTrained)
    }

    /// The trained posterior beliefs.
    pub fn posterior(&self) -> Result<&ParameterDistributions, PredictionError> {
        Ok(&self.trained_model()?.posterior)
    }

    /// The average user beliefs used for cold-start queries.
    pub fn user_average(&self) -> Result<&UserParameterDistribution, PredictionError> {
        Ok(&self.trained_model()?.user_average)
    }

    /// The average item beliefs used for cold-start queries.
    pub fn item_average(&self) -> Result<&ItemParameterDistribution, PredictionError> {
        Ok(&self.trained_model()?.item_average)
    }

    /// The users considered by recommendation queries.
    pub fn user_subset(&self) -> Result<&[UserId], PredictionError> {
        Ok(&self.trained_model()?.user_subset)
    }

    /// The items considered by recommendation queries.
    pub fn item_subset(&self) -> Result<&[ItemId], PredictionError> {
        Ok(&self.trained_model()?.item_subset)
    }

    /// Restrict recommendation queries to a subset of users.
    pub fn set_user_subset(&mut self, subset: Vec<UserId>) -> Result<(), PredictionError> {
        {
            let model = self.trained_model()?;

            for &user_id in &subset {
                if user_id >= model.num_users {
                    return Err(PredictionError::UnknownUser(user_id));
                }
            }
        }

        self.model.as_mut().unwrap().user_subset = subset;

        Ok(())
    }

    /// Restrict recommendation queries to a subset of items.
    pub fn set_item_subset(&mut self, subset: Vec<ItemId>) -> Result<(), PredictionError> {
        {
            let model = self.trained_model()?;

            for &item_id in &subset {
                if item_id >= model.num_items {
                    return Err(PredictionError::UnknownItem(item_id));
                }
            }
        }

        self.model.as_mut().unwrap().item_subset = subset;

        Ok(())
    }

    /// The rating distribution implied by explicit user and item
    /// parameter snapshots; useful for combining warm and cold
    /// entities in one query.
    pub fn predict_distribution_from_parameters(
        &self,
        user: &UserParameterDistribution,
        item: &ItemParameterDistribution,
    ) -> Result<Vec<f64>, PredictionError> {
        self.trained_model()?;

        Ok(self.rating_distribution(user, item))
    }

    /// Infer cold-start parameters for an unseen user from its
    /// features.
    ///
    /// With no learned feature weights the supplied vector must be
    /// zero-length, and the average user beliefs are returned
    /// unchanged.
    pub fn infer_user_parameters(
        &self,
        features: &SparseFeatureVector,
    ) -> Result<UserParameterDistribution, PredictionError> {
        let model = self.trained_model()?;
        let learned = model.posterior.user_features();

        if features.feature_count() != learned.feature_count() {
            return Err(PredictionError::FeatureCountMismatch(
                features.feature_count(),
                learned.feature_count(),
            ));
        }

        let mut result = model.user_average.clone();

        if learned.feature_count() == 0 {
            return Ok(result);
        }

        for (trait_index, belief) in result.traits.iter_mut().enumerate() {
            *belief = add_feature_contribution(belief, features, &|feature| {
                learned.trait_weights()[[trait_index, feature]]
            });
        }

        result.bias = add_feature_contribution(&model.user_average.bias, features, &|feature| {
            learned.bias_weights()[feature]
        });

        Ok(result)
    }

    /// Infer cold-start parameters for an unseen item from its
    /// features.
    pub fn infer_item_parameters(
        &self,
        features: &SparseFeatureVector,
    ) -> Result<ItemParameterDistribution, PredictionError> {
        let model = self.trained_model()?;
        let learned = model.posterior.item_features();

        if features.feature_count() != learned.feature_count() {
            return Err(PredictionError::FeatureCountMismatch(
                features.feature_count(),
                learned.feature_count(),
            ));
        }

        let mut result = model.item_average.clone();

        if learned.feature_count() == 0 {
            return Ok(result);
        }

        for (trait_index, belief) in result.traits.iter_mut().enumerate() {
            *belief = add_feature_contribution(belief, features, &|feature| {
                learned.trait_weights()[[trait_index, feature]]
            });
        }

        result.bias = add_feature_contribution(&model.item_average.bias, features, &|feature| {
            learned.bias_weights()[feature]
        });

        Ok(result)
    }

    /// Rank the item subset for a user by expected rating.
    pub fn recommend(
        &self,
        user_id: UserId,
        num_items: usize,
    ) -> Result<Vec<(ItemId, f64)>, PredictionError> {
        let model = self.trained_model()?;

        if user_id >= model.num_users {
            return Err(PredictionError::UnknownUser(user_id));
        }

        let user = model.posterior.for_user(user_id);

        let mut scored: Vec<(ItemId, f64)> = model
            .item_subset
            .iter()
            .map(|&item_id| {
                let item = model.posterior.for_item(item_id);
                let distribution = self.rating_distribution(&user, &item);

                (item_id, expectation(&distribution))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(num_items);

        Ok(scored)
    }

    /// Find users with the most similar trait profiles.
    ///
    /// When the user subset is large, candidates are drawn from it by
    /// weighted sampling without replacement, favouring users with
    /// more observed ratings.
    pub fn related_users(
        &mut self,
        user_id: UserId,
        num_users: usize,
    ) -> Result<Vec<UserId>, PredictionError> {
        let model = match self.model {
            Some(ref model) => model,
            None => return Err(PredictionError::NotTrained),
        };

        if user_id >= model.num_users {
            return Err(PredictionError::UnknownUser(user_id));
        }

        let candidates = sample_candidates(
            &model.user_subset,
            &model.user_rating_counts,
            user_id,
            &mut self.hyper.rng,
        );

        let target = trait_means(&model.posterior.for_user(user_id).traits);

        let mut scored: Vec<(UserId, f64)> = candidates
            .into_iter()
            .map(|candidate| {
                let means = trait_means(&model.posterior.for_user(candidate).traits);

                (candidate, cosine_similarity(&target, &means))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(num_users);

        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    /// Find items with the most similar trait profiles.
    pub fn related_items(
        &mut self,
        item_id: ItemId,
        num_items: usize,
    ) -> Result<Vec<ItemId>, PredictionError> {
        let model = match self.model {
            Some(ref model) => model,
            None => return Err(PredictionError::NotTrained),
        };

        if item_id >= model.num_items {
            return Err(PredictionError::UnknownItem(item_id));
        }

        let candidates = sample_candidates(
            &model.item_subset,
            &model.item_rating_counts,
            item_id,
            &mut self.hyper.rng,
        );

        let target = trait_means(&model.posterior.for_item(item_id).traits);

        let mut scored: Vec<(ItemId, f64)> = candidates
            .into_iter()
            .map(|candidate| {
                let means = trait_means(&model.posterior.for_item(candidate).traits);

                (candidate, cosine_similarity(&target, &means))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(num_items);

        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    fn rating_distribution(
        &self,
        user: &UserParameterDistribution,
        item: &ItemParameterDistribution,
    ) -> Vec<f64> {
        let mut mean = user.bias.mean() + item.bias.mean();
        let mut variance = user.bias.variance() + item.bias.variance();

        for (user_trait, item_trait) in user.traits.iter().zip(item.traits.iter()) {
            let (product_mean, product_variance) = community::product_moments(user_trait, item_trait);

            mean += product_mean;
            variance += product_variance;
        }

        variance += self.hyper.noise.affinity_variance;

        // The probability that the noisy score exceeds each
        // threshold; adjacent differences give the level
        // probabilities.
        let exceedance: Vec<f64> = user
            .thresholds
            .iter()
            .map(|threshold| {
                if threshold.is_point_mass() && threshold.mean().is_infinite() {
                    if threshold.mean() < 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    let comparison_variance =
                        variance + threshold.variance() + self.hyper.noise.threshold_variance;

                    gaussian::normal_cdf((mean - threshold.mean()) / comparison_variance.sqrt())
                }
            })
            .collect();

        let num_levels = user.thresholds.len() - 1;
        let mut distribution: Vec<f64> = (0..num_levels)
            .map(|level| (exceedance[level] - exceedance[level + 1]).max(0.0))
            .collect();

        let total: f64 = distribution.iter().sum();

        if total > 0.0 {
            for probability in distribution.iter_mut() {
                *probability /= total;
            }
        } else {
            for probability in distribution.iter_mut() {
                *probability = 1.0 / num_levels as f64;
            }
        }

        distribution
    }
}

impl RatingPredictionModel for MatchboxRecommender {
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Result<RatingLevel, PredictionError> {
        let distribution = self.predict_distribution(user_id, item_id)?;

        let mut best_level = 0;
        let mut best_probability = f64::NEG_INFINITY;

        for (level, &probability) in distribution.iter().enumerate() {
            if probability > best_probability {
                best_probability = probability;
                best_level = level;
            }
        }

        Ok(best_level)
    }

    fn predict_distribution(
        &self,
        user_id: UserId,
        item_id: ItemId,
    ) -> Result<Vec<f64>, PredictionError> {
        let model = self.trained_model()?;

        if user_id >= model.num_users {
            return Err(PredictionError::UnknownUser(user_id));
        }
        if item_id >= model.num_items {
            return Err(PredictionError::UnknownItem(item_id));
        }

        let user = model.posterior.for_user(user_id);
        let item = model.posterior.for_item(item_id);

        Ok(self.rating_distribution(&user, &item))
    }

    fn expected_rating(&self, user_id: UserId, item_id: ItemId) -> Result<f64, PredictionError> {
        let distribution = self.predict_distribution(user_id, item_id)?;
        let expected = expectation(&distribution);

        if expected.is_finite() {
            Ok(expected)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

fn expectation(distribution: &[f64]) -> f64 {
    distribution
        .iter()
        .enumerate()
        .map(|(level, probability)| level as f64 * probability)
        .sum()
}

fn add_feature_contribution<F>(
    base: &Gaussian,
    features: &SparseFeatureVector,
    weight_lookup: &F,
) -> Gaussian
where
    F: Fn(usize) -> Gaussian,
{
    let mut mean = base.mean();
    let mut variance = base.variance();

    for (&feature, &value) in features.indices().iter().zip(features.values().iter()) {
        let weight = weight_lookup(feature);

        mean += weight.mean() * value;
        variance += weight.variance() * value * value;
    }

    Gaussian::from_mean_and_variance(mean, variance)
}

/// The normalized product of a set of beliefs, excluding point masses
/// unless they sit at infinity. Finite point masses indicate a
/// degenerate, unlearned state and would corrupt the average.
fn average_belief<I>(beliefs: I) -> Gaussian
where
    I: Iterator<Item = Gaussian>,
{
    let mut product = Gaussian::uniform();
    let mut count = 0;

    for belief in beliefs {
        if belief.is_point_mass() {
            if belief.mean().is_infinite() {
                return belief;
            }

            continue;
        }

        product = product.product(&belief);
        count += 1;
    }

    if count == 0 {
        Gaussian::uniform()
    } else {
        product.power(1.0 / count as f64)
    }
}

fn average_user_parameters(posterior: &ParameterDistributions) -> UserParameterDistribution {
    UserParameterDistribution {
        traits: (0..posterior.trait_count())
            .map(|k| average_belief(posterior.user_traits().column(k).iter().cloned()))
            .collect(),
        bias: average_belief(posterior.user_biases().iter().cloned()),
        thresholds: (0..posterior.threshold_count())
            .map(|j| average_belief(posterior.user_thresholds().column(j).iter().cloned()))
            .collect(),
    }
}

fn average_item_parameters(posterior: &ParameterDistributions) -> ItemParameterDistribution {
    ItemParameterDistribution {
        traits: (0..posterior.trait_count())
            .map(|k| average_belief(posterior.item_traits().column(k).iter().cloned()))
            .collect(),
        bias: average_belief(posterior.item_biases().iter().cloned()),
    }
}

fn trait_means(traits: &[Gaussian]) -> Vec<f64> {
    traits.iter().map(|belief| belief.mean()).collect()
}

fn cosine_similarity(left: &[f64], right: &[f64]) -> f64 {
    let dot: f64 = left.iter().zip(right.iter()).map(|(x, y)| x * y).sum();
    let left_norm: f64 = left.iter().map(|x| x * x).sum::<f64>().sqrt();
    let right_norm: f64 = right.iter().map(|x| x * x).sum::<f64>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

/// Draw a candidate subset for related-entity queries: all of the
/// subset when it is small, otherwise a weighted sample without
/// replacement favouring entities with more observed ratings.
fn sample_candidates<R: Rng>(
    subset: &[usize],
    rating_counts: &[usize],
    exclude: usize,
    rng: &mut R,
) -> Vec<usize> {
    if subset.len() <= RELATED_CANDIDATE_COUNT {
        return subset.iter().cloned().filter(|&id| id != exclude).collect();
    }

    // Unrated entities keep one unit of weight so they remain
    // reachable.
    let histogram: Vec<usize> = subset
        .iter()
        .map(|&id| {
            if id == exclude {
                0
            } else {
                rating_counts[id] + 1
            }
        })
        .collect();

    let mut sampler = HistogramSampler::new(&histogram);
    let mut seen = vec![false; subset.len()];
    let mut candidates = Vec::with_capacity(RELATED_CANDIDATE_COUNT);

    while candidates.len() < RELATED_CANDIDATE_COUNT && !sampler.is_empty() {
        let bin = sampler.sample(rng);
        sampler.take(bin);

        if !seen[bin] {
            seen[bin] = true;
            candidates.push(subset[bin]);
        }
    }

    candidates
}

#[cfg(test)]
mod tests {

    use super::*;
    use data::Rating;

    fn toy_ratings() -> Ratings {
        let mut ratings = Ratings::new(3, 3, 5);

        for user_id in 0..3 {
            for item_id in 0..3 {
                ratings.push(Rating::new(user_id, item_id, user_id + item_id));
            }
        }

        ratings
    }

    fn toy_model(batch_count: usize) -> MatchboxRecommender {
        let mut model = Hyperparameters::new(2)
            .iteration_count(5)
            .batch_count(batch_count)
            .from_seed([42; 16])
            .build();

        model.fit(&toy_ratings(), None, None).unwrap();

        model
    }

    #[test]
    fn end_to_end_predictions_are_valid() {
        let model = toy_model(1);

        for user_id in 0..3 {
            for item_id in 0..3 {
                let prediction = model.predict(user_id, item_id).unwrap();
                assert!(prediction < 5);

                let expected = model.expected_rating(user_id, item_id).unwrap();
                assert!(expected >= 0.0 && expected <= 4.0);

                let distribution = model.predict_distribution(user_id, item_id).unwrap();
                assert_eq!(distribution.len(), 5);
                assert!((distribution.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn trained_shapes_match_the_configuration() {
        let model = toy_model(1);
        let posterior = model.posterior().unwrap();

        assert_eq!(posterior.user_traits().dim(), (3, 2));
        assert_eq!(posterior.item_traits().dim(), (3, 2));
        assert_eq!(posterior.user_thresholds().dim(), (3, 6));
        assert_eq!(posterior.num_users(), 3);
        assert_eq!(posterior.num_items(), 3);
    }

    #[test]
    fn training_learns_the_rating_gradient() {
        let model = toy_model(1);

        // User 2 rates everything higher than user 0.
        let low = model.expected_rating(0, 0).unwrap();
        let high = model.expected_rating(2, 2).unwrap();

        assert!(high > low);
    }

    #[test]
    fn batching_approximates_single_batch_training() {
        let single = toy_model(1);
        let batched = toy_model(3);

        let single_posterior = single.posterior().unwrap();
        let batched_posterior = batched.posterior().unwrap();

        for (left, right) in single_posterior
            .user_traits()
            .iter()
            .chain(single_posterior.item_traits().iter())
            .chain(single_posterior.user_biases().iter())
            .chain(single_posterior.item_biases().iter())
            .zip(
                batched_posterior
                    .user_traits()
                    .iter()
                    .chain(batched_posterior.item_traits().iter())
                    .chain(batched_posterior.user_biases().iter())
                    .chain(batched_posterior.item_biases().iter()),
            )
        {
            assert!(left.mean().is_finite());
            assert!(right.mean().is_finite());
            assert!((left.mean() - right.mean()).abs() < 0.5);
        }
    }

    #[test]
    fn fitting_twice_is_an_error() {
        let mut model = toy_model(1);

        match model.fit(&toy_ratings(), None, None) {
            Err(FittingError::AlreadyTrained) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn predicting_before_fitting_is_an_error() {
        let model = Hyperparameters::new(2).build();

        match model.predict(0, 0) {
            Err(PredictionError::NotTrained) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn zero_iterations_are_rejected_eagerly() {
        let mut model = Hyperparameters::new(2).iteration_count(0).build();

        match model.fit(&toy_ratings(), None, None) {
            Err(FittingError::InvalidHyperparameters(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn inconsistent_mappings_are_reported_as_such() {
        let mut ratings = Ratings::new(2, 2, 3);
        ratings.push(Rating::new(5, 0, 1));

        let mut model = Hyperparameters::new(2).build();

        match model.fit(&ratings, None, None) {
            Err(FittingError::InconsistentData(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn cold_start_without_features_returns_the_average() {
        let model = toy_model(1);

        let inferred = model
            .infer_user_parameters(&SparseFeatureVector::empty())
            .unwrap();

        assert_eq!(&inferred, model.user_average().unwrap());

        let inferred = model
            .infer_item_parameters(&SparseFeatureVector::empty())
            .unwrap();

        assert_eq!(&inferred, model.item_average().unwrap());
    }

    #[test]
    fn cold_start_feature_count_mismatches_are_fatal() {
        let model = toy_model(1);

        let features = SparseFeatureVector::new(vec![0], vec![1.0], 3).unwrap();

        match model.infer_user_parameters(&features) {
            Err(PredictionError::FeatureCountMismatch(3, 0)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn cold_start_with_features_adjusts_the_average() {
        use features::SparseFeatureMatrix;

        let user_features = SparseFeatureMatrix::new(
            vec![
                SparseFeatureVector::new(vec![0], vec![1.0], 2).unwrap(),
                SparseFeatureVector::new(vec![0], vec![1.0], 2).unwrap(),
                SparseFeatureVector::new(vec![1], vec![1.0], 2).unwrap(),
            ],
            2,
        ).unwrap();

        let mut model = Hyperparameters::new(2)
            .iteration_count(5)
            .from_seed([7; 16])
            .build();

        model
            .fit(&toy_ratings(), Some(&user_features), None)
            .unwrap();

        let cold = SparseFeatureVector::new(vec![1], vec![1.0], 2).unwrap();
        let inferred = model.infer_user_parameters(&cold).unwrap();
        let average = model.user_average().unwrap();

        // Feature adjustment adds the weighted contribution on top of
        // the average beliefs.
        assert!(inferred.bias.variance() > average.bias.variance());
        assert!(inferred.bias.mean().is_finite());

        let distribution = model
            .predict_distribution_from_parameters(&inferred, &model.posterior().unwrap().for_item(0))
            .unwrap();

        assert!((distribution.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn recommendations_are_ranked_and_bounded() {
        let model = toy_model(1);

        let recommendations = model.recommend(0, 2).unwrap();

        assert_eq!(recommendations.len(), 2);
        assert!(recommendations[0].1 >= recommendations[1].1);

        // Item 2 draws the highest ratings from every user.
        assert_eq!(recommendations[0].0, 2);
    }

    #[test]
    fn related_items_exclude_the_query() {
        let mut model = toy_model(1);

        let related = model.related_items(0, 2).unwrap();

        assert!(related.len() <= 2);
        assert!(!related.contains(&0));
    }

    #[test]
    fn subsets_default_to_the_full_ranges() {
        let mut model = toy_model(1);

        assert_eq!(model.user_subset().unwrap(), &[0, 1, 2]);
        assert_eq!(model.item_subset().unwrap(), &[0, 1, 2]);

        model.set_item_subset(vec![0, 2]).unwrap();
        assert_eq!(model.item_subset().unwrap(), &[0, 2]);

        match model.set_item_subset(vec![9]) {
            Err(PredictionError::UnknownItem(9)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn subsets_require_training() {
        let model = Hyperparameters::new(2).build();

        match model.user_subset() {
            Err(PredictionError::NotTrained) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
