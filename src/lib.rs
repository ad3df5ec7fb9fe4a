#![deny(missing_docs)]
//! # matchbox
//!
//! `matchbox` implements Bayesian recommender models over explicit
//! star ratings: users and items are described by latent trait
//! vectors, biases, and per-user ordinal rating thresholds, and the
//! model is trained with expectation propagation rather than
//! gradient descent. Training supports mini-batches whose messages
//! are recombined without reprocessing the whole dataset, and cold
//! users and items are served from average entity beliefs adjusted by
//! learned feature weights.
//!
//! ## Example
//! You can fit a model on a handful of ratings in a few milliseconds:
//!
//! ```rust
//! # extern crate matchbox;
//! use matchbox::data::{Rating, Ratings};
//! use matchbox::models::recommender::Hyperparameters;
//! use matchbox::RatingPredictionModel;
//!
//! let mut ratings = Ratings::new(2, 2, 3);
//!
//! ratings.push(Rating::new(0, 0, 2));
//! ratings.push(Rating::new(0, 1, 0));
//! ratings.push(Rating::new(1, 0, 2));
//! ratings.push(Rating::new(1, 1, 1));
//!
//! let mut model = Hyperparameters::new(2)
//!     .iteration_count(10)
//!     .from_seed([42; 16])
//!     .build();
//!
//! model.fit(&ratings, None, None).unwrap();
//!
//! let distribution = model.predict_distribution(0, 0).unwrap();
//!
//! assert!((distribution.iter().sum::<f64>() - 1.0).abs() < 1e-6);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[cfg(feature = "default")]
extern crate csv;
#[macro_use]
extern crate failure;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate siphasher;

#[cfg(feature = "default")]
extern crate reqwest;

#[cfg(test)]
extern crate serde_json;

pub mod data;
#[cfg(feature = "default")]
pub mod datasets;
pub mod evaluation;
pub mod features;
pub mod gaussian;
pub mod models;
pub mod sampling;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for 0-based rating levels.
pub type RatingLevel = usize;

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No observations were available to train on.
    #[fail(display = "No observations to train on.")]
    NoObservations,
    /// The model has already been trained; training is single-shot.
    #[fail(display = "The model has already been trained.")]
    AlreadyTrained,
    /// A hyperparameter value is invalid.
    #[fail(display = "Invalid hyperparameter value: {}.", _0)]
    InvalidHyperparameters(&'static str),
    /// Externally supplied instance data violated its declared shape
    /// or bounds.
    #[fail(display = "Inconsistent instance data: {}", _0)]
    InconsistentData(#[fail(cause)] MappingError),
}

impl From<MappingError> for FittingError {
    fn from(error: MappingError) -> Self {
        FittingError::InconsistentData(error)
    }
}

/// Errors raised when externally supplied data violates its declared
/// shape or bounds. These indicate a bug in the data source, and are
/// kept distinct from generic argument errors.
#[derive(Debug, Fail)]
pub enum MappingError {
    /// Parallel arrays have different lengths.
    #[fail(display = "Parallel arrays have mismatched lengths: {} vs {}.", _0, _1)]
    MismatchedLengths(usize, usize),
    /// A user id exceeds the declared user count.
    #[fail(display = "User id {} exceeds the declared user count {}.", _0, _1)]
    UserIdOutOfBounds(usize, usize),
    /// An item id exceeds the declared item count.
    #[fail(display = "Item id {} exceeds the declared item count {}.", _0, _1)]
    ItemIdOutOfBounds(usize, usize),
    /// A rating value exceeds the declared rating level count.
    #[fail(display = "Rating {} exceeds the declared rating level count {}.", _0, _1)]
    RatingOutOfBounds(usize, usize),
    /// A feature index exceeds the declared feature count.
    #[fail(display = "Feature index {} exceeds the declared feature count {}.", _0, _1)]
    FeatureIndexOutOfBounds(usize, usize),
    /// A feature index appears twice for one entity.
    #[fail(display = "Feature index {} appears more than once for one entity.", _0)]
    DuplicateFeatureIndex(usize),
    /// A feature block covers the wrong number of entities.
    #[fail(display = "Feature rows {} do not match the declared entity count {}.", _0, _1)]
    EntityCountMismatch(usize, usize),
    /// A feature count differs from the expected one.
    #[fail(display = "Feature count {} does not match the expected count {}.", _0, _1)]
    FeatureCountMismatch(usize, usize),
}

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// The model has not been trained yet.
    #[fail(display = "The model must be fitted first.")]
    NotTrained,
    /// The user id lies outside the trained range.
    #[fail(display = "User id {} is outside the trained range.", _0)]
    UnknownUser(usize),
    /// The item id lies outside the trained range.
    #[fail(display = "Item id {} is outside the trained range.", _0)]
    UnknownItem(usize),
    /// A supplied feature vector does not match the learned feature
    /// count.
    #[fail(display = "Feature count {} does not match the learned count {}.", _0, _1)]
    FeatureCountMismatch(usize, usize),
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Trait describing models that predict the rating a user would give
/// to an item.
pub trait RatingPredictionModel {
    /// Predict the most probable rating level for a user-item pair.
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Result<RatingLevel, PredictionError>;
    /// Predict the full distribution over rating levels for a
    /// user-item pair.
    fn predict_distribution(
        &self,
        user_id: UserId,
        item_id: ItemId,
    ) -> Result<Vec<f64>, PredictionError>;
    /// The expected rating level for a user-item pair.
    fn expected_rating(&self, user_id: UserId, item_id: ItemId) -> Result<f64, PredictionError>;
}
