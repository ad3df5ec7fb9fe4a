//! Models module.
pub mod community;
pub mod parameters;
pub mod recommender;

/// Prior variances of the observation noise terms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseHyperparameters {
    /// Variance of the noise added to the latent affinity score.
    pub affinity_variance: f64,
    /// Variance of the noise added to threshold comparisons.
    pub threshold_variance: f64,
}

impl Default for NoiseHyperparameters {
    fn default() -> Self {
        NoiseHyperparameters {
            affinity_variance: 1.0,
            threshold_variance: 0.25,
        }
    }
}

/// Prior variances of the per-user parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserHyperparameters {
    /// Prior variance of each user trait.
    pub trait_variance: f64,
    /// Prior variance of the user bias.
    pub bias_variance: f64,
    /// Prior variance of the interior rating thresholds.
    pub threshold_prior_variance: f64,
}

impl Default for UserHyperparameters {
    fn default() -> Self {
        UserHyperparameters {
            trait_variance: 1.0,
            bias_variance: 1.0,
            threshold_prior_variance: 1.0,
        }
    }
}

/// Prior variances of the per-item parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemHyperparameters {
    /// Prior variance of each item trait.
    pub trait_variance: f64,
    /// Prior variance of the item bias.
    pub bias_variance: f64,
}

impl Default for ItemHyperparameters {
    fn default() -> Self {
        ItemHyperparameters {
            trait_variance: 1.0,
            bias_variance: 1.0,
        }
    }
}

/// Prior variances of the feature-weight parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureHyperparameters {
    /// Prior variance of each trait feature weight.
    pub trait_weight_variance: f64,
    /// Prior variance of each bias feature weight.
    pub bias_weight_variance: f64,
}

impl Default for FeatureHyperparameters {
    fn default() -> Self {
        FeatureHyperparameters {
            trait_weight_variance: 1.0,
            bias_weight_variance: 1.0,
        }
    }
}
