//! Gaussian belief primitives.
//!
//! Beliefs are stored in natural parameters (precision and mean times
//! precision), making products and ratios of distributions additive. A
//! point mass is represented with infinite precision, with the first
//! field holding the location; this admits point masses at infinity,
//! which the ordinal rating thresholds use for their outermost cut
//! points.

use std::f64;

/// A univariate Gaussian belief in natural parameterization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    // For a point mass this field holds the location itself.
    mean_times_precision: f64,
    precision: f64,
}

impl Gaussian {
    /// The uniform (uninformative) belief.
    pub fn uniform() -> Self {
        Gaussian {
            mean_times_precision: 0.0,
            precision: 0.0,
        }
    }

    /// A belief with the given mean and variance.
    pub fn from_mean_and_variance(mean: f64, variance: f64) -> Self {
        if variance == 0.0 {
            Gaussian::point_mass(mean)
        } else if variance.is_infinite() {
            Gaussian::uniform()
        } else {
            Gaussian {
                mean_times_precision: mean / variance,
                precision: 1.0 / variance,
            }
        }
    }

    /// A belief with the given natural parameters.
    pub fn from_natural(mean_times_precision: f64, precision: f64) -> Self {
        Gaussian {
            mean_times_precision: mean_times_precision,
            precision: precision,
        }
    }

    /// A point mass at `location`. The location may be infinite.
    pub fn point_mass(location: f64) -> Self {
        Gaussian {
            mean_times_precision: location,
            precision: f64::INFINITY,
        }
    }

    /// The mean of the belief. Zero for the uniform belief.
    pub fn mean(&self) -> f64 {
        if self.is_point_mass() {
            self.mean_times_precision
        } else if self.precision == 0.0 {
            0.0
        } else {
            self.mean_times_precision / self.precision
        }
    }

    /// The variance of the belief. Infinite for the uniform belief.
    pub fn variance(&self) -> f64 {
        if self.is_point_mass() {
            0.0
        } else if self.precision == 0.0 {
            f64::INFINITY
        } else {
            1.0 / self.precision
        }
    }

    /// The precision (inverse variance) of the belief.
    pub fn precision(&self) -> f64 {
        self.precision
    }

    /// Whether this belief is a point mass.
    pub fn is_point_mass(&self) -> bool {
        self.precision.is_infinite()
    }

    /// Whether this belief carries no information.
    pub fn is_uniform(&self) -> bool {
        self.precision == 0.0 && self.mean_times_precision == 0.0
    }

    /// Whether this belief is a normalizable distribution.
    pub fn is_proper(&self) -> bool {
        self.precision >= 0.0
    }

    /// The product of two beliefs.
    ///
    /// A point mass absorbs any finite-precision operand.
    pub fn product(&self, other: &Gaussian) -> Gaussian {
        if self.is_point_mass() {
            debug_assert!(
                !other.is_point_mass() || self.mean() == other.mean(),
                "product of point masses at distinct locations"
            );
            return *self;
        }
        if other.is_point_mass() {
            return *other;
        }

        Gaussian {
            mean_times_precision: self.mean_times_precision + other.mean_times_precision,
            precision: self.precision + other.precision,
        }
    }

    /// The ratio of two beliefs.
    ///
    /// With `force_proper`, a result with negative precision collapses
    /// to the uniform belief instead of becoming an improper
    /// distribution. The ratio of two equal point masses is uniform; a
    /// point-mass denominator otherwise removes all information.
    pub fn ratio(&self, other: &Gaussian, force_proper: bool) -> Gaussian {
        if self.is_point_mass() {
            if other.is_point_mass() {
                return Gaussian::uniform();
            }
            return *self;
        }
        if other.is_point_mass() {
            return Gaussian::uniform();
        }

        let precision = self.precision - other.precision;

        if force_proper && precision < 0.0 {
            return Gaussian::uniform();
        }

        Gaussian {
            mean_times_precision: self.mean_times_precision - other.mean_times_precision,
            precision: precision,
        }
    }

    /// The belief raised to a power.
    pub fn power(&self, exponent: f64) -> Gaussian {
        if exponent == 0.0 {
            return Gaussian::uniform();
        }

        if self.is_point_mass() {
            debug_assert!(exponent > 0.0, "point mass raised to a negative power");
            return *self;
        }

        Gaussian {
            mean_times_precision: self.mean_times_precision * exponent,
            precision: self.precision * exponent,
        }
    }
}

/// The standard normal density at `x`.
pub fn normal_pdf(x: f64) -> f64 {
    (-x * x / 2.0).exp() / (2.0 * f64::consts::PI).sqrt()
}

/// The standard normal CDF at `x`, via the Abramowitz and Stegun
/// approximation of the error function.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// The additive mean correction for conditioning `N(t, 1)` on being
/// positive. Falls back to the asymptote for very negative `t`.
pub fn truncation_mean_shift(t: f64) -> f64 {
    let denominator = normal_cdf(t);

    if denominator < 1e-300 {
        return -t;
    }

    normal_pdf(t) / denominator
}

/// The multiplicative variance correction for conditioning `N(t, 1)` on
/// being positive.
pub fn truncation_variance_scale(t: f64) -> f64 {
    let shift = truncation_mean_shift(t);

    shift * (shift + t)
}

/// The moments of `N(mean, variance)` conditioned on being positive.
pub fn truncate_positive(mean: f64, variance: f64) -> (f64, f64) {
    let scale = variance.sqrt();
    let t = mean / scale;

    let truncated_mean = mean + scale * truncation_mean_shift(t);
    let truncated_variance = variance * (1.0 - truncation_variance_scale(t)).max(1e-12);

    (truncated_mean, truncated_variance)
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn product_adds_natural_parameters() {
        let a = Gaussian::from_mean_and_variance(2.0, 0.5);
        let b = Gaussian::from_mean_and_variance(2.0, 1.0 / 3.0);

        let product = a.product(&b);

        assert!((product.precision() - 5.0).abs() < 1e-12);
        assert!((product.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn ratio_inverts_product() {
        let a = Gaussian::from_mean_and_variance(1.0, 2.0);
        let b = Gaussian::from_mean_and_variance(-0.5, 4.0);

        let recovered = a.product(&b).ratio(&b, false);

        assert!((recovered.mean() - a.mean()).abs() < 1e-12);
        assert!((recovered.variance() - a.variance()).abs() < 1e-12);
    }

    #[test]
    fn forced_ratio_is_proper() {
        let narrow = Gaussian::from_mean_and_variance(0.0, 0.1);
        let wide = Gaussian::from_mean_and_variance(0.0, 10.0);

        let forced = wide.ratio(&narrow, true);

        assert!(forced.is_uniform());
        assert!(!wide.ratio(&narrow, false).is_proper());
    }

    #[test]
    fn point_mass_absorbs_product() {
        let mass = Gaussian::point_mass(3.0);
        let other = Gaussian::from_mean_and_variance(0.0, 1.0);

        assert_eq!(mass.product(&other), mass);
        assert_eq!(other.product(&mass), mass);
        assert!(mass.ratio(&mass, false).is_uniform());
    }

    #[test]
    fn infinite_point_mass_round_trips() {
        let mass = Gaussian::point_mass(::std::f64::NEG_INFINITY);

        assert!(mass.is_point_mass());
        assert!(mass.mean().is_infinite());
        assert_eq!(mass.variance(), 0.0);
    }

    #[test]
    fn power_scales_precision() {
        let belief = Gaussian::from_mean_and_variance(1.0, 2.0);
        let halved = belief.power(0.5);

        assert!((halved.precision() - 0.25).abs() < 1e-12);
        assert!((halved.mean() - 1.0).abs() < 1e-12);
        assert!(belief.power(0.0).is_uniform());
    }

    #[test]
    fn cdf_matches_known_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn standard_normal_truncation_moments() {
        let (mean, variance) = truncate_positive(0.0, 1.0);

        // E[x | x > 0] = sqrt(2 / pi) for the standard normal.
        assert!((mean - (2.0 / ::std::f64::consts::PI).sqrt()).abs() < 1e-4);
        assert!(variance < 1.0);
        assert!(variance > 0.0);
    }
}
