//! The belief state over all model parameters.

use ndarray::{Array1, Array2};

use features::SparseFeatureMatrix;
use gaussian::Gaussian;
use MappingError;

/// Immutable summary of one training call's instance data: entity
/// counts plus the sparse feature blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    num_users: usize,
    num_items: usize,
    num_rating_levels: usize,
    user_features: SparseFeatureMatrix,
    item_features: SparseFeatureMatrix,
}

impl InstanceMetadata {
    /// Build metadata, checking that the feature blocks cover the
    /// declared entity counts.
    pub fn new(
        num_users: usize,
        num_items: usize,
        num_rating_levels: usize,
        user_features: SparseFeatureMatrix,
        item_features: SparseFeatureMatrix,
    ) -> Result<Self, MappingError> {
        if user_features.entity_count() != num_users {
            return Err(MappingError::EntityCountMismatch(
                user_features.entity_count(),
                num_users,
            ));
        }
        if item_features.entity_count() != num_items {
            return Err(MappingError::EntityCountMismatch(
                item_features.entity_count(),
                num_items,
            ));
        }

        Ok(InstanceMetadata {
            num_users: num_users,
            num_items: num_items,
            num_rating_levels: num_rating_levels,
            user_features: user_features,
            item_features: item_features,
        })
    }

    /// Build metadata with features disabled.
    pub fn without_features(num_users: usize, num_items: usize, num_rating_levels: usize) -> Self {
        InstanceMetadata {
            num_users: num_users,
            num_items: num_items,
            num_rating_levels: num_rating_levels,
            user_features: SparseFeatureMatrix::empty(num_users),
            item_features: SparseFeatureMatrix::empty(num_items),
        }
    }

    /// The number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// The number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The number of distinct rating levels.
    pub fn num_rating_levels(&self) -> usize {
        self.num_rating_levels
    }

    /// The user feature block.
    pub fn user_features(&self) -> &SparseFeatureMatrix {
        &self.user_features
    }

    /// The item feature block.
    pub fn item_features(&self) -> &SparseFeatureMatrix {
        &self.item_features
    }
}

/// Beliefs over the feature weights of one entity kind: a trait-weight
/// matrix and a bias-weight vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureParameterDistribution {
    pub(crate) trait_weights: Array2<Gaussian>,
    pub(crate) bias_weights: Array1<Gaussian>,
}

impl FeatureParameterDistribution {
    /// Uniform beliefs over the given dimensions.
    pub fn uniform(trait_count: usize, feature_count: usize) -> Self {
        FeatureParameterDistribution {
            trait_weights: Array2::from_elem((trait_count, feature_count), Gaussian::uniform()),
            bias_weights: Array1::from_elem(feature_count, Gaussian::uniform()),
        }
    }

    /// The block used when features are disabled.
    pub fn empty(trait_count: usize) -> Self {
        FeatureParameterDistribution::uniform(trait_count, 0)
    }

    /// The number of features covered.
    pub fn feature_count(&self) -> usize {
        self.bias_weights.len()
    }

    /// The trait-weight belief matrix, traits by features.
    pub fn trait_weights(&self) -> &Array2<Gaussian> {
        &self.trait_weights
    }

    /// The bias-weight belief vector.
    pub fn bias_weights(&self) -> &Array1<Gaussian> {
        &self.bias_weights
    }
}

/// The aggregate belief state over all user and item parameters.
///
/// This is the value threaded through training: initialized uniform
/// from metadata, combined in place through products, ratios and
/// powers during the message-passing loop, and finally frozen as the
/// trained posterior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterDistributions {
    pub(crate) user_traits: Array2<Gaussian>,
    pub(crate) user_biases: Array1<Gaussian>,
    pub(crate) user_thresholds: Array2<Gaussian>,
    pub(crate) item_traits: Array2<Gaussian>,
    pub(crate) item_biases: Array1<Gaussian>,
    pub(crate) user_features: FeatureParameterDistribution,
    pub(crate) item_features: FeatureParameterDistribution,
}

impl ParameterDistributions {
    /// Uniform beliefs for the entity counts in `metadata` and the
    /// given trait count.
    pub fn uniform(metadata: &InstanceMetadata, trait_count: usize) -> Self {
        let num_users = metadata.num_users();
        let num_items = metadata.num_items();
        let num_thresholds = metadata.num_rating_levels() + 1;

        ParameterDistributions {
            user_traits: Array2::from_elem((num_users, trait_count), Gaussian::uniform()),
            user_biases: Array1::from_elem(num_users, Gaussian::uniform()),
            user_thresholds: Array2::from_elem((num_users, num_thresholds), Gaussian::uniform()),
            item_traits: Array2::from_elem((num_items, trait_count), Gaussian::uniform()),
            item_biases: Array1::from_elem(num_items, Gaussian::uniform()),
            user_features: FeatureParameterDistribution::uniform(
                trait_count,
                metadata.user_features().feature_count(),
            ),
            item_features: FeatureParameterDistribution::uniform(
                trait_count,
                metadata.item_features().feature_count(),
            ),
        }
    }

    /// Assemble a belief state from explicit arrays. Absent feature
    /// blocks are treated as empty.
    pub fn from_parts(
        user_traits: Array2<Gaussian>,
        user_biases: Array1<Gaussian>,
        user_thresholds: Array2<Gaussian>,
        item_traits: Array2<Gaussian>,
        item_biases: Array1<Gaussian>,
        user_features: Option<FeatureParameterDistribution>,
        item_features: Option<FeatureParameterDistribution>,
    ) -> Self {
        let trait_count = user_traits.dim().1;

        assert_eq!(user_traits.dim().0, user_biases.len());
        assert_eq!(user_traits.dim().0, user_thresholds.dim().0);
        assert_eq!(item_traits.dim().0, item_biases.len());
        assert_eq!(item_traits.dim().1, trait_count);

        let user_features =
            user_features.unwrap_or_else(|| FeatureParameterDistribution::empty(trait_count));
        let item_features =
            item_features.unwrap_or_else(|| FeatureParameterDistribution::empty(trait_count));

        assert_eq!(user_features.trait_weights.dim().0, trait_count);
        assert_eq!(
            user_features.trait_weights.dim().1,
            user_features.bias_weights.len()
        );
        assert_eq!(item_features.trait_weights.dim().0, trait_count);
        assert_eq!(
            item_features.trait_weights.dim().1,
            item_features.bias_weights.len()
        );

        ParameterDistributions {
            user_traits: user_traits,
            user_biases: user_biases,
            user_thresholds: user_thresholds,
            item_traits: item_traits,
            item_biases: item_biases,
            user_features: user_features,
            item_features: item_features,
        }
    }

    /// The number of users covered.
    pub fn num_users(&self) -> usize {
        self.user_biases.len()
    }

    /// The number of items covered.
    pub fn num_items(&self) -> usize {
        self.item_biases.len()
    }

    /// The number of latent traits per entity.
    pub fn trait_count(&self) -> usize {
        self.user_traits.dim().1
    }

    /// The number of rating thresholds per user.
    pub fn threshold_count(&self) -> usize {
        self.user_thresholds.dim().1
    }

    /// The user trait belief matrix, users by traits.
    pub fn user_traits(&self) -> &Array2<Gaussian> {
        &self.user_traits
    }

    /// The user bias belief vector.
    pub fn user_biases(&self) -> &Array1<Gaussian> {
        &self.user_biases
    }

    /// The user threshold belief matrix, users by thresholds.
    pub fn user_thresholds(&self) -> &Array2<Gaussian> {
        &self.user_thresholds
    }

    /// The item trait belief matrix, items by traits.
    pub fn item_traits(&self) -> &Array2<Gaussian> {
        &self.item_traits
    }

    /// The item bias belief vector.
    pub fn item_biases(&self) -> &Array1<Gaussian> {
        &self.item_biases
    }

    /// The user-side feature weight beliefs.
    pub fn user_features(&self) -> &FeatureParameterDistribution {
        &self.user_features
    }

    /// The item-side feature weight beliefs.
    pub fn item_features(&self) -> &FeatureParameterDistribution {
        &self.item_features
    }

    /// The belief snapshot for a single user.
    pub fn for_user(&self, user_id: usize) -> UserParameterDistribution {
        UserParameterDistribution {
            traits: self.user_traits.row(user_id).to_vec(),
            bias: self.user_biases[user_id],
            thresholds: self.user_thresholds.row(user_id).to_vec(),
        }
    }

    /// The belief snapshot for a single item.
    pub fn for_item(&self, item_id: usize) -> ItemParameterDistribution {
        ItemParameterDistribution {
            traits: self.item_traits.row(item_id).to_vec(),
            bias: self.item_biases[item_id],
        }
    }

    /// Reset the five entity-indexed arrays to uniform. Feature
    /// blocks are left untouched: they take part in inference only
    /// once, at the final step, never in per-batch combination.
    pub fn set_entity_parameters_to_uniform(&mut self) {
        for belief in self
            .user_traits
            .iter_mut()
            .chain(self.user_biases.iter_mut())
            .chain(self.user_thresholds.iter_mut())
            .chain(self.item_traits.iter_mut())
            .chain(self.item_biases.iter_mut())
        {
            *belief = Gaussian::uniform();
        }
    }

    /// Set the entity-indexed arrays to the elementwise ratio of two
    /// operands. Feature blocks are left untouched.
    pub fn set_entity_parameters_to_ratio(
        &mut self,
        numerator: &ParameterDistributions,
        denominator: &ParameterDistributions,
        force_proper: bool,
    ) {
        self.combine_entity_parameters(numerator, denominator, &|x: &Gaussian, y: &Gaussian| {
            x.ratio(y, force_proper)
        });
    }

    /// Set the entity-indexed arrays to the elementwise product of
    /// two operands. Feature blocks are left untouched.
    pub fn set_entity_parameters_to_product(
        &mut self,
        left: &ParameterDistributions,
        right: &ParameterDistributions,
    ) {
        self.combine_entity_parameters(left, right, &|x: &Gaussian, y: &Gaussian| x.product(y));
    }

    /// Set the entity-indexed arrays to an operand raised to a power.
    /// Feature blocks are left untouched.
    pub fn set_entity_parameters_to_power(
        &mut self,
        value: &ParameterDistributions,
        exponent: f64,
    ) {
        self.map_entity_parameters(value, &|x: &Gaussian| x.power(exponent));
    }

    fn combine_entity_parameters<F>(
        &mut self,
        left: &ParameterDistributions,
        right: &ParameterDistributions,
        combine: &F,
    ) where
        F: Fn(&Gaussian, &Gaussian) -> Gaussian,
    {
        combine_matrix(
            &mut self.user_traits,
            &left.user_traits,
            &right.user_traits,
            combine,
        );
        combine_vector(
            &mut self.user_biases,
            &left.user_biases,
            &right.user_biases,
            combine,
        );
        combine_matrix(
            &mut self.user_thresholds,
            &left.user_thresholds,
            &right.user_thresholds,
            combine,
        );
        combine_matrix(
            &mut self.item_traits,
            &left.item_traits,
            &right.item_traits,
            combine,
        );
        combine_vector(
            &mut self.item_biases,
            &left.item_biases,
            &right.item_biases,
            combine,
        );
    }

    fn map_entity_parameters<F>(&mut self, value: &ParameterDistributions, map: &F)
    where
        F: Fn(&Gaussian) -> Gaussian,
    {
        map_matrix(&mut self.user_traits, &value.user_traits, map);
        map_vector(&mut self.user_biases, &value.user_biases, map);
        map_matrix(&mut self.user_thresholds, &value.user_thresholds, map);
        map_matrix(&mut self.item_traits, &value.item_traits, map);
        map_vector(&mut self.item_biases, &value.item_biases, map);
    }
}

fn combine_matrix<F>(
    target: &mut Array2<Gaussian>,
    left: &Array2<Gaussian>,
    right: &Array2<Gaussian>,
    combine: &F,
) where
    F: Fn(&Gaussian, &Gaussian) -> Gaussian,
{
    assert_eq!(target.dim(), left.dim(), "operand shape mismatch");
    assert_eq!(left.dim(), right.dim(), "operand shape mismatch");

    for ((belief, x), y) in target.iter_mut().zip(left.iter()).zip(right.iter()) {
        *belief = combine(x, y);
    }
}

fn combine_vector<F>(
    target: &mut Array1<Gaussian>,
    left: &Array1<Gaussian>,
    right: &Array1<Gaussian>,
    combine: &F,
) where
    F: Fn(&Gaussian, &Gaussian) -> Gaussian,
{
    assert_eq!(target.len(), left.len(), "operand shape mismatch");
    assert_eq!(left.len(), right.len(), "operand shape mismatch");

    for ((belief, x), y) in target.iter_mut().zip(left.iter()).zip(right.iter()) {
        *belief = combine(x, y);
    }
}

fn map_matrix<F>(target: &mut Array2<Gaussian>, value: &Array2<Gaussian>, map: &F)
where
    F: Fn(&Gaussian) -> Gaussian,
{
    assert_eq!(target.dim(), value.dim(), "operand shape mismatch");

    for (belief, x) in target.iter_mut().zip(value.iter()) {
        *belief = map(x);
    }
}

fn map_vector<F>(target: &mut Array1<Gaussian>, value: &Array1<Gaussian>, map: &F)
where
    F: Fn(&Gaussian) -> Gaussian,
{
    assert_eq!(target.len(), value.len(), "operand shape mismatch");

    for (belief, x) in target.iter_mut().zip(value.iter()) {
        *belief = map(x);
    }
}

/// The belief snapshot of a single user's parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserParameterDistribution {
    /// Trait beliefs.
    pub traits: Vec<Gaussian>,
    /// Bias belief.
    pub bias: Gaussian,
    /// Ordinal threshold beliefs.
    pub thresholds: Vec<Gaussian>,
}

/// The belief snapshot of a single item's parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemParameterDistribution {
    /// Trait beliefs.
    pub traits: Vec<Gaussian>,
    /// Bias belief.
    pub bias: Gaussian,
}

#[cfg(test)]
mod tests {

    use serde_json;

    use super::*;

    fn toy_metadata() -> InstanceMetadata {
        InstanceMetadata::without_features(3, 2, 5)
    }

    fn informative(metadata: &InstanceMetadata, trait_count: usize, seed: f64) -> ParameterDistributions {
        let mut distributions = ParameterDistributions::uniform(metadata, trait_count);

        for (offset, belief) in distributions
            .user_traits
            .iter_mut()
            .chain(distributions.user_biases.iter_mut())
            .chain(distributions.user_thresholds.iter_mut())
            .chain(distributions.item_traits.iter_mut())
            .chain(distributions.item_biases.iter_mut())
            .enumerate()
        {
            *belief = Gaussian::from_mean_and_variance(seed + offset as f64 * 0.1, 1.0 + seed);
        }

        distributions
    }

    #[test]
    fn uniform_construction_has_consistent_shapes() {
        let distributions = ParameterDistributions::uniform(&toy_metadata(), 4);

        assert_eq!(distributions.num_users(), 3);
        assert_eq!(distributions.num_items(), 2);
        assert_eq!(distributions.trait_count(), 4);
        assert_eq!(distributions.threshold_count(), 6);
        assert_eq!(distributions.user_traits().dim(), (3, 4));
        assert_eq!(distributions.item_traits().dim(), (2, 4));
    }

    #[test]
    fn combinators_leave_feature_blocks_untouched() {
        let metadata = InstanceMetadata::new(
            3,
            2,
            5,
            ::features::SparseFeatureMatrix::new(
                vec![
                    ::features::SparseFeatureVector::new(vec![0], vec![1.0], 2).unwrap(),
                    ::features::SparseFeatureVector::new(vec![1], vec![2.0], 2).unwrap(),
                    ::features::SparseFeatureVector::new(vec![], vec![], 2).unwrap(),
                ],
                2,
            ).unwrap(),
            ::features::SparseFeatureMatrix::empty(2),
        ).unwrap();

        let mut target = ParameterDistributions::uniform(&metadata, 2);
        let left = informative(&metadata, 2, 1.0);
        let right = informative(&metadata, 2, 2.0);

        let user_block = target.user_features().clone();
        let item_block = target.item_features().clone();

        target.set_entity_parameters_to_product(&left, &right);
        target.set_entity_parameters_to_ratio(&left, &right, true);
        target.set_entity_parameters_to_power(&left, 0.5);
        target.set_entity_parameters_to_uniform();

        assert_eq!(target.user_features(), &user_block);
        assert_eq!(target.item_features(), &item_block);
    }

    #[test]
    fn product_then_ratio_recovers_operand() {
        let metadata = toy_metadata();
        let left = informative(&metadata, 2, 1.0);
        let right = informative(&metadata, 2, 2.0);

        let mut product = ParameterDistributions::uniform(&metadata, 2);
        product.set_entity_parameters_to_product(&left, &right);

        let mut recovered = ParameterDistributions::uniform(&metadata, 2);
        recovered.set_entity_parameters_to_ratio(&product, &right, false);

        for (original, recovered) in left
            .user_traits()
            .iter()
            .zip(recovered.user_traits().iter())
        {
            assert!((original.mean() - recovered.mean()).abs() < 1e-9);
            assert!((original.variance() - recovered.variance()).abs() < 1e-9);
        }
    }

    #[test]
    fn slices_expose_entity_rows() {
        let metadata = toy_metadata();
        let distributions = informative(&metadata, 2, 1.0);

        let user = distributions.for_user(1);
        let item = distributions.for_item(0);

        assert_eq!(user.traits.len(), 2);
        assert_eq!(user.thresholds.len(), 6);
        assert_eq!(user.traits[0], distributions.user_traits()[[1, 0]]);
        assert_eq!(user.bias, distributions.user_biases()[1]);
        assert_eq!(item.traits.len(), 2);
        assert_eq!(item.bias, distributions.item_biases()[0]);
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let metadata = toy_metadata();
        let mut original = informative(&metadata, 2, 1.0);
        let snapshot = original.clone();

        original.set_entity_parameters_to_uniform();

        assert!(snapshot != original);
        assert_eq!(snapshot, informative(&metadata, 2, 1.0));
    }

    #[test]
    fn distributions_round_trip_through_serde() {
        let metadata = toy_metadata();
        let original = informative(&metadata, 2, 1.0);

        let copy: ParameterDistributions =
            serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();

        assert_eq!(original, copy);
    }
}
