//! Sparse feature containers for users and items.
//!
//! Feature data arrives from external sources and is validated once,
//! at construction; the containers are immutable afterwards. The
//! declared feature count is authoritative and need not equal the
//! largest index plus one.

use MappingError;

/// The non-zero features of a single entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseFeatureVector {
    indices: Vec<usize>,
    values: Vec<f64>,
    feature_count: usize,
}

impl SparseFeatureVector {
    /// Build a feature vector, checking that index and value arrays
    /// have matching lengths and that indices are unique and within
    /// the declared feature count.
    pub fn new(
        indices: Vec<usize>,
        values: Vec<f64>,
        feature_count: usize,
    ) -> Result<Self, MappingError> {
        if indices.len() != values.len() {
            return Err(MappingError::MismatchedLengths(indices.len(), values.len()));
        }

        for (position, &index) in indices.iter().enumerate() {
            if index >= feature_count {
                return Err(MappingError::FeatureIndexOutOfBounds(index, feature_count));
            }
            if indices[..position].contains(&index) {
                return Err(MappingError::DuplicateFeatureIndex(index));
            }
        }

        Ok(SparseFeatureVector {
            indices: indices,
            values: values,
            feature_count: feature_count,
        })
    }

    /// The all-zero feature vector with no declared features.
    pub fn empty() -> Self {
        SparseFeatureVector {
            indices: Vec::new(),
            values: Vec::new(),
            feature_count: 0,
        }
    }

    /// The declared feature dimensionality.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// The indices of the non-zero features.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The values of the non-zero features.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Sparse features for every entity of one kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseFeatureMatrix {
    rows: Vec<SparseFeatureVector>,
    feature_count: usize,
}

impl SparseFeatureMatrix {
    /// Build a feature matrix from per-entity rows, checking that
    /// every row declares the same feature count.
    pub fn new(rows: Vec<SparseFeatureVector>, feature_count: usize) -> Result<Self, MappingError> {
        for row in &rows {
            if row.feature_count() != feature_count {
                return Err(MappingError::FeatureCountMismatch(
                    row.feature_count(),
                    feature_count,
                ));
            }
        }

        Ok(SparseFeatureMatrix {
            rows: rows,
            feature_count: feature_count,
        })
    }

    /// The all-zero matrix used when features are disabled.
    pub fn empty(entity_count: usize) -> Self {
        SparseFeatureMatrix {
            rows: vec![SparseFeatureVector::empty(); entity_count],
            feature_count: 0,
        }
    }

    /// The number of entities covered.
    pub fn entity_count(&self) -> usize {
        self.rows.len()
    }

    /// The declared feature dimensionality.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// The feature vector of one entity.
    pub fn row(&self, entity_id: usize) -> &SparseFeatureVector {
        &self.rows[entity_id]
    }
}
