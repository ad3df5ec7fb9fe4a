//! Rating data structures and train/test splitting utilities.

use std;
use std::hash::Hasher;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use siphasher::sip::SipHasher;

use super::{ItemId, MappingError, RatingLevel, UserId};

/// A single observed rating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rating {
    user_id: UserId,
    item_id: ItemId,
    value: RatingLevel,
}

impl Rating {
    /// Build a rating. The value is a 0-based rating level.
    pub fn new(user_id: UserId, item_id: ItemId, value: RatingLevel) -> Self {
        Rating {
            user_id: user_id,
            item_id: item_id,
            value: value,
        }
    }

    /// The id of the rating user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The id of the rated item.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The 0-based rating level.
    pub fn value(&self) -> RatingLevel {
        self.value
    }
}

/// Randomly split ratings into test and train sets.
pub fn train_test_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    ratings.shuffle(rng);

    let (test, train) = ratings.split_at((test_fraction * ratings.len() as f32) as usize);

    (train, test)
}

/// Split ratings into test and train sets so that every user's
/// ratings land wholly in one side of the split.
pub fn user_based_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let range = Uniform::new(0, std::u64::MAX);
    let (key_0, key_1) = (range.sample(rng), range.sample(rng));

    let is_train = |x: &Rating| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(x.user_id());
        hasher.finish() % denominator > train_cutoff
    };

    ratings.split_by(is_train)
}

/// A collection of ratings with declared user, item and rating-level
/// counts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ratings {
    num_users: usize,
    num_items: usize,
    num_rating_levels: usize,
    ratings: Vec<Rating>,
}

impl Ratings {
    /// Build an empty collection with the given bounds.
    pub fn new(num_users: usize, num_items: usize, num_rating_levels: usize) -> Self {
        Ratings {
            num_users: num_users,
            num_items: num_items,
            num_rating_levels: num_rating_levels,
            ratings: Vec::new(),
        }
    }

    /// Add a rating.
    pub fn push(&mut self, rating: Rating) {
        self.ratings.push(rating);
    }

    /// The underlying rating slice.
    pub fn data(&self) -> &[Rating] {
        &self.ratings
    }

    /// The number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether the collection holds no ratings.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Shuffle the ratings in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        rng.shuffle(&mut self.ratings);
    }

    /// Split into two collections at the given index.
    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let head = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            num_rating_levels: self.num_rating_levels,
            ratings: self.ratings[..idx].to_owned(),
        };
        let tail = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            num_rating_levels: self.num_rating_levels,
            ratings: self.ratings[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Split into two collections by a predicate.
    pub fn split_by<F: Fn(&Rating) -> bool>(&self, func: F) -> (Self, Self) {
        let head = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            num_rating_levels: self.num_rating_levels,
            ratings: self.ratings.iter().filter(|x| func(x)).cloned().collect(),
        };
        let tail = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            num_rating_levels: self.num_rating_levels,
            ratings: self.ratings.iter().filter(|x| !func(x)).cloned().collect(),
        };

        (head, tail)
    }

    /// Build the parallel-array view of one training batch.
    ///
    /// Batches are contiguous chunks; the last batch takes the
    /// remainder. Batches are rebuilt on every call rather than
    /// cached: they are iteration-invariant but costly to retain.
    pub fn batch(&self, index: usize, num_batches: usize) -> RatingBatch {
        assert!(num_batches > 0, "batch count must be positive");
        assert!(index < num_batches, "batch index {} out of range", index);

        let chunk_size = self.len() / num_batches;
        let start = index * chunk_size;
        let stop = if index + 1 == num_batches {
            self.len()
        } else {
            start + chunk_size
        };

        let chunk = &self.ratings[start..stop];

        RatingBatch {
            user_ids: chunk.iter().map(|x| x.user_id()).collect(),
            item_ids: chunk.iter().map(|x| x.item_id()).collect(),
            values: chunk.iter().map(|x| x.value()).collect(),
        }
    }

    /// The declared number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// The declared number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The declared number of distinct rating levels.
    pub fn num_rating_levels(&self) -> usize {
        self.num_rating_levels
    }

    /// The (number of users, number of items) tuple.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Rating>> for Ratings {
    fn from(data: Vec<Rating>) -> Ratings {
        let num_users = data.iter().map(|x| x.user_id()).max().unwrap() + 1;
        let num_items = data.iter().map(|x| x.item_id()).max().unwrap() + 1;
        let num_rating_levels = data.iter().map(|x| x.value()).max().unwrap() + 1;

        Ratings {
            num_users: num_users,
            num_items: num_items,
            num_rating_levels: num_rating_levels,
            ratings: data,
        }
    }
}

/// The per-batch instance data: three parallel arrays of equal length.
#[derive(Clone, Debug, Default)]
pub struct RatingBatch {
    /// Rating user ids.
    pub user_ids: Vec<UserId>,
    /// Rated item ids.
    pub item_ids: Vec<ItemId>,
    /// 0-based rating levels.
    pub values: Vec<RatingLevel>,
}

impl RatingBatch {
    /// A batch with no observations.
    pub fn empty() -> Self {
        RatingBatch::default()
    }

    /// The number of observations in the batch.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the batch holds no observations.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Check the batch against declared bounds, surfacing violations
    /// as mapping inconsistencies rather than generic errors.
    pub fn validate(
        &self,
        num_users: usize,
        num_items: usize,
        num_rating_levels: usize,
    ) -> Result<(), MappingError> {
        if self.user_ids.len() != self.item_ids.len() {
            return Err(MappingError::MismatchedLengths(
                self.user_ids.len(),
                self.item_ids.len(),
            ));
        }
        if self.user_ids.len() != self.values.len() {
            return Err(MappingError::MismatchedLengths(
                self.user_ids.len(),
                self.values.len(),
            ));
        }

        for (&user_id, &item_id, &value) in izip!(&self.user_ids, &self.item_ids, &self.values) {
            if user_id >= num_users {
                return Err(MappingError::UserIdOutOfBounds(user_id, num_users));
            }
            if item_id >= num_items {
                return Err(MappingError::ItemIdOutOfBounds(item_id, num_items));
            }
            if value >= num_rating_levels {
                return Err(MappingError::RatingOutOfBounds(value, num_rating_levels));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn toy_ratings() -> Ratings {
        let mut ratings = Ratings::new(4, 3, 5);

        for user_id in 0..4 {
            for item_id in 0..3 {
                ratings.push(Rating::new(user_id, item_id, (user_id + item_id) % 5));
            }
        }

        ratings
    }

    #[test]
    fn from_vec_infers_bounds() {
        let ratings = Ratings::from(vec![
            Rating::new(0, 5, 3),
            Rating::new(2, 1, 0),
            Rating::new(1, 0, 4),
        ]);

        assert_eq!(ratings.shape(), (3, 6));
        assert_eq!(ratings.num_rating_levels(), 5);
    }

    #[test]
    fn batches_partition_the_data() {
        let ratings = toy_ratings();

        let total: usize = (0..5).map(|b| ratings.batch(b, 5).len()).sum();

        assert_eq!(total, ratings.len());

        let last = ratings.batch(4, 5);
        assert_eq!(last.len(), ratings.len() - 4 * (ratings.len() / 5));
    }

    #[test]
    fn single_batch_is_everything() {
        let ratings = toy_ratings();
        let batch = ratings.batch(0, 1);

        assert_eq!(batch.len(), ratings.len());
        assert!(batch.validate(4, 3, 5).is_ok());
    }

    #[test]
    fn validation_rejects_out_of_bounds_ids() {
        let batch = RatingBatch {
            user_ids: vec![0, 7],
            item_ids: vec![0, 1],
            values: vec![1, 1],
        };

        match batch.validate(4, 3, 5) {
            Err(MappingError::UserIdOutOfBounds(7, 4)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validation_rejects_out_of_bounds_ratings() {
        let batch = RatingBatch {
            user_ids: vec![0],
            item_ids: vec![0],
            values: vec![5],
        };

        assert!(batch.validate(4, 3, 5).is_err());
    }

    #[test]
    fn user_based_split_separates_users() {
        let mut ratings = toy_ratings();
        let mut rng = XorShiftRng::from_seed([42; 16]);

        let (train, test) = user_based_split(&mut ratings, &mut rng, 0.5);

        assert_eq!(train.len() + test.len(), 12);

        for train_rating in train.data() {
            for test_rating in test.data() {
                assert!(train_rating.user_id() != test_rating.user_id());
            }
        }
    }
}
