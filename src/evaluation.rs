//! Evaluation metrics for rating prediction.

use rayon::prelude::*;

use data::Ratings;
use {PredictionError, RatingPredictionModel};

/// Root-mean-squared error of expected ratings over a test set.
pub fn rmse_score<T: RatingPredictionModel + Sync>(
    model: &T,
    test: &Ratings,
) -> Result<f64, PredictionError> {
    assert!(!test.is_empty(), "scoring an empty test set");

    let squared_errors: Result<Vec<f64>, PredictionError> = test
        .data()
        .par_iter()
        .map(|rating| {
            model
                .expected_rating(rating.user_id(), rating.item_id())
                .map(|predicted| {
                    let error = predicted - rating.value() as f64;

                    error * error
                })
        })
        .collect();

    let squared_errors = squared_errors?;

    Ok((squared_errors.iter().sum::<f64>() / squared_errors.len() as f64).sqrt())
}

/// Mean absolute error of expected ratings over a test set.
pub fn mae_score<T: RatingPredictionModel + Sync>(
    model: &T,
    test: &Ratings,
) -> Result<f64, PredictionError> {
    assert!(!test.is_empty(), "scoring an empty test set");

    let errors: Result<Vec<f64>, PredictionError> = test
        .data()
        .par_iter()
        .map(|rating| {
            model
                .expected_rating(rating.user_id(), rating.item_id())
                .map(|predicted| (predicted - rating.value() as f64).abs())
        })
        .collect();

    let errors = errors?;

    Ok(errors.iter().sum::<f64>() / errors.len() as f64)
}

#[cfg(test)]
mod tests {

    use super::*;
    use data::Rating;
    use models::recommender::Hyperparameters;

    fn toy_ratings() -> Ratings {
        let mut ratings = Ratings::new(3, 3, 5);

        for user_id in 0..3 {
            for item_id in 0..3 {
                ratings.push(Rating::new(user_id, item_id, user_id + item_id));
            }
        }

        ratings
    }

    #[test]
    fn training_error_is_bounded() {
        let ratings = toy_ratings();

        let mut model = Hyperparameters::new(2)
            .iteration_count(5)
            .from_seed([42; 16])
            .build();

        model.fit(&ratings, None, None).unwrap();

        let rmse = rmse_score(&model, &ratings).unwrap();
        let mae = mae_score(&model, &ratings).unwrap();

        assert!(rmse.is_finite());
        assert!(rmse < 2.0);
        assert!(mae <= rmse + 1e-9);
    }

    #[test]
    fn scoring_requires_a_trained_model() {
        let model = Hyperparameters::new(2).build();

        match rmse_score(&model, &toy_ratings()) {
            Err(PredictionError::NotTrained) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
