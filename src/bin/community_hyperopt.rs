#![allow(dead_code)]
#![allow(unused_variables)]
#![allow(unused_imports)]

extern crate csv;
extern crate matchbox;
extern crate rand;
extern crate serde;
extern crate serde_json;
#[macro_use]
extern crate serde_derive;

use std::fs::File;
use std::time::{Duration, Instant};

use matchbox::data::{user_based_split, Rating, Ratings};
use matchbox::evaluation::{mae_score, rmse_score};
use matchbox::models::recommender;

#[derive(Deserialize, Serialize)]
struct MovielensRating {
    user_id: usize,
    item_id: usize,
    rating: usize,
}

fn load_movielens(path: &str) -> Ratings {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let ratings: Vec<Rating> = reader
        .deserialize::<MovielensRating>()
        .map(|x| x.unwrap())
        .map(|x| Rating::new(x.user_id, x.item_id, x.rating.saturating_sub(1)))
        .take(100_000)
        .collect();

    Ratings::from(ratings)
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchResult {
    test_rmse: f64,
    test_mae: f64,
    train_rmse: f64,
    elapsed: Duration,
    hyperparameters: recommender::Hyperparameters,
}

fn fit(
    train: &Ratings,
    hyper: recommender::Hyperparameters,
) -> recommender::MatchboxRecommender {
    let mut model = hyper.build();
    model.fit(train, None, None).unwrap();

    model
}

fn main() {
    let mut data = load_movielens("ratings.csv");
    let mut rng = rand::thread_rng();

    let (train, test) = user_based_split(&mut data, &mut rng, 0.2);

    println!("Train: {}, test: {}", train.len(), test.len());

    for _ in 0..1000 {
        let mut results: Vec<SearchResult> = File::open("community_results.json")
            .map(|file| serde_json::from_reader(&file).unwrap())
            .unwrap_or(Vec::new());

        let hyper = recommender::Hyperparameters::random(&mut rng);
        println!("Running {:#?}", &hyper);

        println!("Users {} items {}", train.num_users(), train.num_items());

        let start = Instant::now();
        let model = fit(&train, hyper.clone());
        let result = SearchResult {
            train_rmse: rmse_score(&model, &train).unwrap(),
            test_rmse: rmse_score(&model, &test).unwrap(),
            test_mae: mae_score(&model, &test).unwrap(),
            elapsed: start.elapsed(),
            hyperparameters: hyper,
        };

        println!("{:#?}", result);

        if result.test_rmse.is_finite() {
            results.push(result);
            results.sort_by(|a, b| b.test_rmse.partial_cmp(&a.test_rmse).unwrap());
        }

        println!("Best result: {:#?}", results.last());

        File::create("community_results.json")
            .map(|file| serde_json::to_writer_pretty(&file, &results).unwrap())
            .unwrap();
    }
}
