#[macro_use]
extern crate criterion;

extern crate matchbox;
extern crate rand;

use criterion::Criterion;

use rand::distributions::{Distribution, Uniform};
use rand::{SeedableRng, XorShiftRng};

use matchbox::data::{Rating, Ratings};
use matchbox::models::recommender::Hyperparameters;

fn synthetic_ratings(num_users: usize, num_items: usize, num_ratings: usize) -> Ratings {
    let mut rng = XorShiftRng::from_seed([42; 16]);

    let users = Uniform::new(0, num_users);
    let items = Uniform::new(0, num_items);
    let levels = Uniform::new(0, 5);

    let mut ratings = Ratings::new(num_users, num_items, 5);

    for _ in 0..num_ratings {
        ratings.push(Rating::new(
            users.sample(&mut rng),
            items.sample(&mut rng),
            levels.sample(&mut rng),
        ));
    }

    ratings
}

fn bench_community(c: &mut Criterion) {
    c.bench_function("community", |b| {
        let data = synthetic_ratings(100, 50, 2000);

        b.iter(|| {
            let mut model = Hyperparameters::new(4)
                .iteration_count(5)
                .batch_count(4)
                .from_seed([42; 16])
                .build();

            model.fit(&data, None, None).unwrap();
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_community
}
criterion_main!(benches);
