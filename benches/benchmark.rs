#[macro_use]
extern crate criterion;

extern crate rae;
extern crate rand;

use criterion::Criterion;
use rand::{Rng, SeedableRng, XorShiftRng};

use rae::data::{EncodedRatings, Rating, Ratings};
use rae::encoding::RatingEncoding;
use rae::models::autoencoder::Hyperparameters;
use rae::models::Optimizer;

fn synthetic_ratings(num_users: usize, num_items: usize, num_ratings: usize) -> EncodedRatings {
    let mut rng = XorShiftRng::from_seed([42; 16]);

    let ratings: Vec<Rating> = (0..num_ratings)
        .map(|timestamp| {
            let user_id = rng.gen_range(0, num_users);
            let item_id = rng.gen_range(0, num_items);
            let rating = ((user_id + item_id) % 5 + 1) as f32;

            Rating::new(user_id, item_id, rating, timestamp)
        })
        .collect();

    Ratings::from(ratings)
        .to_encoded(&RatingEncoding::default())
        .unwrap()
}

fn bench_autoencoder(c: &mut Criterion) {
    c.bench_function("autoencoder", |b| {
        let data = synthetic_ratings(500, 1000, 10_000);

        let mut model = Hyperparameters::new(1000)
            .embedding_dim(32)
            .learning_rate(0.01)
            .l2_penalty(1e-6)
            .optimizer(Optimizer::Adam)
            .minibatch_size(256)
            .num_epochs(1)
            .num_threads(1)
            .from_seed([42; 16])
            .build();

        b.iter(|| {
            model.fit(&data).unwrap();
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_autoencoder
}
criterion_main!(benches);
