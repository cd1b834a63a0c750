//! Random search over autoencoder hyperparameters on MovieLens 100K.
//!
//! Results accumulate in `autoencoder_results.json`, sorted by test RMSE
//! with the best run first.
extern crate failure;
extern crate rae;
extern crate rand;
extern crate serde;
extern crate serde_json;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

use std::cmp;
use std::env;
use std::fs::File;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use rae::data::{user_based_split, EncodedRatings};
use rae::datasets::load_movielens_100k;
use rae::encoding::RatingEncoding;
use rae::evaluation::rmse_score;
use rae::models::autoencoder::{Hyperparameters, RatingAutoencoder};

const RESULTS_PATH: &str = "autoencoder_results.json";
const EVALUATION_MINIBATCH_SIZE: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct Result {
    test_rmse: f32,
    train_rmse: f32,
    elapsed: Duration,
    hyperparameters: Hyperparameters,
}

fn fit(
    train: &EncodedRatings,
    hyper: Hyperparameters,
) -> ::std::result::Result<RatingAutoencoder, failure::Error> {
    let mut model = hyper.build();
    let loss = model.fit(train)?;

    info!(loss = loss as f64, "fitted");

    Ok(model)
}

fn load_results() -> Vec<Result> {
    File::open(RESULTS_PATH)
        .ok()
        .and_then(|file| serde_json::from_reader(&file).ok())
        .unwrap_or_default()
}

fn main() -> ::std::result::Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = env::args().nth(1).unwrap_or_else(|| "u.data".to_owned());
    let mut data = load_movielens_100k(&path)?;
    let mut rng = rand::thread_rng();

    let (train, test) = user_based_split(&mut data, &mut rng, 0.2);

    let encoding = RatingEncoding::default();
    let train = train.to_encoded(&encoding)?;
    let test = test.to_encoded(&encoding)?;

    info!(
        users = data.num_users(),
        items = data.num_items(),
        "starting search"
    );

    for _ in 0..1000 {
        let mut results = load_results();

        let hyper = Hyperparameters::random(data.num_items(), &mut rng);
        info!(hyperparameters = ?hyper, "running");

        let minibatch_size = cmp::max(cmp::min(EVALUATION_MINIBATCH_SIZE, test.len()), 1);

        let start = Instant::now();
        let model = fit(&train, hyper.clone())?;
        let result = Result {
            train_rmse: rmse_score(&model, &train, minibatch_size)?,
            test_rmse: rmse_score(&model, &test, minibatch_size)?,
            elapsed: start.elapsed(),
            hyperparameters: hyper,
        };

        info!(result = ?result, "finished run");

        if !result.test_rmse.is_nan() {
            results.push(result);
            results.sort_by(|a, b| {
                a.test_rmse
                    .partial_cmp(&b.test_rmse)
                    .unwrap_or(cmp::Ordering::Equal)
            });
        }

        info!(best = ?results.first(), "best result so far");

        serde_json::to_writer_pretty(&File::create(RESULTS_PATH)?, &results)?;
    }

    Ok(())
}
