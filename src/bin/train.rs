//! Train a rating autoencoder on MovieLens data, reporting train and
//! test RMSE after every epoch and printing the nearest neighbours of
//! the most rated items at the end.
extern crate clap;
extern crate failure;
extern crate rae;
extern crate rand;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

use std::cmp;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::{SeedableRng, XorShiftRng};
use tracing_subscriber::EnvFilter;

use rae::data::{train_test_split, user_based_split, EncodedRatings, Ratings};
use rae::datasets;
use rae::encoding::RatingEncoding;
use rae::evaluation::rmse_score;
use rae::models::autoencoder::{Hyperparameters, RatingAutoencoder};
use rae::models::Parallelism;
use rae::PredictionError;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// `ratings.csv`: comma separated with a header.
    Csv,
    /// MovieLens 100K `u.data`: tab separated.
    Tab,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Split {
    /// Random rows go to the test set.
    Rows,
    /// Whole users go to the test set.
    Users,
}

/// Train a rating autoencoder.
#[derive(Debug, Parser)]
#[command(version)]
struct Options {
    /// Ratings file.
    path: PathBuf,
    /// Format of the ratings file.
    #[arg(long, value_enum, default_value_t = Format::Tab)]
    format: Format,
    /// Fraction of ratings held out for testing.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f32,
    /// How the test set is drawn.
    #[arg(long, value_enum, default_value_t = Split::Rows)]
    split: Split,
    /// Embedding dimensionality.
    #[arg(long, default_value_t = 16)]
    embedding_dim: usize,
    /// L2 penalty on both embedding tables.
    #[arg(long, default_value_t = 1e-6)]
    l2_penalty: f32,
    /// Learning rate.
    #[arg(long, default_value_t = 0.01)]
    learning_rate: f32,
    /// Probability of hiding a rating from the encoder while training.
    #[arg(long, default_value_t = 0.5)]
    mask_fraction: f32,
    /// Minibatch size.
    #[arg(long, default_value_t = 256)]
    minibatch_size: usize,
    /// Number of epochs.
    #[arg(long, default_value_t = 10)]
    num_epochs: usize,
    /// Random seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Number of training threads.
    #[arg(long, default_value_t = 1)]
    num_threads: usize,
    /// Number of neighbours to print per item.
    #[arg(long, default_value_t = 5)]
    neighbours: usize,
}

fn seed_bytes(seed: u64) -> [u8; 16] {
    let mut bytes = [0x5e; 16];

    for (idx, byte) in bytes.iter_mut().take(8).enumerate() {
        *byte = (seed >> (8 * idx)) as u8;
    }

    bytes
}

fn most_rated(ratings: &Ratings, num: usize) -> Vec<usize> {
    let mut counts = HashMap::new();

    for rating in ratings.data() {
        *counts.entry(rating.item_id()).or_insert(0) += 1;
    }

    let mut counts: Vec<(usize, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    counts.into_iter().take(num).map(|(item_id, _)| item_id).collect()
}

/// RMSE on the held-out ratings, evaluated in minibatches of at most
/// `minibatch_size` rows. `None` when nothing was held out.
fn held_out_rmse(
    model: &RatingAutoencoder,
    test: &EncodedRatings,
    minibatch_size: usize,
) -> Result<Option<f32>, PredictionError> {
    if test.is_empty() {
        return Ok(None);
    }

    let minibatch_size = cmp::max(cmp::min(minibatch_size, test.len()), 1);

    rmse_score(model, test, minibatch_size).map(Some)
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = Options::parse();

    let mut data = match options.format {
        Format::Csv => datasets::load_movielens_csv(&options.path)?,
        Format::Tab => datasets::load_movielens_100k(&options.path)?,
    };

    let mut rng = XorShiftRng::from_seed(seed_bytes(options.seed));

    let (train, test) = match options.split {
        Split::Rows => train_test_split(&mut data, &mut rng, options.test_fraction),
        Split::Users => user_based_split(&mut data, &mut rng, options.test_fraction),
    };

    info!(
        train = train.len(),
        test = test.len(),
        "split ratings"
    );

    let encoding = RatingEncoding::default();
    let encoded_train = train.to_encoded(&encoding)?;
    let encoded_test = test.to_encoded(&encoding)?;

    let mut model = Hyperparameters::new(data.num_items())
        .encoding(encoding)
        .embedding_dim(options.embedding_dim)
        .l2_penalty(options.l2_penalty)
        .learning_rate(options.learning_rate)
        .mask_fraction(options.mask_fraction)
        .minibatch_size(options.minibatch_size)
        .num_threads(options.num_threads)
        .parallelism(Parallelism::Synchronous)
        .num_epochs(1)
        .rng(rng)
        .build();

    for epoch in 0..options.num_epochs {
        let start = Instant::now();

        let loss = model.fit(&encoded_train)?;
        let train_rmse = rmse_score(&model, &encoded_train, options.minibatch_size)?;
        let test_rmse = held_out_rmse(&model, &encoded_test, options.minibatch_size)?;

        info!(
            epoch = epoch,
            loss = loss as f64,
            train_rmse = train_rmse as f64,
            test_rmse = ?test_rmse,
            elapsed = ?start.elapsed(),
            "finished epoch"
        );
    }

    for item_id in most_rated(&train, 10) {
        let neighbours = model.nearest_items(item_id, options.neighbours)?;

        println!("Item {}:", item_id);
        for (neighbour, distance) in neighbours {
            println!("    {} ({:.4})", neighbour, distance);
        }
    }

    Ok(())
}
