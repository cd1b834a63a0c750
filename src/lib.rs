#![deny(missing_docs)]
//! # rae
//!
//! `rae` implements a rating autoencoder for collaborative filtering.
//! Users are never given their own latent vectors: instead, every user
//! is encoded on the fly as the (smoothed) mean of the embeddings of the
//! (item, rating) pairs they have produced, and that representation is
//! scored against an independent set of item embeddings to predict
//! ratings.
//!
//! During training, half of each user's ratings in a minibatch are hidden
//! from the encoder, so the model learns to predict ratings it cannot see.
//!
//! ## Example
//! ```rust,no_run
//! # extern crate rae;
//! # extern crate rand;
//! # use rand::SeedableRng;
//! let mut data = rae::datasets::load_movielens_100k("u.data").unwrap();
//!
//! let mut rng = rand::XorShiftRng::from_seed([42; 16]);
//!
//! let (train, test) = rae::data::train_test_split(&mut data, &mut rng, 0.2);
//! let encoding = rae::encoding::RatingEncoding::default();
//! let train = train.to_encoded(&encoding).unwrap();
//! let test = test.to_encoded(&encoding).unwrap();
//!
//! let mut model = rae::models::autoencoder::Hyperparameters::new(data.num_items())
//!     .embedding_dim(16)
//!     .learning_rate(0.01)
//!     .l2_penalty(1e-6)
//!     .num_epochs(10)
//!     .rng(rng)
//!     .build();
//!
//! let loss = model.fit(&train).unwrap();
//! let test_rmse = rae::evaluation::rmse_score(&model, &test, 256).unwrap();
//!
//! println!("Loss {} and test RMSE {}", loss, test_rmse);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate tracing;

extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate siphasher;

extern crate wyrm;

pub mod data;
pub mod datasets;
pub mod encoding;
pub mod evaluation;
pub mod models;

use rand::XorShiftRng;

use data::Minibatch;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Rating encoding error types.
#[derive(Debug, Fail, PartialEq)]
pub enum EncodingError {
    /// The rating level would collide with the code of another item.
    #[fail(
        display = "Invalid rating encoding: rating {} of item {} is outside the encodable levels.",
        rating, item_id
    )]
    InvalidRatingEncoding {
        /// Item the rating belongs to.
        item_id: ItemId,
        /// The offending rating value.
        rating: f32,
    },
}

/// Prediction error types.
#[derive(Debug, Fail, PartialEq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// An item id or rating code does not fit the embedding tables.
    #[fail(display = "Index out of bounds: {} does not fit a table of {} rows.", index, rows)]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// Number of rows in the table.
        rows: usize,
    },
    /// The data holds fewer rows than a single minibatch.
    #[fail(display = "No complete minibatches to evaluate.")]
    NoMinibatches,
    /// A rating could not be encoded.
    #[fail(display = "Invalid rating: {}", _0)]
    InvalidRating(#[cause] EncodingError),
}

impl From<EncodingError> for PredictionError {
    fn from(error: EncodingError) -> Self {
        PredictionError::InvalidRating(error)
    }
}

/// Fitting error types.
#[derive(Debug, Fail, PartialEq)]
pub enum FittingError {
    /// No complete minibatch in the training data.
    #[fail(display = "No interactions to fit the model on.")]
    NoInteractions,
    /// Training data references items the model has no parameters for.
    #[fail(
        display = "Incompatible data: {} items in the data, the model was built for {}.",
        data_items, model_items
    )]
    IncompatibleData {
        /// Number of items in the data.
        data_items: usize,
        /// Number of items the model was built for.
        model_items: usize,
    },
}

/// Trait describing models that predict ratings for whole minibatches,
/// encoding users from the ratings present in the same minibatch.
pub trait RatingModel {
    /// Predict one rating per row of `minibatch`.
    ///
    /// Each row is hidden from the user encoder with probability
    /// `mask_fraction`; `0.0` uses every rating.
    fn predict_minibatch(
        &self,
        minibatch: &Minibatch,
        mask_fraction: f32,
        rng: &mut XorShiftRng,
    ) -> Result<Vec<f32>, PredictionError>;
}

/// Trait describing models that can compute predictions given
/// a user's past ratings.
pub trait OnlineRatingModel {
    /// The representation the model computes from past ratings.
    type UserRepresentation: std::fmt::Debug;
    /// Compute a user representation from past `(item, rating)` pairs.
    fn user_representation(
        &self,
        ratings: &[(ItemId, f32)],
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Given a user representation, predict the ratings the user
    /// would give `item_ids`.
    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[ItemId],
    ) -> Result<Vec<f32>, PredictionError>;
}
