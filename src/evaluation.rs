//! Evaluation of rating models.
//!
//! Scores are computed with every rating visible to the encoder, over
//! complete minibatches only.
use rand::{SeedableRng, XorShiftRng};
use rayon;
use rayon::prelude::*;

use super::models::loss::mean_squared_error;
use super::{PredictionError, RatingModel};
use data::EncodedRatings;

/// Mean squared error of `model` on `test`, evaluated in minibatches
/// of `minibatch_size` rows.
pub fn mse_score<T: RatingModel + Sync>(
    model: &T,
    test: &EncodedRatings,
    minibatch_size: usize,
) -> Result<f32, PredictionError> {
    if test.num_minibatches(minibatch_size) == 0 {
        return Err(PredictionError::NoMinibatches);
    }

    let num_partitions = rayon::current_num_threads();

    let partials: Vec<(f32, usize)> = test
        .iter_minibatch_partitioned(minibatch_size, num_partitions)
        .into_par_iter()
        .map(|partition| -> Result<(f32, usize), PredictionError> {
            // Nothing is masked, so the draws never matter.
            let mut rng = XorShiftRng::from_seed([42; 16]);
            let mut squared_error = 0.0;
            let mut num_observations = 0;

            for minibatch in partition {
                let predictions = model.predict_minibatch(&minibatch, 0.0, &mut rng)?;

                squared_error +=
                    mean_squared_error(&predictions, minibatch.ratings) * minibatch.len() as f32;
                num_observations += minibatch.len();
            }

            Ok((squared_error, num_observations))
        })
        .collect::<Result<Vec<_>, PredictionError>>()?;

    let (squared_error, num_observations) = partials
        .into_iter()
        .fold((0.0, 0), |(error, count), (x, y)| (error + x, count + y));

    Ok(squared_error / num_observations as f32)
}

/// Root mean squared error of `model` on `test`.
pub fn rmse_score<T: RatingModel + Sync>(
    model: &T,
    test: &EncodedRatings,
    minibatch_size: usize,
) -> Result<f32, PredictionError> {
    Ok(mse_score(model, test, minibatch_size)?.sqrt())
}
