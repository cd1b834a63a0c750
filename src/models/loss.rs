//! Pure loss functions over predictions and embedding tables.
//!
//! The training graph minimises the same quantity:
//! ```text
//! loss = mse(predictions, targets) + c * |encoder vectors|^2 + c * |decoder vectors|^2
//! ```
//! Biases are not regularised.
use wyrm::Arr;

/// Mean squared error. Zero for empty inputs.
pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> f32 {
    assert_eq!(
        predictions.len(),
        targets.len(),
        "Predictions and targets must have the same length."
    );

    if predictions.is_empty() {
        return 0.0;
    }

    let total: f32 = predictions
        .iter()
        .zip(targets)
        .map(|(prediction, target)| (prediction - target).powi(2))
        .sum();

    total / predictions.len() as f32
}

/// Sum of squares of all entries of `table`.
pub fn squared_norm(table: &Arr) -> f32 {
    table.iter().map(|x| x * x).sum()
}

/// MSE plus the L2 penalty on both embedding tables.
pub fn regularized_loss(
    predictions: &[f32],
    targets: &[f32],
    l2_penalty: f32,
    encoder_embedding: &Arr,
    decoder_embedding: &Arr,
) -> f32 {
    let mse = mean_squared_error(predictions, targets);

    if l2_penalty == 0.0 {
        return mse;
    }

    mse + l2_penalty * (squared_norm(encoder_embedding) + squared_norm(decoder_embedding))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_of_known_values() {
        assert_eq!(mean_squared_error(&[1.0, 2.0, 3.0], &[1.0, 4.0, 0.0]), 13.0 / 3.0);
        assert_eq!(mean_squared_error(&[], &[]), 0.0);
    }

    #[test]
    fn unregularized_loss_is_mse() {
        let encoder = Arr::from_elem((4, 3), 2.0);
        let decoder = Arr::from_elem((2, 3), -1.0);
        let predictions = [0.5, 1.5, 4.0];
        let targets = [1.0, 1.0, 5.0];

        assert_eq!(
            regularized_loss(&predictions, &targets, 0.0, &encoder, &decoder),
            mean_squared_error(&predictions, &targets)
        );
    }

    #[test]
    fn penalty_covers_both_tables() {
        let encoder = Arr::from_elem((4, 3), 2.0);
        let decoder = Arr::from_elem((2, 3), -1.0);

        assert_eq!(squared_norm(&encoder), 48.0);
        assert_eq!(squared_norm(&decoder), 6.0);

        let loss = regularized_loss(&[1.0], &[1.0], 0.5, &encoder, &decoder);
        assert_eq!(loss, 27.0);
    }

    #[test]
    fn loss_is_non_negative() {
        let encoder = Arr::from_elem((3, 2), -0.3);
        let decoder = Arr::from_elem((3, 2), 0.7);
        let predictions = [-4.0, 0.0, 2.5, 9.0];
        let targets = [5.0, 0.0, 2.5, -1.0];

        for &l2_penalty in &[0.0, 1e-6, 0.1] {
            let loss = regularized_loss(&predictions, &targets, l2_penalty, &encoder, &decoder);
            assert!(loss >= 0.0);
        }
    }
}
