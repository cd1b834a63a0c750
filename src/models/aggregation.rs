//! Per-user aggregation of the ratings visible to the encoder.
//!
//! For one forward pass, every row of a minibatch is hidden from the
//! encoder with probability `mask_fraction`. Each user present in the
//! minibatch is then represented by
//! ```text
//! sum(encoder rows of visible ratings) / (visible count + smoothing)
//! ```
//! which is the product of a sparse (users x vocabulary) indicator matrix
//! with the dense encoder table. Because the encoder rows of a minibatch
//! are gathered per row anyway, the same product is expressed here as a
//! dense (rows x rows) weight matrix: row `i` holds the weights with which
//! every visible rating of row `i`'s user contributes to that user's mean.
use std::collections::HashMap;

use rand::Rng;

use wyrm::Arr;

use super::super::UserId;

/// Default value added to the visible count before dividing.
pub const DEFAULT_SMOOTHING: f32 = 1.0;

/// Visibility mask and per-user visible counts for one forward pass.
#[derive(Clone, Debug)]
pub struct UserAggregation {
    users: Vec<UserId>,
    user_index: Vec<usize>,
    visible: Vec<bool>,
    counts: Vec<usize>,
    smoothing: f32,
}

impl UserAggregation {
    /// Draw a fresh visibility mask for `user_ids`: a row is visible when
    /// a uniform draw from `[0, 1)` exceeds `mask_fraction`.
    pub fn new<R: Rng>(
        user_ids: &[UserId],
        mask_fraction: f32,
        smoothing: f32,
        rng: &mut R,
    ) -> Self {
        let visible = user_ids
            .iter()
            .map(|_| {
                let draw: f32 = rng.gen();
                mask_fraction <= 0.0 || draw > mask_fraction
            })
            .collect();

        UserAggregation::with_visibility(user_ids, visible, smoothing)
    }

    /// Aggregate with an explicit visibility mask.
    pub fn with_visibility(user_ids: &[UserId], visible: Vec<bool>, smoothing: f32) -> Self {
        assert_eq!(
            user_ids.len(),
            visible.len(),
            "One visibility flag per row is required."
        );

        let mut positions = HashMap::new();
        let mut users = Vec::new();
        let mut counts = Vec::new();

        let user_index = user_ids
            .iter()
            .zip(&visible)
            .map(|(&user_id, &is_visible)| {
                let position = *positions.entry(user_id).or_insert_with(|| {
                    users.push(user_id);
                    counts.push(0);
                    users.len() - 1
                });

                if is_visible {
                    counts[position] += 1;
                }

                position
            })
            .collect();

        UserAggregation {
            users,
            user_index,
            visible,
            counts,
            smoothing,
        }
    }

    #[cfg(test)]
    fn users(&self) -> &[UserId] {
        &self.users
    }

    /// Number of distinct users.
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Which rows the encoder sees.
    pub fn visible(&self) -> &[bool] {
        &self.visible
    }

    #[cfg(test)]
    fn visible_count(&self, user_id: UserId) -> Option<usize> {
        self.users
            .iter()
            .position(|&x| x == user_id)
            .map(|position| self.counts[position])
    }

    /// The `(rows x rows)` weight matrix mapping gathered encoder rows to
    /// the smoothed mean of each row's user.
    ///
    /// Users without visible rows get all-zero weights.
    pub fn weights(&self) -> Arr {
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); self.users.len()];

        for (row, (&position, &is_visible)) in self.user_index.iter().zip(&self.visible).enumerate()
        {
            if is_visible {
                members[position].push(row);
            }
        }

        let num_rows = self.len();
        let mut weights = Arr::zeros((num_rows, num_rows));

        for (row, &position) in self.user_index.iter().enumerate() {
            if members[position].is_empty() {
                continue;
            }

            let weight = 1.0 / (self.counts[position] as f32 + self.smoothing);

            for &member in &members[position] {
                weights[(row, member)] = weight;
            }
        }

        weights
    }
}
