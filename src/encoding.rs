//! Encoding of (item, rating) pairs into the encoder vocabulary.
//!
//! Every distinct rating level of every item gets its own encoder row:
//! ```text
//! code = item_id * levels + round(rating * scale)
//! ```
//! With the default of 10 levels this is `item_id * 10 + rating`, so
//! the last decimal digit of the code is the rating level. A level outside
//! `0..levels` would alias a level of the neighbouring item, and is rejected.
use super::{EncodingError, ItemId};

/// Default number of rating levels reserved per item.
pub const DEFAULT_LEVELS: usize = 10;

/// Maps ratings onto item-rating codes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RatingEncoding {
    levels: usize,
    scale: f32,
}

impl Default for RatingEncoding {
    fn default() -> Self {
        RatingEncoding {
            levels: DEFAULT_LEVELS,
            scale: 1.0,
        }
    }
}

impl RatingEncoding {
    /// Build a new encoding with `levels` codes per item, multiplying
    /// ratings by `scale` before rounding.
    ///
    /// A scale of 2.0 maps half-star ratings onto integer levels.
    ///
    /// # Panics
    /// If `levels` is zero, or `scale` is not finite and positive.
    pub fn new(levels: usize, scale: f32) -> Self {
        assert!(levels > 0, "At least one rating level is required.");
        assert!(
            scale.is_finite() && scale > 0.0,
            "Rating scale must be finite and positive."
        );

        RatingEncoding { levels, scale }
    }

    /// Number of codes reserved per item.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Multiplier applied to ratings before rounding.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// The rounded rating level of `rating`.
    pub fn level(&self, item_id: ItemId, rating: f32) -> Result<usize, EncodingError> {
        let level = (rating * self.scale).round();

        if !level.is_finite() || level < 0.0 || level >= self.levels as f32 {
            return Err(EncodingError::InvalidRatingEncoding { item_id, rating });
        }

        Ok(level as usize)
    }

    /// The item-rating code of `rating` given to `item_id`.
    pub fn code(&self, item_id: ItemId, rating: f32) -> Result<usize, EncodingError> {
        Ok(item_id * self.levels + self.level(item_id, rating)?)
    }

    /// Recover the item id and rating level from a code.
    pub fn decode(&self, code: usize) -> (ItemId, usize) {
        (code / self.levels, code % self.levels)
    }

    /// Size of the encoder vocabulary for `num_items` items, including
    /// one reserved padding row at the end.
    pub fn vocabulary_size(&self, num_items: usize) -> usize {
        num_items * self.levels + 1
    }

    /// Index of the reserved padding row.
    pub fn padding_code(&self, num_items: usize) -> usize {
        num_items * self.levels
    }
}
