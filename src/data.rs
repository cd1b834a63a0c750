//! Rating data: raw rating events, their encoded struct-of-arrays form,
//! and the minibatch loader used for training and evaluation.
use std::cmp;
use std::collections::HashMap;
use std::hash::Hasher;

use itertools::Itertools;
use rand::{Rng, XorShiftRng};

use siphasher::sip::SipHasher;

use super::encoding::RatingEncoding;
use super::{EncodingError, ItemId, Timestamp, UserId};

/// A single rating given by a user to an item.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Rating {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Timestamp,
}

impl Rating {
    /// Build a new rating event.
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32, timestamp: Timestamp) -> Self {
        Rating {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }

    /// The rating user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The rated item.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The rating value.
    pub fn rating(&self) -> f32 {
        self.rating
    }

    /// When the rating was given.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Randomly split ratings into train and test sets, with
/// `test_fraction` of the rows ending up in the test set.
pub fn train_test_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    ratings.shuffle(rng);

    let (test, train) = ratings.split_at((test_fraction * ratings.len() as f32) as usize);

    (train, test)
}

/// Split ratings so that every user ends up wholly in either the train
/// or the test set.
pub fn user_based_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

    let is_train = |x: &Rating| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        let user_id = x.user_id();
        hasher.write_usize(user_id);
        hasher.finish() % denominator > train_cutoff
    };

    ratings.split_by(is_train)
}

/// A collection of rating events.
#[derive(Clone, Debug)]
pub struct Ratings {
    num_users: usize,
    num_items: usize,
    ratings: Vec<Rating>,
}

impl Ratings {
    /// Build an empty collection for the given number of users and items.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Ratings {
            num_users,
            num_items,
            ratings: Vec::new(),
        }
    }

    /// Add a rating to the collection.
    pub fn push(&mut self, rating: Rating) {
        self.num_users = cmp::max(self.num_users, rating.user_id() + 1);
        self.num_items = cmp::max(self.num_items, rating.item_id() + 1);
        self.ratings.push(rating);
    }

    /// The underlying rating events.
    pub fn data(&self) -> &[Rating] {
        &self.ratings
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether there are no ratings.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Shuffle the ratings in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        rng.shuffle(&mut self.ratings);
    }

    /// Split into the first `idx` ratings and the rest.
    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let head = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            ratings: self.ratings[..idx].to_owned(),
        };
        let tail = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            ratings: self.ratings[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Split into ratings for which `func` holds and the rest.
    pub fn split_by<F: Fn(&Rating) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<Rating>, Vec<Rating>) =
            self.ratings.iter().cloned().partition(|x| func(x));

        (
            Ratings {
                num_users: self.num_users,
                num_items: self.num_items,
                ratings: head,
            },
            Ratings {
                num_users: self.num_users,
                num_items: self.num_items,
                ratings: tail,
            },
        )
    }

    /// Derive the item-rating codes and lay the ratings out as parallel
    /// feature and target arrays.
    pub fn to_encoded(&self, encoding: &RatingEncoding) -> Result<EncodedRatings, EncodingError> {
        let mut encoded = EncodedRatings::with_capacity(self.num_users, self.num_items, self.len());

        for rating in &self.ratings {
            let code = encoding.code(rating.item_id(), rating.rating())?;
            encoded.push(rating.user_id(), rating.item_id(), code, rating.rating());
        }

        Ok(encoded)
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Rating>> for Ratings {
    fn from(data: Vec<Rating>) -> Ratings {
        let num_users = data.iter().map(|x| x.user_id() + 1).max().unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_id() + 1).max().unwrap_or(0);

        Ratings {
            num_users,
            num_items,
            ratings: data,
        }
    }
}

/// How rows are reordered at the start of every pass over the data.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Shuffle {
    /// Keep the current order.
    None,
    /// Apply one random permutation to all rows.
    Rows,
    /// Randomly reorder users, keeping each user's rows contiguous.
    Users,
}

/// Ratings laid out as parallel arrays: the features (user id, item id,
/// item-rating code) and the targets (rating values).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodedRatings {
    num_users: usize,
    num_items: usize,
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
    codes: Vec<usize>,
    ratings: Vec<f32>,
}

fn reorder<T: Copy>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&idx| values[idx]).collect()
}

impl EncodedRatings {
    fn with_capacity(num_users: usize, num_items: usize, capacity: usize) -> Self {
        EncodedRatings {
            num_users,
            num_items,
            user_ids: Vec::with_capacity(capacity),
            item_ids: Vec::with_capacity(capacity),
            codes: Vec::with_capacity(capacity),
            ratings: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, user_id: UserId, item_id: ItemId, code: usize, rating: f32) {
        self.user_ids.push(user_id);
        self.item_ids.push(item_id);
        self.codes.push(code);
        self.ratings.push(rating);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// User id column.
    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Item id column.
    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    /// Item-rating code column.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    /// Target column.
    pub fn ratings(&self) -> &[f32] {
        &self.ratings
    }

    /// The rows in `start..stop` as a single minibatch.
    pub fn minibatch(&self, start: usize, stop: usize) -> Minibatch {
        Minibatch {
            user_ids: &self.user_ids[start..stop],
            item_ids: &self.item_ids[start..stop],
            codes: &self.codes[start..stop],
            ratings: &self.ratings[start..stop],
        }
    }

    /// Number of complete minibatches of `minibatch_size` rows.
    pub fn num_minibatches(&self, minibatch_size: usize) -> usize {
        if minibatch_size == 0 {
            0
        } else {
            self.len() / minibatch_size
        }
    }

    /// Iterate over complete minibatches in row order. Trailing rows that
    /// do not fill a minibatch are skipped.
    pub fn iter_minibatch(&self, minibatch_size: usize) -> MinibatchIterator {
        MinibatchIterator {
            data: self,
            idx: 0,
            stop_idx: self.len(),
            minibatch_size,
        }
    }

    /// Split the minibatch sequence into at most `num_partitions`
    /// iterators, each starting on a minibatch boundary.
    pub fn iter_minibatch_partitioned(
        &self,
        minibatch_size: usize,
        num_partitions: usize,
    ) -> Vec<MinibatchIterator> {
        let iterator = self.iter_minibatch(minibatch_size);
        let num_minibatches = self.num_minibatches(minibatch_size);
        let num_partitions = cmp::max(num_partitions, 1);
        let chunk_size = (num_minibatches + num_partitions - 1) / num_partitions;

        (0..num_partitions)
            .map(|x| {
                let start = cmp::min(x * chunk_size, num_minibatches);
                let stop = cmp::min((x + 1) * chunk_size, num_minibatches);
                iterator.slice(start * minibatch_size, stop * minibatch_size)
            })
            .filter(|iterator| iterator.num_minibatches() > 0)
            .collect()
    }

    /// Reorder all columns jointly: row `i` becomes the old row `order[i]`.
    pub fn permute(&mut self, order: &[usize]) {
        debug_assert_eq!(order.len(), self.len());

        self.user_ids = reorder(&self.user_ids, order);
        self.item_ids = reorder(&self.item_ids, order);
        self.codes = reorder(&self.codes, order);
        self.ratings = reorder(&self.ratings, order);
    }

    /// Shuffle the rows according to `shuffle`.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R, shuffle: Shuffle) {
        let mut order: Vec<usize> = (0..self.len()).collect();

        match shuffle {
            Shuffle::None => return,
            Shuffle::Rows => rng.shuffle(&mut order),
            Shuffle::Users => {
                let mut users: Vec<UserId> = self.user_ids.iter().cloned().unique().collect();
                rng.shuffle(&mut users);

                let rank: HashMap<UserId, usize> = users
                    .into_iter()
                    .enumerate()
                    .map(|(rank, user_id)| (user_id, rank))
                    .collect();

                // Stable, so rows keep their relative order within a user.
                order.sort_by_key(|&idx| rank[&self.user_ids[idx]]);
            }
        }

        self.permute(&order);
    }

    /// Split into `num_partitions` parts, each user's rows all landing
    /// in the same part.
    pub fn partition_by_user(&self, num_partitions: usize) -> Vec<EncodedRatings> {
        let num_partitions = cmp::max(num_partitions, 1);
        let mut partitions: Vec<_> = (0..num_partitions)
            .map(|_| {
                EncodedRatings::with_capacity(
                    self.num_users,
                    self.num_items,
                    self.len() / num_partitions,
                )
            })
            .collect();

        for (&user_id, &item_id, &code, &rating) in
            izip!(&self.user_ids, &self.item_ids, &self.codes, &self.ratings)
        {
            partitions[user_id % num_partitions].push(user_id, item_id, code, rating);
        }

        partitions
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Iterator over complete minibatches of encoded ratings.
#[derive(Clone, Debug)]
pub struct MinibatchIterator<'a> {
    data: &'a EncodedRatings,
    idx: usize,
    stop_idx: usize,
    minibatch_size: usize,
}

impl<'a> MinibatchIterator<'a> {
    /// Restrict the iterator to rows `start..stop`.
    pub fn slice(&self, start: usize, stop: usize) -> MinibatchIterator<'a> {
        MinibatchIterator {
            data: self.data,
            idx: start,
            stop_idx: stop,
            minibatch_size: self.minibatch_size,
        }
    }

    /// Number of complete minibatches left.
    pub fn num_minibatches(&self) -> usize {
        if self.minibatch_size == 0 {
            0
        } else {
            self.stop_idx.saturating_sub(self.idx) / self.minibatch_size
        }
    }
}

/// A contiguous slice of encoded ratings.
#[derive(Debug)]
pub struct Minibatch<'a> {
    /// User id of every row.
    pub user_ids: &'a [UserId],
    /// Item id of every row.
    pub item_ids: &'a [ItemId],
    /// Item-rating code of every row.
    pub codes: &'a [usize],
    /// Target rating of every row.
    pub ratings: &'a [f32],
}

impl<'a> Minibatch<'a> {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the minibatch has no rows.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

impl<'a> Iterator for MinibatchIterator<'a> {
    type Item = Minibatch<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.minibatch_size == 0 || self.idx + self.minibatch_size > self.stop_idx {
            return None;
        }

        let start = self.idx;
        let stop = self.idx + self.minibatch_size;

        self.idx = stop;

        Some(self.data.minibatch(start, stop))
    }
}

/// Produces one pass of minibatches per call to `epoch`, reshuffling
/// the underlying data first.
pub struct MinibatchLoader<'a> {
    data: &'a mut EncodedRatings,
    minibatch_size: usize,
    shuffle: Shuffle,
    rng: XorShiftRng,
}

impl<'a> MinibatchLoader<'a> {
    /// Build a loader over `data`.
    pub fn new(
        data: &'a mut EncodedRatings,
        minibatch_size: usize,
        shuffle: Shuffle,
        rng: XorShiftRng,
    ) -> Self {
        MinibatchLoader {
            data,
            minibatch_size,
            shuffle,
            rng,
        }
    }

    /// Number of complete minibatches per pass.
    pub fn num_minibatches(&self) -> usize {
        self.data.num_minibatches(self.minibatch_size)
    }

    /// The data in its current order.
    pub fn data(&self) -> &EncodedRatings {
        &*self.data
    }

    /// Start a new pass over the data from offset zero.
    pub fn epoch(&mut self) -> MinibatchIterator {
        self.data.shuffle(&mut self.rng, self.shuffle);
        self.data.iter_minibatch(self.minibatch_size)
    }
}
