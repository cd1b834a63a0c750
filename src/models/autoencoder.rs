//! Rating autoencoder.
//!
//! The model estimates two independent sets of parameters:
//!
//! - an encoder table: a bias and an n-dimensional embedding for every
//!   (item, rating level) pair, indexed by item-rating code, and
//! - a decoder table: a bias and an n-dimensional embedding for every item.
//!
//! Users have no parameters of their own. Within a minibatch, a user `u`
//! is encoded as the smoothed mean of the encoder rows of the ratings
//! they have in the minibatch and that are visible in this pass:
//! ```text
//! b_u = sum(b_code) / (n_u + s)
//! e_u = sum(e_code) / (n_u + s)
//! ```
//! and the rating of item `i` is predicted as
//! ```text
//! r_ui = b_u + b_i + e_u . d_i
//! ```
//! During training every rating is hidden from the encoder with
//! probability `mask_fraction`, but all ratings are scored.
use std::cmp;
use std::sync::Arc;

use rand;
use rand::distributions::{Distribution, Normal, Uniform};
use rand::{Rng, SeedableRng, XorShiftRng};
use rayon;
use rayon::prelude::*;

use ndarray::{aview1, Array1, Axis};

use wyrm;
use wyrm::optim::{Optimizer as Optim, Optimizers, Synchronizable};
use wyrm::{Arr, BoxedNode, DataInput, Variable};

use super::aggregation::{UserAggregation, DEFAULT_SMOOTHING};
use super::loss;
use super::{Optimizer, Parallelism};
use data::{EncodedRatings, Minibatch, MinibatchLoader, Shuffle};
use encoding::RatingEncoding;
use {FittingError, ItemId, OnlineRatingModel, PredictionError, RatingModel};

fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> wyrm::Arr {
    let normal = Normal::new(0.0, 1.0 / cols as f64);
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

/// Hyperparameters describing the rating autoencoder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_items: usize,
    encoding: RatingEncoding,
    embedding_dim: usize,
    l2_penalty: f32,
    mask_fraction: f32,
    smoothing: f32,
    learning_rate: f32,
    optimizer: Optimizer,
    minibatch_size: usize,
    num_epochs: usize,
    num_threads: usize,
    parallelism: Parallelism,
    shuffle: Shuffle,
    rng: XorShiftRng,
}

impl Hyperparameters {
    /// Build new hyperparameters for a catalogue of `num_items` items.
    pub fn new(num_items: usize) -> Self {
        Hyperparameters {
            num_items,
            encoding: RatingEncoding::default(),
            embedding_dim: 16,
            l2_penalty: 1e-6,
            mask_fraction: 0.5,
            smoothing: DEFAULT_SMOOTHING,
            learning_rate: 0.01,
            optimizer: Optimizer::Adam,
            minibatch_size: 256,
            num_epochs: 10,
            num_threads: 1,
            parallelism: Parallelism::Synchronous,
            shuffle: Shuffle::Rows,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    /// Set the L2 penalty applied to both embedding tables.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the probability of hiding a rating from the encoder during training.
    pub fn mask_fraction(mut self, mask_fraction: f32) -> Self {
        self.mask_fraction = mask_fraction;
        self
    }

    /// Set the constant added to the visible rating count before averaging.
    pub fn smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Set the rating encoding.
    pub fn encoding(mut self, encoding: RatingEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the minibatch size.
    pub fn minibatch_size(mut self, minibatch_size: usize) -> Self {
        self.minibatch_size = minibatch_size;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set number of threads to be used.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the type of paralellism.
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set how training data is reshuffled between epochs.
    pub fn shuffle(mut self, shuffle: Shuffle) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    /// Set hyperparameters randomly: useful for hyperparameter search.
    pub fn random<R: Rng>(num_items: usize, rng: &mut R) -> Self {
        Hyperparameters {
            num_items,
            encoding: RatingEncoding::default(),
            embedding_dim: 2_usize.pow(Uniform::new(2, 7).sample(rng)),
            l2_penalty: (10.0_f32).powf(Uniform::new(-8.0, -3.0).sample(rng)),
            mask_fraction: Uniform::new(0.2, 0.8).sample(rng),
            smoothing: DEFAULT_SMOOTHING,
            learning_rate: (10.0_f32).powf(Uniform::new(-3.0, -0.5).sample(rng)),
            optimizer: if Uniform::new(0.0, 1.0).sample(rng) < 0.5 {
                Optimizer::Adam
            } else {
                Optimizer::Adagrad
            },
            minibatch_size: 2_usize.pow(Uniform::new(6, 11).sample(rng)),
            num_epochs: 2_usize.pow(Uniform::new(2, 6).sample(rng)),
            num_threads: 1,
            parallelism: Parallelism::Synchronous,
            shuffle: if Uniform::new(0.0, 1.0).sample(rng) < 0.5 {
                Shuffle::Rows
            } else {
                Shuffle::Users
            },
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Number of items the model has decoder rows for.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Number of rows in the encoder table.
    pub fn encoder_vocabulary_size(&self) -> usize {
        self.encoding.vocabulary_size(self.num_items)
    }

    /// Number of rows in the decoder table.
    pub fn decoder_vocabulary_size(&self) -> usize {
        self.num_items + 1
    }

    fn build_params(mut self) -> Parameters {
        let encoder_rows = self.encoder_vocabulary_size();
        let decoder_rows = self.decoder_vocabulary_size();

        let encoder_embedding = embedding_init(encoder_rows, self.embedding_dim, &mut self.rng);
        let decoder_embedding = embedding_init(decoder_rows, self.embedding_dim, &mut self.rng);

        Parameters::new(
            self,
            encoder_embedding,
            Arr::zeros((encoder_rows, 1)),
            decoder_embedding,
            Arr::zeros((decoder_rows, 1)),
        )
    }

    /// Build the rating autoencoder.
    pub fn build(self) -> RatingAutoencoder {
        RatingAutoencoder {
            params: self.build_params(),
        }
    }
}

#[derive(Debug)]
struct Parameters {
    hyper: Hyperparameters,
    encoder_embedding: Arc<wyrm::HogwildParameter>,
    encoder_biases: Arc<wyrm::HogwildParameter>,
    decoder_embedding: Arc<wyrm::HogwildParameter>,
    decoder_biases: Arc<wyrm::HogwildParameter>,
}

impl Clone for Parameters {
    fn clone(&self) -> Self {
        Parameters {
            hyper: self.hyper.clone(),
            encoder_embedding: Arc::new(self.encoder_embedding.as_ref().clone()),
            encoder_biases: Arc::new(self.encoder_biases.as_ref().clone()),
            decoder_embedding: Arc::new(self.decoder_embedding.as_ref().clone()),
            decoder_biases: Arc::new(self.decoder_biases.as_ref().clone()),
        }
    }
}

impl Parameters {
    fn new(
        hyper: Hyperparameters,
        encoder_embedding: Arr,
        encoder_biases: Arr,
        decoder_embedding: Arr,
        decoder_biases: Arr,
    ) -> Self {
        let encoder_shape = (hyper.encoder_vocabulary_size(), hyper.embedding_dim);
        let decoder_shape = (hyper.decoder_vocabulary_size(), hyper.embedding_dim);

        assert_eq!(encoder_embedding.dim(), encoder_shape, "Bad encoder embedding shape.");
        assert_eq!(encoder_biases.dim(), (encoder_shape.0, 1), "Bad encoder bias shape.");
        assert_eq!(decoder_embedding.dim(), decoder_shape, "Bad decoder embedding shape.");
        assert_eq!(decoder_biases.dim(), (decoder_shape.0, 1), "Bad decoder bias shape.");

        Parameters {
            hyper,
            encoder_embedding: Arc::new(wyrm::HogwildParameter::new(encoder_embedding)),
            encoder_biases: Arc::new(wyrm::HogwildParameter::new(encoder_biases)),
            decoder_embedding: Arc::new(wyrm::HogwildParameter::new(decoder_embedding)),
            decoder_biases: Arc::new(wyrm::HogwildParameter::new(decoder_biases)),
        }
    }

    fn optimizer(&self) -> Optimizers {
        match self.hyper.optimizer {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new().learning_rate(self.hyper.learning_rate),
            ),

            Optimizer::Adam => {
                Optimizers::Adam(wyrm::optim::Adam::new().learning_rate(self.hyper.learning_rate))
            }
        }
    }

    fn check_bounds(&self, codes: &[usize], item_ids: &[ItemId]) -> Result<(), PredictionError> {
        let encoder_rows = self.hyper.encoder_vocabulary_size();
        let decoder_rows = self.hyper.decoder_vocabulary_size();

        if let Some(&code) = codes.iter().find(|&&code| code >= encoder_rows) {
            return Err(PredictionError::IndexOutOfBounds {
                index: code,
                rows: encoder_rows,
            });
        }

        if let Some(&item_id) = item_ids.iter().find(|&&item_id| item_id >= decoder_rows) {
            return Err(PredictionError::IndexOutOfBounds {
                index: item_id,
                rows: decoder_rows,
            });
        }

        Ok(())
    }

    fn build(&self, minibatch_size: usize) -> Model {
        let encoder_embedding = wyrm::ParameterNode::shared(self.encoder_embedding.clone());
        let encoder_biases = wyrm::ParameterNode::shared(self.encoder_biases.clone());
        let decoder_embedding = wyrm::ParameterNode::shared(self.decoder_embedding.clone());
        let decoder_biases = wyrm::ParameterNode::shared(self.decoder_biases.clone());

        let codes = wyrm::IndexInputNode::new(&vec![0; minibatch_size]);
        let items = wyrm::IndexInputNode::new(&vec![0; minibatch_size]);
        let weights = wyrm::InputNode::new(Arr::zeros((minibatch_size, minibatch_size)));
        let targets = wyrm::InputNode::new(Arr::zeros((minibatch_size, 1)));

        let mse_scale =
            wyrm::InputNode::new(Arr::from_elem((1, 1), 1.0 / cmp::max(minibatch_size, 1) as f32));
        let l2_penalty = wyrm::InputNode::new(Arr::from_elem((1, 1), self.hyper.l2_penalty));

        // Per-row means of the user's visible encoder rows.
        let user_embedding = weights.dot(&encoder_embedding.index(&codes));
        let user_bias = weights.dot(&encoder_biases.index(&codes));

        let item_embedding = decoder_embedding.index(&items);
        let item_bias = decoder_biases.index(&items);

        let predictions =
            (user_embedding.vector_dot(&item_embedding) + user_bias + item_bias).boxed();

        let mse = (predictions.clone() - targets.clone()).square().scalar_sum() * mse_scale;
        let penalty = (encoder_embedding.square().scalar_sum()
            + decoder_embedding.square().scalar_sum())
            * l2_penalty;

        let loss = (mse + penalty).boxed();

        Model {
            codes,
            items,
            weights,
            targets,
            predictions,
            loss,
        }
    }
}

struct Model {
    codes: Variable<wyrm::IndexInputNode>,
    items: Variable<wyrm::IndexInputNode>,
    weights: Variable<wyrm::InputNode>,
    targets: Variable<wyrm::InputNode>,
    predictions: Variable<BoxedNode>,
    loss: Variable<BoxedNode>,
}

impl Model {
    fn set_minibatch(&self, minibatch: &Minibatch, aggregation: &UserAggregation) {
        let mut targets = Arr::zeros((minibatch.len(), 1));
        for (target, &rating) in targets.iter_mut().zip(minibatch.ratings) {
            *target = rating;
        }

        self.codes.set_value(minibatch.codes);
        self.items.set_value(minibatch.item_ids);
        self.weights.set_value(&aggregation.weights());
        self.targets.set_value(&targets);
    }

    fn predictions(&self) -> Result<Vec<f32>, PredictionError> {
        // Reset the cached state before running forward on new inputs.
        self.predictions.zero_gradient();
        self.predictions.forward();

        self.predictions
            .value()
            .iter()
            .map(|&prediction| {
                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }

    fn loss_value(&self) -> f32 {
        self.loss.zero_gradient();
        self.loss.forward();

        self.loss.value().scalar_sum()
    }
}

/// The user representation computed from a list of ratings.
#[derive(Clone, Debug)]
pub struct AutoencoderUser {
    user_bias: f32,
    user_embedding: Vec<f32>,
}

impl AutoencoderUser {
    /// Mean encoder bias of the user's ratings.
    pub fn bias(&self) -> f32 {
        self.user_bias
    }

    /// Mean encoder embedding of the user's ratings.
    pub fn embedding(&self) -> &[f32] {
        &self.user_embedding
    }
}

/// Rating autoencoder model.
#[derive(Debug, Clone)]
pub struct RatingAutoencoder {
    params: Parameters,
}

impl RatingAutoencoder {
    /// Build a model from explicit parameter tables.
    ///
    /// # Panics
    /// If the table shapes do not match the vocabulary sizes and
    /// embedding dimension of `hyper`.
    pub fn from_tables(
        hyper: Hyperparameters,
        encoder_embedding: Arr,
        encoder_biases: Arr,
        decoder_embedding: Arr,
        decoder_biases: Arr,
    ) -> Self {
        RatingAutoencoder {
            params: Parameters::new(
                hyper,
                encoder_embedding,
                encoder_biases,
                decoder_embedding,
                decoder_biases,
            ),
        }
    }

    /// The model's hyperparameters.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.params.hyper
    }

    /// Current encoder embeddings, one row per item-rating code.
    pub fn encoder_embedding(&self) -> Arr {
        self.params.encoder_embedding.value().clone()
    }

    /// Current encoder biases.
    pub fn encoder_biases(&self) -> Arr {
        self.params.encoder_biases.value().clone()
    }

    /// Current decoder embeddings, one row per item.
    pub fn decoder_embedding(&self) -> Arr {
        self.params.decoder_embedding.value().clone()
    }

    /// Current decoder biases.
    pub fn decoder_biases(&self) -> Arr {
        self.params.decoder_biases.value().clone()
    }

    /// Loss of the given predictions under the current parameters:
    /// MSE plus the L2 penalty on both embedding tables.
    pub fn loss(&self, predictions: &[f32], targets: &[f32]) -> f32 {
        loss::regularized_loss(
            predictions,
            targets,
            self.params.hyper.l2_penalty,
            self.params.encoder_embedding.value(),
            self.params.decoder_embedding.value(),
        )
    }

    /// Compute the training loss of a minibatch without updating
    /// any parameters.
    pub fn minibatch_loss(
        &self,
        minibatch: &Minibatch,
        mask_fraction: f32,
        rng: &mut XorShiftRng,
    ) -> Result<f32, PredictionError> {
        if minibatch.is_empty() {
            return Ok(0.0);
        }

        self.params
            .check_bounds(minibatch.codes, minibatch.item_ids)?;

        let model = self.params.build(minibatch.len());
        let aggregation = UserAggregation::new(
            minibatch.user_ids,
            mask_fraction,
            self.params.hyper.smoothing,
            rng,
        );
        model.set_minibatch(minibatch, &aggregation);

        let loss_value = model.loss_value();

        if loss_value.is_finite() {
            Ok(loss_value)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }

    /// The `num_neighbours` items whose decoder embeddings are closest
    /// to that of `item_id` in Euclidean distance, nearest first.
    pub fn nearest_items(
        &self,
        item_id: ItemId,
        num_neighbours: usize,
    ) -> Result<Vec<(ItemId, f32)>, PredictionError> {
        let num_items = self.params.hyper.num_items;

        if item_id >= num_items {
            return Err(PredictionError::IndexOutOfBounds {
                index: item_id,
                rows: num_items,
            });
        }

        let embeddings = self.params.decoder_embedding.value();
        let query = embeddings.subview(Axis(0), item_id);

        let mut distances: Vec<(ItemId, f32)> = embeddings
            .outer_iter()
            .take(num_items)
            .enumerate()
            .filter(|&(idx, _)| idx != item_id)
            .map(|(idx, embedding)| {
                let distance: f32 = embedding
                    .iter()
                    .zip(query.iter())
                    .map(|(x, y)| (x - y).powi(2))
                    .sum();
                (idx, distance.sqrt())
            })
            .collect();

        distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(cmp::Ordering::Equal));
        distances.truncate(num_neighbours);

        Ok(distances)
    }

    /// Split `data` by user into one part per training thread, dropping
    /// parts without a complete minibatch.
    fn training_partitions(&self, data: &EncodedRatings) -> Vec<EncodedRatings> {
        let minibatch_size = self.params.hyper.minibatch_size;
        let num_threads = cmp::min(
            cmp::max(self.params.hyper.num_threads, 1),
            rayon::current_num_threads(),
        );

        data.partition_by_user(num_threads)
            .into_iter()
            .filter(|partition| partition.num_minibatches(minibatch_size) > 0)
            .collect()
    }

    /// Fit the model, running `num_epochs` passes over `data`.
    ///
    /// Returns the mean minibatch loss of the final epoch.
    pub fn fit(&mut self, data: &EncodedRatings) -> Result<f32, FittingError> {
        let model_items = self.params.hyper.num_items;
        let data_items = data
            .item_ids()
            .iter()
            .map(|&item_id| item_id + 1)
            .max()
            .unwrap_or(0);
        let code_items = data
            .codes()
            .iter()
            .map(|&code| self.params.hyper.encoding.decode(code).0 + 1)
            .max()
            .unwrap_or(0);
        let data_items = cmp::max(data_items, code_items);

        if data_items > model_items {
            return Err(FittingError::IncompatibleData {
                data_items,
                model_items,
            });
        }

        let minibatch_size = self.params.hyper.minibatch_size;
        let num_epochs = self.params.hyper.num_epochs;
        let mask_fraction = self.params.hyper.mask_fraction;
        let smoothing = self.params.hyper.smoothing;
        let shuffle = self.params.hyper.shuffle;
        let synchronous = self.params.hyper.parallelism == Parallelism::Synchronous;

        let partitions = self.training_partitions(data);

        if partitions.is_empty() {
            return Err(FittingError::NoInteractions);
        }

        let num_partitions = partitions.len();
        let synchronous = synchronous && num_partitions > 1;

        // Synchronised threads must take the same number of steps.
        let steps_per_epoch = if synchronous {
            partitions
                .iter()
                .map(|partition| partition.num_minibatches(minibatch_size))
                .min()
                .unwrap_or(0)
        } else {
            usize::max_value()
        };

        let optimizer = self.params.optimizer();
        let sync_optim = optimizer.synchronized(num_partitions);

        let mut partitions: Vec<_> = {
            let rng = &mut self.params.hyper.rng;

            partitions
                .into_iter()
                .zip(sync_optim.into_iter())
                .map(|(partition, optim)| (partition, XorShiftRng::from_seed(rng.gen()), optim))
                .collect()
        };

        let params = &self.params;

        let losses: Vec<f32> = partitions
            .par_iter_mut()
            .enumerate()
            .map(
                |(partition_idx, &mut (ref mut partition, ref mut thread_rng, ref mut sync_optim))| {
                    let mut model = params.build(minibatch_size);
                    let loader_rng = XorShiftRng::from_seed(thread_rng.gen());
                    let mut loader =
                        MinibatchLoader::new(partition, minibatch_size, shuffle, loader_rng);

                    let mut epoch_loss = 0.0;

                    for epoch in 0..num_epochs {
                        let mut loss_value = 0.0;
                        let mut num_minibatches = 0;

                        for minibatch in loader.epoch().take(steps_per_epoch) {
                            let aggregation = UserAggregation::new(
                                minibatch.user_ids,
                                mask_fraction,
                                smoothing,
                                thread_rng,
                            );
                            model.set_minibatch(&minibatch, &aggregation);

                            trace!(
                                partition = partition_idx,
                                users = aggregation.num_users(),
                                visible = aggregation.visible().iter().filter(|&&x| x).count(),
                                "aggregated minibatch"
                            );

                            let loss = &mut model.loss;

                            loss.zero_gradient();
                            loss.forward();
                            loss_value += loss.value().scalar_sum();
                            num_minibatches += 1;

                            loss.backward(1.0);

                            if synchronous {
                                sync_optim.step(loss.parameters());
                            } else {
                                optimizer.step(loss.parameters());
                            }
                        }

                        if num_minibatches == 0 {
                            warn!(
                                partition = partition_idx,
                                epoch = epoch,
                                "epoch yielded no minibatches"
                            );
                        }

                        epoch_loss = loss_value / cmp::max(num_minibatches, 1) as f32;

                        debug!(
                            partition = partition_idx,
                            epoch = epoch,
                            loss = epoch_loss as f64,
                            "finished epoch"
                        );
                    }

                    epoch_loss
                },
            )
            .collect();

        let loss = losses.iter().sum::<f32>() / losses.len() as f32;

        info!(
            epochs = num_epochs,
            partitions = num_partitions,
            loss = loss as f64,
            "fitted rating autoencoder"
        );

        Ok(loss)
    }
}

impl RatingModel for RatingAutoencoder {
    fn predict_minibatch(
        &self,
        minibatch: &Minibatch,
        mask_fraction: f32,
        rng: &mut XorShiftRng,
    ) -> Result<Vec<f32>, PredictionError> {
        if minibatch.is_empty() {
            return Ok(Vec::new());
        }

        self.params
            .check_bounds(minibatch.codes, minibatch.item_ids)?;

        let model = self.params.build(minibatch.len());
        let aggregation = UserAggregation::new(
            minibatch.user_ids,
            mask_fraction,
            self.params.hyper.smoothing,
            rng,
        );
        model.set_minibatch(minibatch, &aggregation);

        model.predictions()
    }
}

impl OnlineRatingModel for RatingAutoencoder {
    type UserRepresentation = AutoencoderUser;
    fn user_representation(
        &self,
        ratings: &[(ItemId, f32)],
    ) -> Result<Self::UserRepresentation, PredictionError> {
        let encoding = &self.params.hyper.encoding;
        let embeddings = self.params.encoder_embedding.value();
        let biases = self.params.encoder_biases.value();

        let mut user_embedding = Array1::zeros(self.params.hyper.embedding_dim);
        let mut user_bias = 0.0;

        for &(item_id, rating) in ratings {
            let code = encoding.code(item_id, rating)?;
            self.params.check_bounds(&[code], &[item_id])?;

            user_embedding.scaled_add(1.0, &embeddings.subview(Axis(0), code));
            user_bias += biases[(code, 0)];
        }

        if !ratings.is_empty() {
            let denominator = ratings.len() as f32 + self.params.hyper.smoothing;
            user_embedding /= denominator;
            user_bias /= denominator;
        }

        Ok(AutoencoderUser {
            user_bias,
            user_embedding: user_embedding.iter().cloned().collect(),
        })
    }

    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[ItemId],
    ) -> Result<Vec<f32>, PredictionError> {
        self.params.check_bounds(&[], item_ids)?;

        let embeddings = self.params.decoder_embedding.value();
        let biases = self.params.decoder_biases.value();
        let user_embedding = aview1(&user.user_embedding[..]);

        item_ids
            .iter()
            .map(|&item_id| {
                let embedding = embeddings.subview(Axis(0), item_id);
                let prediction =
                    user.user_bias + biases[(item_id, 0)] + embedding.dot(&user_embedding);

                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rayon::ThreadPoolBuilder;

    use super::*;
    use data::{train_test_split, Rating, Ratings};
    use evaluation::mse_score;

    const NUM_ITEMS: usize = 4;
    const DIM: usize = 3;

    fn hyperparameters() -> Hyperparameters {
        Hyperparameters::new(NUM_ITEMS)
            .embedding_dim(DIM)
            .from_seed([42; 16])
    }

    fn table(rows: usize, cols: usize, offset: f32) -> Arr {
        Arr::from_shape_fn((rows, cols), |(row, col)| {
            offset + 0.01 * row as f32 - 0.1 * col as f32
        })
    }

    fn fixed_model(l2_penalty: f32) -> RatingAutoencoder {
        let hyper = hyperparameters().l2_penalty(l2_penalty);
        let encoder_rows = hyper.encoder_vocabulary_size();
        let decoder_rows = hyper.decoder_vocabulary_size();

        RatingAutoencoder::from_tables(
            hyper,
            table(encoder_rows, DIM, 0.2),
            table(encoder_rows, 1, -0.1),
            table(decoder_rows, DIM, 0.5),
            table(decoder_rows, 1, 3.0),
        )
    }

    fn zero_model() -> RatingAutoencoder {
        let hyper = hyperparameters().l2_penalty(0.0);
        let encoder_rows = hyper.encoder_vocabulary_size();
        let decoder_rows = hyper.decoder_vocabulary_size();

        RatingAutoencoder::from_tables(
            hyper,
            Arr::zeros((encoder_rows, DIM)),
            Arr::zeros((encoder_rows, 1)),
            Arr::zeros((decoder_rows, DIM)),
            Arr::zeros((decoder_rows, 1)),
        )
    }

    fn sample_data() -> EncodedRatings {
        let ratings = vec![
            Rating::new(0, 0, 4.0, 0),
            Rating::new(0, 1, 2.0, 1),
            Rating::new(1, 0, 5.0, 2),
            Rating::new(1, 2, 1.0, 3),
            Rating::new(1, 3, 3.0, 4),
            Rating::new(2, 3, 4.0, 5),
        ];

        Ratings::from(ratings)
            .to_encoded(&RatingEncoding::default())
            .unwrap()
    }

    fn synthetic_data(num_users: usize, num_items: usize) -> Ratings {
        let mut ratings = Vec::new();

        for user_id in 0..num_users {
            for item_id in 0..num_items {
                if (user_id * 7 + item_id * 3) % 4 == 0 {
                    continue;
                }

                let taste = if user_id % 2 == item_id % 2 { 4.0 } else { 1.0 };
                let rating = taste + (item_id % 2) as f32;
                let timestamp = ratings.len();
                ratings.push(Rating::new(user_id, item_id, rating, timestamp));
            }
        }

        Ratings::from(ratings)
    }

    fn rng() -> XorShiftRng {
        XorShiftRng::from_seed([7; 16])
    }

    #[test]
    fn one_prediction_per_row() {
        let model = hyperparameters().build();
        let data = sample_data();

        for &mask_fraction in &[0.0, 0.5, 1.0] {
            let predictions = model
                .predict_minibatch(&data.minibatch(0, data.len()), mask_fraction, &mut rng())
                .unwrap();
            assert_eq!(predictions.len(), data.len());
        }

        let predictions = model
            .predict_minibatch(&data.minibatch(1, 4), 0.5, &mut rng())
            .unwrap();
        assert_eq!(predictions.len(), 3);
    }

    #[test]
    fn unmasked_predictions_are_deterministic() {
        let model = hyperparameters().build();
        let data = sample_data();
        let minibatch = data.minibatch(0, data.len());

        let first = model
            .predict_minibatch(&minibatch, 0.0, &mut XorShiftRng::from_seed([1; 16]))
            .unwrap();
        let second = model
            .predict_minibatch(&minibatch, 0.0, &mut XorShiftRng::from_seed([2; 16]))
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn users_without_visible_ratings_get_decoder_bias() {
        let model = fixed_model(0.0);
        let data = sample_data();
        let decoder_biases = model.decoder_biases();

        let predictions = model
            .predict_minibatch(&data.minibatch(0, data.len()), 1.0, &mut rng())
            .unwrap();

        for (&prediction, &item_id) in predictions.iter().zip(data.item_ids()) {
            assert!((prediction - decoder_biases[(item_id, 0)]).abs() < 1e-5);
        }
    }

    #[test]
    fn zero_tables_predict_zero() {
        let model = zero_model();
        let data = sample_data();
        let minibatch = data.minibatch(0, data.len());

        let predictions = model.predict_minibatch(&minibatch, 0.0, &mut rng()).unwrap();
        assert!(predictions.iter().all(|&x| x == 0.0));

        let loss = model.minibatch_loss(&minibatch, 0.0, &mut rng()).unwrap();
        let mse = loss::mean_squared_error(&predictions, minibatch.ratings);
        assert!((loss - mse).abs() < 1e-4);
    }

    #[test]
    fn single_user_shares_user_term() {
        let model = fixed_model(0.0);
        let encoding = RatingEncoding::default();

        let data = Ratings::from(vec![Rating::new(0, 1, 4.0, 0), Rating::new(0, 3, 2.0, 1)])
            .to_encoded(&encoding)
            .unwrap();

        let predictions = model
            .predict_minibatch(&data.minibatch(0, 2), 0.0, &mut rng())
            .unwrap();

        let encoder_embedding = model.encoder_embedding();
        let encoder_biases = model.encoder_biases();
        let decoder_embedding = model.decoder_embedding();
        let decoder_biases = model.decoder_biases();

        let codes = [encoding.code(1, 4.0).unwrap(), encoding.code(3, 2.0).unwrap()];
        let user_bias = (encoder_biases[(codes[0], 0)] + encoder_biases[(codes[1], 0)]) / 3.0;
        let user_embedding: Vec<f32> = (0..DIM)
            .map(|col| {
                (encoder_embedding[(codes[0], col)] + encoder_embedding[(codes[1], col)]) / 3.0
            })
            .collect();

        for (&prediction, &item_id) in predictions.iter().zip(&[1, 3]) {
            let dot: f32 = (0..DIM)
                .map(|col| user_embedding[col] * decoder_embedding[(item_id, col)])
                .sum();
            let expected = user_bias + decoder_biases[(item_id, 0)] + dot;

            assert!((prediction - expected).abs() < 1e-5);
        }

        assert!((predictions[0] - predictions[1]).abs() > 1e-4);
    }

    #[test]
    fn online_representation_matches_minibatch() {
        let model = fixed_model(0.0);
        let data = sample_data();

        // User 1 owns rows 2..5.
        let minibatch = data.minibatch(2, 5);
        let expected = model.predict_minibatch(&minibatch, 0.0, &mut rng()).unwrap();

        let ratings: Vec<(ItemId, f32)> = minibatch
            .item_ids
            .iter()
            .cloned()
            .zip(minibatch.ratings.iter().cloned())
            .collect();
        let user = model.user_representation(&ratings).unwrap();
        let predictions = model.predict(&user, minibatch.item_ids).unwrap();

        for (x, y) in predictions.iter().zip(&expected) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn empty_user_representation_is_zero() {
        let model = fixed_model(0.0);
        let user = model.user_representation(&[]).unwrap();

        assert_eq!(user.bias(), 0.0);
        assert!(user.embedding().iter().all(|&x| x == 0.0));

        let predictions = model.predict(&user, &[0, 2]).unwrap();
        let decoder_biases = model.decoder_biases();
        assert_eq!(predictions, vec![decoder_biases[(0, 0)], decoder_biases[(2, 0)]]);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let model = hyperparameters().build();
        let data = Ratings::from(vec![Rating::new(0, NUM_ITEMS + 3, 4.0, 0)])
            .to_encoded(&RatingEncoding::default())
            .unwrap();

        match model.predict_minibatch(&data.minibatch(0, 1), 0.0, &mut rng()) {
            Err(PredictionError::IndexOutOfBounds { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }

        assert!(model.user_representation(&[(0, 12.0)]).is_err());
        let user = AutoencoderUser {
            user_bias: 0.0,
            user_embedding: vec![0.0; DIM],
        };
        assert!(model.predict(&user, &[NUM_ITEMS + 1]).is_err());
    }

    #[test]
    fn graph_loss_matches_pure_loss() {
        let model = fixed_model(0.01);
        let data = sample_data();
        let minibatch = data.minibatch(0, data.len());

        let predictions = model.predict_minibatch(&minibatch, 0.0, &mut rng()).unwrap();
        let expected = model.loss(&predictions, minibatch.ratings);
        let loss = model.minibatch_loss(&minibatch, 0.0, &mut rng()).unwrap();

        assert!(loss >= 0.0);
        assert!((loss - expected).abs() / expected < 1e-4);
        assert!(expected > loss::mean_squared_error(&predictions, minibatch.ratings));
    }

    #[test]
    fn nearest_items_are_sorted() {
        let model = hyperparameters().build();
        let neighbours = model.nearest_items(1, 10).unwrap();

        assert_eq!(neighbours.len(), NUM_ITEMS - 1);
        assert!(neighbours.iter().all(|&(item_id, _)| item_id != 1 && item_id < NUM_ITEMS));
        assert!(neighbours.windows(2).all(|x| x[0].1 <= x[1].1));

        let embeddings = model.decoder_embedding();
        let (nearest, distance) = neighbours[0];
        let expected: f32 = (0..DIM)
            .map(|col| (embeddings[(1, col)] - embeddings[(nearest, col)]).powi(2))
            .sum::<f32>()
            .sqrt();
        assert!((distance - expected).abs() < 1e-6);

        assert!(model.nearest_items(NUM_ITEMS, 3).is_err());
    }

    #[test]
    fn fit_requires_a_full_minibatch() {
        let mut model = hyperparameters().minibatch_size(100).build();

        assert_eq!(model.fit(&sample_data()), Err(FittingError::NoInteractions));
    }

    #[test]
    fn fit_rejects_unknown_items() {
        let mut model = Hyperparameters::new(2).minibatch_size(2).build();

        match model.fit(&sample_data()) {
            Err(FittingError::IncompatibleData { data_items, model_items }) => {
                assert_eq!(data_items, 4);
                assert_eq!(model_items, 2);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    /// Fit on synthetic ratings inside a four-thread pool, returning the
    /// test MSE before and after fitting and the number of partitions
    /// trained on.
    fn fit_and_score(
        num_threads: usize,
        parallelism: Parallelism,
        shuffle: Shuffle,
    ) -> (f32, f32, usize) {
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();

        pool.install(|| {
            let mut data = synthetic_data(60, 20);
            let mut rng = XorShiftRng::from_seed([42; 16]);
            let (train, test) = train_test_split(&mut data, &mut rng, 0.2);

            let encoding = RatingEncoding::default();
            let train = train.to_encoded(&encoding).unwrap();
            let test = test.to_encoded(&encoding).unwrap();

            let mut model = Hyperparameters::new(data.num_items())
                .embedding_dim(8)
                .learning_rate(0.05)
                .minibatch_size(32)
                .num_epochs(30)
                .num_threads(num_threads)
                .parallelism(parallelism)
                .shuffle(shuffle)
                .rng(rng)
                .build();

            let num_partitions = model.training_partitions(&train).len();

            let before = mse_score(&model, &test, 16).unwrap();
            let loss = model.fit(&train).unwrap();
            let after = mse_score(&model, &test, 16).unwrap();

            assert!(loss.is_finite());

            (before, after, num_partitions)
        })
    }

    #[test]
    fn fitting_reduces_test_error() {
        let (before, after, num_partitions) =
            fit_and_score(1, Parallelism::Synchronous, Shuffle::Rows);

        println!("Test MSE before {} and after {}", before, after);

        assert_eq!(num_partitions, 1);
        assert!(after < before / 2.0);
    }

    #[test]
    fn synchronous_multithreaded_fit() {
        let (before, after, num_partitions) =
            fit_and_score(4, Parallelism::Synchronous, Shuffle::Rows);

        assert_eq!(num_partitions, 4);
        assert!(after.is_finite());
        assert!(after < before);
    }

    #[test]
    fn asynchronous_multithreaded_fit() {
        let (before, after, num_partitions) =
            fit_and_score(4, Parallelism::Asynchronous, Shuffle::Users);

        assert_eq!(num_partitions, 4);
        assert!(after.is_finite());
        assert!(after < before);
    }

    #[test]
    fn threads_are_capped_by_the_pool() {
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let data = synthetic_data(60, 20)
            .to_encoded(&RatingEncoding::default())
            .unwrap();
        let model = hyperparameters().minibatch_size(32).num_threads(8).build();

        let partitions = pool.install(|| model.training_partitions(&data));

        assert_eq!(partitions.len(), 2);
        assert_eq!(
            partitions.iter().map(|x| x.len()).sum::<usize>(),
            data.len()
        );
    }
}
