//! Models module.
pub mod aggregation;
pub mod autoencoder;
pub mod loss;

/// Optimizer user to train the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

/// Type of parallelism used to train the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Parallelism {
    /// Multiple threads operate in parallel without any locking.
    Asynchronous,
    /// Multiple threads synchronise parameters between minibatches.
    Synchronous,
}
