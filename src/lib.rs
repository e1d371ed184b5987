/// Log-domain arithmetic (log-sum-exp, normalization, row-wise log-softmax) shared
/// by the switch and the classifier heads.
pub mod calc;

/// Error type returned by every fallible operation of the crate.
pub mod error;

/// Online posterior over a fixed set of classifier indices, and the posterior-weighted
/// mixture of their log-probability outputs.
pub mod switch;

/// Mixture model owning a shared backbone, the parallel classifier heads and the switch;
/// drives forward passes, posterior updates and the catch-up of weak heads.
pub mod model;

/// Serializable settings used to build a mixture model.
pub mod config;

pub use config::MixtureConfig;
pub use error::{MixtureError, Result};
pub use model::*;
pub use switch::*;
