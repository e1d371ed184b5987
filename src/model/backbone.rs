use nalgebra::DMatrix;
use crate::error::Result;

/// What a backbone hands to the classifier heads: either a bare (batch x features)
/// matrix, or that matrix followed by auxiliary outputs (hidden states, attention maps)
/// which the mixture returns untouched and in the same order.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutput {
    Plain(DMatrix<f64>),
    WithAux(DMatrix<f64>, Vec<DMatrix<f64>>)
}

impl FeatureOutput {

    /// The leading tensor: features coming out of a backbone, or the mixture
    /// log-probabilities coming out of a mixture model.
    pub fn features(&self) -> &DMatrix<f64> {
        match self {
            FeatureOutput::Plain(x) => x,
            FeatureOutput::WithAux(x, _) => x
        }
    }

    /// Auxiliary outputs; empty for the plain variant.
    pub fn aux(&self) -> &[DMatrix<f64>] {
        match self {
            FeatureOutput::Plain(_) => &[],
            FeatureOutput::WithAux(_, aux) => &aux[..]
        }
    }

    pub fn into_parts(self) -> (DMatrix<f64>, Option<Vec<DMatrix<f64>>>) {
        match self {
            FeatureOutput::Plain(x) => (x, None),
            FeatureOutput::WithAux(x, aux) => (x, Some(aux))
        }
    }

    /// Rebuilds an output of the same variant with a different leading tensor.
    pub fn from_parts(x : DMatrix<f64>, aux : Option<Vec<DMatrix<f64>>>) -> Self {
        match aux {
            Some(aux) => FeatureOutput::WithAux(x, aux),
            None => FeatureOutput::Plain(x)
        }
    }

}

impl From<DMatrix<f64>> for FeatureOutput {

    fn from(x : DMatrix<f64>) -> Self {
        FeatureOutput::Plain(x)
    }

}

/// Shared feature extractor sitting under the classifier heads. Parameters are
/// exposed as flat slices over the containers' storage so an external optimizer can
/// step them in place.
pub trait Backbone {

    type Input : ?Sized;

    fn forward(&self, input : &Self::Input) -> Result<FeatureOutput>;

    fn reset_parameters(&mut self) { }

    fn parameters(&self) -> Vec<&[f64]> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f64]> {
        Vec::new()
    }

}

/// Backbone without parameters that passes its input through as features.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Backbone for Identity {

    type Input = DMatrix<f64>;

    fn forward(&self, input : &DMatrix<f64>) -> Result<FeatureOutput> {
        Ok(FeatureOutput::Plain(input.clone()))
    }

}
