use nalgebra::*;
use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use serde::{Serialize, Deserialize};
use crate::calc;
use crate::error::{MixtureError, Result};

/// Fully-connected layer. The weight is (outputs x inputs), the bias has one entry
/// per output, so a (batch x inputs) matrix maps to (batch x outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub weight : DMatrix<f64>,
    pub bias : DVector<f64>
}

impl Linear {

    /// Layer initialized uniformly in +-1/sqrt(inputs).
    pub fn new(ninputs : usize, noutputs : usize) -> Self {
        Self::with_rng(ninputs, noutputs, &mut rand::thread_rng())
    }

    pub fn with_rng<R>(ninputs : usize, noutputs : usize, rng : &mut R) -> Self
    where
        R : Rng + ?Sized
    {
        let mut fc = Self::zeros(ninputs, noutputs);
        fc.reset_parameters_with(rng);
        fc
    }

    pub fn zeros(ninputs : usize, noutputs : usize) -> Self {
        Self { weight : DMatrix::zeros(noutputs, ninputs), bias : DVector::zeros(noutputs) }
    }

    pub fn ninputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn noutputs(&self) -> usize {
        self.weight.nrows()
    }

    pub fn reset_parameters_with<R>(&mut self, rng : &mut R)
    where
        R : Rng + ?Sized
    {
        let bound = 1. / (self.ninputs().max(1) as f64).sqrt();
        let unif = Uniform::new_inclusive(-bound, bound);
        self.weight.iter_mut().for_each(|w| *w = unif.sample(rng) );
        self.bias.iter_mut().for_each(|b| *b = unif.sample(rng) );
    }

    pub fn forward(&self, x : &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if x.ncols() != self.ninputs() {
            return Err(MixtureError::ShapeMismatch {
                expected : (x.nrows(), self.ninputs()),
                actual : x.shape()
            });
        }
        let mut out = x * self.weight.transpose();
        let bias_row = self.bias.transpose();
        for mut row in out.row_iter_mut() {
            row += &bias_row;
        }
        Ok(out)
    }

    /// self <- self - lr * grad.
    pub fn sgd_step(&mut self, grad : &Linear, lr : f64) -> Result<()> {
        if grad.weight.shape() != self.weight.shape() {
            return Err(MixtureError::ShapeMismatch { expected : self.weight.shape(), actual : grad.weight.shape() });
        }
        if grad.bias.nrows() != self.bias.nrows() {
            return Err(MixtureError::ShapeMismatch { expected : self.bias.shape(), actual : grad.bias.shape() });
        }
        self.weight -= &grad.weight * lr;
        self.bias -= &grad.bias * lr;
        Ok(())
    }

    pub fn parameters(&self) -> Vec<&[f64]> {
        vec![self.weight.as_slice(), self.bias.as_slice()]
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut [f64]> {
        vec![self.weight.as_mut_slice(), self.bias.as_mut_slice()]
    }

}

/// One of the parallel heads of a mixture model. Maps a (batch x features) matrix to
/// (batch x classes) log-probabilities through a final linear layer `fc`, whose weight
/// and bias are overwritten in place when the head is caught up.
pub trait ClassifierHead {

    fn forward(&self, x : &DMatrix<f64>) -> Result<DMatrix<f64>>;

    fn fc(&self) -> &Linear;

    fn fc_mut(&mut self) -> &mut Linear;

    fn reset_parameters(&mut self);

    fn parameters(&self) -> Vec<&[f64]> {
        self.fc().parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f64]> {
        self.fc_mut().parameters_mut()
    }

}

/// Softmax regression head: log_softmax(x W' + b).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub fc : Linear
}

impl LinearClassifier {

    pub fn new(nfeatures : usize, nclasses : usize) -> Self {
        Self { fc : Linear::new(nfeatures, nclasses) }
    }

    pub fn with_rng<R>(nfeatures : usize, nclasses : usize, rng : &mut R) -> Self
    where
        R : Rng + ?Sized
    {
        Self { fc : Linear::with_rng(nfeatures, nclasses, rng) }
    }

    pub fn from_linear(fc : Linear) -> Self {
        Self { fc }
    }

    /// Mean negative log-likelihood of the labels.
    pub fn nll(&self, x : &DMatrix<f64>, y : &[usize]) -> Result<f64> {
        let logpx = self.forward(x)?;
        calc::check_labels(y, logpx.nrows(), logpx.ncols())?;
        let sum : f64 = y.iter().enumerate().map(|(b, c)| logpx[(b, *c)] ).sum();
        Ok(-sum / y.len() as f64)
    }

    /// Gradient of the mean negative log-likelihood with respect to fc, packed as a
    /// layer of the same shape: (softmax - onehot)' x / n and the column means of
    /// (softmax - onehot).
    pub fn nll_grad(&self, x : &DMatrix<f64>, y : &[usize]) -> Result<Linear> {
        let logpx = self.forward(x)?;
        calc::check_labels(y, logpx.nrows(), logpx.ncols())?;
        let n = y.len() as f64;
        let mut delta = logpx.map(f64::exp);
        for (b, c) in y.iter().enumerate() {
            delta[(b, *c)] -= 1.0;
        }
        let weight = delta.transpose() * x / n;
        let bias = delta.row_sum().transpose() / n;
        Ok(Linear { weight, bias })
    }

}

impl ClassifierHead for LinearClassifier {

    fn forward(&self, x : &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Ok(calc::log_softmax_rows(&self.fc.forward(x)?))
    }

    fn fc(&self) -> &Linear {
        &self.fc
    }

    fn fc_mut(&mut self) -> &mut Linear {
        &mut self.fc
    }

    fn reset_parameters(&mut self) {
        self.fc.reset_parameters_with(&mut rand::thread_rng());
    }

}
