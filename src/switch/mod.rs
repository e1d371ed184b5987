use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::calc;
use crate::error::{MixtureError, Result};

pub mod perf;

mod encode;

pub use perf::*;

/// Rule used to move posterior mass between classifiers after each observed batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwitchPolicy {

    /// Bayesian model averaging: the log-posterior of every classifier is shifted
    /// by its log-likelihood of the observed labels and renormalized. Classifiers
    /// that predict worse lose mass without bound.
    Bayes,

    /// Switch distribution over two tracks. A fraction theta of the prior mass
    /// sits on a track that behaves like Bayes; the remainder sits on a track
    /// that, after each update t, redistributes a fraction alpha / t of its mass
    /// uniformly over the classifiers. A classifier that starts predicting well
    /// late in training can therefore still regain the posterior.
    Switching { theta : f64, alpha : f64 }

}

impl Default for SwitchPolicy {

    fn default() -> Self {
        SwitchPolicy::Bayes
    }

}

impl SwitchPolicy {

    pub fn validate(&self) -> Result<()> {
        match *self {
            SwitchPolicy::Bayes => Ok(()),
            SwitchPolicy::Switching { theta, alpha } => {
                if !(theta > 0.0 && theta <= 1.0) {
                    return Err(MixtureError::InvalidConfig(format!("theta must lie in (0, 1], got {}", theta)));
                }
                if !(alpha >= 0.0 && alpha <= 1.0) {
                    return Err(MixtureError::InvalidConfig(format!("alpha must lie in [0, 1], got {}", alpha)));
                }
                Ok(())
            }
        }
    }

}

/// Tracks a categorical posterior over a fixed set of classifier indices (in log-space)
/// and combines the classifiers' log-probabilities weighted by it.
///
/// Classifier outputs are (batch x classes) matrices of log-probabilities, one per
/// classifier index, all of the same shape. A classifier whose posterior mass vanishes
/// is carried at negative infinity; every reduction goes through log-sum-exp so that
/// such entries never produce NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Switch {

    policy : SwitchPolicy,

    /// Normalized: exp(logposterior) sums to one.
    #[serde(with = "encode::vector")]
    logposterior : DVector<f64>,

    /// Joint log-weights over (track, classifier) for the switching policy. Row 0 never
    /// switches; row 1 is the switching track.
    #[serde(with = "encode::matrix_opt")]
    logw : Option<DMatrix<f64>>,

    /// Number of updates seen plus one.
    t : usize,

    cl_perf : Option<ClassifierPerf>

}

impl Switch {

    /// Uniform Bayesian switch.
    pub fn new(nclassifiers : usize, save_cl_perf : bool) -> Self {
        Self::build(nclassifiers, SwitchPolicy::Bayes, save_cl_perf)
    }

    pub fn with_policy(nclassifiers : usize, policy : SwitchPolicy, save_cl_perf : bool) -> Result<Self> {
        if nclassifiers == 0 {
            return Err(MixtureError::NoClassifiers);
        }
        policy.validate()?;
        Ok(Self::build(nclassifiers, policy, save_cl_perf))
    }

    fn build(nclassifiers : usize, policy : SwitchPolicy, save_cl_perf : bool) -> Self {
        let n = nclassifiers as f64;
        let logposterior = DVector::from_element(nclassifiers, -n.ln());
        let logw = match policy {
            SwitchPolicy::Bayes => None,
            SwitchPolicy::Switching { theta, .. } => {
                let mut w = DMatrix::zeros(2, nclassifiers);
                w.row_mut(0).fill(theta.ln() - n.ln());
                w.row_mut(1).fill((1. - theta).ln() - n.ln());
                Some(w)
            }
        };
        let cl_perf = if save_cl_perf {
            Some(ClassifierPerf::new(nclassifiers))
        } else {
            None
        };
        Self { policy, logposterior, logw, t : 1, cl_perf }
    }

    pub fn nclassifiers(&self) -> usize {
        self.logposterior.nrows()
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    /// Current log-posterior over classifier indices.
    pub fn logposterior(&self) -> &DVector<f64> {
        &self.logposterior
    }

    /// Linear-domain posterior.
    pub fn posterior(&self) -> DVector<f64> {
        self.logposterior.map(f64::exp)
    }

    /// Replaces the log-posterior, renormalizing it. Under the switching policy both
    /// tracks are reset to the new posterior split according to theta.
    pub fn set_logposterior(&mut self, logposterior : DVector<f64>) -> Result<()> {
        if logposterior.nrows() != self.nclassifiers() {
            return Err(MixtureError::ClassifierCount {
                expected : self.nclassifiers(),
                actual : logposterior.nrows()
            });
        }
        let mut lp = logposterior;
        if !calc::log_normalize(&mut lp).is_finite() {
            return Err(MixtureError::InvalidConfig(String::from("log-posterior has no finite mass")));
        }
        if let (Some(w), SwitchPolicy::Switching { theta, .. }) = (self.logw.as_mut(), self.policy) {
            for i in 0..lp.nrows() {
                w[(0, i)] = theta.ln() + lp[i];
                w[(1, i)] = (1. - theta).ln() + lp[i];
            }
        }
        self.logposterior = lp;
        Ok(())
    }

    /// Posterior-weighted mixture of the classifier log-probabilities:
    /// out[b, c] = ln sum_i exp(logposterior[i] + lst_logpx[i][b, c]).
    /// Leaves the posterior untouched.
    pub fn forward(&self, lst_logpx : &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
        let (nrows, ncols) = self.check_outputs(lst_logpx)?;
        let mut terms = vec![0.0; lst_logpx.len()];
        let logpost = &self.logposterior;
        Ok(DMatrix::from_fn(nrows, ncols, |b, c| {
            for (i, logpx) in lst_logpx.iter().enumerate() {
                terms[i] = logpost[i] + logpx[(b, c)];
            }
            calc::log_sum_exp(&terms[..])
        }))
    }

    /// Updates the posterior from the classifiers' log-probabilities of the observed
    /// labels y (one label per batch row). Each classifier is scored by its mean
    /// log-likelihood over the batch.
    pub fn update(&mut self, lst_logpx : &[DMatrix<f64>], y : &[usize]) -> Result<()> {
        let (nrows, ncols) = self.check_outputs(lst_logpx)?;
        calc::check_labels(y, nrows, ncols)?;

        if y.is_empty() {
            tracing::debug!("empty batch; switch left unchanged");
            return Ok(());
        }

        if let Some(perf) = self.cl_perf.as_mut() {
            perf.record(lst_logpx, y);
        }

        if self.nclassifiers() == 1 {
            return Ok(());
        }

        let logpx = DVector::from_iterator(
            lst_logpx.len(),
            lst_logpx.iter().map(|lp| mean_label_log_lik(lp, y) )
        );

        let t = self.t + 1;
        let updated = match (self.policy, self.logw.as_ref()) {
            (SwitchPolicy::Switching { alpha, .. }, Some(w)) => {
                let mut w = w.clone();
                if switching_update(&mut w, &logpx, alpha, t) {
                    let mut lp = DVector::from_iterator(
                        w.ncols(),
                        w.column_iter().map(|col| calc::log_add_exp(col[0], col[1]) )
                    );
                    calc::log_normalize(&mut lp);
                    self.logw = Some(w);
                    Some(lp)
                } else {
                    None
                }
            },
            _ => {
                let mut lp = &self.logposterior + &logpx;
                if calc::log_normalize(&mut lp).is_finite() {
                    Some(lp)
                } else {
                    None
                }
            }
        };
        match updated {
            Some(lp) => {
                self.logposterior = lp;
                self.t = t;
            },
            None => {
                tracing::warn!(
                    step = t,
                    loglik = ?logpx.as_slice(),
                    "every classifier with posterior mass assigns zero probability to the batch; posterior left unchanged"
                );
                return Ok(());
            }
        }
        tracing::debug!(step = self.t, logposterior = ?self.logposterior.as_slice(), "switch updated");
        Ok(())
    }

    /// Per-classifier statistics, present when the switch was built with save_cl_perf.
    pub fn cl_perf(&self) -> Option<&ClassifierPerf> {
        self.cl_perf.as_ref()
    }

    pub fn reset_cl_perf(&mut self) {
        if let Some(perf) = self.cl_perf.as_mut() {
            perf.reset();
        }
    }

    /// Verifies one output per classifier, all with the same shape. Returns that shape.
    fn check_outputs(&self, lst_logpx : &[DMatrix<f64>]) -> Result<(usize, usize)> {
        if lst_logpx.is_empty() {
            return Err(MixtureError::NoClassifiers);
        }
        if lst_logpx.len() != self.nclassifiers() {
            return Err(MixtureError::ClassifierCount {
                expected : self.nclassifiers(),
                actual : lst_logpx.len()
            });
        }
        let shape = lst_logpx[0].shape();
        for logpx in lst_logpx.iter().skip(1) {
            if logpx.shape() != shape {
                return Err(MixtureError::ShapeMismatch { expected : shape, actual : logpx.shape() });
            }
        }
        Ok(shape)
    }

}

/// Mean over the batch of logpx[b, y[b]].
fn mean_label_log_lik(logpx : &DMatrix<f64>, y : &[usize]) -> f64 {
    let sum : f64 = y.iter().enumerate().map(|(b, c)| logpx[(b, *c)] ).sum();
    sum / y.len() as f64
}

/// Bayes step on both tracks, joint renormalization, then the switching track
/// hands a fraction alpha / t of its mass uniformly to every classifier. Returns
/// false when the Bayes step leaves no mass anywhere, in which case w is garbage.
fn switching_update(w : &mut DMatrix<f64>, logpx : &DVector<f64>, alpha : f64, t : usize) -> bool {
    let n = w.ncols();
    for mut row in w.row_iter_mut() {
        row += logpx.transpose();
    }
    let norm = calc::log_sum_exp(w.as_slice());
    if !norm.is_finite() {
        return false;
    }
    w.add_scalar_mut(-norm);
    let rate = (alpha / t as f64).min(1.0);
    let switch_row : Vec<f64> = w.row(1).iter().cloned().collect();
    let switch_mass = calc::log_sum_exp(&switch_row[..]);
    let share = rate.ln() + switch_mass - (n as f64).ln();
    let keep = (1. - rate).ln();
    for i in 0..n {
        w[(1, i)] = calc::log_add_exp(keep + w[(1, i)], share);
    }
    true
}
