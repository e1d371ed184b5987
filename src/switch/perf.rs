use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::calc;

/// Cumulative per-classifier statistics collected at every switch update,
/// kept only for external reporting. Each update contributes the batch mean
/// negative log-likelihood and the batch accuracy of every classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPerf {

    /// Infinite for a classifier that gave an observed label zero probability.
    #[serde(with = "super::encode::values")]
    loss : Vec<f64>,

    correct : Vec<f64>,

    total : usize

}

impl ClassifierPerf {

    pub fn new(nclassifiers : usize) -> Self {
        Self { loss : vec![0.0; nclassifiers], correct : vec![0.0; nclassifiers], total : 0 }
    }

    /// Expects shapes and labels already validated by the switch.
    /// Empty batches are not counted.
    pub(crate) fn record(&mut self, lst_logpx : &[DMatrix<f64>], y : &[usize]) {
        if y.is_empty() {
            return;
        }
        self.total += 1;
        for (k, logpx) in lst_logpx.iter().enumerate() {
            let n = y.len() as f64;
            let nll = -y.iter().enumerate().map(|(b, c)| logpx[(b, *c)] ).sum::<f64>() / n;
            let hits = calc::argmax_rows(logpx).iter()
                .zip(y.iter())
                .filter(|(pred, label)| pred == label )
                .count();
            self.loss[k] += nll;
            self.correct[k] += hits as f64 / n;
        }
    }

    /// Number of updates accumulated since the last reset.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Per classifier (mean loss, mean accuracy) over the accumulated updates.
    /// Empty statistics report zeros.
    pub fn summary(&self) -> Vec<(f64, f64)> {
        let total = self.total.max(1) as f64;
        self.loss.iter()
            .zip(self.correct.iter())
            .map(|(l, c)| (l / total, c / total) )
            .collect()
    }

    pub fn reset(&mut self) {
        self.loss.iter_mut().for_each(|l| *l = 0.0 );
        self.correct.iter_mut().for_each(|c| *c = 0.0 );
        self.total = 0;
    }

}

#[test]
fn perf_tracks_loss_and_accuracy() {
    let good = DMatrix::from_row_slice(2, 2, &[0.9f64.ln(), 0.1f64.ln(), 0.2f64.ln(), 0.8f64.ln()]);
    let bad = DMatrix::from_row_slice(2, 2, &[0.1f64.ln(), 0.9f64.ln(), 0.8f64.ln(), 0.2f64.ln()]);
    let mut perf = ClassifierPerf::new(2);
    perf.record(&[good, bad], &[0, 1]);
    let s = perf.summary();
    assert_eq!(perf.total(), 1);
    assert!((s[0].0 - (-(0.9f64.ln() + 0.8f64.ln()) / 2.)).abs() < 1E-12);
    assert_eq!(s[0].1, 1.0);
    assert_eq!(s[1].1, 0.0);
    perf.reset();
    assert_eq!(perf.summary(), vec![(0.0, 0.0), (0.0, 0.0)]);
}
