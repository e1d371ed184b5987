use nalgebra::{DMatrix, DVector};
use crate::config::MixtureConfig;
use crate::error::{MixtureError, Result};
use crate::switch::Switch;

pub mod backbone;

pub use backbone::*;

pub mod head;

pub use head::*;

/// Log-posterior below which update_switch resets a classifier head.
pub const DEFAULT_CATCH_UP_THRESHOLD : f64 = -20.0;

const BARS : [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// A shared backbone feeding a fixed, ordered set of classifier heads whose outputs are
/// averaged by a Switch. Heads are addressed by their index in 0..nclassifiers.
///
/// A training step is expected to run strictly in this order: forward, loss and
/// optimizer step on the heads (external), then update_switch. Catch-up overwrites the
/// weights of weak heads and must be the last mutation of the step.
///
/// forward caches the features and the per-classifier log-probabilities it computed.
/// The cache holds a single batch and is overwritten by the next forward, so
/// update_switch without features must follow the forward of the same step.
pub struct MixtureModel<B, H> {

    backbone : B,

    classifiers : Vec<H>,

    switch : Switch,

    catch_up_threshold : f64,

    last_x : Option<DMatrix<f64>>,

    last_lst_logpx : Option<Vec<DMatrix<f64>>>

}

impl<B, H> MixtureModel<B, H>
where
    B : Backbone,
    H : ClassifierHead
{

    /// Builds nclassifiers heads by calling factory once per classifier index, under a
    /// uniform Bayesian switch that keeps per-classifier statistics.
    pub fn new<F>(backbone : B, nclassifiers : usize, factory : F) -> Result<Self>
    where
        F : FnMut(usize) -> H
    {
        let classifiers : Vec<H> = (0..nclassifiers).map(factory).collect();
        Self::with_switch(backbone, classifiers, Switch::new(nclassifiers, true))
    }

    pub fn from_config<F>(backbone : B, config : &MixtureConfig, factory : F) -> Result<Self>
    where
        F : FnMut(usize) -> H
    {
        config.validate()?;
        let switch = Switch::with_policy(config.nclassifiers, config.policy, config.save_cl_perf)?;
        let classifiers : Vec<H> = (0..config.nclassifiers).map(factory).collect();
        let mut model = Self::with_switch(backbone, classifiers, switch)?;
        model.catch_up_threshold = config.catch_up_threshold;
        Ok(model)
    }

    pub fn with_switch(backbone : B, classifiers : Vec<H>, switch : Switch) -> Result<Self> {
        if classifiers.is_empty() {
            return Err(MixtureError::NoClassifiers);
        }
        if classifiers.len() != switch.nclassifiers() {
            return Err(MixtureError::ClassifierCount {
                expected : switch.nclassifiers(),
                actual : classifiers.len()
            });
        }
        Ok(Self {
            backbone,
            classifiers,
            switch,
            catch_up_threshold : DEFAULT_CATCH_UP_THRESHOLD,
            last_x : None,
            last_lst_logpx : None
        })
    }

    pub fn nclassifiers(&self) -> usize {
        self.classifiers.len()
    }

    /// Runs the backbone, every head on the leading feature tensor, and the switch
    /// mixture over the heads. The result has the variant of the backbone output, with
    /// the mixture log-probabilities in front and any auxiliary outputs passed through.
    pub fn forward(&mut self, input : &B::Input) -> Result<FeatureOutput> {
        let (x, aux) = self.backbone.forward(input)?.into_parts();
        let lst_logpx = self.predict(&x)?;
        let mixture = self.switch.forward(&lst_logpx)?;
        self.last_x = Some(x);
        self.last_lst_logpx = Some(lst_logpx);
        Ok(FeatureOutput::from_parts(mixture, aux))
    }

    fn predict(&self, x : &DMatrix<f64>) -> Result<Vec<DMatrix<f64>>> {
        self.classifiers.iter().map(|cl| cl.forward(x) ).collect()
    }

    /// Updates the switch posterior with the labels y. Without x, the per-classifier
    /// log-probabilities cached by the last forward are reused; with x (a feature batch,
    /// the backbone is not run) they are recomputed by the heads. When catch_up is set,
    /// heads that fell below the configured threshold are then reset.
    pub fn update_switch(&mut self, y : &[usize], x : Option<&DMatrix<f64>>, catch_up : bool) -> Result<()> {
        match x {
            Some(x) => {
                let lst_logpx = self.predict(x)?;
                self.switch.update(&lst_logpx, y)?;
            },
            None => {
                let lst_logpx = self.last_lst_logpx.as_ref().ok_or(MixtureError::EmptyCache)?;
                self.switch.update(lst_logpx, y)?;
            }
        }
        if catch_up {
            self.hard_catch_up(self.catch_up_threshold)?;
        }
        Ok(())
    }

    /// Resets every head whose log-posterior is strictly below threshold to the
    /// posterior-weighted average of all heads' fc weight and bias (the weak heads
    /// included, with the linear-domain posterior as weights). Returns how many heads
    /// were reset; when there are none no parameter is touched.
    pub fn hard_catch_up(&mut self, threshold : f64) -> Result<usize> {
        let weak : Vec<usize> = self.switch.logposterior().iter()
            .enumerate()
            .filter(|(_, lp)| **lp < threshold )
            .map(|(i, _)| i )
            .collect();
        if weak.is_empty() {
            return Ok(0);
        }

        let post = self.switch.posterior();
        let first = self.classifiers[0].fc();
        let mut mean_weight : DMatrix<f64> = DMatrix::zeros(first.weight.nrows(), first.weight.ncols());
        let mut mean_bias : DVector<f64> = DVector::zeros(first.bias.nrows());
        for (cl, p) in self.classifiers.iter().zip(post.iter()) {
            let fc = cl.fc();
            if fc.weight.shape() != mean_weight.shape() {
                return Err(MixtureError::ShapeMismatch { expected : mean_weight.shape(), actual : fc.weight.shape() });
            }
            if fc.bias.nrows() != mean_bias.nrows() {
                return Err(MixtureError::ShapeMismatch { expected : mean_bias.shape(), actual : fc.bias.shape() });
            }
            mean_weight += &fc.weight * *p;
            mean_bias += &fc.bias * *p;
        }

        for i in weak.iter() {
            let fc = self.classifiers[*i].fc_mut();
            fc.weight.copy_from(&mean_weight);
            fc.bias.copy_from(&mean_bias);
        }
        tracing::info!(heads = ?weak, "caught up weak classifiers");
        Ok(weak.len())
    }

    pub fn reset_parameters(&mut self) {
        self.backbone.reset_parameters();
        for cl in self.classifiers.iter_mut() {
            cl.reset_parameters();
        }
    }

    /// Per-classifier log-probabilities. Without input, returns those cached by the last
    /// forward; with input, runs the backbone and the heads and refreshes the cache.
    pub fn classifiers_predictions(&mut self, input : Option<&B::Input>) -> Result<&[DMatrix<f64>]> {
        if let Some(input) = input {
            let (x, _) = self.backbone.forward(input)?.into_parts();
            let lst_logpx = self.predict(&x)?;
            self.last_x = Some(x);
            self.last_lst_logpx = Some(lst_logpx);
        }
        self.last_lst_logpx.as_deref().ok_or(MixtureError::EmptyCache)
    }

    /// Linear-domain posterior over the classifier heads.
    pub fn posterior(&self) -> DVector<f64> {
        self.switch.posterior()
    }

    /// One bar per head, scaled so the most probable head gets a full block.
    pub fn repr_posterior(&self) -> String {
        let post = self.posterior();
        let max = post.max();
        let bars : String = post.iter()
            .map(|p| {
                let level = if max > 0.0 { (p / max * 8.) as usize } else { 0 };
                BARS[level.min(8)]
            })
            .collect();
        format!("|{}|", bars)
    }

    pub fn parameters_model(&self) -> Vec<&[f64]> {
        self.backbone.parameters()
    }

    pub fn parameters_model_mut(&mut self) -> Vec<&mut [f64]> {
        self.backbone.parameters_mut()
    }

    /// One parameter group per head, in classifier order.
    pub fn classifiers_parameters_list(&self) -> Vec<Vec<&[f64]>> {
        self.classifiers.iter().map(|cl| cl.parameters() ).collect()
    }

    pub fn classifiers_parameters_list_mut(&mut self) -> Vec<Vec<&mut [f64]>> {
        self.classifiers.iter_mut().map(|cl| cl.parameters_mut() ).collect()
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    pub fn backbone_mut(&mut self) -> &mut B {
        &mut self.backbone
    }

    pub fn classifiers(&self) -> &[H] {
        &self.classifiers[..]
    }

    pub fn classifiers_mut(&mut self) -> &mut [H] {
        &mut self.classifiers[..]
    }

    pub fn switch(&self) -> &Switch {
        &self.switch
    }

    pub fn switch_mut(&mut self) -> &mut Switch {
        &mut self.switch
    }

    pub fn catch_up_threshold(&self) -> f64 {
        self.catch_up_threshold
    }

    /// Feature batch seen by the heads at the last forward.
    pub fn last_features(&self) -> Option<&DMatrix<f64>> {
        self.last_x.as_ref()
    }

}
