use alrao::*;
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

/// Trains a mixture of softmax-regression heads on a synthetic stream, each head with its
/// own learning rate drawn log-uniformly, and reports how the switch posterior settles.
#[derive(StructOpt, Debug)]
#[structopt(name = "alrao")]
pub struct Args {

    /// JSON mixture configuration; defaults are used when absent.
    #[structopt(short, long, parse(from_os_str))]
    config : Option<PathBuf>,

    #[structopt(long, default_value = "2000")]
    steps : usize,

    #[structopt(long, default_value = "32")]
    batch : usize,

    #[structopt(long, default_value = "8")]
    nfeatures : usize,

    #[structopt(long, default_value = "4")]
    nclasses : usize,

    #[structopt(long, default_value = "1e-5")]
    lr_min : f64,

    #[structopt(long, default_value = "10")]
    lr_max : f64,

    #[structopt(long, default_value = "0")]
    seed : u64,

    /// CSV file receiving the step, the mixture loss and the posterior of every head.
    #[structopt(short, long, parse(from_os_str))]
    traj : Option<PathBuf>

}

/// Labels are the argmax of a fixed random linear map of the features.
struct Stream {
    truth : DMatrix<f64>,
    rng : StdRng
}

impl Stream {

    fn new(nfeatures : usize, nclasses : usize, rng : &mut StdRng) -> Self {
        let truth = DMatrix::from_fn(nclasses, nfeatures, |_, _| rng.sample(StandardNormal) );
        Self { truth, rng : StdRng::seed_from_u64(rng.gen()) }
    }

    fn next_batch(&mut self, n : usize) -> (DMatrix<f64>, Vec<usize>) {
        let rng = &mut self.rng;
        let x : DMatrix<f64> = DMatrix::from_fn(n, self.truth.ncols(), |_, _| rng.sample(StandardNormal) );
        let y = alrao::calc::argmax_rows(&(&x * self.truth.transpose()));
        (x, y)
    }

}

/// One learning rate per head, log-uniform in [lr_min, lr_max].
fn sample_learning_rates(n : usize, lr_min : f64, lr_max : f64, rng : &mut StdRng) -> anyhow::Result<Vec<f64>> {
    if !(lr_min > 0.0 && lr_min <= lr_max) {
        anyhow::bail!("learning rates must satisfy 0 < lr_min <= lr_max, got [{}, {}]", lr_min, lr_max);
    }
    let unif = Uniform::new_inclusive(lr_min.ln(), lr_max.ln());
    Ok((0..n).map(|_| unif.sample(rng).exp() ).collect())
}

fn mixture_nll(logpx : &DMatrix<f64>, y : &[usize]) -> f64 {
    -y.iter().enumerate().map(|(b, c)| logpx[(b, *c)] ).sum::<f64>() / y.len() as f64
}

/// RUST_LOG directives when given and valid, info otherwise.
fn log_filter(directives : Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok() )
        .unwrap_or_else(|| EnvFilter::new("info") )
}

fn main() -> anyhow::Result<()> {
    let args = Args::from_args();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config = match &args.config {
        Some(path) => MixtureConfig::load_from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MixtureConfig::default()
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let lrs = sample_learning_rates(config.nclassifiers, args.lr_min, args.lr_max, &mut rng)?;
    let mut stream = Stream::new(args.nfeatures, args.nclasses, &mut rng);
    let (nfeatures, nclasses) = (args.nfeatures, args.nclasses);
    let mut model = MixtureModel::from_config(Identity, &config, |_| {
        LinearClassifier::with_rng(nfeatures, nclasses, &mut rng)
    })?;
    tracing::info!(?lrs, nclassifiers = model.nclassifiers(), "starting");

    let mut traj = match &args.traj {
        Some(path) => {
            let mut wtr = csv::Writer::from_path(path)
                .with_context(|| format!("creating trajectory file {}", path.display()))?;
            let mut header = vec![String::from("step"), String::from("loss")];
            header.extend((0..model.nclassifiers()).map(|i| format!("p{}", i) ));
            wtr.write_record(&header)?;
            Some(wtr)
        },
        None => None
    };

    let pb = ProgressBar::new(args.steps as u64);
    pb.set_style(ProgressStyle::default_bar().template("{bar:40} {pos}/{len} {msg}"));

    for step in 0..args.steps {
        let (x, y) = stream.next_batch(args.batch);
        let out = model.forward(&x)?;
        let loss = mixture_nll(out.features(), &y);

        for (cl, lr) in model.classifiers_mut().iter_mut().zip(lrs.iter()) {
            let grad = cl.nll_grad(&x, &y)?;
            cl.fc.sgd_step(&grad, *lr)?;
        }
        model.update_switch(&y, None, true)?;

        if let Some(wtr) = traj.as_mut() {
            let post : DVector<f64> = model.posterior();
            let mut record = vec![step.to_string(), loss.to_string()];
            record.extend(post.iter().map(|p| p.to_string() ));
            wtr.write_record(&record)?;
        }
        pb.set_message(format!("loss {:.4} {}", loss, model.repr_posterior()));
        pb.inc(1);
    }
    pb.finish();

    if let Some(mut wtr) = traj {
        wtr.flush()?;
    }
    if let Some(perf) = model.switch().cl_perf() {
        for (i, ((loss, acc), lr)) in perf.summary().iter().zip(lrs.iter()).enumerate() {
            tracing::info!(head = i, lr, loss, acc, posterior = model.posterior()[i], "classifier summary");
        }
    }
    println!("{}", model.repr_posterior());
    Ok(())
}

#[test]
fn log_level_from_environment_is_not_overridden() {
    assert!(log_filter(Some("debug")).to_string().contains("debug"));
    assert!(!log_filter(Some("debug")).to_string().contains("info"));
    assert!(log_filter(Some("alrao=trace")).to_string().contains("alrao=trace"));
    assert_eq!(log_filter(None).to_string(), "info");
}
