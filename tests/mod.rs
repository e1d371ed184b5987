use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use alrao::*;

const EPS : f64 = 10E-8;

/// Head with hand-set parameters.
fn head(weight : &[f64], bias : &[f64], nfeatures : usize) -> LinearClassifier {
    let nclasses = bias.len();
    LinearClassifier::from_linear(Linear {
        weight : DMatrix::from_row_slice(nclasses, nfeatures, weight),
        bias : DVector::from_column_slice(bias)
    })
}

fn random_model(nclassifiers : usize, nfeatures : usize, nclasses : usize, seed : u64) -> MixtureModel<Identity, LinearClassifier> {
    let mut rng = StdRng::seed_from_u64(seed);
    MixtureModel::new(Identity, nclassifiers, |_| LinearClassifier::with_rng(nfeatures, nclasses, &mut rng)).unwrap()
}

fn batch(seed : u64) -> (DMatrix<f64>, Vec<usize>) {
    let x = DMatrix::from_fn(5, 3, |i, j| ((i * 3 + j) as f64 * 0.37 + seed as f64).sin() );
    let y = vec![0, 1, 2, 1, 0];
    (x, y)
}

/// Backbone returning its input as features plus two auxiliary tensors.
struct WithState;

impl Backbone for WithState {

    type Input = DMatrix<f64>;

    fn forward(&self, input : &DMatrix<f64>) -> Result<FeatureOutput> {
        let hidden = input.map(|v| v * 2.0 );
        let attn = DMatrix::from_element(1, 1, 42.0);
        Ok(FeatureOutput::WithAux(input.clone(), vec![hidden, attn]))
    }

}

#[test]
fn identity_backbone_two_heads() {
    // Head 0 scores [1, 0] on x = [1, 0]; head 1 scores [0, 0].
    let heads = vec![
        head(&[1., 0., 0., 0.], &[0., 0.], 2),
        head(&[0., 0., 0., 0.], &[0., 0.], 2)
    ];
    let mut model = MixtureModel::with_switch(Identity, heads, Switch::new(2, false)).unwrap();
    let x = DMatrix::from_row_slice(1, 2, &[1., 0.]);

    let out = model.forward(&x).unwrap();
    let mix = out.features();
    assert!((mix[(0, 0)] - (-0.48527274827535316)).abs() < EPS);
    assert!((mix[(0, 1)] - (-0.9558876680094344)).abs() < EPS);

    let lst = model.classifiers_predictions(None).unwrap();
    assert!((lst[0][(0, 0)] - (-0.3132616875182228)).abs() < EPS);
    assert!((lst[1][(0, 1)] - (-0.6931471805599453)).abs() < EPS);

    model.update_switch(&[0], None, false).unwrap();
    let post = model.posterior();
    assert!((post[0] - 0.5938454849513094).abs() < EPS);
    assert!((post[1] - 0.4061545150486906).abs() < EPS);
    assert!((model.switch().logposterior()[0] - (-0.521136119802815)).abs() < EPS);
}

#[test]
fn posterior_stays_normalized() {
    for n in 1..6 {
        let mut model = random_model(n, 3, 3, n as u64);
        for step in 0..10 {
            let (x, y) = batch(step);
            model.forward(&x).unwrap();
            model.update_switch(&y, None, true).unwrap();
            assert!((model.posterior().sum() - 1.0).abs() < EPS);
            assert_eq!(model.switch().logposterior().nrows(), n);
        }
    }
}

#[test]
fn forward_is_idempotent() {
    let mut model = random_model(4, 3, 3, 1);
    let (x, _) = batch(0);
    let a = model.forward(&x).unwrap();
    let b = model.forward(&x).unwrap();
    assert_eq!(a, b);
}

#[test]
fn mixture_rows_are_distributions() {
    let mut model = random_model(3, 3, 3, 2);
    let (x, y) = batch(1);
    model.forward(&x).unwrap();
    model.update_switch(&y, None, false).unwrap();
    let out = model.forward(&x).unwrap();
    for row in out.features().row_iter() {
        assert!((row.map(f64::exp).sum() - 1.0).abs() < EPS);
    }
}

#[test]
fn better_classifier_gains_mass() {
    // Head 0 favours class 0, head 1 is indifferent, head 2 favours class 1.
    let heads = vec![
        head(&[2., 0., 0., 0.], &[0., 0.], 2),
        head(&[0., 0., 0., 0.], &[0., 0.], 2),
        head(&[0., 0., 2., 0.], &[0., 0.], 2)
    ];
    let mut model = MixtureModel::with_switch(Identity, heads, Switch::new(3, false)).unwrap();
    let x = DMatrix::from_row_slice(2, 2, &[1., 0., 1., 0.]);
    let y = [0, 0];
    let mut ratio = 1.0;
    for _ in 0..5 {
        model.forward(&x).unwrap();
        model.update_switch(&y, None, false).unwrap();
        let post = model.posterior();
        assert!(post[0] > post[1] && post[1] > post[2]);
        let r = post[0] / post[1];
        assert!(r > ratio);
        ratio = r;
    }
}

#[test]
fn catch_up_resets_weak_head_to_weighted_mean() {
    let heads = vec![
        head(&[1., 2., 3., 4.], &[0.5, -0.5], 2),
        head(&[-1., 0., 1., 0.], &[1., 1.], 2),
        head(&[0., 3., -2., 1.], &[-2., 0.], 2)
    ];
    let mut model = MixtureModel::with_switch(Identity, heads, Switch::new(3, false)).unwrap();
    model.switch_mut().set_logposterior(DVector::from_column_slice(&[-25., -1., -1.])).unwrap();
    let post = model.posterior();
    let before : Vec<Linear> = model.classifiers().iter().map(|cl| cl.fc.clone() ).collect();

    let mut expected_w : DMatrix<f64> = DMatrix::zeros(2, 2);
    let mut expected_b : DVector<f64> = DVector::zeros(2);
    for (fc, p) in before.iter().zip(post.iter()) {
        expected_w += &fc.weight * *p;
        expected_b += &fc.bias * *p;
    }

    assert_eq!(model.hard_catch_up(-20.0).unwrap(), 1);
    let after = model.classifiers();
    assert!((&after[0].fc.weight - &expected_w).amax() < EPS);
    assert!((&after[0].fc.bias - &expected_b).amax() < EPS);
    assert_eq!(after[1].fc, before[1]);
    assert_eq!(after[2].fc, before[2]);
}

#[test]
fn catch_up_without_weak_heads_is_noop() {
    let mut model = random_model(3, 3, 3, 5);
    let before : Vec<Linear> = model.classifiers().iter().map(|cl| cl.fc.clone() ).collect();
    assert_eq!(model.hard_catch_up(-20.0).unwrap(), 0);
    let after : Vec<Linear> = model.classifiers().iter().map(|cl| cl.fc.clone() ).collect();
    assert_eq!(before, after);
}

#[test]
fn update_switch_catches_up_by_default_threshold() {
    // Head 1 puts almost no mass on the observed class and falls below -20 after one batch.
    let heads = vec![
        head(&[0., 0., 0., 0.], &[0., 0.], 2),
        head(&[0., 0., 0., 0.], &[-30., 30.], 2)
    ];
    let mut model = MixtureModel::with_switch(Identity, heads, Switch::new(2, false)).unwrap();
    let x = DMatrix::from_row_slice(1, 2, &[1., 1.]);
    model.forward(&x).unwrap();
    model.update_switch(&[0], None, true).unwrap();
    assert!(model.switch().logposterior()[1] < model.catch_up_threshold());
    let p = model.posterior();
    let expected_bias = DVector::from_column_slice(&[-30. * p[1], 30. * p[1]]);
    assert!((&model.classifiers()[1].fc.bias - &expected_bias).amax() < EPS);
    assert_eq!(model.classifiers()[0].fc.bias, DVector::<f64>::zeros(2));
}

#[test]
fn cached_update_matches_explicit_features() {
    let (x, y) = batch(3);
    let mut cached = random_model(4, 3, 3, 9);
    let mut explicit = random_model(4, 3, 3, 9);
    cached.forward(&x).unwrap();
    explicit.forward(&x).unwrap();
    let features = explicit.last_features().unwrap().clone();
    cached.update_switch(&y, None, false).unwrap();
    explicit.update_switch(&y, Some(&features), false).unwrap();
    assert_eq!(cached.switch().logposterior(), explicit.switch().logposterior());
}

#[test]
fn update_without_forward_fails() {
    let mut model = random_model(2, 3, 3, 4);
    assert!(matches!(model.update_switch(&[0], None, true), Err(MixtureError::EmptyCache)));
    assert!(matches!(model.classifiers_predictions(None), Err(MixtureError::EmptyCache)));
}

#[test]
fn composite_output_passes_auxiliary_through() {
    let mut rng = StdRng::seed_from_u64(8);
    let mut with_aux = MixtureModel::new(WithState, 3, |_| LinearClassifier::with_rng(3, 3, &mut rng)).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let mut plain = MixtureModel::new(Identity, 3, |_| LinearClassifier::with_rng(3, 3, &mut rng)).unwrap();
    let (x, _) = batch(2);

    let out = with_aux.forward(&x).unwrap();
    let reference = plain.forward(&x).unwrap();
    assert_eq!(out.features(), reference.features());
    assert_eq!(out.aux().len(), 2);
    assert_eq!(out.aux()[0], x.map(|v| v * 2.0 ));
    assert_eq!(out.aux()[1], DMatrix::from_element(1, 1, 42.0));
    assert!(matches!(reference, FeatureOutput::Plain(_)));
}

#[test]
fn predictions_with_input_refresh_the_cache() {
    let mut model = random_model(2, 3, 3, 6);
    let (x0, _) = batch(0);
    let (x1, _) = batch(1);
    model.forward(&x0).unwrap();
    let fresh : Vec<DMatrix<f64>> = model.classifiers_predictions(Some(&x1)).unwrap().to_vec();
    let expected : Vec<DMatrix<f64>> = model.classifiers().iter().map(|cl| cl.forward(&x1).unwrap() ).collect();
    assert_eq!(fresh, expected);
    assert_eq!(model.classifiers_predictions(None).unwrap(), &expected[..]);
    assert_eq!(model.last_features(), Some(&x1));
}

#[test]
fn shape_errors_are_reported() {
    let mut model = random_model(2, 3, 3, 7);
    let (x, _) = batch(0);
    assert!(matches!(model.forward(&DMatrix::zeros(2, 5)), Err(MixtureError::ShapeMismatch { .. })));
    model.forward(&x).unwrap();
    assert!(matches!(model.update_switch(&[0, 1], None, true), Err(MixtureError::LabelCount { expected : 5, actual : 2 })));
    assert!(matches!(model.update_switch(&[0, 1, 2, 3, 0], None, true), Err(MixtureError::LabelOutOfRange { label : 3, nclasses : 3 })));
    assert!(matches!(
        MixtureModel::<Identity, LinearClassifier>::new(Identity, 0, |_| LinearClassifier::new(3, 3)),
        Err(MixtureError::NoClassifiers)
    ));
}

#[test]
fn parameter_groups_follow_classifiers() {
    let mut model = random_model(3, 4, 2, 10);
    assert!(model.parameters_model().is_empty());
    let groups = model.classifiers_parameters_list();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.len() == 2 && g[0].len() == 8 && g[1].len() == 2 ));
    for (i, group) in model.classifiers_parameters_list_mut().into_iter().enumerate() {
        for param in group {
            param.iter_mut().for_each(|v| *v = i as f64 );
        }
    }
    assert!(model.classifiers()[2].fc.bias.iter().all(|b| *b == 2.0 ));
}

#[test]
fn reset_parameters_reinitializes_heads() {
    let heads = vec![head(&[0.; 6], &[0., 0.], 3), head(&[0.; 6], &[0., 0.], 3)];
    let mut model = MixtureModel::with_switch(Identity, heads, Switch::new(2, false)).unwrap();
    model.reset_parameters();
    for cl in model.classifiers() {
        assert!(cl.fc.weight.iter().any(|w| *w != 0.0 ));
        assert!(cl.fc.weight.iter().all(|w| w.abs() <= 1. / 3f64.sqrt() ));
    }
}

#[test]
fn posterior_bars() {
    let mut model = random_model(3, 3, 3, 12);
    assert_eq!(model.repr_posterior(), "|███|");
    model.switch_mut().set_logposterior(DVector::from_column_slice(&[0.5f64.ln(), 0.275f64.ln(), 1E-4f64.ln()])).unwrap();
    assert_eq!(model.repr_posterior(), "|█▄ |");
}

#[test]
fn config_builds_switching_model() {
    let config = MixtureConfig {
        nclassifiers : 3,
        policy : SwitchPolicy::Switching { theta : 0.999, alpha : 0.01 },
        save_cl_perf : false,
        catch_up_threshold : -10.0
    };
    let model = MixtureModel::from_config(Identity, &config, |_| LinearClassifier::new(3, 3)).unwrap();
    assert_eq!(model.nclassifiers(), 3);
    assert_eq!(model.catch_up_threshold(), -10.0);
    assert!(model.switch().cl_perf().is_none());
    assert_eq!(model.switch().policy(), config.policy);
}

#[test]
fn classifier_perf_is_collected() {
    let mut model = random_model(2, 3, 3, 13);
    for step in 0..3 {
        let (x, y) = batch(step);
        model.forward(&x).unwrap();
        model.update_switch(&y, None, false).unwrap();
    }
    let perf = model.switch().cl_perf().unwrap();
    assert_eq!(perf.total(), 3);
    for (loss, acc) in perf.summary() {
        assert!(loss > 0.0);
        assert!(acc >= 0.0 && acc <= 1.0);
    }
    model.switch_mut().reset_cl_perf();
    assert_eq!(model.switch().cl_perf().unwrap().total(), 0);
}

#[test]
fn empty_batch_is_ignored_by_update_switch() {
    let mut model = random_model(2, 3, 3, 17);
    let (x, y) = batch(0);
    model.forward(&x).unwrap();
    model.update_switch(&y, None, false).unwrap();
    let post = model.posterior();
    let summary = model.switch().cl_perf().unwrap().summary();

    let out = model.forward(&DMatrix::zeros(0, 3)).unwrap();
    assert_eq!(out.features().nrows(), 0);
    model.update_switch(&[], None, true).unwrap();

    assert_eq!(model.posterior(), post);
    let perf = model.switch().cl_perf().unwrap();
    assert_eq!(perf.total(), 1);
    assert_eq!(perf.summary(), summary);
    assert!(perf.summary().iter().all(|(loss, acc)| loss.is_finite() && acc.is_finite() ));
}
