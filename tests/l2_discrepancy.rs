use ndarray::{Array1, ArrayD, IxDyn};
use pathdist::kernel::{ParallelL2Kernel, SerialL2Kernel};
use pathdist::l2::L2Discrepancy;
use pathdist::pseudometric::MetricKind;
use pathdist::Error;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

fn random_tensor(rng: &mut ChaCha8Rng, shape: &[usize]) -> ArrayD<f32> {
    let mut out = ArrayD::<f32>::zeros(IxDyn(shape));
    for x in out.iter_mut() {
        *x = StandardNormal.sample(rng);
    }
    out
}

#[test]
fn ramp_against_zero_has_a_known_closed_form() {
    // f(t) = t, g(t) = 0 on [0, 2]: sqrt(∫ t² dt) = sqrt(8/3).
    let times = Array1::from_vec(vec![0.0f32, 1.0, 2.0]);
    let path1 = ArrayD::from_shape_vec(IxDyn(&[3, 1]), vec![0.0f32, 1.0, 2.0]).unwrap();
    let path2 = ArrayD::from_shape_vec(IxDyn(&[3, 1]), vec![0.0f32, 0.0, 0.0]).unwrap();

    let disc = L2Discrepancy::new(1, MetricKind::Identity, 0).unwrap();
    let out = disc
        .compute(&times.view(), &path1.view(), &path2.view())
        .unwrap();

    assert!(out.shape().is_empty(), "unbatched input gives a scalar output");
    let got = *out.iter().next().unwrap();
    let expected = (8.0f32 / 3.0).sqrt();
    assert!(
        (got - expected).abs() <= 1e-6,
        "got {got}, expected {expected}"
    );
}

#[test]
fn output_takes_path1_batch_shape() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let times = Array1::from_vec(vec![0.0f32, 0.4, 1.0, 1.7]);
    let path1 = random_tensor(&mut rng, &[2, 3, 4, 2]);
    let path2 = random_tensor(&mut rng, &[4, 2]);

    let disc = L2Discrepancy::new(2, MetricKind::General, 7).unwrap();
    let out = disc
        .compute(&times.view(), &path1.view(), &path2.view())
        .unwrap();
    assert_eq!(out.shape(), &[2, 3]);
}

#[test]
fn batched_path2_is_rejected() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let times = Array1::from_vec(vec![0.0f32, 1.0, 2.0]);
    let path1 = random_tensor(&mut rng, &[4, 3, 1]);
    let batched_path2 = random_tensor(&mut rng, &[4, 3, 1]);

    let disc = L2Discrepancy::new(1, MetricKind::Identity, 0).unwrap();
    assert!(matches!(
        disc.compute(&times.view(), &path1.view(), &batched_path2.view()),
        Err(Error::Shape(_))
    ));
}

#[test]
fn bad_grids_and_channel_mismatch_are_rejected_before_work() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let path1 = random_tensor(&mut rng, &[2, 3, 2]);
    let path2 = random_tensor(&mut rng, &[3, 2]);
    let disc = L2Discrepancy::new(2, MetricKind::Identity, 0).unwrap();

    let unordered = Array1::from_vec(vec![0.0f32, 2.0, 1.0]);
    assert!(matches!(
        disc.compute(&unordered.view(), &path1.view(), &path2.view()),
        Err(Error::Shape(_))
    ));

    let repeated = Array1::from_vec(vec![0.0f32, 1.0, 1.0]);
    assert!(matches!(
        disc.compute(&repeated.view(), &path1.view(), &path2.view()),
        Err(Error::Shape(_))
    ));

    let times = Array1::from_vec(vec![0.0f32, 1.0, 2.0]);
    let narrow_path2 = random_tensor(&mut rng, &[3, 1]);
    assert!(matches!(
        disc.compute(&times.view(), &path1.view(), &narrow_path2.view()),
        Err(Error::Shape(_))
    ));
}

#[test]
fn explicit_kernels_agree_through_the_public_api() {
    for seed in 0..10u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let len = rng.random_range(2..10);
        let channels = rng.random_range(1..4);
        let batch = rng.random_range(1..5);

        let mut times = Array1::<f32>::zeros(len);
        let mut t = 0.0f32;
        for i in 0..len {
            t += rng.random_range(0.1..1.0);
            times[i] = t;
        }
        let path1 = random_tensor(&mut rng, &[batch, len, channels]);
        let path2 = random_tensor(&mut rng, &[len, channels]);

        let serial = L2Discrepancy::with_kernel(
            channels,
            MetricKind::General,
            seed,
            Box::new(SerialL2Kernel),
        )
        .unwrap();
        let parallel = L2Discrepancy::with_kernel(
            channels,
            MetricKind::General,
            seed,
            Box::new(ParallelL2Kernel),
        )
        .unwrap();

        let a = serial
            .compute(&times.view(), &path1.view(), &path2.view())
            .unwrap();
        let b = parallel
            .compute(&times.view(), &path1.view(), &path2.view())
            .unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5 * (1.0 + y.abs()), "seed {seed}: {x} vs {y}");
        }
    }
}

#[test]
fn sgd_on_the_diagonal_metric_reduces_the_mean_discrepancy() {
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    let len = 8usize;
    let channels = 3usize;
    let batch = 16usize;

    let times = Array1::from_iter((0..len).map(|i| i as f32 * 0.25));
    let path1 = random_tensor(&mut rng, &[batch, len, channels]);
    let path2 = random_tensor(&mut rng, &[len, channels]);

    let mut disc = L2Discrepancy::new(channels, MetricKind::Diagonal, 5).unwrap();

    let mean = |d: &L2Discrepancy| -> f32 {
        let out = d
            .compute(&times.view(), &path1.view(), &path2.view())
            .unwrap();
        out.iter().sum::<f32>() / batch as f32
    };

    // Mean-discrepancy loss: cotangent 1/batch on every element.
    let cot = ArrayD::from_elem(IxDyn(&[batch]), 1.0f32 / batch as f32);

    let before = mean(&disc);
    for _ in 0..60 {
        let vjp = disc
            .vjp(&times.view(), &path1.view(), &path2.view(), &cot.view())
            .unwrap();
        let grad = vjp.metric.expect("diagonal metric has a parameter");
        disc.metric_mut().sgd_step(&grad, 5e-2).unwrap();
    }
    let after = mean(&disc);

    assert!(
        after < 0.5 * before,
        "expected the learned metric to shrink the loss: before={before} after={after}"
    );
}
