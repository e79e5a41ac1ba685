use approx::assert_abs_diff_eq;
use gridfit::linalg::sparse_exact::sparse_matvec;
use gridfit::{
    FitError, FitOptions, GridSpec, InterpMethod, Smoothness, SolverKind, build_system, fit_grid,
    fit_scattered,
};
use ndarray::{Array1, Array2, IxDyn, array};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rand_distr::{Distribution, Normal};

fn uniform_points(n: usize, ndim: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Array2::zeros((n, ndim));
    for i in 0..n {
        for j in 0..ndim {
            x[[i, j]] = rng.random_range(0.0..1.0);
        }
    }
    x
}

#[test]
fn exact_interpolation_in_one_dimension() {
    let points = array![[0.0], [1.0], [2.0], [3.0]];
    let values = array![0.0, 1.0, 4.0, 9.0];
    for solver in [SolverKind::Normal, SolverKind::Direct] {
        let options = FitOptions::new(1e-9, InterpMethod::Linear, solver);
        let fit = fit_scattered(
            points.view(),
            values.view(),
            vec![vec![0.0, 1.0, 2.0, 3.0]],
            &options,
        )
        .expect("1-D fit");
        let flat = fit.flat().expect("flat");
        for (got, want) in flat.iter().zip(values.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
    }
}

#[test]
fn points_outside_the_grid_are_rejected() {
    let points = array![[0.25], [1.5], [0.75]];
    let values = array![1.0, 2.0, 3.0];
    let err = fit_scattered(
        points.view(),
        values.view(),
        vec![vec![0.0, 0.5, 1.0]],
        &FitOptions::default(),
    )
    .unwrap_err();
    match err {
        FitError::DomainBounds {
            axis,
            point,
            value,
            min,
            max,
        } => {
            assert_eq!((axis, point), (0, 1));
            assert_eq!(value, 1.5);
            assert_eq!((min, max), (0.0, 1.0));
        }
        other => panic!("expected DomainBounds, got {other:?}"),
    }
}

#[test]
fn non_monotonic_axis_is_rejected() {
    let points = array![[0.5]];
    let values = array![1.0];
    let err = fit_scattered(
        points.view(),
        values.view(),
        vec![vec![0.0, 2.0, 1.0]],
        &FitOptions::default(),
    )
    .unwrap_err();
    assert!(
        matches!(
            err,
            FitError::NonMonotonicGrid {
                axis: 0,
                position: 2,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn plane_is_recovered_on_an_eleven_by_eleven_grid() {
    let points = uniform_points(400, 2, 7);
    let values = points.column(0).to_owned() + &(points.column(1).to_owned() * 2.0);
    let grid = GridSpec::uniform(&[(0.0, 1.0, 11), (0.0, 1.0, 11)]).expect("grid");
    let options = FitOptions::new(0.01, InterpMethod::Linear, SolverKind::Normal);
    let fit = fit_grid(points.view(), values.view(), &grid, &options).expect("fit");

    assert_eq!(fit.shape(), &[11, 11]);
    for i in 0..11 {
        for j in 0..11 {
            let expected = i as f64 / 10.0 + 2.0 * j as f64 / 10.0;
            let got = fit.values()[IxDyn(&[i, j])];
            assert!(
                (got - expected).abs() < 1e-2,
                "node ({i}, {j}): got {got}, expected {expected}"
            );
        }
    }
    assert!(fit.diagnostics.fidelity_rmse < 1e-6);
}

#[test]
fn stronger_smoothing_trades_fidelity_for_flatness() {
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 0.2).expect("normal");
    let points = uniform_points(250, 2, 11);
    let values = Array1::from_shape_fn(points.nrows(), |i| {
        let (x, y) = (points[[i, 0]], points[[i, 1]]);
        (6.0 * x).sin() * (4.0 * y).cos() + noise.sample(&mut rng)
    });
    let grid = GridSpec::uniform(&[(0.0, 1.0, 9), (0.0, 1.0, 8)]).expect("grid");

    // Unit-weight penalty rows measure roughness independently of the fit.
    let unit = build_system(
        points.view(),
        &grid,
        &Smoothness::Uniform(1.0),
        InterpMethod::Linear,
    )
    .expect("unit system");

    let mut previous: Option<(f64, f64)> = None;
    for weight in [0.001, 0.01, 0.1, 1.0, 10.0] {
        let options = FitOptions::new(weight, InterpMethod::Linear, SolverKind::Normal);
        let fit = fit_grid(points.view(), values.view(), &grid, &options).expect("fit");
        let z = fit.flat().expect("flat");
        let roughness: f64 = unit
            .penalties
            .iter()
            .map(|p| {
                let r = sparse_matvec(&p.matrix, &z);
                r.dot(&r)
            })
            .sum::<f64>()
            .sqrt();
        let misfit = fit.diagnostics.fidelity_rmse;
        if let Some((prev_rough, prev_misfit)) = previous {
            assert!(
                roughness < prev_rough,
                "weight {weight}: roughness {roughness} did not drop below {prev_rough}"
            );
            assert!(
                misfit >= prev_misfit * (1.0 - 1e-9),
                "weight {weight}: misfit {misfit} fell below {prev_misfit}"
            );
        }
        previous = Some((roughness, misfit));
    }
}
