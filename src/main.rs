use std::process::ExitCode;

use burn::{
    backend::{Autodiff, NdArray},
    prelude::*,
    tensor::Distribution,
};
use burning_syncbn::{
    ComputePath, NormalizationParameters, SyncBatchNormConfig, SyncBnError,
    gradcheck::check_batch_norm_train, sum_square,
};
use clap::Parser;
use tap::Pipe;

use claps::{ShapeArgs, Things};

mod claps;

type HostBackend = NdArray<f32>;

fn main() -> ExitCode {
    env_logger::init();

    let things = Things::parse();
    log::debug!("{:?}", things);

    match run(things) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(things: Things) -> burning_syncbn::Result<bool> {
    let device = Default::default();

    match things {
        Things::Stats { shape } => {
            let x = random_input(&shape, 1, &device);
            let (stats, _) = sum_square(x)?;

            println!("sum: {}", stats.sum);
            println!("sum_squares: {}", stats.sum_squares);

            Ok(true)
        }
        Things::Sync {
            shape,
            replicas,
            path,
            tolerance,
        } => sync(&shape, replicas, path.into(), tolerance, &device),
        Things::Gradcheck {
            shape,
            step,
            tolerance,
        } => {
            let input = random_input(&shape, 1, &device);
            let weights = input.random_like(Distribution::Uniform(-1.0, 1.0));
            let channels = shape.channels;
            let params = NormalizationParameters::new(
                Tensor::random([channels], Distribution::Normal(0.0, 1.0), &device),
                Tensor::random([channels], Distribution::Uniform(1.0, 2.0), &device),
                Tensor::random([channels], Distribution::Normal(0.0, 1.0), &device),
                Tensor::random([channels], Distribution::Normal(0.0, 1.0), &device),
            );

            let report =
                check_batch_norm_train(ComputePath::Accelerator, input, params, weights, step)?;

            print!("{report}");
            println!(
                "{} (tolerance {tolerance:.1e})",
                if report.passes(tolerance) { "ok" } else { "FAILED" }
            );

            Ok(report.passes(tolerance))
        }
    }
}

fn random_input(
    shape: &ShapeArgs,
    replicas: usize,
    device: &<HostBackend as Backend>::Device,
) -> Tensor<HostBackend, 3> {
    HostBackend::seed(shape.seed);

    Tensor::random(
        [shape.batch * replicas, shape.channels, shape.length],
        Distribution::Normal(0.0, 1.0),
        device,
    )
}

fn sync(
    shape: &ShapeArgs,
    replicas: usize,
    path: ComputePath,
    tolerance: f32,
    device: &<HostBackend as Backend>::Device,
) -> burning_syncbn::Result<bool> {
    if replicas == 0 {
        return Err(SyncBnError::EmptyReplicaSet { operation: "sync" });
    }

    let config = SyncBatchNormConfig::new(shape.channels);
    let mut layer = config.init::<HostBackend>(device);

    let x = random_input(shape, replicas, device);
    let weights = x.random_like(Distribution::Uniform(-1.0, 1.0));

    let (outputs, ctx) = layer.forward_train_on(path, x.clone().chunk(replicas, 0))?;
    let grads = ctx.backward(weights.clone().chunk(replicas, 0))?;

    let (expected_output, expected_grad) = reference(x, weights, config.epsilon);

    let output_error = max_abs_diff(Tensor::cat(outputs, 0), expected_output);
    let grad_error = max_abs_diff(Tensor::cat(grads.grad_inputs, 0), expected_grad);

    println!("replicas: {replicas}, path: {path}");
    println!("running mean: {}", layer.running.mean);
    println!("max |output - reference|: {output_error:.3e}");
    println!("max |grad_input - reference|: {grad_error:.3e}");

    let passed = output_error <= tolerance && grad_error <= tolerance;
    println!(
        "{} (tolerance {tolerance:.1e})",
        if passed { "ok" } else { "FAILED" }
    );

    Ok(passed)
}

/// Single-device batch norm through burn autodiff.
fn reference(
    x: Tensor<HostBackend, 3>,
    weights: Tensor<HostBackend, 3>,
    epsilon: f64,
) -> (Tensor<HostBackend, 3>, Tensor<HostBackend, 3>) {
    type Ad = Autodiff<HostBackend>;

    let x = Tensor::<Ad, 3>::from_inner(x).require_grad();
    let count = (x.dims()[0] * x.dims()[2]) as f64;

    let mean = x.clone().sum_dim(2).sum_dim(0).div_scalar(count);
    let centered = x.clone() - mean;
    let var = (centered.clone() * centered.clone())
        .sum_dim(2)
        .sum_dim(0)
        .div_scalar(count);
    let y = centered / var.add_scalar(epsilon).sqrt();

    let grads = (y.clone() * Tensor::from_inner(weights))
        .sum()
        .backward();
    let grad = x
        .grad(&grads)
        .unwrap_or_else(|| y.clone().inner().zeros_like());

    (y.inner(), grad)
}

fn max_abs_diff(lhs: Tensor<HostBackend, 3>, rhs: Tensor<HostBackend, 3>) -> f32 {
    (lhs - rhs)
        .abs()
        .max()
        .into_scalar()
        .pipe(|value| value.elem::<f32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_shape() -> ShapeArgs {
        ShapeArgs {
            batch: 2,
            channels: 3,
            length: 4,
            seed: 1,
        }
    }

    #[test]
    fn test_sync_matches_reference() {
        let device = Default::default();

        let passed =
            sync(&small_shape(), 2, ComputePath::Accelerator, 1e-3, &device).unwrap();

        assert!(passed);
    }

    #[test]
    fn test_sync_fails_on_impossible_tolerance() {
        let device = Default::default();

        let passed =
            sync(&small_shape(), 2, ComputePath::Accelerator, -1.0, &device).unwrap();

        assert!(!passed);
    }

    #[test]
    fn test_sync_rejects_zero_replicas() {
        let device = Default::default();

        assert_eq!(
            sync(&small_shape(), 0, ComputePath::Accelerator, 1e-3, &device).unwrap_err(),
            SyncBnError::EmptyReplicaSet { operation: "sync" }
        );
    }

    #[test]
    fn test_sync_host_path_cannot_go_backward() {
        let device = Default::default();

        let err = sync(&small_shape(), 2, ComputePath::Host, 1e-3, &device).unwrap_err();

        assert!(err.is_unsupported());
    }
}
