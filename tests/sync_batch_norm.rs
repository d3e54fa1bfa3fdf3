use approx::assert_relative_eq;
use burn::{
    backend::{Autodiff, NdArray},
    prelude::*,
    tensor::Distribution,
};
use burning_syncbn::{ComputePath, SyncBatchNormConfig, sum_square_on, sync::all_reduce};

type B = NdArray<f32>;
type Ad = Autodiff<B>;

const EPSILON: f64 = 1e-5;

fn values<const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

fn assert_close(actual: Vec<f32>, expected: Vec<f32>) {
    assert_eq!(actual.len(), expected.len());

    for (a, e) in actual.into_iter().zip(expected) {
        assert_relative_eq!(a, e, epsilon = 1e-4, max_relative = 1e-3);
    }
}

struct Reference {
    output: Tensor<B, 3>,
    grad_input: Tensor<B, 3>,
    grad_gamma: Tensor<B, 1>,
    grad_beta: Tensor<B, 1>,
}

/// Ordinary batch norm over the whole batch, differentiated by burn.
fn reference(
    x: Tensor<B, 3>,
    gamma: Tensor<B, 1>,
    beta: Tensor<B, 1>,
    weights: Tensor<B, 3>,
) -> Reference {
    let [batch, channels, length] = x.dims();
    let count = (batch * length) as f64;

    let x = Tensor::<Ad, 3>::from_inner(x).require_grad();
    let gamma = Tensor::<Ad, 1>::from_inner(gamma).require_grad();
    let beta = Tensor::<Ad, 1>::from_inner(beta).require_grad();

    let mean = x.clone().sum_dim(2).sum_dim(0).div_scalar(count);
    let centered = x.clone() - mean;
    let var = (centered.clone() * centered.clone())
        .sum_dim(2)
        .sum_dim(0)
        .div_scalar(count);
    let y = centered / var.add_scalar(EPSILON).sqrt() * gamma.clone().reshape([1, channels, 1])
        + beta.clone().reshape([1, channels, 1]);

    let grads = (y.clone() * Tensor::from_inner(weights)).sum().backward();

    Reference {
        output: y.inner(),
        grad_input: x.grad(&grads).unwrap(),
        grad_gamma: gamma.grad(&grads).unwrap(),
        grad_beta: beta.grad(&grads).unwrap(),
    }
}

fn check_equivalence(replicas: usize, seed: u64) {
    let device = Default::default();
    B::seed(seed);

    let x = Tensor::<B, 3>::random([2 * replicas, 4, 6], Distribution::Normal(1.0, 2.0), &device);
    let weights = x.random_like(Distribution::Uniform(-1.0, 1.0));

    let mut layer = SyncBatchNormConfig::new(4)
        .with_epsilon(EPSILON)
        .init::<B>(&device);
    layer.gamma = Tensor::random([4], Distribution::Normal(1.0, 0.5), &device);
    layer.beta = Tensor::random([4], Distribution::Normal(0.0, 1.0), &device);

    let expected = reference(
        x.clone(),
        layer.gamma.clone(),
        layer.beta.clone(),
        weights.clone(),
    );

    let (outputs, ctx) = layer
        .forward_train_on(ComputePath::Accelerator, x.chunk(replicas, 0))
        .unwrap();
    let grads = ctx.backward(weights.chunk(replicas, 0)).unwrap();

    assert_eq!(outputs.len(), replicas);
    assert_close(values(Tensor::cat(outputs, 0)), values(expected.output));
    assert_close(
        values(Tensor::cat(grads.grad_inputs, 0)),
        values(expected.grad_input),
    );
    assert_close(values(grads.grad_gamma), values(expected.grad_gamma));
    assert_close(values(grads.grad_beta), values(expected.grad_beta));
}

#[test]
fn single_replica_matches_batch_norm() {
    check_equivalence(1, 17);
}

#[test]
fn two_replicas_match_batch_norm_over_concatenation() {
    check_equivalence(2, 19);
}

#[test]
fn four_replicas_match_batch_norm_over_concatenation() {
    check_equivalence(4, 23);
}

#[test]
fn shard_statistics_combine_into_batch_statistics() {
    let device = Default::default();
    B::seed(29);
    let x = Tensor::<B, 3>::random([6, 3, 5], Distribution::Normal(0.0, 1.0), &device);

    let (whole, _) = sum_square_on(ComputePath::Host, x.clone()).unwrap();
    let partials = x
        .chunk(3, 0)
        .into_iter()
        .map(|shard| sum_square_on(ComputePath::Host, shard).unwrap().0)
        .collect();
    let combined = all_reduce(partials, &device).unwrap();

    assert_close(values(combined.sum), values(whole.sum));
    assert_close(values(combined.sum_squares), values(whole.sum_squares));
}
