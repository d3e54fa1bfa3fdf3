//! Finite-difference check of the `batch_norm_train` gradients.
//!
//! The loss is `sum(output * weights)`, so the analytic gradients come from
//! backward with `grad_output = weights`.

use std::fmt;

use burn::prelude::*;

use crate::{
    device::ComputePath,
    error::Result,
    function::{BatchNormTrainConfig, batch_norm_train_on},
    kernel::NormalizationParameters,
};

/// Worst disagreement seen for one operand.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckEntry {
    pub name: &'static str,
    pub max_error: f64,
    /// Element index where `max_error` was measured.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckReport {
    pub entries: Vec<GradCheckEntry>,
}

impl GradCheckReport {
    pub fn max_error(&self) -> f64 {
        self.entries
            .iter()
            .map(|entry| entry.max_error)
            .fold(0.0, f64::max)
    }

    pub fn passes(&self, tolerance: f64) -> bool {
        self.max_error() <= tolerance
    }
}

impl fmt::Display for GradCheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{:>6}: max error {:.3e} at {}",
                entry.name, entry.max_error, entry.index
            )?;
        }

        Ok(())
    }
}

const NAMES: [&str; 5] = ["input", "mean", "std", "gamma", "beta"];

fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

/// `|a - n| / max(1, |a|, |n|)`
fn scaled_error(analytic: f64, numeric: f64) -> f64 {
    (analytic - numeric).abs() / 1f64.max(analytic.abs()).max(numeric.abs())
}

/// Compares analytic and central-difference gradients for every element of
/// every operand.
pub fn check_batch_norm_train<B: Backend, const D: usize>(
    path: ComputePath,
    input: Tensor<B, D>,
    params: NormalizationParameters<B>,
    weights: Tensor<B, D>,
    step: f32,
) -> Result<GradCheckReport> {
    let device = input.device();
    let dims = input.dims();
    let config = BatchNormTrainConfig::new();

    let (_, ctx) = batch_norm_train_on(path, input.clone(), params.clone(), &config)?;
    let grads = ctx.backward(weights.clone())?;
    let analytic = [
        host_values(grads.grad_input),
        host_values(grads.grad_mean),
        host_values(grads.grad_std),
        host_values(grads.grad_gamma),
        host_values(grads.grad_beta),
    ];

    let weights = host_values(weights);
    let mut operands = [
        host_values(input),
        host_values(params.mean),
        host_values(params.std),
        host_values(params.gamma),
        host_values(params.beta),
    ];
    let channels = operands[1].len();

    let loss = |operands: &[Vec<f32>; 5]| -> Result<f64> {
        let input = Tensor::<B, D>::from_data(TensorData::new(operands[0].clone(), dims), &device);
        let vector = |values: &Vec<f32>| {
            Tensor::<B, 1>::from_data(TensorData::new(values.clone(), [channels]), &device)
        };
        let params = NormalizationParameters::new(
            vector(&operands[1]),
            vector(&operands[2]),
            vector(&operands[3]),
            vector(&operands[4]),
        );

        let (output, _) = batch_norm_train_on(path, input, params, &config)?;

        Ok(host_values(output)
            .iter()
            .zip(&weights)
            .map(|(y, w)| *y as f64 * *w as f64)
            .sum())
    };

    let mut entries = Vec::with_capacity(NAMES.len());

    for (slot, name) in NAMES.into_iter().enumerate() {
        let mut worst = GradCheckEntry {
            name,
            max_error: 0.0,
            index: 0,
        };

        for index in 0..operands[slot].len() {
            let original = operands[slot][index];

            operands[slot][index] = original + step;
            let plus = operands[slot][index];
            let loss_plus = loss(&operands)?;

            operands[slot][index] = original - step;
            let minus = operands[slot][index];
            let loss_minus = loss(&operands)?;

            operands[slot][index] = original;

            let numeric = (loss_plus - loss_minus) / (plus as f64 - minus as f64);
            let error = scaled_error(analytic[slot][index] as f64, numeric);

            if error > worst.max_error {
                worst.max_error = error;
                worst.index = index;
            }
        }

        log::debug!("gradcheck {name}: max error {:.3e}", worst.max_error);
        entries.push(worst);
    }

    Ok(GradCheckReport { entries })
}
