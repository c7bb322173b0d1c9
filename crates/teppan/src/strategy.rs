//! Batch strategies: how a batch of latents becomes a batch of images.
//!
//! A strategy is handed the model, the initial latents, the labels, the config in
//! effect for the batch and the batch's per-seed generator. Any noise it injects
//! must come from that generator's [`randn_like`](StackedRandomGenerator::randn_like)
//! so a seed's trajectory is reproducible regardless of batching.

use std::f64::consts::SQRT_2;
use async_trait::async_trait;
use crate::backend::Backend;
use crate::config::GenerationConfig;
use crate::error::Result;
use crate::labels::ClassLabels;
use crate::model::Denoiser;
use crate::random::StackedRandomGenerator;

/// Noise level a DMD one-step generator is evaluated at.
pub const DMD_GENERATOR_SIGMA: f64 = 80.0;

/// Where the initial latents of a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentSource {
    /// Drawn from the per-seed generators
    Sampled,
    /// Provided by the caller
    Supplied,
}

/// Everything a strategy reads for one batch.
#[derive(Debug)]
pub struct SamplingInput<'a, T: Backend> {
    pub latents: &'a T,
    pub class_labels: Option<&'a ClassLabels>,
    pub config: &'a GenerationConfig,
    pub source: LatentSource,
}

/// Turns the initial latents of a batch into images.
#[async_trait]
pub trait BatchStrategy<T: Backend>: Send + Sync {
    /// Run the sampling trajectory for one batch, returning images in latent order.
    async fn sample<M>(
        &self,
        model: &M,
        input: SamplingInput<'_, T>,
        noise: &mut StackedRandomGenerator<T>,
    ) -> Result<T>
    where
        M: Denoiser<T>;
}

/// Karras noise levels for `config`, from `sigma_max` down to `sigma_min`, followed
/// by a final `0`.
pub fn karras_sigmas(config: &GenerationConfig) -> Vec<f64> {
    let steps = config.steps;
    if steps <= 1 {
        return vec![config.sigma_max, 0.0];
    }
    let inv_rho = 1.0 / config.rho;
    let max_inv = config.sigma_max.powf(inv_rho);
    let min_inv = config.sigma_min.powf(inv_rho);
    let mut sigmas: Vec<f64> = (0..steps)
        .map(|i| {
            let ramp = i as f64 / (steps - 1) as f64;
            (max_inv + ramp * (min_inv - max_inv)).powf(config.rho)
        })
        .collect();
    sigmas.push(0.0);
    sigmas
}

/// EDM stochastic sampler: Karras schedule, churn, Euler step with a Heun correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdmSampler;

#[async_trait]
impl<T: Backend> BatchStrategy<T> for EdmSampler {
    async fn sample<M>(
        &self,
        model: &M,
        input: SamplingInput<'_, T>,
        noise: &mut StackedRandomGenerator<T>,
    ) -> Result<T>
    where
        M: Denoiser<T>,
    {
        let config = input.config;
        let labels = input.class_labels;
        let sigmas = karras_sigmas(config);
        let gamma_max = (config.s_churn / config.steps as f64).min(SQRT_2 - 1.0);

        let mut x_next = input.latents.scale(sigmas[0])?;
        let last = sigmas.len() - 2;
        for (i, pair) in sigmas.windows(2).enumerate() {
            let (t_cur, t_next) = (pair[0], pair[1]);
            let x_cur = x_next;

            let gamma = if config.s_min <= t_cur && t_cur <= config.s_max {
                gamma_max
            } else {
                0.0
            };
            let t_hat = t_cur + gamma * t_cur;
            // drawn even without churn so each seed's stream stays aligned to the step index
            let eps = noise.randn_like(&x_cur)?;
            let churn = (t_hat * t_hat - t_cur * t_cur).sqrt() * config.s_noise;
            let x_hat = x_cur.add(&eps.scale(churn)?)?;

            let denoised = model.denoise(&x_hat, t_hat, labels).await?;
            let d_cur = x_hat.sub(&denoised)?.scale(1.0 / t_hat)?;
            x_next = x_hat.add(&d_cur.scale(t_next - t_hat)?)?;

            if i < last {
                let denoised = model.denoise(&x_next, t_next, labels).await?;
                let d_prime = x_next.sub(&denoised)?.scale(1.0 / t_next)?;
                let slope = d_cur.scale(0.5)?.add(&d_prime.scale(0.5)?)?;
                x_next = x_hat.add(&slope.scale(t_next - t_hat)?)?;
            }
        }
        Ok(x_next)
    }
}

/// DMD one-step generator: a single forward pass at a fixed noise level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmdGenerator {
    /// Noise level the generator is evaluated at
    pub sigma: f64,
    /// Whether caller-supplied latents are scaled by `sigma` like sampled ones
    pub scale_supplied_latents: bool,
}

impl Default for DmdGenerator {
    fn default() -> Self {
        Self {
            sigma: DMD_GENERATOR_SIGMA,
            scale_supplied_latents: true,
        }
    }
}

#[async_trait]
impl<T: Backend> BatchStrategy<T> for DmdGenerator {
    async fn sample<M>(
        &self,
        model: &M,
        input: SamplingInput<'_, T>,
        _noise: &mut StackedRandomGenerator<T>,
    ) -> Result<T>
    where
        M: Denoiser<T>,
    {
        let scale = input.source == LatentSource::Sampled || self.scale_supplied_latents;
        let latents = if scale {
            input.latents.scale(self.sigma)?
        } else {
            input.latents.clone()
        };
        model.denoise(&latents, self.sigma, input.class_labels).await
    }
}

/// Strategy chosen at configuration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    Edm(EdmSampler),
    Dmd(DmdGenerator),
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::Edm(EdmSampler)
    }
}

#[async_trait]
impl<T: Backend> BatchStrategy<T> for Sampler {
    async fn sample<M>(
        &self,
        model: &M,
        input: SamplingInput<'_, T>,
        noise: &mut StackedRandomGenerator<T>,
    ) -> Result<T>
    where
        M: Denoiser<T>,
    {
        match self {
            Sampler::Edm(sampler) => sampler.sample(model, input, noise).await,
            Sampler::Dmd(generator) => generator.sample(model, input, noise).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use candle_core::{Device, Tensor};
    use crate::config::ConfigOverrides;

    /// Always predicts a constant image.
    struct ConstantDenoiser {
        value: f64,
        calls: AtomicUsize,
    }

    impl ConstantDenoiser {
        fn new(value: f64) -> Self {
            Self { value, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Denoiser<Tensor> for ConstantDenoiser {
        fn img_channels(&self) -> usize { 1 }
        fn img_resolution(&self) -> usize { 2 }
        fn label_dim(&self) -> usize { 0 }

        async fn denoise(&self, x: &Tensor, _sigma: f64, _labels: Option<&ClassLabels>) -> Result<Tensor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(x.ones_like()?.affine(self.value, 0.0)?)
        }
    }

    /// Shrinks its input and records every call.
    #[derive(Default)]
    struct RecordingDenoiser {
        calls: Mutex<Vec<(f64, Vec<f32>)>>,
    }

    #[async_trait]
    impl Denoiser<Tensor> for RecordingDenoiser {
        fn img_channels(&self) -> usize { 1 }
        fn img_resolution(&self) -> usize { 2 }
        fn label_dim(&self) -> usize { 0 }

        async fn denoise(&self, x: &Tensor, sigma: f64, _labels: Option<&ClassLabels>) -> Result<Tensor> {
            self.calls.lock().unwrap().push((sigma, x.to_f32_vec()?));
            x.scale(0.5)
        }
    }

    fn latents(seeds: &[u64]) -> (Tensor, StackedRandomGenerator<Tensor>) {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, seeds);
        let latents = rnd.randn(&[seeds.len(), 1, 2, 2]).unwrap();
        (latents, rnd)
    }

    #[test]
    fn test_karras_schedule_endpoints() {
        let config = GenerationConfig::default();
        let sigmas = karras_sigmas(&config);

        assert_eq!(sigmas.len(), config.steps + 1);
        assert!((sigmas[0] - config.sigma_max).abs() < 1e-9);
        assert!((sigmas[config.steps - 1] - config.sigma_min).abs() < 1e-9);
        assert_eq!(sigmas[config.steps], 0.0);
        assert!(sigmas.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_single_step_schedule() {
        let config = GenerationConfig::default()
            .merge(&ConfigOverrides::new().with("steps", 1.0))
            .unwrap();
        assert_eq!(karras_sigmas(&config), vec![config.sigma_max, 0.0]);
    }

    #[tokio::test]
    async fn test_edm_lands_on_constant_prediction() {
        let config = GenerationConfig::default();
        let model = ConstantDenoiser::new(0.25);
        let (latents, mut rnd) = latents(&[0, 1]);
        let input = SamplingInput {
            latents: &latents,
            class_labels: None,
            config: &config,
            source: LatentSource::Sampled,
        };

        let images = EdmSampler.sample(&model, input, &mut rnd).await.unwrap();

        assert_eq!(images.dims(), &[2, 1, 2, 2]);
        for value in images.to_f32_vec().unwrap() {
            assert!((value - 0.25).abs() < 1e-3, "value {value}");
        }
        // Heun correction on every step but the last
        assert_eq!(model.calls.load(Ordering::SeqCst), 2 * config.steps - 1);
    }

    #[tokio::test]
    async fn test_edm_with_churn_is_reproducible_per_seed() {
        let config = GenerationConfig::default()
            .merge(&ConfigOverrides::new().with("s_churn", 40.0).with("steps", 6.0))
            .unwrap();

        let run = |seeds: Vec<u64>| {
            let config = config;
            async move {
                let model = RecordingDenoiser::default();
                let (latents, mut rnd) = latents(&seeds);
                let input = SamplingInput {
                    latents: &latents,
                    class_labels: None,
                    config: &config,
                    source: LatentSource::Sampled,
                };
                EdmSampler.sample(&model, input, &mut rnd).await.unwrap().to_f32_vec().unwrap()
            }
        };

        let alone = run(vec![3]).await;
        let batched = run(vec![8, 3]).await;
        assert_eq!(alone[..], batched[4..]);
        assert_ne!(batched[..4], batched[4..]);
    }

    #[tokio::test]
    async fn test_dmd_scales_sampled_latents() {
        let config = GenerationConfig::default();
        let model = RecordingDenoiser::default();
        let (latents, mut rnd) = latents(&[5]);
        let input = SamplingInput {
            latents: &latents,
            class_labels: None,
            config: &config,
            source: LatentSource::Sampled,
        };

        DmdGenerator::default().sample(&model, input, &mut rnd).await.unwrap();

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, DMD_GENERATOR_SIGMA);
        let expected: Vec<f32> = latents
            .to_f32_vec()
            .unwrap()
            .iter()
            .map(|v| v * DMD_GENERATOR_SIGMA as f32)
            .collect();
        for (seen, want) in calls[0].1.iter().zip(expected) {
            assert!((seen - want).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn test_dmd_can_leave_supplied_latents_alone() {
        let config = GenerationConfig::default();
        let model = RecordingDenoiser::default();
        let (latents, mut rnd) = latents(&[5]);
        let input = SamplingInput {
            latents: &latents,
            class_labels: None,
            config: &config,
            source: LatentSource::Supplied,
        };
        let generator = DmdGenerator {
            scale_supplied_latents: false,
            ..Default::default()
        };

        generator.sample(&model, input, &mut rnd).await.unwrap();

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].1, latents.to_f32_vec().unwrap());
    }

    #[tokio::test]
    async fn test_sampler_dispatch() {
        let config = GenerationConfig::default();
        let model = ConstantDenoiser::new(0.0);
        let (latents, mut rnd) = latents(&[1]);
        let input = SamplingInput {
            latents: &latents,
            class_labels: None,
            config: &config,
            source: LatentSource::Sampled,
        };

        Sampler::Dmd(DmdGenerator::default()).sample(&model, input, &mut rnd).await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
