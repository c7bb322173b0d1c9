use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use serde::Deserialize;
use teppan::labels::ClassLabels;
use teppan::model::{Denoiser, ModelLoader};
use teppan::{GenerationError, Result};

/// On-disk description of a [`GaussianDenoiser`].
#[derive(Debug, Clone, Deserialize)]
pub struct GaussianDescriptor {
    pub img_channels: usize,
    pub img_resolution: usize,
    #[serde(default)]
    pub label_dim: usize,
    /// Standard deviation of the data around its class mean
    #[serde(default = "default_sigma_data")]
    pub sigma_data: f64,
    /// One mean per class, or a single mean for an unconditional model
    #[serde(default)]
    pub class_means: Vec<f32>,
}

fn default_sigma_data() -> f64 {
    0.5
}

/// The exact denoiser of isotropic Gaussian data centred on a per-class mean.
///
/// `D(x, σ) = μ + (x − μ) · s² / (s² + σ²)`, which lets the samplers be exercised
/// end to end without a trained network.
#[derive(Debug, Clone)]
pub struct GaussianDenoiser {
    descriptor: GaussianDescriptor,
}

impl GaussianDenoiser {
    pub fn new(descriptor: GaussianDescriptor) -> Result<Self> {
        let expected = descriptor.label_dim.max(1);
        if !descriptor.class_means.is_empty() && descriptor.class_means.len() != expected {
            return Err(GenerationError::Model(format!(
                "expected {expected} class means, found {}",
                descriptor.class_means.len()
            )));
        }
        if descriptor.sigma_data <= 0.0 {
            return Err(GenerationError::Model("sigma_data must be positive".to_string()));
        }
        Ok(Self { descriptor })
    }

    fn mean(&self, class: usize) -> f32 {
        self.descriptor.class_means.get(class).copied().unwrap_or(0.0)
    }

    fn means(&self, x: &Tensor, labels: Option<&ClassLabels>) -> Result<Tensor> {
        let batch = x.dims()[0];
        let row = x.elem_count() / batch.max(1);
        let mut values = Vec::with_capacity(x.elem_count());
        for i in 0..batch {
            let class = labels.map_or(0, |labels| labels.class_ids()[i]);
            values.extend(std::iter::repeat_n(self.mean(class), row));
        }
        Ok(Tensor::from_vec(values, x.dims(), x.device())?)
    }
}

#[async_trait]
impl Denoiser<Tensor> for GaussianDenoiser {
    fn img_channels(&self) -> usize {
        self.descriptor.img_channels
    }

    fn img_resolution(&self) -> usize {
        self.descriptor.img_resolution
    }

    fn label_dim(&self) -> usize {
        self.descriptor.label_dim
    }

    async fn denoise(&self, x: &Tensor, sigma: f64, class_labels: Option<&ClassLabels>) -> Result<Tensor> {
        let s2 = self.descriptor.sigma_data * self.descriptor.sigma_data;
        let mu = self.means(x, class_labels)?;
        let shrink = s2 / (s2 + sigma * sigma);
        Ok(x.sub(&mu)?.affine(shrink, 0.0)?.add(&mu)?)
    }
}

/// Loads a [`GaussianDenoiser`] from a JSON descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorLoader;

impl ModelLoader<Tensor> for DescriptorLoader {
    type Model = GaussianDenoiser;

    fn load(&self, path: &Path, _device: &Device) -> Result<GaussianDenoiser> {
        let file = File::open(path)
            .map_err(|e| GenerationError::Model(format!("{}: {e}", path.display())))?;
        let descriptor: GaussianDescriptor = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| GenerationError::Model(format!("{}: {e}", path.display())))?;
        GaussianDenoiser::new(descriptor)
    }
}
