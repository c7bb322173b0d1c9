use std::path::Path;
use async_trait::async_trait;
use crate::backend::Backend;
use crate::error::Result;
use crate::labels::ClassLabels;

/// Defines a denoising network that maps a noisy batch to its denoised estimate.
///
/// This trait represents the pretrained network a generator drives. teppan treats it
/// as an opaque callable: architecture, precision and on-device parallelism are the
/// implementation's concern.
///
/// # Type Parameters
///
/// * `T` - The tensor type that implements [`Backend`]
///
/// # Implementation Notes
///
/// Implementations should:
/// * Accept inputs of shape `(batch, img_channels, img_resolution, img_resolution)`
/// * Return a tensor of the same shape, in the same batch order
/// * Treat `sigma` as the noise level shared by every row of the batch
///
/// # Example
///
/// ```ignore
/// use teppan::model::Denoiser;
/// use async_trait::async_trait;
///
/// struct Shrink;
///
/// #[async_trait]
/// impl Denoiser<Tensor> for Shrink {
///     fn img_channels(&self) -> usize { 3 }
///     fn img_resolution(&self) -> usize { 32 }
///     fn label_dim(&self) -> usize { 0 }
///
///     async fn denoise(&self, x: &Tensor, sigma: f64, _labels: Option<&ClassLabels>) -> Result<Tensor> {
///         x.scale(1.0 / (1.0 + sigma * sigma))
///     }
/// }
/// ```
#[async_trait]
pub trait Denoiser<T: Backend>: Send + Sync {
    /// Channels of the images this model produces
    fn img_channels(&self) -> usize;

    /// Height and width of the square images this model produces
    fn img_resolution(&self) -> usize;

    /// Number of classes of a conditional model, `0` if unconditional
    fn label_dim(&self) -> usize;

    /// Estimate the clean batch underlying `x` at noise level `sigma`.
    async fn denoise(&self, x: &T, sigma: f64, class_labels: Option<&ClassLabels>) -> Result<T>;
}

/// Deserializes a [`Denoiser`] from a checkpoint.
///
/// Loading is a blocking operation. The loaded model is owned by exactly one
/// generator and is dropped, together with its device memory, on unload.
pub trait ModelLoader<T: Backend>: Send + Sync {
    type Model: Denoiser<T>;

    /// Load the checkpoint at `path` onto `device`.
    fn load(&self, path: &Path, device: &T::Device) -> Result<Self::Model>;
}
