use std::fmt::Debug;
use crate::error::Result;

/// The backend trait that must be fulfilled by any tensor type a generator drives.
///
/// Dimension `0` is always the batch dimension. Latents and images are
/// `(batch, channels, height, width)`.
pub trait Backend: Debug + Clone + Send + Sync + 'static {
    /// The device tensors of this backend live on
    type Device: Debug + Clone + Send + Sync + 'static;

    /// Return the shape of this tensor
    fn shape(&self) -> Vec<usize>;

    /// Return the device this tensor lives on
    fn device(&self) -> Self::Device;

    /// Best accelerator available to this backend, falling back to the processor
    fn default_device() -> Result<Self::Device>;

    /// Build a float tensor of `shape` on `device` from row-major `values`
    fn from_f32(values: Vec<f32>, shape: &[usize], device: &Self::Device) -> Result<Self>;

    /// Copy the tensor to host memory in row-major order
    fn to_f32_vec(&self) -> Result<Vec<f32>>;

    /// Multiply every element by `factor`
    fn scale(&self, factor: f64) -> Result<Self>;

    /// Element-wise sum with a tensor of equal shape
    fn add(&self, other: &Self) -> Result<Self>;

    /// Element-wise difference with a tensor of equal shape
    fn sub(&self, other: &Self) -> Result<Self>;
}
