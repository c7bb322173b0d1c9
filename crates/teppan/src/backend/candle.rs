use super::Backend;
use crate::error::Result;
use candle_core::{DType, Device, Tensor, utils};

impl Backend for Tensor {
    type Device = Device;

    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn device(&self) -> Self::Device {
        Tensor::device(self).clone()
    }

    fn default_device() -> Result<Self::Device> {
        if utils::cuda_is_available() {
            return Ok(Device::new_cuda(0)?);
        }
        if utils::metal_is_available() {
            return Ok(Device::new_metal(0)?);
        }
        Ok(Device::Cpu)
    }

    fn from_f32(values: Vec<f32>, shape: &[usize], device: &Self::Device) -> Result<Self> {
        Ok(Tensor::from_vec(values, shape.to_vec(), device)?)
    }

    fn to_f32_vec(&self) -> Result<Vec<f32>> {
        Ok(self.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
    }

    fn scale(&self, factor: f64) -> Result<Self> {
        Ok(self.affine(factor, 0.0)?)
    }

    fn add(&self, other: &Self) -> Result<Self> {
        Ok(Tensor::add(self, other)?)
    }

    fn sub(&self, other: &Self) -> Result<Self> {
        Ok(Tensor::sub(self, other)?)
    }
}
