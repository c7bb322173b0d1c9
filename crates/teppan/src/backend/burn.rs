//! The burn implementation for backend provision.
//! Since burn Tensors are constrained with const generics, we must macro apply the
//! backend operations for every rank a generator may hand around.
use super::Backend;
use crate::error::{GenerationError, Result};
use burn::prelude::{Backend as BurnBackend, Tensor};
use burn::tensor::TensorData;

macro_rules! impl_backend {
    ($d:literal) => {
        impl<B> Backend for Tensor<B, $d>
        where B: BurnBackend {
            type Device = B::Device;

            fn shape(&self) -> Vec<usize> {
                self.dims().to_vec()
            }

            fn device(&self) -> Self::Device {
                Tensor::device(self)
            }

            fn default_device() -> Result<Self::Device> {
                Ok(Default::default())
            }

            fn from_f32(values: Vec<f32>, shape: &[usize], device: &Self::Device) -> Result<Self> {
                if shape.len() != $d {
                    return Err(GenerationError::RankMismatch {
                        expected: $d,
                        actual: shape.to_vec(),
                    });
                }
                let expected: usize = shape.iter().product();
                if values.len() != expected {
                    return Err(GenerationError::ShapeMismatch(format!(
                        "{} values cannot fill shape {:?}",
                        values.len(),
                        shape
                    )));
                }
                Ok(Tensor::from_data(TensorData::new(values, shape.to_vec()), device))
            }

            fn to_f32_vec(&self) -> Result<Vec<f32>> {
                self.to_data()
                    .convert::<f32>()
                    .to_vec::<f32>()
                    .map_err(|e| GenerationError::Backend(format!("{e:?}")))
            }

            fn scale(&self, factor: f64) -> Result<Self> {
                Ok(self.clone().mul_scalar(factor))
            }

            fn add(&self, other: &Self) -> Result<Self> {
                Ok(Tensor::add(self.clone(), other.clone()))
            }

            fn sub(&self, other: &Self) -> Result<Self> {
                Ok(Tensor::sub(self.clone(), other.clone()))
            }
        }
    }
}

impl_backend!(1);
impl_backend!(2);
impl_backend!(3);
impl_backend!(4);
impl_backend!(5);
