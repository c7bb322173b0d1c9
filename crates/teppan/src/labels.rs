//! Class label encoding for conditional models.

use crate::backend::Backend;
use crate::error::{GenerationError, Result};
use crate::random::StackedRandomGenerator;

/// One-hot class labels for a batch, `(batch, label_dim)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    class_ids: Vec<usize>,
    label_dim: usize,
}

impl ClassLabels {
    pub fn one_hot(class_ids: Vec<usize>, label_dim: usize) -> Result<Self> {
        if let Some(&class) = class_ids.iter().find(|&&c| c >= label_dim) {
            return Err(GenerationError::InvalidLabel { class, label_dim });
        }
        Ok(Self {
            class_ids,
            label_dim,
        })
    }

    pub fn class_ids(&self) -> &[usize] {
        &self.class_ids
    }

    pub fn label_dim(&self) -> usize {
        self.label_dim
    }

    pub fn batch_size(&self) -> usize {
        self.class_ids.len()
    }

    /// Row-major one-hot matrix.
    pub fn to_vec(&self) -> Vec<f32> {
        let mut values = vec![0.0; self.class_ids.len() * self.label_dim];
        for (row, &class) in self.class_ids.iter().enumerate() {
            values[row * self.label_dim + class] = 1.0;
        }
        values
    }

    pub fn to_tensor<T: Backend>(&self, device: &T::Device) -> Result<T> {
        T::from_f32(self.to_vec(), &[self.class_ids.len(), self.label_dim], device)
    }
}

/// Encode the labels of a batch for a model with `label_dim` classes.
///
/// Unconditional models (`label_dim == 0`) get no labels. A fixed `class_idx` is
/// shared by every row; without one each row draws its class from its own seed's
/// generator, so the class of a seed is as reproducible as its latent.
pub fn encode_labels<T: Backend>(
    class_idx: Option<usize>,
    label_dim: usize,
    rnd: &mut StackedRandomGenerator<T>,
) -> Result<Option<ClassLabels>> {
    if label_dim == 0 {
        return Ok(None);
    }
    let class_ids = match class_idx {
        Some(class) => vec![class; rnd.len()],
        None => rnd.randint(label_dim)?,
    };
    ClassLabels::one_hot(class_ids, label_dim).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_one_hot_layout() {
        let labels = ClassLabels::one_hot(vec![2, 0], 3).unwrap();
        assert_eq!(labels.to_vec(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        let tensor: Tensor = labels.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[2, 3]);
    }

    #[test]
    fn test_out_of_range_class() {
        let err = ClassLabels::one_hot(vec![0, 3], 3).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidLabel { class: 3, label_dim: 3 }));
    }

    #[test]
    fn test_unconditional_model_gets_no_labels() {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[1, 2]);
        assert!(encode_labels(Some(4), 0, &mut rnd).unwrap().is_none());
    }

    #[test]
    fn test_fixed_class_shared_by_batch() {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[1, 2, 3]);
        let labels = encode_labels(Some(7), 10, &mut rnd).unwrap().unwrap();
        assert_eq!(labels.class_ids(), &[7, 7, 7]);
    }

    #[test]
    fn test_random_class_follows_seed() {
        let mut alone = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[11]);
        let mut batched = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[4, 11]);
        let a = encode_labels(None, 10, &mut alone).unwrap().unwrap();
        let b = encode_labels(None, 10, &mut batched).unwrap().unwrap();
        assert_eq!(a.class_ids()[0], b.class_ids()[1]);
    }
}
