//! Per-seed random number generation.
//!
//! Every seed owns its own generator, keyed directly by the seed value, so the
//! values drawn for a seed never depend on which other seeds share its batch, on
//! their order, or on how many workers split the run.

use rand::Rng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use rand_pcg::Pcg64Mcg;
use crate::backend::Backend;
use crate::error::{GenerationError, Result};
use crate::seeds::Seed;

/// A stack of independent generators, one per seed of a batch.
///
/// Tensors produced by this type are stacked along the batch dimension in seed
/// order: row `i` is drawn from the generator of seed `i`.
#[derive(Debug, Clone)]
pub struct StackedRandomGenerator<T: Backend> {
    device: T::Device,
    generators: Vec<Pcg64Mcg>,
}

impl<T: Backend> StackedRandomGenerator<T> {
    pub fn new(device: T::Device, seeds: &[Seed]) -> Self {
        let generators = seeds
            .iter()
            .map(|&seed| Pcg64Mcg::seed_from_u64(seed))
            .collect();
        Self { device, generators }
    }

    /// Number of stacked generators.
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn device(&self) -> &T::Device {
        &self.device
    }

    /// Draw standard normal noise of `shape` on this generator's device.
    ///
    /// `shape[0]` must equal the number of seeds; each generator fills one row of
    /// `shape[1..]`.
    pub fn randn(&mut self, shape: &[usize]) -> Result<T> {
        let device = self.device.clone();
        self.randn_on(shape, &device)
    }

    /// Draw standard normal noise shaped and placed like `reference`.
    ///
    /// Each call advances every generator, so successive calls yield fresh noise that
    /// is still reproducible per seed.
    pub fn randn_like(&mut self, reference: &T) -> Result<T> {
        let shape = reference.shape();
        self.randn_on(&shape, &reference.device())
    }

    /// Draw one integer in `[0, high)` from each generator.
    pub fn randint(&mut self, high: usize) -> Result<Vec<usize>> {
        if high == 0 {
            return Err(GenerationError::ShapeMismatch(
                "cannot draw from an empty integer range".to_string(),
            ));
        }
        Ok(self
            .generators
            .iter_mut()
            .map(|rng| rng.gen_range(0..high))
            .collect())
    }

    fn randn_on(&mut self, shape: &[usize], device: &T::Device) -> Result<T> {
        let (&batch, row) = shape.split_first().ok_or_else(|| {
            GenerationError::ShapeMismatch("cannot draw noise for a scalar shape".to_string())
        })?;
        if batch != self.generators.len() {
            return Err(GenerationError::ShapeMismatch(format!(
                "noise batch of {batch} requested from {} seeds",
                self.generators.len()
            )));
        }
        let per_row: usize = row.iter().product();
        let mut values = Vec::with_capacity(batch * per_row);
        for rng in self.generators.iter_mut() {
            values.extend((0..per_row).map(|_| rng.sample::<f32, _>(StandardNormal)));
        }
        T::from_f32(values, shape, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    const ROW: [usize; 3] = [2, 4, 4];

    fn rows(seeds: &[Seed]) -> Vec<Vec<f32>> {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, seeds);
        let shape = [&[seeds.len()][..], &ROW[..]].concat();
        let values = rnd.randn(&shape).unwrap().to_f32_vec().unwrap();
        values.chunks(ROW.iter().product()).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn test_seed_alone_matches_seed_in_batch() {
        let alone = rows(&[7]);
        let batched = rows(&[3, 7, 11]);
        assert_eq!(alone[0], batched[1]);
    }

    #[test]
    fn test_reordering_does_not_change_rows() {
        let forward = rows(&[1, 2]);
        let backward = rows(&[2, 1]);
        assert_eq!(forward[0], backward[1]);
        assert_eq!(forward[1], backward[0]);
    }

    #[test]
    fn test_distinct_seeds_differ() {
        let batched = rows(&[0, 1]);
        assert_ne!(batched[0], batched[1]);
    }

    #[test]
    fn test_noise_is_roughly_standard_normal() {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[42]);
        let values = rnd.randn(&[1, 4096]).unwrap().to_f32_vec().unwrap();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "variance {var}");
    }

    #[test]
    fn test_randn_like_advances_each_generator() {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[5, 6]);
        let reference = rnd.randn(&[2, 3]).unwrap();
        let first = rnd.randn_like(&reference).unwrap().to_f32_vec().unwrap();
        let second = rnd.randn_like(&reference).unwrap().to_f32_vec().unwrap();

        assert_eq!(first.len(), 6);
        assert_ne!(first[..3], second[..3]);
        assert_ne!(first[3..], second[3..]);
    }

    #[test]
    fn test_randn_like_reproducible_per_seed() {
        let draw = |seeds: &[Seed]| {
            let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, seeds);
            let reference = rnd.randn(&[seeds.len(), 3]).unwrap();
            rnd.randn_like(&reference).unwrap().to_f32_vec().unwrap()
        };
        let alone = draw(&[9]);
        let batched = draw(&[4, 9]);
        assert_eq!(alone[..], batched[3..]);
    }

    #[test]
    fn test_batch_dimension_must_match_seed_count() {
        let mut rnd = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[1, 2]);
        assert!(rnd.randn(&[3, 2]).is_err());
        assert!(rnd.randn(&[]).is_err());
    }

    #[test]
    fn test_randint_in_range_and_reproducible() {
        let mut a = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[0, 1, 2, 3]);
        let mut b = StackedRandomGenerator::<Tensor>::new(Device::Cpu, &[0, 1, 2, 3]);
        let drawn = a.randint(10).unwrap();
        assert!(drawn.iter().all(|&c| c < 10));
        assert_eq!(drawn, b.randint(10).unwrap());
        assert!(a.randint(0).is_err());
    }
}
