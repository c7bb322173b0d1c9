//! What happens to a generated batch once it leaves the sampler.
//!
//! Output names are derived from seeds, never from ranks, so workers of one run
//! write disjoint files in the `images` layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use candle_core::{Device, Tensor};
use image::{GrayImage, RgbImage};
use tracing::debug;
use crate::backend::Backend;
use crate::engine::GeneratedBatch;
use crate::error::{GenerationError, Result};
use crate::seeds::Seed;

/// How a run persists its batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveFormat {
    /// Keep batches in memory and hand them back to the caller
    None,
    /// One PNG per seed
    #[default]
    Images,
    /// One `.npy` per sample holding `[image, latent]`
    Pairs,
}

impl SaveFormat {
    /// Build the sink this format selects.
    pub fn sink<T: Backend>(
        &self,
        out_dir: &Path,
        subdirs: bool,
        save_start_idx: u64,
    ) -> Box<dyn OutputSink<T>> {
        match self {
            SaveFormat::None => Box::new(MemorySink::new()),
            SaveFormat::Images => Box::new(ImageSink::new(out_dir, subdirs)),
            SaveFormat::Pairs => Box::new(PairSink::new(out_dir, save_start_idx)),
        }
    }
}

impl FromStr for SaveFormat {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(SaveFormat::None),
            "images" => Ok(SaveFormat::Images),
            "pairs" => Ok(SaveFormat::Pairs),
            other => Err(GenerationError::InvalidConfig {
                field: "save_format",
                reason: format!("'{other}' is not one of none, images, pairs"),
            }),
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SaveFormat::None => "none",
            SaveFormat::Images => "images",
            SaveFormat::Pairs => "pairs",
        })
    }
}

/// Receives every generated batch of a worker, in order.
pub trait OutputSink<T: Backend>: Send {
    /// Handle one batch. Writes complete before this returns.
    fn consume(&mut self, batch: GeneratedBatch<T>) -> Result<()>;

    /// Batches kept in memory, if this sink keeps any.
    fn finish(self: Box<Self>) -> Vec<GeneratedBatch<T>> {
        Vec::new()
    }
}

/// Keeps every batch for the caller.
#[derive(Debug)]
pub struct MemorySink<T: Backend> {
    batches: Vec<GeneratedBatch<T>>,
}

impl<T: Backend> MemorySink<T> {
    pub fn new() -> Self {
        Self { batches: Vec::new() }
    }
}

impl<T: Backend> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Backend> OutputSink<T> for MemorySink<T> {
    fn consume(&mut self, batch: GeneratedBatch<T>) -> Result<()> {
        self.batches.push(batch);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<GeneratedBatch<T>> {
        self.batches
    }
}

/// Writes each sample as an 8-bit PNG named by its seed.
#[derive(Debug, Clone)]
pub struct ImageSink {
    out_dir: PathBuf,
    subdirs: bool,
}

impl ImageSink {
    pub fn new(out_dir: impl Into<PathBuf>, subdirs: bool) -> Self {
        Self {
            out_dir: out_dir.into(),
            subdirs,
        }
    }
}

/// Where the image of `seed` is written:
/// `<out_dir>[/class_<idx>][/<bucket:06>]/<seed:06>.png`, with seeds bucketed by
/// thousands when `subdirs` is set.
pub fn image_path(out_dir: &Path, seed: Seed, subdirs: bool, class_idx: Option<usize>) -> PathBuf {
    let mut dir = out_dir.to_path_buf();
    if let Some(class) = class_idx {
        dir.push(format!("class_{class}"));
    }
    if subdirs {
        dir.push(format!("{:06}", seed - seed % 1000));
    }
    dir.join(format!("{seed:06}.png"))
}

/// Map a value of the model's `[-1, 1]` range to a pixel.
fn to_pixel(value: f32) -> u8 {
    (value * 127.5 + 128.0).clamp(0.0, 255.0) as u8
}

impl<T: Backend> OutputSink<T> for ImageSink {
    fn consume(&mut self, batch: GeneratedBatch<T>) -> Result<()> {
        let (n, channels, height, width) = image_dims(&batch.images)?;
        if n != batch.seeds.len() {
            return Err(GenerationError::ShapeMismatch(format!(
                "{n} images for {} seeds",
                batch.seeds.len()
            )));
        }
        if channels != 1 && channels != 3 {
            return Err(GenerationError::UnsupportedChannels(channels));
        }
        let (w, h) = (to_u32(width)?, to_u32(height)?);
        let values = batch.images.to_f32_vec()?;
        let plane = height * width;
        let sample_len = channels * plane;

        for (sample, &seed) in values.chunks(sample_len).zip(batch.seeds.iter()) {
            // CHW -> HWC
            let mut pixels = Vec::with_capacity(sample_len);
            for offset in 0..plane {
                pixels.extend((0..channels).map(|c| to_pixel(sample[c * plane + offset])));
            }

            let path = image_path(&self.out_dir, seed, self.subdirs, batch.class_idx);
            if let Some(dir) = path.parent() {
                create_dir(dir)?;
            }
            let mismatch = || GenerationError::ShapeMismatch(format!("{width}x{height} image buffer"));
            if channels == 1 {
                GrayImage::from_raw(w, h, pixels).ok_or_else(mismatch)?.save(&path)?;
            } else {
                RgbImage::from_raw(w, h, pixels).ok_or_else(mismatch)?.save(&path)?;
            }
        }
        debug!(count = batch.seeds.len(), dir = %self.out_dir.display(), "wrote images");
        Ok(())
    }
}

/// Writes each sample's image and latent stacked into one `.npy` array.
///
/// Files are `<out_dir>/samples/<id:06>.npy` with
/// `id = save_start_idx + first seed of the batch + position in the batch`.
#[derive(Debug, Clone)]
pub struct PairSink {
    samples_dir: PathBuf,
    save_start_idx: u64,
}

impl PairSink {
    pub fn new(out_dir: impl AsRef<Path>, save_start_idx: u64) -> Self {
        Self {
            samples_dir: out_dir.as_ref().join("samples"),
            save_start_idx,
        }
    }

    pub fn samples_dir(&self) -> &Path {
        &self.samples_dir
    }
}

impl<T: Backend> OutputSink<T> for PairSink {
    fn consume(&mut self, batch: GeneratedBatch<T>) -> Result<()> {
        let image_shape = batch.images.shape();
        let latent_shape = batch.latents.shape();
        if image_shape != latent_shape {
            return Err(GenerationError::ShapeMismatch(format!(
                "cannot stack images {image_shape:?} with latents {latent_shape:?}"
            )));
        }
        let Some((&n, sample_shape)) = image_shape.split_first() else {
            return Err(GenerationError::RankMismatch {
                expected: 4,
                actual: image_shape.clone(),
            });
        };
        let Some(&first_seed) = batch.seeds.first() else {
            return Ok(());
        };
        let start = self
            .save_start_idx
            .checked_add(first_seed)
            .filter(|start| start.checked_add(n.saturating_sub(1) as u64).is_some())
            .ok_or_else(|| GenerationError::InvalidConfig {
                field: "save_start_idx",
                reason: format!(
                    "offset {} with first seed {first_seed} overflows the ids of {n} samples",
                    self.save_start_idx
                ),
            })?;
        create_dir(&self.samples_dir)?;

        let images = batch.images.to_f32_vec()?;
        let latents = batch.latents.to_f32_vec()?;
        let sample_len: usize = sample_shape.iter().product();
        if sample_len == 0 {
            return Err(GenerationError::ShapeMismatch(format!(
                "cannot write empty samples of shape {image_shape:?}"
            )));
        }
        let pair_shape = [&[2usize][..], sample_shape].concat();

        for (i, (image, latent)) in images
            .chunks(sample_len)
            .zip(latents.chunks(sample_len))
            .take(n)
            .enumerate()
        {
            let pair = Tensor::from_vec([image, latent].concat(), pair_shape.clone(), &Device::Cpu)?;
            let path = self.samples_dir.join(format!("{:06}.npy", start + i as u64));
            pair.write_npy(&path)?;
        }
        debug!(count = n, dir = %self.samples_dir.display(), "wrote pairs");
        Ok(())
    }
}

fn image_dims<T: Backend>(images: &T) -> Result<(usize, usize, usize, usize)> {
    let shape = images.shape();
    match shape[..] {
        [n, c, h, w] if h > 0 && w > 0 => Ok((n, c, h, w)),
        [..] if shape.len() == 4 => Err(GenerationError::ShapeMismatch(format!(
            "cannot write empty images of shape {shape:?}"
        ))),
        _ => Err(GenerationError::RankMismatch {
            expected: 4,
            actual: shape.clone(),
        }),
    }
}

fn to_u32(extent: usize) -> Result<u32> {
    u32::try_from(extent)
        .map_err(|_| GenerationError::ShapeMismatch(format!("image extent {extent} is too large")))
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| GenerationError::OutputDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(seeds: Vec<Seed>, channels: usize, value: f32, class_idx: Option<usize>) -> GeneratedBatch<Tensor> {
        let n = seeds.len();
        let images = Tensor::full(value, (n, channels, 2, 3), &Device::Cpu).unwrap();
        let latents = Tensor::full(-value, (n, channels, 2, 3), &Device::Cpu).unwrap();
        GeneratedBatch {
            seeds,
            class_idx,
            latents,
            images,
        }
    }

    #[test]
    fn test_pixel_mapping() {
        assert_eq!(to_pixel(-1.0), 0);
        assert_eq!(to_pixel(0.0), 128);
        assert_eq!(to_pixel(1.0), 255);
        assert_eq!(to_pixel(5.0), 255);
        assert_eq!(to_pixel(-5.0), 0);
    }

    #[test]
    fn test_image_path_layout() {
        let out = Path::new("out");
        assert_eq!(image_path(out, 7, false, None), Path::new("out/000007.png"));
        assert_eq!(image_path(out, 1001, true, None), Path::new("out/001000/001001.png"));
        assert_eq!(
            image_path(out, 12, true, Some(3)),
            Path::new("out/class_3/000000/000012.png")
        );
    }

    #[test]
    fn test_images_bucketed_by_thousands() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageSink::new(dir.path(), true);
        OutputSink::<Tensor>::consume(&mut sink, batch(vec![0, 1000, 1001], 3, 0.5, None)).unwrap();

        for relative in ["000000/000000.png", "001000/001000.png", "001000/001001.png"] {
            assert!(dir.path().join(relative).is_file(), "missing {relative}");
        }
    }

    #[test]
    fn test_rgb_pixels_are_rescaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageSink::new(dir.path(), false);
        OutputSink::<Tensor>::consume(&mut sink, batch(vec![5], 3, 0.0, Some(2))).unwrap();

        let img = image::open(dir.path().join("class_2/000005.png")).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_single_channel_is_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageSink::new(dir.path(), false);
        OutputSink::<Tensor>::consume(&mut sink, batch(vec![1], 1, 1.0, None)).unwrap();

        let img = image::open(dir.path().join("000001.png")).unwrap();
        assert_eq!(img.color(), image::ColorType::L8);
        assert!(img.to_luma8().pixels().all(|p| p.0 == [255]));
    }

    #[test]
    fn test_unsupported_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageSink::new(dir.path(), false);
        let err = OutputSink::<Tensor>::consume(&mut sink, batch(vec![1], 2, 0.0, None)).unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedChannels(2)));
    }

    #[test]
    fn test_uncreatable_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut sink = ImageSink::new(&blocker, false);
        let err = OutputSink::<Tensor>::consume(&mut sink, batch(vec![1], 3, 0.0, None)).unwrap_err();
        assert!(matches!(err, GenerationError::OutputDir { .. }));
    }

    #[test]
    fn test_pairs_named_from_offset_and_first_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PairSink::new(dir.path(), 100);
        OutputSink::<Tensor>::consume(&mut sink, batch(vec![4, 5], 1, 0.75, None)).unwrap();

        let first = Tensor::read_npy(dir.path().join("samples/000104.npy")).unwrap();
        assert_eq!(first.dims(), &[2, 1, 2, 3]);
        let values = first.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values[..6].iter().all(|&v| v == 0.75));
        assert!(values[6..].iter().all(|&v| v == -0.75));
        assert!(dir.path().join("samples/000105.npy").is_file());
    }

    #[test]
    fn test_pair_ids_must_fit_in_u64() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PairSink::new(dir.path(), u64::MAX - 1);
        let err = OutputSink::<Tensor>::consume(&mut sink, batch(vec![1, 2], 1, 0.5, None)).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidConfig { field: "save_start_idx", .. }));
        assert!(!sink.samples_dir().exists());

        let mut sink = PairSink::new(dir.path(), 1);
        let err = OutputSink::<Tensor>::consume(&mut sink, batch(vec![u64::MAX], 1, 0.5, None)).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidConfig { .. }));

        let mut sink = PairSink::new(dir.path(), u64::MAX - 2);
        OutputSink::<Tensor>::consume(&mut sink, batch(vec![1, 2], 1, 0.5, None)).unwrap();
        assert!(sink.samples_dir().join(format!("{}.npy", u64::MAX)).is_file());
    }

    #[test]
    fn test_memory_sink_keeps_batches() {
        let mut sink: Box<dyn OutputSink<Tensor>> = SaveFormat::None.sink(Path::new("unused"), false, 0);
        sink.consume(batch(vec![1, 2], 3, 0.0, None)).unwrap();
        sink.consume(batch(vec![3], 3, 0.0, None)).unwrap();

        let kept = sink.finish();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].seeds, vec![3]);
    }

    #[test]
    fn test_save_format_names() {
        for format in [SaveFormat::None, SaveFormat::Images, SaveFormat::Pairs] {
            assert_eq!(format.to_string().parse::<SaveFormat>().unwrap(), format);
        }
        assert!("npz".parse::<SaveFormat>().is_err());
    }
}
