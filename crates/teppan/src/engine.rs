//! The generator: one model, one device, one config.
//!
//! [`Generator`] owns the model handle and exposes two levels of operation:
//! [`Generator::generate_batch`] turns one batch request into latents and images, and
//! [`Generator::run`] drives a whole seed spec through a [`ProcessGroup`], one batch
//! at a time, dispatching every batch to the configured output sink.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use crate::backend::Backend;
use crate::config::{ConfigOverrides, GenerationConfig};
use crate::distributed::ProcessGroup;
use crate::error::{GenerationError, Result};
use crate::labels::{ClassLabels, encode_labels};
use crate::model::{Denoiser, ModelLoader};
use crate::plan::BatchPlan;
use crate::random::StackedRandomGenerator;
use crate::seeds::{Seed, SeedSpec};
use crate::sink::SaveFormat;
use crate::strategy::{BatchStrategy, LatentSource, SamplingInput};

/// Input of [`Generator::generate_batch`].
#[derive(Debug, Clone)]
pub struct BatchRequest<T: Backend> {
    /// Seeds of the batch, keying latents, step noise and random classes
    pub seeds: Vec<Seed>,
    /// Initial latents to use instead of sampling them from `seeds`
    pub latents: Option<T>,
    /// Class shared by every sample, `None` for a random class per seed
    pub class_idx: Option<usize>,
    /// One class per sample, taking precedence over `class_idx`
    pub class_ids: Option<Vec<usize>>,
    /// Config overlay for this batch only
    pub overrides: ConfigOverrides,
}

impl<T: Backend> BatchRequest<T> {
    pub fn from_seeds(seeds: Vec<Seed>) -> Self {
        Self {
            seeds,
            latents: None,
            class_idx: None,
            class_ids: None,
            overrides: ConfigOverrides::default(),
        }
    }

    /// A request driven by caller-supplied latents.
    ///
    /// Step noise and random classes are keyed by batch position unless seeds are
    /// also given.
    pub fn from_latents(latents: T) -> Self {
        Self {
            seeds: Vec::new(),
            latents: Some(latents),
            class_idx: None,
            class_ids: None,
            overrides: ConfigOverrides::default(),
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<Seed>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_class(mut self, class_idx: Option<usize>) -> Self {
        self.class_idx = class_idx;
        self
    }

    /// Condition sample `i` on class `class_ids[i]`.
    pub fn with_class_ids(mut self, class_ids: Vec<usize>) -> Self {
        self.class_ids = Some(class_ids);
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Latents and images of one batch, rows in seed order.
#[derive(Debug, Clone)]
pub struct GeneratedBatch<T: Backend> {
    pub seeds: Vec<Seed>,
    pub class_idx: Option<usize>,
    /// Initial latents, before any strategy scaling
    pub latents: T,
    pub images: T,
}

/// Options of a full [`Generator::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Where outputs are written
    pub out_dir: PathBuf,
    /// Bucket images into a directory per thousand seeds
    pub subdirs: bool,
    pub seeds: SeedSpec,
    /// Class for every sample, `None` for a random class per seed
    pub class_idx: Option<usize>,
    /// Maximum batch size
    pub batch_size: usize,
    pub save_format: SaveFormat,
    /// Offset of the instance ids used by the `pairs` format
    pub save_start_idx: u64,
    /// Config overlay applied to every batch of the run
    pub overrides: ConfigOverrides,
}

impl RunOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            subdirs: false,
            seeds: SeedSpec::default(),
            class_idx: None,
            batch_size: 64,
            save_format: SaveFormat::default(),
            save_start_idx: 0,
            overrides: ConfigOverrides::default(),
        }
    }
}

/// What one worker did during a run.
#[derive(Debug)]
pub struct RunReport<T: Backend> {
    /// Seeds in the whole run, across every worker
    pub total_seeds: usize,
    /// Non-empty batches this worker generated
    pub batches_generated: usize,
    /// Samples this worker generated
    pub samples_generated: usize,
    /// Batches kept in memory, only populated by [`SaveFormat::None`]
    pub batches: Vec<GeneratedBatch<T>>,
}

struct LoadedModel<M> {
    path: PathBuf,
    model: M,
}

/// A batched sample generator.
///
/// The generator is parameterised over its capabilities rather than subclassed: `L`
/// decides how checkpoints become models, `S` decides how latents become images.
///
/// # Type Parameters
///
/// * `T` - The tensor type that implements [`Backend`]
/// * `L` - The [`ModelLoader`] producing the model
/// * `S` - The [`BatchStrategy`] run on every batch
pub struct Generator<T, L, S>
where
    T: Backend,
    L: ModelLoader<T>,
    S: BatchStrategy<T>,
{
    loader: L,
    strategy: S,
    device: T::Device,
    config: GenerationConfig,
    model: Option<LoadedModel<L::Model>>,
    _marker: PhantomData<T>,
}

impl<T, L, S> Generator<T, L, S>
where
    T: Backend,
    L: ModelLoader<T>,
    S: BatchStrategy<T>,
{
    /// Create a generator with no model loaded and the default config.
    pub fn new(loader: L, strategy: S, device: T::Device) -> Self {
        Self {
            loader,
            strategy,
            device,
            config: GenerationConfig::default(),
            model: None,
            _marker: PhantomData,
        }
    }

    /// Create a generator on the backend's best available device.
    pub fn with_default_device(loader: L, strategy: S) -> Result<Self> {
        Ok(Self::new(loader, strategy, T::default_device()?))
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Overlay `overrides` onto the config every later batch starts from.
    pub fn set_config(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        self.config = self.config.merge(overrides)?;
        Ok(())
    }

    pub fn device(&self) -> &T::Device {
        &self.device
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Checkpoint path of the loaded model.
    pub fn model_path(&self) -> Option<&Path> {
        self.model.as_ref().map(|loaded| loaded.path.as_path())
    }

    pub fn model(&self) -> Result<&L::Model> {
        self.model
            .as_ref()
            .map(|loaded| &loaded.model)
            .ok_or(GenerationError::ModelNotLoaded)
    }

    /// Load the checkpoint at `path` onto `device`.
    ///
    /// Fails with [`GenerationError::ModelAlreadyLoaded`] while another model is
    /// resident; call [`Generator::unload_model`] first.
    pub fn load_model(&mut self, path: impl AsRef<Path>, device: T::Device) -> Result<()> {
        let path = path.as_ref();
        if let Some(loaded) = &self.model {
            return Err(GenerationError::ModelAlreadyLoaded {
                path: loaded.path.clone(),
            });
        }
        let model = self.loader.load(path, &device)?;
        debug!(path = %path.display(), device = ?device, "loaded model");
        self.device = device;
        self.model = Some(LoadedModel {
            path: path.to_path_buf(),
            model,
        });
        Ok(())
    }

    /// Drop the loaded model and its device memory. Does nothing if none is loaded.
    pub fn unload_model(&mut self) {
        if let Some(loaded) = self.model.take() {
            debug!(path = %loaded.path.display(), "unloading model");
            drop(loaded);
        }
    }

    /// Generate one batch.
    ///
    /// The request's overrides are merged into the generator config for this batch
    /// only. Latents are sampled from the request seeds on the generator's device
    /// unless supplied.
    pub async fn generate_batch(&self, request: &BatchRequest<T>) -> Result<GeneratedBatch<T>> {
        let config = self.config.merge(&request.overrides)?;
        self.generate_with(&config, request).await
    }

    async fn generate_with(
        &self,
        config: &GenerationConfig,
        request: &BatchRequest<T>,
    ) -> Result<GeneratedBatch<T>> {
        let model = self.model()?;
        let seeds = match (&request.latents, request.seeds.is_empty()) {
            (_, false) => request.seeds.clone(),
            (Some(latents), true) => {
                let batch = latents.shape().first().copied().unwrap_or(0);
                (0..batch as Seed).collect()
            }
            (None, true) => return Err(GenerationError::MissingInput),
        };

        let mut rnd = StackedRandomGenerator::<T>::new(self.device.clone(), &seeds);
        let (latents, source) = match &request.latents {
            Some(latents) => {
                if latents.shape().first() != Some(&seeds.len()) {
                    return Err(GenerationError::ShapeMismatch(format!(
                        "latents of shape {:?} for {} seeds",
                        latents.shape(),
                        seeds.len()
                    )));
                }
                (latents.clone(), LatentSource::Supplied)
            }
            None => {
                let resolution = model.img_resolution();
                let shape = [seeds.len(), model.img_channels(), resolution, resolution];
                (rnd.randn(&shape)?, LatentSource::Sampled)
            }
        };
        let class_labels = match &request.class_ids {
            Some(class_ids) => {
                if class_ids.len() != seeds.len() {
                    return Err(GenerationError::ShapeMismatch(format!(
                        "{} class ids for {} samples",
                        class_ids.len(),
                        seeds.len()
                    )));
                }
                match model.label_dim() {
                    0 => None,
                    label_dim => Some(ClassLabels::one_hot(class_ids.clone(), label_dim)?),
                }
            }
            None => encode_labels(request.class_idx, model.label_dim(), &mut rnd)?,
        };

        let input = SamplingInput {
            latents: &latents,
            class_labels: class_labels.as_ref(),
            config,
            source,
        };
        let images = self.strategy.sample(model, input, &mut rnd).await?;

        Ok(GeneratedBatch {
            seeds,
            class_idx: request.class_idx,
            latents,
            images,
        })
    }

    /// Generate every seed of `options.seeds` assigned to this worker.
    ///
    /// The group is initialized first; an already initialized group is fine. Seeds are
    /// planned into batches across the group, every worker meets at a barrier before
    /// the first batch, before each batch and after the last one, and each non-empty
    /// batch goes to the sink selected by `options.save_format`. Only the primary
    /// worker reports progress.
    pub async fn run<G>(&self, group: &G, options: &RunOptions) -> Result<RunReport<T>>
    where
        G: ProcessGroup + ?Sized,
    {
        match group.init().await {
            Ok(()) => {}
            Err(GenerationError::AlreadyInitialized) => {
                debug!(rank = group.rank(), "process group already initialized");
            }
            Err(e) => return Err(e),
        }

        let seeds = options.seeds.parse()?;
        let config = self.config.merge(&options.overrides)?;
        let plan = BatchPlan::new(seeds, options.batch_size, group.world_size())?;
        let rank_batches = plan.rank_batches(group.rank())?;
        let mut sink = options.save_format.sink::<T>(
            &options.out_dir,
            options.subdirs,
            options.save_start_idx,
        );

        group.barrier().await?;
        group.print0(&format!(
            "Generating {} images to \"{}\"...",
            plan.len(),
            options.out_dir.display()
        ));

        let local_batches = rank_batches.len();
        let mut batches_generated = 0;
        let mut samples_generated = 0;
        for (index, batch_seeds) in rank_batches.into_iter().enumerate() {
            group.barrier().await?;
            if batch_seeds.is_empty() {
                continue;
            }

            let request = BatchRequest::from_seeds(batch_seeds.to_vec()).with_class(options.class_idx);
            let batch = self.generate_with(&config, &request).await?;
            debug!(
                rank = group.rank(),
                batch = index,
                first_seed = batch_seeds[0],
                size = batch_seeds.len(),
                "generated batch"
            );
            sink.consume(batch)?;

            batches_generated += 1;
            samples_generated += batch_seeds.len();
            if group.is_primary() {
                info!(batch = index + 1, of = local_batches, "batch done");
            }
        }

        group.barrier().await?;
        group.print0("Done.");

        Ok(RunReport {
            total_seeds: plan.len(),
            batches_generated,
            samples_generated,
            batches: sink.finish(),
        })
    }
}
