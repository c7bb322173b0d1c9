//! # Teppan
//!
//! Batched, seed-reproducible sample generation for pretrained diffusion models.
//!
//! ## Overview
//!
//! Teppan takes a list of integer seeds, splits it into batches across one or more
//! workers, and runs a sampling strategy for every batch against a pretrained
//! denoiser. Every sample is a pure function of its seed, the model and the config:
//! the same seed produces the same image whichever batch, worker or batch size it
//! ends up in.
//!
//! Key components include:
//!
//! - A tensor abstraction layer supporting various backends
//! - Seed parsing and a deterministic batch plan
//! - Per-seed stacked random generators
//! - EDM (Heun, Karras schedule) and DMD (one step) batch strategies
//! - Output sinks writing PNG images or `[image, latent]` `.npy` pairs
//!
//! ## Architecture
//!
//! ### Assumptions
//! Regardless of backend used, teppan reserves the `0th` dimension as the batch
//! dimension. Latents and images have shape `(batch, channels, resolution, resolution)`.
//!
//! ### Backend Traits
//!
//! The `Backend` trait defines the interface that any tensor implementation must
//! satisfy. Sampling math is written once against it.
//!
//! ### Generators
//!
//! A [`Generator`](engine::Generator) combines a [`ModelLoader`](model::ModelLoader),
//! which decides how a checkpoint becomes a [`Denoiser`](model::Denoiser), with a
//! [`BatchStrategy`](strategy::BatchStrategy), which decides how latents become
//! images. Runs are coordinated through a [`ProcessGroup`](distributed::ProcessGroup).
//!
//! ## Features
//!
//! - **burn** - Enables burn backend
//!
//! ## Implementation Details
//!
//! The batch plan always has a multiple of the world size batches so every worker
//! passes the same number of barriers. Trailing batches may be empty; workers still
//! meet at the barrier for them but generate nothing.
//!

pub mod backend;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod labels;
pub mod model;
pub mod plan;
pub mod random;
pub mod seeds;
pub mod sink;
pub mod strategy;

pub use config::{ConfigOverrides, GenerationConfig};
pub use distributed::{LocalGroup, ProcessGroup, SingleProcess};
pub use engine::{BatchRequest, GeneratedBatch, Generator, RunOptions, RunReport};
pub use error::{GenerationError, Result};
pub use seeds::{Seed, SeedSpec, parse_seeds};
pub use sink::SaveFormat;
pub use strategy::{DmdGenerator, EdmSampler, Sampler};
