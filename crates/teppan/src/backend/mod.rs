//! # Tensor Backend
//!
//! This module provides a unified interface for the tensor libraries a generator can
//! be driven with, so sampling, strategies and sinks stay backend-agnostic.

//! ## Feature Flags
//!
//! - candle support is always compiled in; `.npy` output goes through candle's
//!   array codec regardless of the backend a run uses
//! - `burn`: Enables support for the Burn tensor library
//!
//! ## Usage
//!
//! Users of this crate can work with tensors in a backend-agnostic way by:
//!
//! 1. Importing the [`Backend`] trait
//! 2. Writing denoisers and strategies against it
//! 3. Enabling the appropriate feature flag for their desired backend

mod core_trait;

/// Candle tensor backend implementation.
///
/// Implements [`Backend`] for candle-core's `Tensor`, picking CUDA, then Metal,
/// then the CPU as the default device.
pub mod candle;

#[cfg_attr(docsrs, doc(cfg(feature = "burn")))]
#[cfg(feature = "burn")]
/// Burn tensor backend implementation.
///
/// This module is only available when the `burn` feature flag is enabled.
/// Burn fixes tensor rank at compile time, so [`Backend`] is implemented for
/// float tensors of rank 1 through 5.
pub mod burn;


// Re-export the core traits for convenient imports
pub use core_trait::*;
