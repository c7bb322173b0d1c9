//! Coordination between the workers of a run.
//!
//! A generator only needs four things from its distributed bootstrap: its rank, the
//! world size, a barrier, and a way to report progress from a single worker. There
//! is no timeout on [`ProcessGroup::barrier`]; a worker that fails mid-run leaves its
//! peers waiting at the next barrier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use tokio::sync::Barrier;
use tracing::info;
use crate::error::{GenerationError, Result};

/// The rank, world size and rendezvous primitives of one worker.
#[async_trait]
pub trait ProcessGroup: Send + Sync {
    /// Initialize this worker's membership.
    ///
    /// Returns [`GenerationError::AlreadyInitialized`] when called a second time;
    /// callers that may run several times in one process should tolerate it.
    async fn init(&self) -> Result<()>;

    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Block until every worker of the group has reached this point.
    async fn barrier(&self) -> Result<()>;

    /// Whether this worker reports progress for the whole group.
    fn is_primary(&self) -> bool {
        self.rank() == 0
    }

    /// Report `message` if this worker is the primary.
    fn print0(&self, message: &str) {
        if self.is_primary() {
            info!("{message}");
        }
    }
}

/// A group of exactly one worker.
#[derive(Debug, Default)]
pub struct SingleProcess {
    initialized: AtomicBool,
}

impl SingleProcess {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessGroup for SingleProcess {
    async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(GenerationError::AlreadyInitialized);
        }
        Ok(())
    }

    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    async fn barrier(&self) -> Result<()> {
        ensure_initialized(&self.initialized)
    }
}

/// One worker of a cohort that lives inside a single process.
///
/// Every member of a cohort shares one [`Barrier`]; each member is driven by its own
/// task, typically with its own generator and device.
#[derive(Debug)]
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
    initialized: AtomicBool,
}

impl LocalGroup {
    /// Create the `world_size` members of a new cohort, ordered by rank.
    pub fn cohort(world_size: usize) -> Result<Vec<LocalGroup>> {
        if world_size == 0 {
            return Err(GenerationError::Coordination(
                "a cohort needs at least one worker".to_string(),
            ));
        }
        let barrier = Arc::new(Barrier::new(world_size));
        Ok((0..world_size)
            .map(|rank| LocalGroup {
                rank,
                world_size,
                barrier: barrier.clone(),
                initialized: AtomicBool::new(false),
            })
            .collect())
    }
}

#[async_trait]
impl ProcessGroup for LocalGroup {
    async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(GenerationError::AlreadyInitialized);
        }
        Ok(())
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&self) -> Result<()> {
        ensure_initialized(&self.initialized)?;
        self.barrier.wait().await;
        Ok(())
    }
}

fn ensure_initialized(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(GenerationError::Coordination(
            "barrier reached before the process group was initialized".to_string(),
        ))
    }
}
