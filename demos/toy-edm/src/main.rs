#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

mod model;

use std::path::PathBuf;
use anyhow::{Context, Result, bail};
use candle_core::{Device, Tensor};
use clap::{Parser, ValueEnum};
use futures::future::try_join_all;
use tracing::info;
use tracing_subscriber::EnvFilter;
use teppan::backend::Backend;
use teppan::{
    ConfigOverrides, DmdGenerator, EdmSampler, Generator, LocalGroup, RunOptions, SaveFormat,
    Sampler, SeedSpec,
};
use crate::model::DescriptorLoader;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SamplerKind {
    Edm,
    Dmd,
}

#[derive(Debug, Parser)]
#[command(name = "toy-edm", about = "Generate seed-reproducible samples from a toy diffusion model")]
struct Args {
    /// Where to save the output
    #[arg(long, env = "TEPPAN_OUTDIR")]
    outdir: PathBuf,

    /// JSON descriptor of the toy model
    #[arg(long, env = "TEPPAN_MODEL")]
    model: PathBuf,

    /// Random seeds, e.g. 1,2,5-10
    #[arg(long, env = "TEPPAN_SEEDS", default_value = "0-63")]
    seeds: SeedSpec,

    /// Create a subdirectory for every 1000 seeds
    #[arg(long, env = "TEPPAN_SUBDIRS", default_value_t = false)]
    subdirs: bool,

    /// Class label, random per seed when omitted
    #[arg(long, env = "TEPPAN_CLASS")]
    class: Option<usize>,

    /// Maximum batch size
    #[arg(long, env = "TEPPAN_BATCH", default_value_t = 64)]
    batch: usize,

    /// Device of every worker: cpu, cuda[:N] or metal[:N]; the best available when omitted
    #[arg(long, env = "TEPPAN_DEVICE")]
    device: Option<String>,

    /// none, images or pairs
    #[arg(long, env = "TEPPAN_SAVE_FORMAT", default_value = "images")]
    save_format: SaveFormat,

    /// Offset of the ids of saved pairs
    #[arg(long, env = "TEPPAN_SAVE_START_IDX", default_value_t = 0)]
    save_start_idx: u64,

    /// Workers sharing the seeds, each driven by its own task
    #[arg(long, env = "TEPPAN_WORKERS", default_value_t = 1)]
    workers: usize,

    #[arg(long, env = "TEPPAN_SAMPLER", value_enum, default_value_t = SamplerKind::Edm)]
    sampler: SamplerKind,

    /// Sampler config override, e.g. --set steps=32 --set s_churn=40
    #[arg(long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TEPPAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The named device, or the best available one when none is named.
fn select_device(name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => parse_device(name),
        None => Ok(<Tensor as Backend>::default_device()?),
    }
}

fn parse_device(name: &str) -> Result<Device> {
    let (kind, ordinal) = match name.split_once(':') {
        Some((kind, ordinal)) => (
            kind,
            ordinal
                .parse::<usize>()
                .with_context(|| format!("invalid device ordinal in {name:?}"))?,
        ),
        None => (name, 0),
    };
    Ok(match kind {
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(ordinal)?,
        "metal" => Device::new_metal(ordinal)?,
        _ => bail!("unknown device {name:?}, expected cpu, cuda[:N] or metal[:N]"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let overrides = args
        .overrides
        .iter()
        .map(|assignment| ConfigOverrides::parse_assignment(assignment))
        .collect::<teppan::Result<ConfigOverrides>>()?;
    let sampler = match args.sampler {
        SamplerKind::Edm => Sampler::Edm(EdmSampler),
        SamplerKind::Dmd => Sampler::Dmd(DmdGenerator::default()),
    };
    let device = select_device(args.device.as_deref())?;

    let mut options = RunOptions::new(&args.outdir);
    options.subdirs = args.subdirs;
    options.seeds = args.seeds.clone();
    options.class_idx = args.class;
    options.batch_size = args.batch;
    options.save_format = args.save_format;
    options.save_start_idx = args.save_start_idx;
    options.overrides = overrides;

    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }
    info!(model = %args.model.display(), workers = args.workers, sampler = ?args.sampler, device = ?device, "starting");

    let mut handles = Vec::with_capacity(args.workers);
    for group in LocalGroup::cohort(args.workers)? {
        let mut generator = Generator::new(DescriptorLoader, sampler, device.clone());
        generator
            .load_model(&args.model, device.clone())
            .with_context(|| format!("loading {}", args.model.display()))?;
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            let report = generator.run(&group, &options).await;
            generator.unload_model();
            report
        }));
    }

    let mut generated = 0;
    for report in try_join_all(handles).await? {
        generated += report?.samples_generated;
    }
    info!(generated, "finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_defaults_to_backend_choice() {
        let args = Args::try_parse_from(["toy-edm", "--outdir", "out", "--model", "toy.json"]).unwrap();
        assert!(args.device.is_none());

        let chosen = select_device(args.device.as_deref()).unwrap();
        let best = <Tensor as Backend>::default_device().unwrap();
        assert_eq!(chosen.is_cpu(), best.is_cpu());
    }

    #[test]
    fn test_named_devices() {
        assert!(select_device(Some("cpu")).unwrap().is_cpu());
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());

        let args = Args::try_parse_from([
            "toy-edm", "--outdir", "out", "--model", "toy.json", "--device", "cpu",
            "--set", "steps=8", "--set", "s_churn=40",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("cpu"));
        assert_eq!(args.overrides, vec!["steps=8", "s_churn=40"]);
    }
}
