//! Write a synthetic ResNet9 weight archive.
//!
//! Produces a safetensors file with the same keys and shapes as the trained
//! PlantVillage model, filled with deterministic random values. Useful for
//! exercising loaders and deployments without the real artifact.
//!
//! Usage:
//!    cargo run -p phytoscan-core --example synth_weights -- <out.safetensors> [base_channels] [seed]

use anyhow::Context;
use candle_core::Device;
use phytoscan_core::model::{schema, ResNet9, ResNet9Config};
use phytoscan_core::weights::WeightStore;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: synth_weights <out.safetensors> [base_channels] [seed]");
        std::process::exit(1);
    }

    let out = Path::new(&args[1]);
    let base_channels = match args.get(2) {
        Some(s) => s.parse().context("base_channels must be an integer")?,
        None => ResNet9Config::default().base_channels,
    };
    let seed: u64 = match args.get(3) {
        Some(s) => s.parse().context("seed must be an integer")?,
        None => 0,
    };

    let config = ResNet9Config {
        base_channels,
        ..ResNet9Config::default()
    };
    config.validate()?;

    let device = Device::Cpu;
    let specs = schema(&config);
    let store = WeightStore::random(&specs, seed, &device)?;
    store.save(out)?;

    // Read it back through the validating loader.
    let reloaded = WeightStore::from_file(out, &specs, &device)?;
    let model = ResNet9::from_weights(&reloaded, &config)?;

    println!("Wrote {}", out.display());
    println!("  layers:     {}", reloaded.len());
    println!("  parameters: {}", reloaded.parameter_count());
    println!("\n{}", model.describe());

    Ok(())
}
