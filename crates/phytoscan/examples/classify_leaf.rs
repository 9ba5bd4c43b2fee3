//! Classify leaf photographs.
//!
//! Usage:
//!    cargo run -p phytoscan --example classify_leaf -- <weights.safetensors> <image>...
//!
//! With `-` as the weights path a synthetic network is used, which exercises
//! the whole pipeline but predicts nothing meaningful.

use anyhow::{bail, Context};
use phytoscan::prelude::*;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: classify_leaf <weights.safetensors | -> <image>...");
        std::process::exit(1);
    }

    println!("Phytoscan Leaf Diagnosis");
    println!("========================\n");

    let builder = Engine::builder();
    let builder = if args[1] == "-" {
        println!("Using synthetic weights (seed 0)\n");
        builder.random_weights(0)
    } else {
        builder.weights_path(&args[1])
    };
    let engine = builder.build().context("building engine")?;
    println!("{}\n", engine.describe());

    for path in &args[2..] {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path))?;
        let start = Instant::now();
        let result = match engine.classify_encoded(&bytes) {
            Ok(result) => result,
            Err(err) if err.is_per_call() => {
                println!("{}: skipped ({})", path, err);
                continue;
            }
            Err(err) => bail!(err),
        };
        let elapsed = start.elapsed();

        println!("{}", path);
        println!("  crop:       {}", result.label.crop());
        println!("  condition:  {}", result.label.condition());
        println!("  confidence: {:.1}%", result.confidence * 100.0);
        println!("  entropy:    {:.3} nats", result.entropy());
        println!("  time:       {:.1}ms", elapsed.as_secs_f64() * 1000.0);
        for (rank, (class, p)) in result.top_k(3).into_iter().enumerate() {
            println!("    {}. {:<50} {:.4}", rank + 1, class.name(), p);
        }
    }

    Ok(())
}
