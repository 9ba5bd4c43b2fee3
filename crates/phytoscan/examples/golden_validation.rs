//! Golden logit validation against a PyTorch reference export.
//!
//! This example validates the Rust forward pass against logits the
//! training framework produced for the same images.
//!
//! The case file is JSON:
//!
//! ```json
//! {"cases": [{"name": "scab_01", "image": "scab_01.jpg",
//!             "expected_logits": [...], "expected_label": "Apple___Apple_scab"}]}
//! ```
//!
//! Run validation:
//!    cargo run -p phytoscan --example golden_validation -- <weights.safetensors> <cases.json> [tag]

use phytoscan::prelude::*;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: golden_validation <weights.safetensors> <cases.json> [tag]");
        std::process::exit(1);
    }

    println!("Golden Logit Validation");
    println!("=======================\n");

    let engine = Engine::builder().weights_path(&args[1]).build()?;
    println!("Model: {} parameters", engine.model().parameter_count());

    let mut harness = GoldenTestHarness::from_file(Path::new(&args[2]))?;
    if let Some(tag) = args.get(3) {
        harness.retain_tag(tag);
    }
    println!("Loaded {} test cases\n", harness.cases().len());

    let summary = harness.run_with(|_case, image| {
        let bytes = std::fs::read(image).map_err(|e| format!("{}: {}", image.display(), e))?;
        engine.logits_encoded(&bytes).map_err(|e| e.to_string())
    });

    let mut names: Vec<_> = summary.results.keys().collect();
    names.sort();
    for name in names {
        println!("{}", summary.results[name]);
    }
    println!("\n{}", summary);

    if !summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
