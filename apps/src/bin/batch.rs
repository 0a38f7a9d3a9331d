//! Batch driver: estimates and measures dispatch success over a folder of
//! STNU JSON files.
//!
//! For every network the expected success rate comes from the conflict
//! probability estimator and the observed one from repeated dispatch
//! simulation; the result is a single JSON object mapping file names to
//! both numbers.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempo::dispatch::simulate;
use tempo::lp::Simplex;
use tempo::model::load_stnu;
use tempo::prob::prob_of_dc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Compare estimated and observed dispatch success over a folder of STNUs.
#[derive(Debug, Parser)]
#[command(name = "batch", rename_all = "kebab-case")]
struct Opt {
    /// Folder containing STNU JSON files.
    folder: PathBuf,
    /// Output file for the JSON report.
    #[arg(long, short, default_value = "results.json")]
    output: PathBuf,
    /// Number of dispatch trials per network.
    #[arg(long, default_value_t = 800)]
    samples: usize,
    /// Seed for the realization generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Debug, Serialize)]
struct Entry {
    expected: f64,
    observed: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();
    ensure!(opt.folder.is_dir(), "{} is not a folder", opt.folder.display());

    let solver = Simplex::default();
    let mut report: BTreeMap<String, Entry> = BTreeMap::new();

    for entry in WalkDir::new(&opt.folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let network = match load_stnu(path) {
            Ok(network) => network,
            Err(e) => {
                warn!(%name, error = %e, "skipping unreadable network");
                continue;
            }
        };

        info!(%name, "estimating");
        let expected = prob_of_dc(&network, &solver);
        let observed = simulate(&network, opt.samples, opt.seed);
        info!(%name, expected, observed, "done");
        report.insert(name, Entry { expected, observed });
    }

    let text = serde_json::to_string_pretty(&report)?;
    std::fs::write(&opt.output, text)
        .with_context(|| format!("writing {}", opt.output.display()))?;
    println!("Results saved to {}", opt.output.display());
    Ok(())
}
