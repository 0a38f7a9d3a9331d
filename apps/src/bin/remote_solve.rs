//! Client for a remote optimization service.
//!
//! Submits an XML job payload, polls the job status once per second, and
//! reads the objective value out of the final result. A job that exceeds
//! the time budget is killed on the server and reported with the `Killed`
//! sentinel. Exit code 0 on success, 1 on any connection or protocol
//! error.

use anyhow::{bail, Context, Result};
use clap::Parser;
use regex::Regex;
use reqwest::blocking::Client;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Submit an optimization job and wait for its objective value.
#[derive(Debug, Parser)]
#[command(name = "remote-solve", rename_all = "kebab-case")]
struct Opt {
    /// Base URL of the optimization service.
    #[arg(long)]
    server: String,
    /// XML file describing the job.
    job: PathBuf,
    /// Seconds to wait before killing the job.
    #[arg(long, default_value_t = 50)]
    timeout: u64,
    /// Print the raw final result instead of just the objective.
    #[arg(long)]
    raw: bool,
}

/// Outcome of one job, as printed on stdout.
#[derive(Debug, PartialEq)]
enum Outcome {
    Objective(f64),
    Killed,
    NoObjective,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();
    match run(&opt) {
        Ok(Outcome::Objective(value)) => {
            println!("Objective {value}");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Killed) => {
            println!("Killed");
            ExitCode::SUCCESS
        }
        Ok(Outcome::NoObjective) => {
            println!("No objective in result");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(opt: &Opt) -> Result<Outcome> {
    let payload = std::fs::read_to_string(&opt.job)
        .with_context(|| format!("reading {}", opt.job.display()))?;
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;

    // submission returns the job id in the response body
    let job_id = client
        .post(format!("{}/jobs", opt.server))
        .header("Content-Type", "application/xml")
        .body(payload)
        .send()
        .context("could not reach the optimization service")?
        .error_for_status()
        .context("job submission rejected")?
        .text()
        .context("unreadable submission response")?;
    let job_id = job_id.trim().to_string();
    if job_id.is_empty() {
        bail!("service returned an empty job id");
    }
    info!(%job_id, "job submitted");

    let deadline = Instant::now() + Duration::from_secs(opt.timeout);
    loop {
        if Instant::now() >= deadline {
            warn!(%job_id, "time budget exhausted, killing the job");
            let _ = client
                .delete(format!("{}/jobs/{}", opt.server, job_id))
                .send();
            return Ok(Outcome::Killed);
        }
        std::thread::sleep(Duration::from_secs(1));

        let status = client
            .get(format!("{}/jobs/{}/status", opt.server, job_id))
            .send()
            .context("status poll failed")?
            .text()
            .context("unreadable status")?;
        if status.trim() == "Done" {
            break;
        }
    }

    let result = client
        .get(format!("{}/jobs/{}/result", opt.server, job_id))
        .send()
        .context("result fetch failed")?
        .text()
        .context("unreadable result")?;
    if opt.raw {
        print!("{result}");
    }
    Ok(parse_objective(&result))
}

/// The final result carries a line of shape `Objective <float>`.
fn parse_objective(result: &str) -> Outcome {
    let pattern = Regex::new(r"\nObjective ([+0-9.e-]+)\n").expect("valid pattern");
    match pattern
        .captures(result)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        Some(value) => Outcome::Objective(value),
        None => Outcome::NoObjective,
    }
}
