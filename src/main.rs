// src/main.rs - Time-parameterize a waypoint job file
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use clap::Parser;
use krusty_totg::config;
use krusty_totg::output::{self, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "totg", version, about = "Time-optimal trajectory generation for waypoint jobs.")]
struct Cli {
    /// Path to the TOML job file
    job: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,

    /// Override the resampling interval (seconds)
    #[arg(long)]
    resample_dt: Option<f64>,

    /// Resample to this many waypoints instead of a fixed interval
    #[arg(long)]
    num_waypoints: Option<usize>,

    /// Override the velocity scaling factor
    #[arg(long)]
    velocity_scaling: Option<f64>,

    /// Override the acceleration scaling factor
    #[arg(long)]
    acceleration_scaling: Option<f64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the trajectory
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_writer(io::stderr)
        .init();

    let job_path = cli.job.to_string_lossy();
    tracing::info!("Loading job from: {}", job_path);
    let mut job = config::load_config(&job_path).map_err(|e| {
        tracing::error!("Failed to load job from '{}': {}", job_path, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    if let Some(dt) = cli.resample_dt {
        job.parameterization.resample_dt = dt;
    }
    if let Some(scaling) = cli.velocity_scaling {
        job.scaling.velocity = scaling;
    }
    if let Some(scaling) = cli.acceleration_scaling {
        job.scaling.acceleration = scaling;
    }
    job.validate().map_err(|e| {
        tracing::error!("{}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let mut trajectory = job.joint_trajectory();
    tracing::info!(
        "Parameterizing {} waypoints for {} joints",
        trajectory.len(),
        trajectory.joints.len()
    );

    let parameterization = job.parameterization.build()?;
    let result = match cli.num_waypoints {
        Some(count) => parameterization.compute_time_stamps_by_count(
            count,
            &mut trajectory,
            job.scaling.velocity,
            job.scaling.acceleration,
        ),
        None => parameterization.compute_time_stamps(&mut trajectory, job.scaling.velocity, job.scaling.acceleration),
    };
    if let Err(e) = result {
        tracing::error!("Time parameterization failed: {}", e);
        return Err(Box::new(e));
    }
    tracing::info!(
        "Trajectory duration {:.4}s with {} waypoints",
        trajectory.duration(),
        trajectory.len()
    );

    match &cli.output {
        Some(path) => {
            let file = File::create(path)?;
            output::write_trajectory(BufWriter::new(file), &trajectory, cli.format)?;
            tracing::info!("Wrote {}", path.display());
        }
        None => output::write_trajectory(io::stdout().lock(), &trajectory, cli.format)?,
    }
    Ok(())
}
