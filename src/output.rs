// src/output.rs
//! Writers for time-parameterized trajectories.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use crate::processing::JointTrajectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    duration: f64,
    joints: Vec<&'a str>,
    waypoints: Vec<TimedWaypoint<'a>>,
}

#[derive(Debug, Serialize)]
struct TimedWaypoint<'a> {
    time: f64,
    positions: &'a [f64],
    #[serde(skip_serializing_if = "is_empty")]
    velocities: &'a [f64],
    #[serde(skip_serializing_if = "is_empty")]
    accelerations: &'a [f64],
}

fn is_empty(values: &&[f64]) -> bool {
    values.is_empty()
}

pub fn write_trajectory<W: Write>(
    writer: W,
    trajectory: &JointTrajectory,
    format: OutputFormat,
) -> Result<(), OutputError> {
    match format {
        OutputFormat::Csv => write_csv(writer, trajectory),
        OutputFormat::Json => write_json(writer, trajectory),
    }
}

/// One row per waypoint: `time`, then position, velocity and acceleration
/// columns per joint. Derivative columns are left out when not computed.
fn write_csv<W: Write>(writer: W, trajectory: &JointTrajectory) -> Result<(), OutputError> {
    let with_derivatives = trajectory
        .waypoints
        .iter()
        .all(|p| p.velocities.len() == p.positions.len() && p.accelerations.len() == p.positions.len());

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["time".to_string()];
    for joint in &trajectory.joints {
        header.push(format!("{}_pos", joint.name));
        if with_derivatives {
            header.push(format!("{}_vel", joint.name));
            header.push(format!("{}_acc", joint.name));
        }
    }
    wtr.write_record(&header)?;

    for (point, time) in trajectory.waypoints.iter().zip(trajectory.waypoint_times()) {
        let mut record = vec![format!("{:.6}", time)];
        for j in 0..point.positions.len() {
            record.push(format!("{:.9}", point.positions[j]));
            if with_derivatives {
                record.push(format!("{:.9}", point.velocities[j]));
                record.push(format!("{:.9}", point.accelerations[j]));
            }
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_json<W: Write>(mut writer: W, trajectory: &JointTrajectory) -> Result<(), OutputError> {
    let report = Report {
        duration: trajectory.duration(),
        joints: trajectory.joints.iter().map(|j| j.name.as_str()).collect(),
        waypoints: trajectory
            .waypoints
            .iter()
            .zip(trajectory.waypoint_times())
            .map(|(point, time)| TimedWaypoint {
                time,
                positions: &point.positions,
                velocities: &point.velocities,
                accelerations: &point.accelerations,
            })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writeln!(writer)?;
    Ok(())
}
