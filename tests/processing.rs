// Integration tests for the waypoint processing adapter and job files

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use krusty_totg::config::load_config;
    use krusty_totg::output::{write_trajectory, OutputFormat};
    use krusty_totg::{
        JointKind, JointModel, JointTrajectory, Path, TimeOptimalParameterization, Trajectory,
    };
    use nalgebra::DVector;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn gantry() -> JointTrajectory {
        let joints = ["x", "y", "z"]
            .iter()
            .map(|name| {
                JointModel::new(*name, JointKind::Prismatic)
                    .with_velocity_limit(0.5)
                    .with_acceleration_limit(1.0)
            })
            .collect();
        let mut trajectory = JointTrajectory::new(joints);
        trajectory.add_waypoint(vec![0.0, 0.0, 0.0]);
        trajectory.add_waypoint(vec![0.4, 0.0, 0.1]);
        trajectory.add_waypoint(vec![0.4, 0.3, 0.1]);
        trajectory.add_waypoint(vec![0.0, 0.3, 0.0]);
        trajectory
    }

    #[test]
    fn test_resampling_properties() {
        let original = gantry();
        let mut trajectory = original.clone();
        let parameterization = TimeOptimalParameterization::new(0.05, 0.05, 0.001).unwrap();
        parameterization.compute_time_stamps(&mut trajectory, 1.0, 1.0).unwrap();

        assert_eq!(trajectory.waypoints[0].positions, original.waypoints[0].positions);
        let last = &trajectory.waypoints[trajectory.len() - 1];
        for (got, want) in last.positions.iter().zip(&original.waypoints[3].positions) {
            assert_relative_eq!(*got, *want, epsilon = 1e-9);
        }
        assert!(trajectory.waypoints.iter().all(|p| p.time_from_previous <= 0.05 + 1e-12));
        assert!(trajectory.waypoints.iter().all(|p| p.time_from_previous >= 0.0));

        // the resampled duration is the optimal one along the same path
        let points: Vec<DVector<f64>> = original
            .waypoints
            .iter()
            .map(|p| DVector::from_column_slice(&p.positions))
            .collect();
        let path = Path::create(&points, 0.05).unwrap();
        let limits = DVector::from_element(3, 0.5);
        let optimal =
            Trajectory::with_default_time_step(&path, &limits, &DVector::from_element(3, 1.0)).unwrap();
        assert_relative_eq!(trajectory.duration(), optimal.duration(), epsilon = 1e-9);

        for point in &trajectory.waypoints {
            for (j, v) in point.velocities.iter().enumerate() {
                assert!(v.abs() <= 0.5 * 1.02 + 1e-3, "joint {} velocity {}", j, v);
            }
        }
    }

    #[test]
    fn test_resampling_by_count() {
        for count in [5, 20, 101] {
            let mut trajectory = gantry();
            TimeOptimalParameterization::default()
                .compute_time_stamps_by_count(count, &mut trajectory, 1.0, 1.0)
                .unwrap();
            assert!(
                trajectory.len() == count || trajectory.len() == count + 1,
                "asked for {} waypoints, got {}",
                count,
                trajectory.len()
            );
        }
    }

    #[test]
    fn test_job_file_to_csv() {
        let dir = tempdir().unwrap();
        let job_path = dir.path().join("job.toml");
        let mut file = File::create(&job_path).unwrap();
        writeln!(
            file,
            r#"
waypoints = [[0.0], [1.0]]

[parameterization]
resample_dt = 0.5

[[joints]]
name = "rail"
kind = "prismatic"
max_velocity = 1.0
max_acceleration = 1.0
"#
        )
        .unwrap();
        file.flush().unwrap();

        let job = load_config(job_path.to_str().unwrap()).unwrap();
        job.validate().unwrap();
        let mut trajectory = job.joint_trajectory();
        job.parameterization
            .build()
            .unwrap()
            .compute_time_stamps(&mut trajectory, job.scaling.velocity, job.scaling.acceleration)
            .unwrap();
        // 1.0 along a line with unit limits is a 2s triangle profile
        assert_relative_eq!(trajectory.duration(), 2.0, epsilon = 1e-2);

        let mut buffer = Vec::new();
        write_trajectory(&mut buffer, &trajectory, OutputFormat::Csv).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("time,rail_pos,rail_vel,rail_acc"));
        assert_eq!(lines.count(), trajectory.len());
    }
}
