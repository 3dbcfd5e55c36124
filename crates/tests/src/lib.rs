//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 进程内 e2e 测试：合成设备 → supervisor → recorder → 磁盘

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{SensorKind, StreamKey};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(StreamKey::ALL.len(), 3);
    }

    #[test]
    fn test_rig_file_round_trip() {
        let toml = r#"
[[sensors]]
sensor = "radar"
device = "synthetic:radar"

[[sensors]]
sensor = "camera"
device = "synthetic:cam"

[sensors.camera]
width = 16
height = 8
fps = 30

[recorder]
output_root = "out"
reorder_window = 8
"#;
        let blueprint = ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(blueprint.sensors.len(), 2);
        assert_eq!(blueprint.recorder.reorder_window, 8);
        let camera = blueprint.sensor(SensorKind::Camera).unwrap();
        assert_eq!(camera.camera.as_ref().unwrap().width, 16);

        let again = ConfigLoader::to_toml(&blueprint).unwrap();
        let reparsed = ConfigLoader::load_from_str(&again, ConfigFormat::Toml).unwrap();
        assert_eq!(reparsed.sensors.len(), 2);
        assert_eq!(reparsed.recorder.output_root, blueprint.recorder.output_root);
    }

    #[test]
    fn test_demo_rig_is_valid() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../demos/synthetic_rig.toml");
        let blueprint = ConfigLoader::load_from_path(&path).unwrap();
        assert!(blueprint.sensors.iter().all(|s| s.device.is_synthetic()));
        assert_eq!(blueprint.recorder.reorder_window, 4);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        CameraSettings, ConnectionState, DeviceError, EncodingError, RadarSettings,
        RecorderConfig, ResolutionChange, RigBlueprint, SensorConfig, SensorKind, SessionState,
        StreamKey, StreamKind, SupervisorConfig,
    };
    use recorder::encoders::{DepthReader, PointCloudReader, DEPTH_FILE, POINTCLOUD_FILE};
    use recorder::{read_manifest, Recorder, RecorderError};
    use sensor_worker::DeviceLock;
    use supervisor::{AcquisitionSupervisor, InProcessLauncher, SupervisorError};

    fn radar(settings: RadarSettings) -> SensorConfig {
        SensorConfig {
            sensor: SensorKind::Radar,
            device: "synthetic:radar".into(),
            radar: Some(settings),
            camera: None,
        }
    }

    fn camera(settings: CameraSettings) -> SensorConfig {
        SensorConfig {
            sensor: SensorKind::Camera,
            device: "synthetic:cam".into(),
            radar: None,
            camera: Some(settings),
        }
    }

    /// 录制前先订阅，因此关闭自动开流
    fn rig(sensors: Vec<SensorConfig>, root: &Path) -> RigBlueprint {
        RigBlueprint {
            sensors,
            supervisor: SupervisorConfig {
                connect_timeout_ms: 2_000,
                stop_grace_ms: 2_000,
                autostart_streaming: false,
                device_lock_dir: Some(root.join("locks")),
                ..SupervisorConfig::default()
            },
            recorder: RecorderConfig {
                output_root: root.join("recordings"),
                ..RecorderConfig::default()
            },
            ..RigBlueprint::default()
        }
    }

    async fn wait_for_received(supervisor: &AcquisitionSupervisor, key: StreamKey, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let received = supervisor.stream_stats(key).map_or(0, |s| s.received);
                if received >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frames not received within 5s");
    }

    /// Link corruption on device frame 4 leaves one gap in the recording
    #[tokio::test]
    async fn test_radar_gap_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = rig(
            vec![radar(RadarSettings {
                synthetic_frame_interval_ms: 2,
                read_timeout_ms: 5,
                synthetic_points: 4,
                synthetic_frame_limit: Some(6),
                synthetic_corrupt_frames: vec![4],
                stall_timeout_ms: 60_000,
                ..RadarSettings::default()
            })],
            dir.path(),
        );
        let mut recorder = Recorder::new(blueprint.recorder.clone());
        let mut supervisor = AcquisitionSupervisor::new(blueprint, Arc::new(InProcessLauncher));

        supervisor.attach_configured().await.unwrap();
        let mut session = recorder
            .start(&supervisor, &[StreamKey::RADAR_POINTCLOUD], None)
            .unwrap();
        supervisor.start_streaming(SensorKind::Radar).await.unwrap();

        wait_for_received(&supervisor, StreamKey::RADAR_POINTCLOUD, 5).await;
        let summary = supervisor.stop_streaming(SensorKind::Radar).await.unwrap();
        assert_eq!(summary.emitted.get(&StreamKind::PointCloud), Some(&5));

        let report = recorder.stop(&mut session).await.unwrap();
        assert_eq!(report.state, SessionState::Closed);
        let stream = report.stream(StreamKey::RADAR_POINTCLOUD).unwrap();
        assert_eq!(stream.frames_written, 5);
        assert_eq!(stream.drop_events, 1);
        assert_eq!(stream.dropped_frames, 1);
        assert_eq!(stream.first_sequence, Some(0));
        assert_eq!(stream.last_sequence, Some(5));

        let frames = PointCloudReader::open(&session.directory().join(POINTCLOUD_FILE))
            .unwrap()
            .read_frames()
            .unwrap();
        let sequences: Vec<_> = frames.iter().map(|f| f.frame_num).collect();
        assert_eq!(sequences, vec![0, 1, 2, 4, 5]);
        assert!(frames.iter().all(|f| f.points.len() == 4));

        let manifest = read_manifest(session.directory()).unwrap();
        assert_eq!(manifest.state, SessionState::Closed);
        assert_eq!(manifest.streams.len(), 1);
        assert_eq!(manifest.streams[0].frames_written, 5);
        assert!(manifest.failure.is_none());

        supervisor.shutdown().await;
    }

    /// Every frame the worker emits while recording reaches the file
    #[tokio::test]
    async fn test_recording_path_never_drops() {
        let dir = tempfile::tempdir().unwrap();
        let mut blueprint = rig(
            vec![radar(RadarSettings {
                synthetic_frame_interval_ms: 1,
                read_timeout_ms: 5,
                synthetic_points: 16,
                synthetic_frame_limit: Some(200),
                stall_timeout_ms: 60_000,
                ..RadarSettings::default()
            })],
            dir.path(),
        );
        // 录制队列很小，迫使 supervisor 等待消费者
        blueprint.transport.recording_capacity = 2;
        blueprint.transport.pointcloud_capacity = 1;
        let mut recorder = Recorder::new(blueprint.recorder.clone());
        let mut supervisor = AcquisitionSupervisor::new(blueprint, Arc::new(InProcessLauncher));

        supervisor.attach_configured().await.unwrap();
        let mut session = recorder
            .start(&supervisor, &[StreamKey::RADAR_POINTCLOUD], None)
            .unwrap();
        supervisor.start_streaming(SensorKind::Radar).await.unwrap();

        wait_for_received(&supervisor, StreamKey::RADAR_POINTCLOUD, 200).await;
        let summary = supervisor.stop_streaming(SensorKind::Radar).await.unwrap();
        let emitted = summary.emitted.get(&StreamKind::PointCloud).copied().unwrap();
        assert_eq!(emitted, 200);

        // the display path may drop, the recording path may not
        let stats = supervisor.stream_stats(StreamKey::RADAR_POINTCLOUD).unwrap();
        assert_eq!(stats.received, emitted);

        let report = recorder.stop(&mut session).await.unwrap();
        assert_eq!(report.stream(StreamKey::RADAR_POINTCLOUD).unwrap().frames_written, emitted);
        assert_eq!(report.total_dropped(), 0);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_busy_device_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = rig(vec![radar(RadarSettings::default())], dir.path());
        let _held = DeviceLock::acquire(
            &dir.path().join("locks"),
            &"synthetic:radar".into(),
        )
        .unwrap();
        let mut recorder = Recorder::new(blueprint.recorder.clone());
        let mut supervisor = AcquisitionSupervisor::new(blueprint, Arc::new(InProcessLauncher));

        let err = supervisor
            .attach(SensorKind::Radar, "synthetic:radar".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Device(DeviceError::Busy { .. })));
        assert_eq!(
            supervisor.connection_state(SensorKind::Radar),
            ConnectionState::Disconnected
        );

        // nothing attached, nothing recorded
        let err = recorder
            .start(&supervisor, &[StreamKey::RADAR_POINTCLOUD], None)
            .unwrap_err();
        assert!(matches!(err, RecorderError::Subscribe { .. }));
        assert!(!dir.path().join("recordings").exists());
        assert_eq!(recorder.state(), SessionState::Idle);
    }

    /// Resolution change mid-session fails the depth stream, keeps earlier frames
    #[tokio::test]
    async fn test_camera_resolution_change_fails_session() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = rig(
            vec![camera(CameraSettings {
                width: 16,
                height: 8,
                fps: 100,
                synthetic_resolution_change: Some(ResolutionChange {
                    after_frames: 3,
                    width: 32,
                    height: 16,
                }),
                ..CameraSettings::default()
            })],
            dir.path(),
        );
        let mut recorder = Recorder::new(blueprint.recorder.clone());
        let mut supervisor = AcquisitionSupervisor::new(blueprint, Arc::new(InProcessLauncher));

        supervisor.attach_configured().await.unwrap();
        let mut session = recorder
            .start(&supervisor, &[StreamKey::CAMERA_DEPTH], None)
            .unwrap();
        supervisor.start_streaming(SensorKind::Camera).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.state() != SessionState::Failed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session did not fail");
        assert_eq!(recorder.state(), SessionState::Failed);

        // display keeps streaming after the recording failed
        supervisor.stop_streaming(SensorKind::Camera).await.unwrap();

        let err = recorder.stop(&mut session).await.unwrap_err();
        match err {
            RecorderError::StreamFailed { stream, source } => {
                assert_eq!(stream, StreamKey::CAMERA_DEPTH);
                assert!(matches!(*source, EncodingError::ResolutionChanged { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        let manifest = read_manifest(session.directory()).unwrap();
        assert_eq!(manifest.state, SessionState::Failed);
        assert_eq!(manifest.failure.as_ref().unwrap().stream, StreamKey::CAMERA_DEPTH);

        let mut reader = DepthReader::open(&session.directory().join(DEPTH_FILE)).unwrap();
        let mut frames = 0;
        while let Some(image) = reader.next_frame().unwrap() {
            assert_eq!((image.width, image.height), (16, 8));
            frames += 1;
        }
        assert!(frames >= 1);
        assert_eq!(
            manifest.stream(StreamKey::CAMERA_DEPTH).unwrap().frames_written,
            frames
        );

        // once stopped, a failed session frees the recorder
        assert!(!recorder.is_busy());
        let next = recorder.start(&supervisor, &[StreamKey::CAMERA_DEPTH], None);
        assert!(next.is_ok());

        supervisor.shutdown().await;
    }
}
