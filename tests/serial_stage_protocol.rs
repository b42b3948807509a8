//! Serial stage protocol tests against a scripted motion controller.
//!
//! The controller side runs on an in-memory pipe. Hardware tests need a real
//! controller on the configured port:
//! cargo test --test serial_stage_protocol --features hardware_tests -- --ignored --nocapture

use lightfield_rig::{
    config::RigConfig,
    hardware::{MockCamera, MotionStage, SerialStage},
    sweep::CaptureOrchestrator,
};
use tempfile::TempDir;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// Answers every newline-terminated command with `ready`, returns the commands seen.
fn spawn_controller(stream: DuplexStream) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        let mut commands = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            commands.push(line);
            if writer.write_all(b"ready\r\n").await.is_err() {
                break;
            }
        }
        commands
    })
}

#[tokio::test]
async fn test_move_then_wait_ready() {
    let (host, controller) = duplex(256);
    let handle = spawn_controller(controller);
    let mut stage = SerialStage::new(host).with_terminator("\n");

    stage.move_to(500).await.unwrap();
    assert_eq!(stage.wait_ready().await.unwrap(), b"ready".to_vec());
    stage.move_to(1000).await.unwrap();
    assert_eq!(stage.wait_ready().await.unwrap(), b"ready".to_vec());

    drop(stage);
    assert_eq!(handle.await.unwrap(), vec!["m500", "m1000"]);
}

#[tokio::test]
async fn test_sweep_over_serial_stage() {
    let output = TempDir::new().unwrap();
    let mut config = RigConfig::default();
    config.sweep.n_views = 3;
    config.sweep.n_exposures = 2;
    config.sweep.output_path = output.path().to_path_buf();
    config.stage.command_terminator = "\n".to_string();

    let (host, controller) = duplex(256);
    let handle = spawn_controller(controller);
    let stage = SerialStage::new(host).with_terminator(config.stage.command_terminator.clone());
    let camera = MockCamera::new();

    let mut orchestrator = CaptureOrchestrator::from_config(&config, stage, camera.clone()).unwrap();
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.files.len(), 6);

    let (stage, _camera) = orchestrator.into_parts();
    drop(stage.into_inner());
    assert_eq!(handle.await.unwrap(), vec!["m0", "m500", "m1000", "m0"]);
}

#[cfg(all(feature = "serial", feature = "hardware_tests"))]
#[tokio::test]
#[ignore] // Hardware-only test
async fn hardware_stage_round_trip() {
    let config = RigConfig::load().unwrap();
    let mut stage = SerialStage::from_config(&config.stage).unwrap();

    for coordinate in [0, 500, 1000, 0] {
        println!("Moving to {coordinate}");
        stage.move_to(coordinate).await.unwrap();
        let status = stage.wait_ready().await.unwrap();
        println!("  controller: {}", String::from_utf8_lossy(&status));
    }
}
