//! Run one light-field sweep with the settings in `lightfield.toml`.
//!
//! The configuration file can be moved with `LIGHTFIELD_CONFIG`; any value can
//! be overridden with `LIGHTFIELD_<SECTION>__<KEY>`. Set `simulate = true` to
//! run against simulated devices.
use anyhow::Context;
use lightfield_rig::config::{PersistenceMode, RigConfig};
use lightfield_rig::hardware::{CameraBackend, MockCamera, MockStage, MotionStage};
use lightfield_rig::inventory::camera_inventory;
use lightfield_rig::sweep::{CaptureOrchestrator, SweepReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RigConfig::load().context("Failed to load rig configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("{} starting", config.application.name);

    let report = if config.simulate {
        info!("Using simulated stage and camera");
        sweep(&config, MockStage::new(), MockCamera::new()).await?
    } else {
        sweep_hardware(&config).await?
    };

    println!("Sweep complete: {} images", report.files.len());
    println!("Stage path: {:?}", report.commanded_positions);
    for file in &report.files {
        println!(
            "  view {:03} step {} ({} s): {}",
            file.position, file.exposure_step, file.shutter_speed, file.stored
        );
    }

    Ok(())
}

/// Run the sweep, then list the card when images were left on the camera.
async fn sweep<M, C>(config: &RigConfig, stage: M, camera: C) -> anyhow::Result<SweepReport>
where
    M: MotionStage,
    C: CameraBackend,
{
    let mut orchestrator = CaptureOrchestrator::from_config(config, stage, camera)
        .context("Invalid sweep configuration")?;
    let report = orchestrator
        .run()
        .await
        .context("Light-field sweep failed")?;

    if config.camera.persistence == PersistenceMode::OnDevice {
        let (_stage, mut camera) = orchestrator.into_parts();
        let files = camera_inventory(
            &mut camera,
            &config.timeouts.connect_policy(),
            &config.camera.device_folder,
        )
        .await
        .context("Failed to list camera storage")?;

        println!("Camera storage ({} files):", files.len());
        for file in files {
            println!("  {file}");
        }
    }

    Ok(report)
}

#[cfg(all(feature = "serial", feature = "gphoto"))]
async fn sweep_hardware(config: &RigConfig) -> anyhow::Result<SweepReport> {
    use lightfield_rig::hardware::{GphotoCamera, SerialStage};

    // creating the context does not talk to the camera
    let camera = GphotoCamera::new().context("Failed to create libgphoto2 context")?;
    if config.camera.persistence == PersistenceMode::OnDevice && !camera.can_preassign_names() {
        anyhow::bail!(
            "persistence = \"on_device\" is not available: the libgphoto2 backend cannot pre-assign file names; use \"host_transfer\""
        );
    }

    let stage = SerialStage::from_config(&config.stage)
        .with_context(|| format!("Failed to open stage port {}", config.stage.port))?;

    sweep(config, stage, camera).await
}

#[cfg(not(all(feature = "serial", feature = "gphoto")))]
async fn sweep_hardware(_config: &RigConfig) -> anyhow::Result<SweepReport> {
    let missing = if cfg!(feature = "serial") { "gphoto" } else { "serial" };
    Err(lightfield_rig::RigError::FeatureNotEnabled(missing.to_string())).context(
        "Hardware sweep needs the serial stage and the libgphoto2 camera; set simulate = true to run without them",
    )
}
