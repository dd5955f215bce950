//! Demo binary: runs the synchronized driver against simulated triggered
//! cameras, standing in for the external trigger source and SDK layer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cam_sync::config::SyncConfig;
use cam_sync::driver::{CameraEndpoint, SynchronizedCameraDriver};
use cam_sync::mock::{MockCameraConfig, MockTriggeredCamera};

#[derive(Parser, Debug)]
#[command(name = "cam_sync", about = "Exposure-synchronized camera driver demo")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Trigger pulse rate in Hz.
    #[arg(long, default_value_t = 10.0)]
    trigger_hz: f64,

    /// Number of trigger pulses to run before exiting (0 = run forever).
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.application.log_level.clone())),
        )
        .init();
    info!(name = %config.application.name, cameras = config.cameras.len(), "starting");

    let mut cameras = Vec::new();
    let mut endpoints = Vec::new();
    for cam in &config.cameras {
        let (camera, frames) =
            MockTriggeredCamera::connect(cam.identity(), MockCameraConfig::default());
        endpoints.push(CameraEndpoint {
            control: camera.clone(),
            frames,
        });
        cameras.push(camera);
    }

    let driver = SynchronizedCameraDriver::launch(&config, endpoints)?;

    // Log the annotated output stream.
    let mut output = driver.subscribe();
    let consumer = tokio::spawn(async move {
        while let Ok(annotated) = output.recv().await {
            if let Some(sample) = &annotated.sample {
                info!(
                    camera = %annotated.camera.name,
                    frame = sample.frame_id,
                    exposure_us = sample.exposure_time_us,
                    gain_db = sample.gain_db,
                    brightness = sample.brightness,
                    "frame"
                );
            }
        }
    });

    // External trigger pulse: all cameras expose together.
    let period = Duration::from_secs_f64(1.0 / args.trigger_hz.max(0.001));
    let mut pulses = interval(period);
    let mut fired: u64 = 0;
    loop {
        tokio::select! {
            _ = pulses.tick() => {
                // All cameras expose on the same pulse.
                futures::future::try_join_all(cameras.iter().map(|c| c.trigger())).await?;
                fired += 1;
                if args.frames > 0 && fired >= args.frames {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    driver.shutdown().await;
    consumer.abort();
    Ok(())
}
