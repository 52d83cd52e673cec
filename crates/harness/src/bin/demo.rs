//! Run syr2k and the Hermitian norms through every execution target
//!
//! Usage: `demo [config.toml]`. Without a file the configuration comes from
//! the `TILEGRID_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use num_complex::Complex64;
use tilegrid_core::{Engine, EngineConfig, Target, Uplo};
use tilegrid_harness::{NormCase, Syr2kCase};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilegrid_core=info,tilegrid_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            tracing::info!("Loading configuration from {:?}", path);
            EngineConfig::from_file(&path)?
        }
        None => EngineConfig::from_env(),
    };
    let num_devices = config.devices.num_devices;
    let engine = Engine::new(config)?;
    for device in engine.devices().iter() {
        tracing::info!(device = device.device_id, backend = ?device.backend(), "device ready");
    }

    let targets: Vec<Target> = Target::ALL
        .into_iter()
        .filter(|&t| t != Target::Devices || num_devices > 0)
        .collect();

    println!("=== tilegrid syr2k ===\n");
    println!("{:<12} {:<6} {:<8} {:>12} {:>10}", "target", "uplo", "type", "max error", "ms");
    for uplo in [Uplo::Lower, Uplo::Upper] {
        let case = Syr2kCase::new(300, 96, 64).uplo(uplo).devices(num_devices);
        for &target in &targets {
            let start = Instant::now();
            let d = case.verify::<f64>(&engine, target)?;
            let ms = start.elapsed().as_secs_f64() * 1e3;
            println!(
                "{:<12} {:<6} {:<8} {:>12.3e} {:>10.2}",
                target.to_string(),
                format!("{:?}", uplo),
                "f64",
                d.max_error,
                ms
            );

            let start = Instant::now();
            let z = case.verify::<Complex64>(&engine, target)?;
            let ms = start.elapsed().as_secs_f64() * 1e3;
            println!(
                "{:<12} {:<6} {:<8} {:>12.3e} {:>10.2}",
                target.to_string(),
                format!("{:?}", uplo),
                "c64",
                z.max_error,
                ms
            );
        }
    }

    println!("\n=== tilegrid henorm ===\n");
    let case = NormCase::new(300, 64).hermitian(true).devices(num_devices);
    for &target in &targets {
        for (kind, rel) in case.run::<Complex64>(&engine, target)? {
            println!("{:<12} {:<6} relative error {:.3e}", target.to_string(), format!("{:?}", kind), rel);
        }
    }

    Ok(())
}
