use std::sync::{Arc, Mutex};
use std::time::Duration;

use tangoflow_core::config::{ConfigBuilder, ENV_PREFIX};
use tangoflow_core::logging;
use tangoflow_devices::prelude::*;

use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults, then an optional tangoflow.toml, then TANGOFLOW__* variables
    let mut builder = ConfigBuilder::new().with_environment_prefix(ENV_PREFIX);
    if std::path::Path::new("tangoflow.toml").exists() {
        builder = builder.with_config_file("tangoflow.toml");
    }
    let config = builder.build()?;
    logging::init_from_config(&config.logging)?;

    let ctx = Context::new(config);
    let motor = ctx
        .scoped(ProxyKind::Simulated, |ctx| Motor::new(ctx, SIM_DEVICE_NAME, None))
        .await?;
    info!(motor = %motor.name(), "Motor connected");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let monitor = {
        let seen = Arc::clone(&seen);
        motor
            .comm()
            .position
            .monitor_value(move |value| {
                if let Ok(mut seen) = seen.lock() {
                    seen.push(value);
                }
            })
            .await?
    };

    let (old, new) = motor
        .configure(vec![Value::from("velocity"), Value::Float(20.0)])
        .await?;
    info!(?old, ?new, "Velocity configured");

    motor.check_value(12.0).await?;
    motor.set(Value::Float(12.0), Some(Duration::from_secs(5))).wait().await?;

    for (key, reading) in motor.read().await? {
        info!(%key, value = %reading.value, timestamp = reading.timestamp, "Reading");
    }
    for (key, descriptor) in motor.describe().await? {
        info!(%key, source = %descriptor.source, dtype = descriptor.dtype.as_str(), "Descriptor");
    }

    tokio::time::sleep(ctx.config().simulation.poll_interval() * 2).await;
    monitor.close().await?;
    info!(updates = seen.lock().map(|s| s.len()).unwrap_or(0), "Position updates observed");

    ctx.shutdown()?;
    Ok(())
}
