/*!
 * Motor device.
 *
 * Reads `position`, configures `velocity` and moves by writing the position
 * setpoint and waiting for `State` to leave `MOVING`.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tangoflow_core::error::Error as CoreError;
use tangoflow_core::types::{DevState, Value};
use tangoflow_core::utils::with_timeout;

use crate::comm::{Comm, CommSchema};
use crate::connector::{Connector, ExplicitConnector};
use crate::context::Context;
use crate::device::{Configurable, Descriptors, Device, Movable, Readable, Readings};
use crate::error::{DeviceError, Result};
use crate::monitor::Monitor;
use crate::signal::{Signal, SignalType};
use crate::status::Status;

/// Schema name of the motor comm
pub const MOTOR_SCHEMA: &str = "TangoMotorComm";

/// Schema with `position`, `velocity`, `state` and `stop`
pub fn motor_schema() -> Result<Arc<CommSchema>> {
    CommSchema::builder(MOTOR_SCHEMA)
        .field("position", SignalType::ATTR_RW)
        .field("velocity", SignalType::ATTR_RW)
        .field("state", SignalType::ATTR_RW)
        .field("stop", SignalType::COMMAND)
        .build()
}

/// Connector binding the motor fields to their capitalised endpoints
pub fn motor_connector() -> Arc<dyn Connector> {
    Arc::new(
        ExplicitConnector::new()
            .map("position", "Position")
            .map("velocity", "Velocity")
            .map("state", "State")
            .map("stop", "Stop"),
    )
}

/// Typed view of a motor comm
#[derive(Debug, Clone)]
pub struct MotorComm {
    comm: Arc<Comm>,
    /// `Position` attribute
    pub position: Arc<Signal>,
    /// `Velocity` attribute
    pub velocity: Arc<Signal>,
    /// `State` attribute
    pub state: Arc<Signal>,
    /// `Stop` command
    pub stop: Arc<Signal>,
}

impl MotorComm {
    /// Build the comm for `device`, registering the motor connector on first use
    pub fn new(ctx: &Context, device: &str) -> Result<Self> {
        if ctx.connectors().register_if_absent(MOTOR_SCHEMA, motor_connector())? {
            debug!(schema = MOTOR_SCHEMA, "Registered motor connector");
        }
        let comm = Comm::new(ctx, motor_schema()?, device)?;
        Ok(Self {
            position: comm.field("position")?,
            velocity: comm.field("velocity")?,
            state: comm.field("state")?,
            stop: comm.field("stop")?,
            comm,
        })
    }

    /// Untyped comm
    pub fn comm(&self) -> &Arc<Comm> {
        &self.comm
    }
}

/// A motor that reads its position and moves to a setpoint
#[derive(Debug, Clone)]
pub struct Motor {
    device: Device,
    comm: MotorComm,
    timeout: Option<Duration>,
}

impl Motor {
    /// Build a motor for `device`
    ///
    /// Inside a connect scope the motor is connected when the scope finishes.
    pub fn new(ctx: &Context, device: &str, name: Option<&str>) -> Result<Self> {
        let comm = MotorComm::new(ctx, device)?;
        let device = Device::new(Arc::clone(comm.comm()), name)
            .with_read_signal("position", Arc::clone(&comm.position))?
            .with_conf_signal("velocity", Arc::clone(&comm.velocity))?;
        Ok(Self {
            device,
            comm,
            timeout: ctx.config().motion.default_timeout(),
        })
    }

    /// Typed comm
    pub fn comm(&self) -> &MotorComm {
        &self.comm
    }

    /// Generic device view
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Timeout used when `set` is given none
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Replace the timeout used when `set` is given none
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Check a setpoint against the position limits
    pub async fn check_value(&self, value: f64) -> Result<()> {
        self.comm.position.attribute_config().await?.check(value)
    }

    /// Run the `Stop` command
    pub async fn stop(&self) -> Result<()> {
        self.comm.stop.execute(None).await?;
        Ok(())
    }
}

async fn write_and_wait(
    position: &Signal,
    monitor: &Monitor,
    states: &mut mpsc::UnboundedReceiver<Value>,
    value: Value,
) -> Result<()> {
    position.put(value).await?;
    monitor.subscribe().await?;

    while let Some(value) = states.recv().await {
        if value != Value::State(DevState::Moving) {
            return Ok(());
        }
    }
    Err(CoreError::runtime("State monitor stopped delivering values").into())
}

#[async_trait]
impl Readable for Motor {
    fn name(&self) -> &str {
        self.device.name()
    }

    async fn read(&self) -> Result<Readings> {
        self.device.read().await
    }

    async fn describe(&self) -> Result<Descriptors> {
        self.device.describe().await
    }
}

#[async_trait]
impl Configurable for Motor {
    async fn read_configuration(&self) -> Result<Readings> {
        self.device.read_configuration().await
    }

    async fn describe_configuration(&self) -> Result<Descriptors> {
        self.device.describe_configuration().await
    }

    async fn configure(&self, args: Vec<Value>) -> Result<(Readings, Readings)> {
        self.device.configure(args).await
    }
}

impl Movable for Motor {
    /// Move to `value`
    ///
    /// The returned status completes once `State` is no longer `MOVING`. The
    /// timeout, falling back to [`Motor::timeout`], covers the write and the
    /// wait. The state monitor is closed however the move ends.
    fn set(&self, value: Value, timeout: Option<Duration>) -> Status {
        let timeout = timeout.or(self.timeout);
        let position = Arc::clone(&self.comm.position);
        let state = Arc::clone(&self.comm.state);
        let name = self.device.name().to_string();

        Status::spawn(move |mut cancellation| async move {
            debug!(motor = %name, setpoint = %value, ?timeout, "Moving");
            let (tx, mut states) = mpsc::unbounded_channel();
            let monitor = state.value_monitor(move |value| {
                let _ = tx.send(value);
            })?;
            let outcome = {
                let motion = write_and_wait(&position, &monitor, &mut states, value);
                let bounded = async {
                    match timeout {
                        Some(limit) => with_timeout(limit, motion).await,
                        None => motion.await,
                    }
                };
                tokio::select! {
                    result = bounded => result,
                    _ = cancellation.cancelled() => {
                        Err(DeviceError::Cancelled(format!("move of {}", name)))
                    }
                }
            };

            if let Err(e) = monitor.close().await {
                warn!(motor = %name, error = %e, "Failed to close state monitor");
            }
            debug!(motor = %name, ok = outcome.is_ok(), "Move finished");
            outcome
        })
    }
}
