/*!
 * Devices wrapping one endpoint.
 *
 * Each device binds a one-field comm to an endpoint named by the caller and
 * reports it under its display name, with no prefix. The display name
 * defaults to the endpoint name.
 */
use std::sync::Arc;

use async_trait::async_trait;

use tangoflow_core::types::{PipeData, Value};

use crate::comm::{Comm, CommSchema};
use crate::connector::ExplicitConnector;
use crate::context::Context;
use crate::device::{Configurable, Descriptors, Device, Readable, Readings};
use crate::error::{DeviceError, Result};
use crate::signal::{Signal, SignalType};

fn single_comm(
    ctx: &Context,
    schema: &str,
    field: &str,
    signal_type: SignalType,
    device: &str,
    endpoint: &str,
) -> Result<Arc<Comm>> {
    let schema = CommSchema::builder(schema).field(field, signal_type).build()?;
    let connector = Arc::new(ExplicitConnector::new().map(field, endpoint));
    Comm::with_connector(ctx, schema, device, connector)
}

fn single_device(comm: Arc<Comm>, endpoint: &str, name: Option<&str>) -> Device {
    Device::new(comm, Some(name.unwrap_or(endpoint))).with_prefix("")
}

macro_rules! delegate_readable {
    ($ty:ty) => {
        #[async_trait]
        impl Readable for $ty {
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
    };
}

/// Reads one attribute
#[derive(Debug, Clone)]
pub struct SingleAttributeDevice {
    device: Device,
    attribute: Arc<Signal>,
}

impl SingleAttributeDevice {
    /// Bind `attribute` of `device`, reported under `name` or the attribute name
    pub fn new(ctx: &Context, device: &str, attribute: &str, name: Option<&str>) -> Result<Self> {
        let comm = single_comm(
            ctx,
            "SingleAttributeComm",
            "attribute",
            SignalType::ATTR_RW,
            device,
            attribute,
        )?;
        let signal = comm.field("attribute")?;
        let key = name.unwrap_or(attribute).to_string();
        let device = single_device(comm, attribute, name).with_read_signal(key, Arc::clone(&signal))?;
        Ok(Self {
            device,
            attribute: signal,
        })
    }

    /// The attribute signal
    pub fn signal(&self) -> &Arc<Signal> {
        &self.attribute
    }
}

delegate_readable!(SingleAttributeDevice);

#[async_trait]
impl Configurable for SingleAttributeDevice {
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

/// Runs one command
///
/// Commands are not readable, so `read` and `describe` report nothing.
#[derive(Debug, Clone)]
pub struct SingleCommandDevice {
    device: Device,
    command: Arc<Signal>,
}

impl SingleCommandDevice {
    /// Bind `command` of `device`
    pub fn new(ctx: &Context, device: &str, command: &str, name: Option<&str>) -> Result<Self> {
        let comm = single_comm(
            ctx,
            "SingleCommandComm",
            "command",
            SignalType::COMMAND,
            device,
            command,
        )?;
        Ok(Self {
            command: comm.field("command")?,
            device: single_device(comm, command, name),
        })
    }

    /// The command signal
    pub fn signal(&self) -> &Arc<Signal> {
        &self.command
    }

    /// Run the command
    pub async fn execute(&self, arg: Option<Value>) -> Result<Option<Value>> {
        self.command.execute(arg).await
    }
}

delegate_readable!(SingleCommandDevice);

/// Configures one pipe
///
/// The pipe is the whole configuration group, and `configure` replaces its
/// content.
#[derive(Debug, Clone)]
pub struct SinglePipeDevice {
    device: Device,
    pipe: Arc<Signal>,
}

impl SinglePipeDevice {
    /// Bind `pipe` of `device` as the configuration group
    ///
    /// The configuration key is `name`, or the pipe name when none is given.
    pub fn new(ctx: &Context, device: &str, pipe: &str, name: Option<&str>) -> Result<Self> {
        let comm = single_comm(ctx, "SinglePipeComm", "pipe", SignalType::PIPE_RW, device, pipe)?;
        let signal = comm.field("pipe")?;
        let key = name.unwrap_or(pipe).to_string();
        let device = single_device(comm, pipe, name).with_conf_signal(key, Arc::clone(&signal))?;
        Ok(Self {
            device,
            pipe: signal,
        })
    }

    /// The pipe signal
    pub fn signal(&self) -> &Arc<Signal> {
        &self.pipe
    }

    /// Write the pipe; returns the configuration before and after
    pub async fn configure(&self, data: PipeData) -> Result<(Readings, Readings)> {
        let old = self.device.read_configuration().await?;
        self.pipe.put(Value::Pipe(data)).await?;
        let new = self.device.read_configuration().await?;
        Ok((old, new))
    }
}

delegate_readable!(SinglePipeDevice);

#[async_trait]
impl Configurable for SinglePipeDevice {
    async fn read_configuration(&self) -> Result<Readings> {
        self.device.read_configuration().await
    }

    async fn describe_configuration(&self) -> Result<Descriptors> {
        self.device.describe_configuration().await
    }

    /// Takes exactly one [`Value::Pipe`]
    async fn configure(&self, args: Vec<Value>) -> Result<(Readings, Readings)> {
        let count = args.len();
        let mut args = args.into_iter();
        match (args.next(), args.next()) {
            (Some(Value::Pipe(data)), None) => SinglePipeDevice::configure(self, data).await,
            (Some(other), None) => Err(DeviceError::InvalidValueType {
                name: self.device.name().to_string(),
                expected: "pipe".to_string(),
                actual: other.type_name().to_string(),
            }),
            _ => Err(DeviceError::WrongNumberOfArguments(count)),
        }
    }
}
