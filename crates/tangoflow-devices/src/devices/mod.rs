/*!
 * Ready-made devices.
 */

pub mod motor;
pub mod single;

pub use motor::{Motor, MotorComm, MOTOR_SCHEMA};
pub use single::{SingleAttributeDevice, SingleCommandDevice, SinglePipeDevice};
