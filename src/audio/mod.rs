//! Audio subsystem module

pub mod device;
pub mod feeder;
pub mod output;

pub use device::{list_output_devices, resolve_output_device, AudioDevice, OutputDeviceInfo};
pub use feeder::{AudioFeeder, FeederStats, SlotCompleter, SlotPool, SlotState};
pub use output::{AudioOutput, CpalOutput};
