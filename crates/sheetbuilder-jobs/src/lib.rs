#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod broker;
mod registry;

pub use broker::Broker;
pub use registry::{Outcome, Registry, RegistryConfig};
