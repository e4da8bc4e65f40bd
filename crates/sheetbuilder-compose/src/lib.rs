#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod constants;
mod lru;
mod pack;
mod pdf;
mod worker;

pub use config::ComposeConfig;
pub use pack::{Placement, RotationCache, Sheet};
pub use worker::{run, ComposeRequest};
