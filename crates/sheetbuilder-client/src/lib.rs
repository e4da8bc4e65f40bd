#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod client;
mod error;
mod store;

pub use client::{Client, JobOutcome};
pub use error::ClientError;
pub use store::{EntryStatus, JobStore, JsonFileStore, MemoryStore, StoredEntry};
