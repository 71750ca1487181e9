pub mod anchor;
pub mod canonical;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod provenance;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_utils;
