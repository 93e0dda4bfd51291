//! Configuration module for the voice session console.
//!
//! Provides CLI argument parsing, validation and the TTS voice catalogue.

#[allow(clippy::module_inception)]
mod config;
pub mod voices;

pub use config::{AppConfig, InterruptMode};
