//! Core library for the CAP file-signaling controller.
//!
//! CAP, the diffractometer control application, exposes no API beyond a
//! shared directory: a command is written into a fixed control-input file and
//! CAP answers by creating sentinel files (`.busy`, `.done`, `.error`,
//! `.stop`, `.closed`) next to it. This crate implements that exchange:
//!
//! - [`command`] writes the control-input file
//! - [`watcher`] polls for sentinels until one resolves the exchange
//! - [`journal`] keeps the append-only exchange log
//! - [`cleaner`] empties the directory for the next command
//! - [`controller`] sequences all of the above
//!
//! [`commands`] and [`strategy`] sit on top as callers that format CAP
//! commands and stage strategy run files.

pub mod cleaner;
pub mod command;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod journal;
pub mod response;
pub mod sentinel;
pub mod strategy;
pub mod watcher;

pub use command::Command;
pub use commands::{Axis, CapCommand, ScanParams};
pub use config::{CapConfig, CommandTable, ConfigError};
pub use controller::{Controller, ExchangeReport};
pub use error::{CapError, CapResult};
pub use response::OutcomeCode;
