//! 🪺 NEST core library.
//!
//! `nest-core` holds the pieces of the hosted-engine setup console that do
//! not touch a terminal: the background image download worker, the
//! answer-file writer consumed by `ovirt-hosted-engine-setup`, the host
//! defaults store, and the HA status query.

pub mod download;
pub mod engine_config;
pub mod errors;
pub mod ha_status;
pub mod logging;
pub mod settings;
pub mod vm_conf;
