use tokio::sync::oneshot;

use config::{Config, SettingsOutcome, SettingsRequest};

pub mod config;
pub mod controller;
pub mod dmx;
pub mod ota;
pub mod output;
pub mod topology;
pub mod transport;
pub mod watchdog;

pub mod prelude {
    pub use crate::{
        config::*, controller::*, dmx::*, ota::*, output::*, topology::*, transport::*,
        watchdog::*,
    };
    pub use crate::ControlMessage;
}

/// Messages the settings service sends into the control loop. All
/// settings reads and writes go through this channel, so the loop's
/// single thread is the only thing ever touching the live config.
#[derive(Debug)]
pub enum ControlMessage {
    /// Apply a (possibly partial) settings change and report how it
    /// went.
    UpdateSettings {
        request: SettingsRequest,
        respond_to: oneshot::Sender<SettingsOutcome>,
    },
    /// Read the settings currently in effect.
    ReadSettings { respond_to: oneshot::Sender<Config> },
}
