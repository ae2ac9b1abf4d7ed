use anyhow::Error;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

use faderboard::prelude::*;

/// Control loop period. 40 Hz leaves headroom over the typical Art-Net
/// source rate while keeping the failover judgment fresh.
const TICK: Duration = Duration::from_millis(25);

const SETTINGS_PATH: &str = "settings.ron";

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    info!("Starting deployment config...");
    let deployment = match Deployment::load() {
        Ok(deployment) => deployment,
        Err(e) => {
            warn!("no usable deployment.ron ({}), using the five-board default", e);
            Deployment::five_board_default()
        }
    };

    // The topology has to cover the strip exactly; anything else is a
    // wiring description error, not something to limp through.
    let map = deployment.topology.resolve(deployment.led_count)?;

    info!("Starting settings store...");
    let settings = ConfigStore::load(FileStore::open(SETTINGS_PATH));

    info!("Starting Art-Net listener on {}...", deployment.bind_addr);
    let source = ArtnetSource::bind(&deployment.bind_addr, deployment.universe)?;

    // The settings service (web UI glue) holds the sender side; until
    // one is wired up this keeps the channel open.
    let (_control_tx, control_rx) = mpsc::channel(16);

    info!("Starting output...");
    #[cfg(not(feature = "pi"))]
    let output = LogOutput::new();
    #[cfg(feature = "pi")]
    let output = SpiOutput::init()?;

    let mut controller = Controller::new(settings, map, source, output, NoopOta, control_rx);
    controller.start();

    let mut interval = time::interval(TICK);
    loop {
        interval.tick().await;
        controller.tick(std::time::Instant::now());
    }
}
