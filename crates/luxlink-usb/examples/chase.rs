//! Channel chase demo
//!
//! Finds the first attached adapter the serial-bridge driver supports,
//! starts continuous output, and walks a single full-on channel across the
//! universe. Run with `RUST_LOG=debug` to watch the driver lifecycle.

use std::time::Duration;

use anyhow::{bail, Result};
use luxlink_usb::{list_transports, DmxDriver, SerialBridgeDriver, Universe, UsbTransport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut driver = SerialBridgeDriver::new();

    let transport = list_transports()?
        .into_iter()
        .find(|t| driver.supports_device(t.descriptor()));
    let Some(transport) = transport else {
        bail!("no supported DMX adapter attached");
    };

    driver.connect(transport).await?;

    let universe = Universe::new().into_shared();
    driver.start_output(universe.clone()).await?;

    let mut channel = 1u16;
    loop {
        {
            let mut universe = universe.write();
            universe.fill(0);
            universe.set(channel, 255);
        }
        channel = if channel == 512 { 1 } else { channel + 1 };
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
}
