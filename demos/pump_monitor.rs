//! Pump monitor - runs a pump at a fixed speed and prints its readings.
//!
//! This example demonstrates:
//! - Loading serial settings from JSON
//! - Attaching a link to a serial port
//! - Driving a pump through the register mapping
//! - Watching link events
//!
//! # Running
//!
//! ```text
//! RUST_LOG=rtulink=debug cargo run --example pump_monitor -- '{"port": "/dev/ttyUSB0"}' 20
//! ```

use std::time::Duration;

use rtulink::transport::{open_serial, SerialConfig};
use rtulink::{LinkBuilder, LinkEvent, Pump};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(json) => SerialConfig::from_json(&json)?,
        None => SerialConfig::default(),
    };
    let speed: f64 = match args.next() {
        Some(s) => s.parse()?,
        None => 20.0,
    };

    let stream = open_serial(&config)?;
    let link = LinkBuilder::new().connect(stream);

    // Checksum failures and exceptions are otherwise only visible in logs.
    let mut events = link.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LinkEvent::CrcMismatch { frame, .. } => {
                    println!("dropped corrupted frame {}", hex::encode_upper(&frame))
                }
                LinkEvent::Exception { function, code } => {
                    println!("device exception {:02X} on function {:02X}", code, function)
                }
                LinkEvent::Closed => break,
                _ => {}
            }
        }
    });

    let mut pump = Pump::new(link.clone());
    if !pump.is_ready().await? {
        println!("pump is not ready");
        link.disconnect().await?;
        return Ok(());
    }

    pump.set_speed(speed).await?;
    pump.start().await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                println!(
                    "speed {:>7.2} Hz  voltage {:>7.2} V  current {:>5.2} A  torque {:>5.2}",
                    pump.measured_speed().await?,
                    pump.voltage().await?,
                    pump.current().await?,
                    pump.torque().await?,
                );
            }
        }
    }

    pump.stop().await?;
    link.disconnect().await?;
    Ok(())
}
