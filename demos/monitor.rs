//! Connects to a soundbar, prints what it reports and follows state changes.
//!
//! Usage: `cargo run --example monitor -- <host> [port]`

use futures_util::StreamExt;
use lg_soundbar::{SoundbarClient, SoundbarConfig, View, DEFAULT_PORT};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or("usage: monitor <host> [port]")?;
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let config = SoundbarConfig::new(host)
        .with_port(port)
        .with_poll_interval(Duration::from_secs(10));
    let client = SoundbarClient::new(config);
    let changes = client.subscribe_state().into_stream();

    client.connect().await?;

    let product = client
        .query_and_wait(View::Product, Duration::from_secs(3))
        .await?;
    println!("Product: {:?}", product.data);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let state = client.state();
    println!(
        "Volume {:?} (muted {:?}), source {:?}, sound mode {:?}",
        state.volume(),
        state.muted(),
        state.source(),
        state.sound_mode()
    );
    println!("Sources: {:?}", state.available_sources());
    println!("Sound modes: {:?}", state.available_sound_modes());

    let mut changes = Box::pin(changes);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.next() => match change {
                Some(change) => println!("{}: {:?}", change.msg, change.changed),
                None => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}
