//! Two channels on one in-memory bus: one serves `add`, the other calls it
//! and listens for a progress notification.
//!
//! Run with `cargo run -p openpeer --example bus-calculator`.

use std::sync::{Arc, Mutex};

use openpeer::channel::{from_args, Bindings, Channel, ChannelConfig, Endpoint};
use openpeer::transport::MemoryBus;
use serde_json::json;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = MemoryBus::new("calculator");
    let server = Channel::open(Arc::new(bus.join()), ChannelConfig::named("server"))?;
    let client = Channel::open(Arc::new(bus.join()), ChannelConfig::named("client"))?;

    server.register(Bindings::new().function("add", |args| {
        let (a, b): (f64, f64) = from_args(args)?;
        Ok(a + b)
    }))?;
    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = Mutex::new(Some(done_tx));
    let _progress = client.message("progress", move |message| {
        println!("progress: {message}");
        if let Some(tx) = done_tx.lock().ok().and_then(|mut slot| slot.take()) {
            let _ = tx.send(());
        }
    })?;

    client.try_connect(Endpoint::Primary).await?;
    println!("connected: {}", client.state());

    let sum = client.call("add", vec![json!(2), json!(3.5)]).await?;
    println!("add(2, 3.5) = {sum}");

    let rtt = client.ping().await?;
    println!("round trip: {rtt:?}");

    server.push(json!({ "done": 1 }), "progress")?;
    done_rx.await?;

    client.destroy();
    server.destroy();
    Ok(())
}
