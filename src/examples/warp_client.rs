use std::net::UdpSocket;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use warp_protocol::downlink::{Client, ClientConfig, DownlinkObserver, Transport};
use warp_protocol::streamlet::{MapValue, ValueOutput};
use warp_protocol::structure::Value;
use warp_protocol::uri::Uri;
use warp_protocol::warp::LinkState;

struct UdpTransport(UdpSocket);

impl Transport for UdpTransport {
    fn send(&mut self, _host: &Uri, envelope: &str) -> anyhow::Result<()> {
        self.0.send(envelope.as_bytes())?;
        Ok(())
    }
}

struct Printer;

impl DownlinkObserver for Printer {
    fn did_link(&mut self) {
        println!("🔗 linked");
    }

    fn did_sync(&mut self) {
        println!("✅ synced");
    }

    fn did_set(&mut self, value: &Value, old: &Value) {
        println!("💡 light: {} -> {}", old, value);
    }

    fn did_unlink(&mut self) {
        println!("⚠️  unlinked");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🌀 WARP - Downlink client");

    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.connect("127.0.0.1:9001")?;
    sock.set_read_timeout(Some(Duration::from_millis(200)))?;
    let mut transport = UdpTransport(sock.try_clone()?);

    let config = match std::env::var("WARP_CONFIG") {
        Ok(text) => ClientConfig::from_recon(&text)?,
        Err(_) => ClientConfig::default(),
    };
    let host = Uri::parse("warp://127.0.0.1:9001")?;
    let mut client = Client::new(config);

    let light = client.open_value_downlink(&host, "/house", "light", client.config().downlink.clone())?;
    client.observe(light.id(), Printer)?;

    // derived state: is the light on?
    let is_on = client
        .graph_mut()
        .insert(MapValue::new(|v: &Value| Value::from(*v == Value::from("on"))));
    let sink = client
        .graph_mut()
        .insert(ValueOutput::observed(|v: &Value| println!("   is_on = {}", v)));
    client.graph_mut().bind_input(is_on, 0, light.outlet());
    client.graph_mut().bind_input(sink, 0, is_on);

    let mut buf = vec![0u8; 65536];
    let started = Instant::now();
    let mut toggled = false;

    while started.elapsed() < Duration::from_secs(3) {
        if !toggled && client.state(light.id()) == Some(LinkState::Synced) {
            light.set(&mut client, "on")?;
            toggled = true;
        }
        if let Err(e) = client.flush(&mut transport) {
            eprintln!("❌ {}", e);
            client.connected(&host);
        }
        match sock.recv(&mut buf) {
            Ok(size) => {
                let text = String::from_utf8_lossy(&buf[..size]);
                if let Err(e) = client.receive_text(&host, &text) {
                    eprintln!("❌ Bad envelope: {}", e);
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e.into()),
        }
        client.tick(Instant::now());
    }

    client.close_downlink(light.id())?;
    client.flush(&mut transport)?;
    println!("\n🎉 Done");

    Ok(())
}
