use std::collections::{BTreeMap, BTreeSet};
use std::net::{SocketAddr, UdpSocket};

use tracing_subscriber::EnvFilter;
use warp_protocol::structure::Value;
use warp_protocol::warp::{Envelope, EnvelopeKind};

type Lane = (String, String);

/// Value lanes keyed by node and lane, with their linked peers.
#[derive(Default)]
struct Lanes {
    state: BTreeMap<Lane, Value>,
    uplinks: BTreeMap<Lane, BTreeSet<SocketAddr>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🌀 WARP - Lane server");
    println!("📡 Listening on 127.0.0.1:9001...\n");

    let sock = UdpSocket::bind("127.0.0.1:9001")?;
    let mut buf = vec![0u8; 65536];
    let mut lanes = Lanes::default();

    loop {
        let (size, src) = match sock.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                eprintln!("❌ Recv error: {}", e);
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buf[..size]);
        let envelope = match Envelope::parse(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                eprintln!("❌ Bad envelope from {}: {}", src, e);
                continue;
            }
        };
        println!("📥 {} {}", src, envelope);

        for (dest, reply) in handle(&mut lanes, src, envelope) {
            sock.send_to(reply.to_recon().as_bytes(), dest)?;
            println!("📤 {} {}", dest, reply);
        }
    }
}

fn handle(lanes: &mut Lanes, src: SocketAddr, envelope: Envelope) -> Vec<(SocketAddr, Envelope)> {
    if envelope.kind() == EnvelopeKind::Auth {
        return vec![(src, Envelope::authed(Value::Absent))];
    }
    let (Some(node), Some(lane)) = (envelope.node(), envelope.lane()) else {
        return Vec::new();
    };
    let key = (node.to_string(), lane.to_string());
    match envelope.kind() {
        EnvelopeKind::Link | EnvelopeKind::Sync => {
            lanes.uplinks.entry(key.clone()).or_default().insert(src);
            let mut replies = vec![(src, Envelope::linked(node, lane))];
            if envelope.kind() == EnvelopeKind::Sync {
                let current = lanes.state.get(&key).cloned().unwrap_or_default();
                replies.push((src, Envelope::event(node, lane, current)));
                replies.push((src, Envelope::synced(node, lane)));
            }
            replies
        }
        EnvelopeKind::Command => {
            let body = envelope.body().clone();
            lanes.state.insert(key.clone(), body.clone());
            lanes
                .uplinks
                .get(&key)
                .into_iter()
                .flatten()
                .map(|peer| (*peer, Envelope::event(node, lane, body.clone())))
                .collect()
        }
        EnvelopeKind::Unlink => {
            if let Some(peers) = lanes.uplinks.get_mut(&key) {
                peers.remove(&src);
            }
            vec![(src, Envelope::unlinked(node, lane))]
        }
        _ => Vec::new(),
    }
}
