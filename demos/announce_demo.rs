//! Two announcement receivers on an in-process gossip mesh.
//!
//! An indexer receives a direct announcement and republishes it; a
//! second indexer picks the relay up from the topic with the original
//! publisher preserved. Run with `RUST_LOG=info` to watch the pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use multihash_codetable::{Code, MultihashDigest};
use tokio::time::timeout;

use cidcast::addr::strings_to_multiaddrs;
use cidcast::mem::MemNet;
use cidcast::{Cid, PeerId, Receiver, ReceiverOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let net = MemNet::new();
    let topic = "/indexer/announce";

    // The gateway indexer accepts direct announcements and relays them.
    let gateway = Receiver::new(
        Some(Arc::new(net.host(PeerId::random()))),
        topic,
        ReceiverOptions {
            filter_ips: true,
            resend: true,
            ..ReceiverOptions::default()
        },
    )
    .await?;

    // A second indexer only listens on the topic.
    let follower = Receiver::new(
        Some(Arc::new(net.host(PeerId::random()))),
        topic,
        ReceiverOptions::default(),
    )
    .await?;

    println!("receivers joined topic {:?}", gateway.topic_name().unwrap());

    // A publisher announces a new advertisement directly to the gateway,
    // listing one public and one private address.
    let publisher = PeerId::random();
    let ad_cid = Cid::new_v1(0x55, Code::Sha2_256.digest(b"advertisement-0001"));
    let addrs = strings_to_multiaddrs(&["/ip4/11.0.0.7/tcp/4001", "/ip4/192.168.1.7/tcp/4001"])?;
    gateway.direct(ad_cid, publisher, addrs).await?;

    let local = gateway.next().await?;
    println!(
        "gateway delivered {} from {} via {:?} (private addr filtered)",
        local.cid, local.peer_id, local.addrs
    );

    let relayed = timeout(Duration::from_secs(2), follower.next()).await??;
    println!(
        "follower received relay of {} with origin {} preserved",
        relayed.cid, relayed.peer_id
    );

    gateway.close().await?;
    follower.close().await?;
    Ok(())
}
