//! A minimal single-node broker loop over the session engine.
//!
//! Accepts TCP connections on port 1883, answers the QoS handshakes, and
//! tracks subscriptions per session. There is no topic routing here; the
//! point is the lifecycle: accept -> start -> handler loop -> stop ->
//! registry removal.

use std::sync::Arc;

use mqtt3::broker::{AllowAll, EngineConfig, Registry, Session};
use mqtt3::protocol::{
    ConnAckPacket, ConnectReturnCode, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket,
    SubAckPacket, UnsubAckPacket,
};
use mqtt3::{Packet, QoS};
use tracing::{info, warn};

const LISTENER_ID: &str = "tcp-1883";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mqtt3=debug".into()),
        )
        .init();

    let registry = Arc::new(Registry::new());
    let listener = tokio::net::TcpListener::bind("0.0.0.0:1883").await?;
    info!("listening on 0.0.0.0:1883");

    loop {
        let (stream, addr) = listener.accept().await?;
        let session = Session::new(stream, EngineConfig::default());
        session.start().await;

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let reg = Arc::clone(&registry);
            let result = session
                .read(move |session, packet| {
                    let reg = Arc::clone(&reg);
                    async move { handle(&session, packet, &reg).await }
                })
                .await;

            if let Err(e) = result {
                warn!(addr = %addr, error = %e, "session ended with error");
                session.stop().await;
            }
            registry.delete(&session.client_id()).await;
            info!(client_id = %session.client_id(), "session removed");
        });
    }
}

async fn handle(
    session: &Arc<Session>,
    packet: Packet,
    registry: &Arc<Registry>,
) -> mqtt3::Result<()> {
    match packet {
        Packet::Connect(connect) => {
            session.identify(LISTENER_ID, &connect, Arc::new(AllowAll));
            if let Some(previous) = registry.get(&session.client_id()).await {
                previous.stop().await;
            }
            registry.add(Arc::clone(session)).await;
            session.write_packet(&Packet::ConnAck(ConnAckPacket::new(
                false,
                ConnectReturnCode::Accepted,
            )))?;
        }
        Packet::PingReq => {
            session.write_packet(&Packet::PingResp)?;
        }
        Packet::Subscribe(subscribe) => {
            let mut return_codes = Vec::with_capacity(subscribe.filters.len());
            for (filter, qos) in &subscribe.filters {
                session.note_subscription(filter, *qos);
                return_codes.push(*qos as u8);
            }
            session.write_packet(&Packet::SubAck(SubAckPacket {
                packet_id: subscribe.packet_id,
                return_codes,
            }))?;
        }
        Packet::Unsubscribe(unsubscribe) => {
            for filter in &unsubscribe.filters {
                session.forget_subscription(filter);
            }
            session.write_packet(&Packet::UnsubAck(UnsubAckPacket::new(
                unsubscribe.packet_id,
            )))?;
        }
        Packet::Publish(publish) => match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(id)) => {
                session.write_packet(&Packet::PubAck(PubAckPacket::new(id)))?;
            }
            (QoS::ExactlyOnce, Some(id)) => {
                session.write_packet(&Packet::PubRec(PubRecPacket::new(id)))?;
            }
            _ => {}
        },
        Packet::PubRel(pubrel) => {
            session.write_packet(&Packet::PubComp(PubCompPacket::new(pubrel.packet_id)))?;
        }
        Packet::PubAck(puback) => {
            session.inflight.delete(puback.packet_id);
        }
        Packet::PubComp(pubcomp) => {
            session.inflight.delete(pubcomp.packet_id);
        }
        Packet::PubRec(pubrec) => {
            session.inflight.delete(pubrec.packet_id);
            session.write_packet(&Packet::PubRel(PubRelPacket::new(pubrec.packet_id)))?;
        }
        Packet::Disconnect => {
            session.stop().await;
        }
        _ => {}
    }
    Ok(())
}
