//! Wake-on-LAN
//!
//! Magic packet = 6 x 0xFF followed by the MAC address repeated 16 times (102 bytes),
//! sent once over UDP broadcast.

use tokio::net::{lookup_host, UdpSocket};
use tracing::info;

use crate::error::{Result, WardenError};
use crate::models::WakeTarget;

pub const MAGIC_PACKET_LEN: usize = 102;

/// Accepts `aa:bb:cc:dd:ee:ff` as well as `aa-bb-cc-dd-ee-ff`
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let groups: Vec<&str> = mac.trim().split(|c| c == ':' || c == '-').collect();
    if groups.len() != 6 {
        return Err(WardenError::InvalidMac(mac.to_string()));
    }
    let mut out = [0u8; 6];
    for (slot, group) in out.iter_mut().zip(groups) {
        if group.is_empty() || group.len() > 2 {
            return Err(WardenError::InvalidMac(mac.to_string()));
        }
        *slot = u8::from_str_radix(group, 16).map_err(|_| WardenError::InvalidMac(mac.to_string()))?;
    }
    Ok(out)
}

pub fn magic_packet(mac: [u8; 6]) -> [u8; MAGIC_PACKET_LEN] {
    let mut pkt = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in pkt[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    pkt
}

/// Broadcasts the magic packet for `target` on `port`
pub async fn send_magic_packet(target: &WakeTarget, port: u16) -> Result<()> {
    let mac = parse_mac(&target.mac_address)?;
    let packet = magic_packet(mac);

    let destination = lookup_host((target.broadcast_ip.as_str(), port))
        .await?
        .next()
        .ok_or_else(|| WardenError::connection(&target.broadcast_ip, "broadcast address did not resolve"))?;

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(&packet, destination).await?;

    info!("WoL packet sent to {} via {}", target.mac_address, destination);
    Ok(())
}
