//! The fixed Ethernet/IPv4/TCP header every test packet starts with.
//!
//! Forwarding rules installed by the diagnostics match on the TCP destination port, so the
//! header is the only part of the packet the switch pipeline looks at.
use bytes::{BufMut, BytesMut};

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const TCP_HDR_LEN: usize = 20;

/// Length of the fixed test packet header.
pub const PKT_HDR_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN + TCP_HDR_LEN;

/// Offset of the TCP destination port.
pub const TCP_DST_OFFSET: usize = ETH_HDR_LEN + IPV4_HDR_LEN + 2;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_TCP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            dst_mac: [0x00, 0x02, 0x00, 0x00, 0x00, 0x01],
            src_mac: [0x00, 0x02, 0x00, 0x00, 0x00, 0x02],
            src_ip: [10, 10, 0, 2],
            dst_ip: [10, 10, 0, 1],
            src_port: 0x1234,
            dst_port: 0,
        }
    }
}

impl PacketHeader {
    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    /// Writes the header for a packet of `pkt_size` bytes into `dst`.
    pub fn write(&self, pkt_size: usize, dst: &mut BytesMut) {
        dst.reserve(PKT_HDR_LEN);

        // Ethernet II
        dst.put_slice(&self.dst_mac);
        dst.put_slice(&self.src_mac);
        dst.put_u16(ETHERTYPE_IPV4);

        // IPv4, no options. The FCS is not part of `pkt_size`.
        let ip_len = pkt_size.saturating_sub(ETH_HDR_LEN).min(u16::MAX as usize) as u16;
        let mut ip = [0u8; IPV4_HDR_LEN];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&ip_len.to_be_bytes());
        ip[8] = 64;
        ip[9] = IPPROTO_TCP;
        ip[12..16].copy_from_slice(&self.src_ip);
        ip[16..20].copy_from_slice(&self.dst_ip);
        let csum = ipv4_checksum(&ip);
        ip[10..12].copy_from_slice(&csum.to_be_bytes());
        dst.put_slice(&ip);

        // TCP, SYN with a zero checksum: nothing on the test path terminates it.
        dst.put_u16(self.src_port);
        dst.put_u16(self.dst_port);
        dst.put_u32(0);
        dst.put_u32(0);
        dst.put_u8(0x50);
        dst.put_u8(0x02);
        dst.put_u16(0xffff);
        dst.put_u16(0);
        dst.put_u16(0);
    }
}

/// Reads the TCP destination port of a test packet.
#[inline]
pub fn tcp_dst(pkt: &[u8]) -> Option<u16> {
    pkt.get(TCP_DST_OFFSET..TCP_DST_OFFSET + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Overwrites the TCP destination port of a test packet in place.
#[inline]
pub fn set_tcp_dst(pkt: &mut [u8], port: u16) {
    if let Some(b) = pkt.get_mut(TCP_DST_OFFSET..TCP_DST_OFFSET + 2) {
        b.copy_from_slice(&port.to_be_bytes());
    }
}

fn ipv4_checksum(hdr: &[u8; IPV4_HDR_LEN]) -> u16 {
    let mut sum = hdr.chunks(2).map(|w| u16::from_be_bytes([w[0], w[1]]) as u32).sum::<u32>();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
