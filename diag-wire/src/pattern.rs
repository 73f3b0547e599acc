use std::{io, path::Path};

use bytes::{Bytes, BytesMut};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use thiserror::Error;
use tracing::debug;

use crate::header::{set_tcp_dst, PacketHeader, PKT_HDR_LEN};

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Fixed payload is empty")]
    EmptyPayload,
    #[error("Full packet override of {0} bytes is shorter than the packet header")]
    OverrideTooShort(usize),
    #[error("Packet size {0} is smaller than the packet header")]
    SizeTooSmall(usize),
}

/// What the bytes after the header look like.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PayloadPattern {
    /// Fresh random bytes for every packet.
    #[default]
    Random,
    /// `start_len` bytes of `start`, followed by alternating runs of `len` bytes of `a` and `b`.
    Fixed { start: u8, start_len: usize, a: u8, b: u8, len: usize },
    /// A user supplied payload, repeated until the packet is full.
    Payload(Bytes),
    /// A random payload chosen once, sent alternately as-is and with every bit inverted.
    RandomFlip,
}

impl PayloadPattern {
    /// A fixed payload read from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PatternError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// A fixed payload taken from the raw bytes of a string.
    pub fn from_string(s: &str) -> Result<Self, PatternError> {
        Self::from_bytes(s.as_bytes().to_vec())
    }

    fn from_bytes(data: Vec<u8>) -> Result<Self, PatternError> {
        if data.is_empty() {
            return Err(PatternError::EmptyPayload);
        }
        Ok(Self::Payload(Bytes::from(data)))
    }
}

/// Generates test packets: header, patterned payload, and room for the identifier in the tail.
/// The identifier itself is stamped by the caller.
#[derive(Debug)]
pub struct PacketBuilder {
    header: PacketHeader,
    pattern: PayloadPattern,
    /// When set, the packet is a copy of these bytes (TCP destination port rewritten).
    full_packet: Option<Bytes>,
    rng: StdRng,
    /// Base payload and parity for [`PayloadPattern::RandomFlip`].
    flip: Option<(Vec<u8>, bool)>,
}

impl PacketBuilder {
    pub fn new(pattern: PayloadPattern) -> Self {
        Self {
            header: PacketHeader::default(),
            pattern,
            full_packet: None,
            rng: StdRng::from_entropy(),
            flip: None,
        }
    }

    /// Uses a deterministic random generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sends the given bytes as the full packet instead of generating header and payload.
    pub fn with_full_packet(mut self, pkt: Bytes) -> Result<Self, PatternError> {
        if pkt.len() < PKT_HDR_LEN {
            return Err(PatternError::OverrideTooShort(pkt.len()));
        }
        self.full_packet = Some(pkt);
        Ok(self)
    }

    pub fn with_header(mut self, header: PacketHeader) -> Self {
        self.header = header;
        self
    }

    /// Builds a packet of `size` bytes addressed to TCP destination port `tcp_dst`.
    pub fn build(&mut self, size: usize, tcp_dst: u16) -> Result<BytesMut, PatternError> {
        if size < PKT_HDR_LEN {
            return Err(PatternError::SizeTooSmall(size));
        }

        if let Some(full) = &self.full_packet {
            let mut buf = BytesMut::with_capacity(size);
            // Repeat the override if the requested size is larger.
            while buf.len() < size {
                let n = (size - buf.len()).min(full.len());
                buf.extend_from_slice(&full[..n]);
            }
            set_tcp_dst(&mut buf, tcp_dst);
            return Ok(buf);
        }

        let mut buf = BytesMut::with_capacity(size);
        self.header.with_dst_port(tcp_dst).write(size, &mut buf);
        buf.resize(size, 0);
        self.fill_payload(&mut buf[PKT_HDR_LEN..]);

        Ok(buf)
    }

    fn fill_payload(&mut self, payload: &mut [u8]) {
        match &self.pattern {
            PayloadPattern::Random => self.rng.fill_bytes(payload),
            PayloadPattern::Fixed { start, start_len, a, b, len } => {
                let start_len = (*start_len).min(payload.len());
                payload[..start_len].fill(*start);
                let run = (*len).max(1);
                for (i, byte) in payload[start_len..].iter_mut().enumerate() {
                    *byte = if (i / run) % 2 == 0 { *a } else { *b };
                }
            }
            PayloadPattern::Payload(data) => {
                for (dst, src) in payload.iter_mut().zip(data.iter().cycle()) {
                    *dst = *src;
                }
            }
            PayloadPattern::RandomFlip => {
                let (base, invert) = self.flip.get_or_insert_with(|| (Vec::new(), false));
                if base.len() < payload.len() {
                    let old = base.len();
                    base.resize(payload.len(), 0);
                    self.rng.fill_bytes(&mut base[old..]);
                    debug!(len = base.len(), "extended random flip base payload");
                }
                for (dst, src) in payload.iter_mut().zip(base.iter()) {
                    *dst = if *invert { !*src } else { *src };
                }
                *invert = !*invert;
            }
        }
    }

    /// A random value in `0..bound`, used to spread packets over a TCP port sub-range.
    pub fn random_below(&mut self, bound: u16) -> u16 {
        if bound <= 1 {
            return 0;
        }
        self.rng.gen_range(0..bound)
    }
}
