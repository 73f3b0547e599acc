pub mod header;
pub mod pattern;
pub mod pkt_id;

pub use header::{PacketHeader, PKT_HDR_LEN};
pub use pattern::{PacketBuilder, PatternError, PayloadPattern};
pub use pkt_id::{IdCodec, IdError, IdLayout, PacketId};

/// The largest test packet that can be generated.
pub const MAX_PKT_SIZE: usize = 9216;
/// The smallest test packet in the default identifier layout.
pub const MIN_PKT_SIZE: usize = 80;
/// The smallest test packet when the minimum-size identifier layout is enabled.
pub const MIN_PKT_SIZE_REDUCED: usize = 64;
