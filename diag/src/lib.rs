#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use diag_backend as backend;
pub use diag_engine::*;
pub use diag_wire::{IdLayout, PacketBuilder, PacketHeader, PacketId, PayloadPattern};
