#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod types;
pub use types::*;

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
}
