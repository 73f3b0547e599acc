use std::fmt;

/// Multicast group id as seen by the forwarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct McGroupId(pub u16);

impl fmt::Display for McGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mgid {}", self.0)
    }
}

/// Handle of a created multicast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct McGroupHandle(pub u64);

/// Handle of a replication node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct McNodeHandle(pub u64);
