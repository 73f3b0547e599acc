/// Hold violations repeat at this byte interval.
pub const HOLD_INTERVAL: usize = 80;

/// Minimum number of 0→1 offsets on one interval chain for a strong hold suspect.
pub const HOLD_THRESHOLD: usize = 3;

/// Result of grouping 0→1 offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct HoldGroups {
    /// At least one chain reached [`HOLD_THRESHOLD`].
    pub(crate) strong: bool,
    /// Offsets were left over that belong to no strong chain.
    pub(crate) weak: bool,
}

/// Groups ascending, de-duplicated 0→1 byte offsets into chains `o, o + 80, o + 160, ...`.
///
/// Chains start at every offset not yet consumed, in ascending order, and stop at the first
/// missing step. A chain of [`HOLD_THRESHOLD`] or more offsets is consumed; anything never
/// consumed is a weak suspect.
pub(crate) fn group(offsets: &[usize]) -> HoldGroups {
    let mut consumed = vec![false; offsets.len()];
    let mut groups = HoldGroups::default();
    let mut chain = Vec::new();

    for start in 0..offsets.len() {
        if consumed[start] {
            continue;
        }

        chain.clear();
        chain.push(start);
        let mut next = offsets[start] + HOLD_INTERVAL;
        while let Ok(idx) = offsets.binary_search(&next) {
            if consumed[idx] {
                break;
            }
            chain.push(idx);
            next += HOLD_INTERVAL;
        }

        if chain.len() >= HOLD_THRESHOLD {
            groups.strong = true;
            for idx in &chain {
                consumed[*idx] = true;
            }
        }
    }

    groups.weak = consumed.iter().any(|c| !c);
    groups
}
