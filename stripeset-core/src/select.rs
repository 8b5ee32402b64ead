//! Node selection and minimum-agreement resolution

use tracing::{error, trace, warn};

use crate::error::{StripesetError, StripesetResult};
use crate::fop::{Fop, FopState, Minimum};
use crate::mask::NodeMask;

/// Nodes every object the operation touches is known good on.
///
/// Takes object sections, so it must run before the operation's own
/// section is taken.
pub(crate) fn objects_good(fop: &Fop) -> NodeMask {
    let mut good = NodeMask::FULL;
    for inode in fop.touched_inodes() {
        good &= inode.good();
    }
    if let Some(fd) = fop.fd() {
        good &= fd.good();
    }
    good
}

/// Resolve a minimum policy against the eligible count and fragment threshold
pub fn resolve_minimum(policy: Minimum, eligible: u32, fragments: u32) -> u32 {
    match policy {
        Minimum::All if eligible >= fragments => eligible,
        Minimum::All | Minimum::Min => fragments,
        Minimum::One => 1,
        Minimum::Exactly(n) => n,
    }
}

/// Narrow the operation's mask to the eligible nodes and resolve its
/// minimum. On success the round-robin cursor moves, every eligible node is
/// remaining, and the operation holds one join unit for the wave.
pub(crate) fn select(fop: &Fop, st: &mut FopState, objects_good: NodeMask) -> StripesetResult<()> {
    let set = fop.set();

    st.mask &= set.node_mask();
    let eligible = st.mask & set.up() & objects_good;
    if eligible != st.mask {
        warn!(
            fop = fop.id(),
            name = fop.name(),
            unavailable = %(st.mask & !eligible),
            "Executing operation with some nodes unavailable"
        );
        st.mask = eligible;
    }

    let fragments = set.fragments();
    let count = eligible.count();
    st.minimum = resolve_minimum(st.minimum_policy, count, fragments);
    st.first = set.advance_cursor();
    st.remaining = eligible;

    trace!(
        fop = fop.id(),
        mask = %st.mask,
        minimum = st.minimum,
        first = st.first,
        "SELECT"
    );

    if count == 0 || (count < st.minimum && count < fragments) {
        error!(
            fop = fop.id(),
            name = fop.name(),
            have = count,
            need = st.minimum,
            "Insufficient available nodes for this request"
        );
        return Err(StripesetError::QuorumInfeasible {
            available: count,
            required: st.minimum,
            eligible,
        });
    }

    st.join.add();
    st.waves += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Minimum::All, 6, 4, 6)]
    #[case(Minimum::All, 3, 4, 4)]
    #[case(Minimum::All, 4, 4, 4)]
    #[case(Minimum::Min, 6, 4, 4)]
    #[case(Minimum::One, 6, 4, 1)]
    #[case(Minimum::Exactly(5), 6, 4, 5)]
    fn test_resolve_minimum(
        #[case] policy: Minimum,
        #[case] eligible: u32,
        #[case] fragments: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(resolve_minimum(policy, eligible, fragments), expected);
    }
}
