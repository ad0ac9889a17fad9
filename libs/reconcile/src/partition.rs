//! Replica partitioning across an ordered destination list.
//!
//! ```text
//! count = min(total, destinations.len())
//! for i in count down to 1:
//!     share = remaining / i
//!     assign(destinations[i - 1], share)
//!     remaining -= share
//! ```
//!
//! The last destination of the active window is processed first and gets
//! `floor(total / count)`; the remainder accumulates toward the front, so
//! `destinations[0]` gets the largest share. Destinations past `count` get
//! nothing this round.

/// The allocation for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share<'a, D> {
    pub destination: &'a D,
    pub replicas: u32,
}

/// Split `total` across `destinations`.
///
/// Shares are returned in processing order (last active destination first).
/// An empty result means full teardown.
pub fn partition<D>(total: u32, destinations: &[D]) -> Vec<Share<'_, D>> {
    let count = destinations.len().min(total as usize);
    let mut remaining = total;
    let mut shares = Vec::with_capacity(count);

    for i in (1..=count).rev() {
        let replicas = remaining / i as u32;
        remaining -= replicas;
        shares.push(Share {
            destination: &destinations[i - 1],
            replicas,
        });
    }

    shares
}
