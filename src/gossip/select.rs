//! Peer selection

use rand::seq::SliceRandom;
use rand::Rng;

use crate::state::Endpoint;

/// Pick the peer to gossip with this round.
///
/// With both sets populated a non-live peer is chosen with probability
/// `non_live_probability`, otherwise a live one. With one set empty the
/// other is used; with both empty there is nobody to talk to.
pub fn random_pick_node<R: Rng>(
    live: &[Endpoint],
    non_live: &[Endpoint],
    non_live_probability: f64,
    rng: &mut R,
) -> Option<Endpoint> {
    let pool = match (live.is_empty(), non_live.is_empty()) {
        (true, true) => return None,
        (false, true) => live,
        (true, false) => non_live,
        (false, false) => {
            if rng.gen::<f64>() < non_live_probability {
                non_live
            } else {
                live
            }
        }
    };
    pool.choose(rng).cloned()
}

/// Pick a live node other than `target` to relay through
pub fn choose_forwarder<R: Rng>(
    live: &[Endpoint],
    target: &Endpoint,
    rng: &mut R,
) -> Option<Endpoint> {
    let candidates: Vec<&Endpoint> = live.iter().filter(|e| *e != target).collect();
    candidates.choose(rng).map(|e| (*e).clone())
}
