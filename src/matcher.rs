use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::index::IndexStore;
use crate::pairing::Pair;
use crate::recognizer::CancelToken;

/// How often the histogram loop polls cancellation and the deadline.
const BUDGET_CHECK_INTERVAL: usize = 64;

/// One ranked identification candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub track_id: u32,
    /// Frame offset `t_ref − t_query` aligning the query inside the track.
    pub delta: i64,
    /// Number of hash hits agreeing on `delta` (within the tolerance).
    pub score: u32,
}

/// Ranked candidates of one identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    pub candidates: Vec<MatchCandidate>,
    /// True when the wall-clock budget expired and the ranking only covers
    /// a prefix of the query hashes.
    pub partial: bool,
}

/// Histograms time offsets of query hashes against the index and ranks
/// tracks by their best-aligned hit count.
///
/// A failed posting lookup degrades that hash to an empty list. The
/// result is deterministic for a given store content: ties rank by track
/// id, then by delta.
pub(crate) fn rank<S: IndexStore>(
    store: &S,
    query: &[Pair],
    config: &Configuration,
    top_k: usize,
    deadline: Option<Instant>,
    cancel: Option<&CancelToken>,
) -> Result<Ranking> {
    let mut histogram: HashMap<u32, HashMap<i64, u32>> = HashMap::new();
    let mut partial = false;

    for (processed, pair) in query.iter().enumerate() {
        if processed % BUDGET_CHECK_INTERVAL == 0 {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(Error::Cancelled);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(processed, total = query.len(), "identification budget expired");
                partial = true;
                break;
            }
        }

        let postings = match store.get(pair.hash) {
            Ok(postings) => postings,
            Err(err) => {
                warn!(hash = pair.hash, %err, "posting lookup failed, serving empty list");
                continue;
            }
        };

        for posting in postings {
            let delta = i64::from(posting.t_anchor) - i64::from(pair.anchor);
            *histogram.entry(posting.track_id).or_default().entry(delta).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<MatchCandidate> = histogram
        .into_iter()
        .map(|(track_id, deltas)| {
            let (delta, score) = best_alignment(&deltas, config.delta_epsilon);
            MatchCandidate { track_id, delta, score }
        })
        .collect();

    candidates.sort_unstable_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.track_id.cmp(&b.track_id))
            .then(a.delta.cmp(&b.delta))
    });
    candidates.truncate(top_k);

    Ok(Ranking { candidates, partial })
}

/// Picks the delta whose `[δ−ε, δ+ε]` window gathers the most hits; the
/// smallest such delta wins ties.
fn best_alignment(deltas: &HashMap<i64, u32>, epsilon: u32) -> (i64, u32) {
    if epsilon == 0 {
        return deltas
            .iter()
            .map(|(&delta, &count)| (delta, count))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .unwrap_or((0, 0));
    }

    let mut sorted: Vec<(i64, u32)> = deltas.iter().map(|(&d, &c)| (d, c)).collect();
    sorted.sort_unstable_by_key(|&(delta, _)| delta);

    let epsilon = i64::from(epsilon);
    let mut best = (0i64, 0u32);
    let mut lo = 0;
    let mut hi = 0;
    let mut window_sum = 0u32;
    for center in 0..sorted.len() {
        let delta = sorted[center].0;
        while hi < sorted.len() && sorted[hi].0 <= delta + epsilon {
            window_sum += sorted[hi].1;
            hi += 1;
        }
        while sorted[lo].0 < delta - epsilon {
            window_sum -= sorted[lo].1;
            lo += 1;
        }
        if window_sum > best.1 || (window_sum == best.1 && best.1 > 0 && delta < best.0) {
            best = (delta, window_sum);
        }
    }
    best
}
