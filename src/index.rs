use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::Configuration;
use crate::error::Result;
use crate::pairing::Pair;

/// One occurrence of a hash inside a reference track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Posting {
    pub track_id: u32,
    pub t_anchor: u32,
}

/// Aggregate counters of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub num_hashes: u64,
    pub num_postings: u64,
    pub num_tracks: u64,
}

/// Inverted hash → postings map.
///
/// Writers are serialized through `&mut self`; `get` takes `&self` so any
/// number of readers may run concurrently. Postings written by a
/// `put_bulk` batch become durable at `flush` and the batch commits as a
/// whole — a batch that errors or is abandoned leaves no postings behind.
pub trait IndexStore {
    /// Appends a single posting.
    fn put(&mut self, hash: u32, posting: Posting) -> Result<()>;

    /// Appends one track's pairs as a batch; the preferred enrollment
    /// path. Returns the number of postings written. Within the batch the
    /// anchor-time order of `pairs` is preserved per posting list.
    fn put_bulk(&mut self, track_id: u32, pairs: &[Pair]) -> Result<usize>;

    /// Reads the posting list of a hash. Unknown hashes yield an empty
    /// slice.
    fn get(&self, hash: u32) -> Result<&[Posting]>;

    /// Makes all prior puts durable.
    fn flush(&mut self) -> Result<()>;

    fn stats(&self) -> IndexStats;
}

const NO_POSTINGS: &[Posting] = &[];

/// Ephemeral index backing. Shares the fingerprinting configuration's
/// de-duplication setting but carries no parameter digest, as it never
/// outlives the process that built it.
pub struct MemoryIndex {
    map: HashMap<u32, Vec<Posting>>,
    tracks: HashSet<u32>,
    num_postings: u64,
    dedup: bool,
}

impl MemoryIndex {
    pub fn new(config: &Configuration) -> Self {
        Self {
            map: HashMap::new(),
            tracks: HashSet::new(),
            num_postings: 0,
            dedup: config.dedup_postings,
        }
    }
}

pub(crate) fn insert_posting(
    map: &mut HashMap<u32, Vec<Posting>>,
    hash: u32,
    posting: Posting,
    dedup: bool,
) -> bool {
    let list = map.entry(hash).or_default();
    if dedup && list.contains(&posting) {
        return false;
    }
    list.push(posting);
    true
}

impl IndexStore for MemoryIndex {
    fn put(&mut self, hash: u32, posting: Posting) -> Result<()> {
        if insert_posting(&mut self.map, hash, posting, self.dedup) {
            self.num_postings += 1;
        }
        self.tracks.insert(posting.track_id);
        Ok(())
    }

    fn put_bulk(&mut self, track_id: u32, pairs: &[Pair]) -> Result<usize> {
        let mut written = 0;
        for pair in pairs {
            let posting = Posting { track_id, t_anchor: pair.anchor };
            if insert_posting(&mut self.map, pair.hash, posting, self.dedup) {
                written += 1;
            }
        }
        self.num_postings += written as u64;
        self.tracks.insert(track_id);

        debug!(track_id, written, "bulk append to memory index");
        Ok(written)
    }

    fn get(&self, hash: u32) -> Result<&[Posting]> {
        Ok(self.map.get(&hash).map(Vec::as_slice).unwrap_or(NO_POSTINGS))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            num_hashes: self.map.len() as u64,
            num_postings: self.num_postings,
            num_tracks: self.tracks.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Configuration;
    use crate::pairing::Pair;

    use super::{IndexStats, IndexStore, MemoryIndex, Posting};

    #[test]
    fn unknown_hash_reads_empty() {
        let index = MemoryIndex::new(&Configuration::default());
        assert!(index.get(0xdead).unwrap().is_empty());
    }

    #[test]
    fn bulk_postings_are_visible_in_order() {
        let mut index = MemoryIndex::new(&Configuration::default());
        let pairs = [
            Pair { hash: 7, anchor: 10 },
            Pair { hash: 9, anchor: 11 },
            Pair { hash: 7, anchor: 25 },
        ];
        assert_eq!(index.put_bulk(3, &pairs).unwrap(), 3);
        index.flush().unwrap();

        assert_eq!(index.get(7).unwrap(), &[
            Posting { track_id: 3, t_anchor: 10 },
            Posting { track_id: 3, t_anchor: 25 },
        ]);
        assert_eq!(index.get(9).unwrap(), &[Posting { track_id: 3, t_anchor: 11 }]);
    }

    #[test]
    fn duplicates_count_as_evidence_by_default() {
        let mut index = MemoryIndex::new(&Configuration::default());
        let pair = [Pair { hash: 1, anchor: 4 }, Pair { hash: 1, anchor: 4 }];
        assert_eq!(index.put_bulk(1, &pair).unwrap(), 2);
        assert_eq!(index.get(1).unwrap().len(), 2);
    }

    #[test]
    fn dedup_flag_collapses_identical_postings() {
        let config = Configuration::default().with_deduped_postings(true);
        let mut index = MemoryIndex::new(&config);
        let pair = [Pair { hash: 1, anchor: 4 }, Pair { hash: 1, anchor: 4 }];
        assert_eq!(index.put_bulk(1, &pair).unwrap(), 1);
        assert_eq!(index.get(1).unwrap().len(), 1);

        // A different track at the same anchor is not a duplicate.
        index.put(1, Posting { track_id: 2, t_anchor: 4 }).unwrap();
        assert_eq!(index.get(1).unwrap().len(), 2);
    }

    #[test]
    fn extreme_track_ids_round_trip() {
        let mut index = MemoryIndex::new(&Configuration::default());
        index.put(5, Posting { track_id: 0, t_anchor: 1 }).unwrap();
        index.put(5, Posting { track_id: u32::MAX, t_anchor: 2 }).unwrap();

        let postings = index.get(5).unwrap();
        assert_eq!(postings[0].track_id, 0);
        assert_eq!(postings[1].track_id, u32::MAX);
    }

    #[test]
    fn stats_track_all_counters() {
        let mut index = MemoryIndex::new(&Configuration::default());
        index.put_bulk(1, &[Pair { hash: 10, anchor: 0 }, Pair { hash: 11, anchor: 1 }]).unwrap();
        index.put_bulk(2, &[Pair { hash: 10, anchor: 9 }]).unwrap();

        assert_eq!(index.stats(), IndexStats {
            num_hashes: 2,
            num_postings: 3,
            num_tracks: 2,
        });
    }
}
