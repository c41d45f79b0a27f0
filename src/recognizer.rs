use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::index::IndexStore;
use crate::matcher::{self, MatchCandidate};
use crate::pairing::{self, Pair};
use crate::peaks;
use crate::spectrogram::Stft;

/// Cooperative cancellation flag, checked between pipeline phases and
/// periodically inside the matcher loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options of one identification request.
#[derive(Debug, Clone)]
pub struct IdentifyOptions {
    /// Maximum number of ranked candidates returned.
    pub top_k: usize,
    /// Wall-clock budget; on expiry the best-so-far ranking is returned
    /// with `partial = true`. `None` disables the budget.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            timeout: Some(Duration::from_secs(1)),
            cancel: None,
        }
    }
}

/// Outcome of enrolling one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enrollment {
    pub track_id: u32,
    /// Number of postings written for the track.
    pub num_hashes: usize,
}

/// Outcome of an identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Ranked candidates, best first; kept even without a confident match
    /// for diagnostics.
    pub candidates: Vec<MatchCandidate>,
    /// The top candidate when it clears the confidence gates, otherwise
    /// `None` ("no match").
    pub best_match: Option<MatchCandidate>,
    pub partial: bool,
}

impl Identification {
    fn empty() -> Self {
        Self { candidates: Vec::new(), best_match: None, partial: false }
    }
}

/// Ties the fingerprint extractor, an index store and the matcher into the
/// two top-level flows, `enroll` and `identify`.
///
/// Both flows are synchronous and CPU-bound; dispatching them onto worker
/// threads is the caller's concern. The store is the only shared mutable
/// state: enrollments serialize through `&mut self`, and identification
/// only reads the index.
pub struct Recognizer<S: IndexStore> {
    config: Configuration,
    stft: Stft,
    store: S,
}

impl<S: IndexStore> Recognizer<S> {
    pub fn new(config: Configuration, store: S) -> Self {
        Self { stft: Stft::new(&config), config, store }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the extraction pipeline: spectrogram, constellation, pair
    /// hashes. A signal shorter than one analysis window yields no pairs.
    pub fn fingerprint(&mut self, pcm: &[f32]) -> Vec<Pair> {
        let grid = self.stft.spectrogram(pcm);
        let constellation = peaks::find_peaks(&grid, &self.config);
        pairing::pairs(&constellation, &self.config)
    }

    /// Fingerprints `pcm` and appends its postings under `track_id`.
    ///
    /// Track ids are opaque; keeping them unique is the caller's
    /// invariant. Postings become durable at [Recognizer::flush].
    pub fn enroll(&mut self, track_id: u32, pcm: &[f32]) -> Result<Enrollment> {
        self.enroll_with_cancel(track_id, pcm, None)
    }

    /// [Recognizer::enroll] with cooperative cancellation. A cancelled
    /// enrollment writes nothing.
    pub fn enroll_with_cancel(
        &mut self,
        track_id: u32,
        pcm: &[f32],
        cancel: Option<&CancelToken>,
    ) -> Result<Enrollment> {
        if self.config.frame_count(pcm.len()) == 0 {
            return Err(Error::ShortSignal { len: pcm.len(), min: self.config.fft_window_size });
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let started = Instant::now();
        let pairs = self.fingerprint(pcm);

        // The batch is staged in full; a cancellation observed here leaves
        // the store untouched.
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        let num_hashes = self.store.put_bulk(track_id, &pairs)?;

        let seconds = pcm.len() as f64 / f64::from(self.config.sample_rate);
        debug!(
            track_id,
            num_hashes,
            hashes_per_second = num_hashes as f64 / seconds.max(f64::EPSILON),
            "enrolled track"
        );
        info!(track_id, num_hashes, elapsed = ?started.elapsed(), "enroll finished");

        Ok(Enrollment { track_id, num_hashes })
    }

    /// Identifies a query clip against the index.
    ///
    /// Returns the ranked candidates plus the confident match, if any: the
    /// top candidate must score at least the configured minimum hit count
    /// and lead the runner-up by the configured ratio. A query shorter
    /// than one analysis window yields an empty, non-partial result.
    pub fn identify(&mut self, pcm: &[f32], options: &IdentifyOptions) -> Result<Identification> {
        if self.config.frame_count(pcm.len()) == 0 {
            return Ok(Identification::empty());
        }

        let cancel = options.cancel.as_ref();
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let started = Instant::now();
        let deadline = options.timeout.map(|timeout| started + timeout);

        let pairs = self.fingerprint(pcm);
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let ranking =
            matcher::rank(&self.store, &pairs, &self.config, options.top_k, deadline, cancel)?;

        let best_match = self.confident_match(&ranking.candidates);
        match &best_match {
            Some(best) => info!(
                track_id = best.track_id,
                score = best.score,
                delta = best.delta,
                elapsed = ?started.elapsed(),
                "identified track"
            ),
            None => info!(
                candidates = ranking.candidates.len(),
                partial = ranking.partial,
                elapsed = ?started.elapsed(),
                "no confident match"
            ),
        }

        Ok(Identification {
            best_match,
            candidates: ranking.candidates,
            partial: ranking.partial,
        })
    }

    /// Makes all enrolled postings durable.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn confident_match(&self, candidates: &[MatchCandidate]) -> Option<MatchCandidate> {
        let best = candidates.first()?;
        if best.score < self.config.min_match_count {
            return None;
        }
        let second_best = candidates.get(1).map_or(0, |c| c.score);
        if (best.score as f32) < self.config.min_lead_ratio * second_best as f32 {
            return None;
        }
        Some(*best)
    }
}
