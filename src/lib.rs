//! Landmark-based acoustic fingerprinting and recognition.
//!
//! Implements the constellation approach described by Wang (2003): sparse
//! spectral peaks are paired into compact hashes, enrolled tracks populate
//! an inverted hash index, and a query is identified by histogramming the
//! time offsets of its hash hits.

use std::path::Path;

pub use audio::prepare_pcm;
pub use config::{AmpFloor, Configuration, MagnitudeScale};
pub use error::{Error, Result};
pub use index::{IndexStats, IndexStore, MemoryIndex, Posting};
pub use index_file::{FileIndex, OpenMode};
pub use matcher::{MatchCandidate, Ranking};
pub use pairing::{decode_hash, encode_hash, pairs, Pair, PairIter};
pub use peaks::{find_peaks, Peak};
pub use recognizer::{CancelToken, Enrollment, Identification, IdentifyOptions, Recognizer};
pub use spectrogram::{spectrogram, Spectrogram};

mod audio;
mod config;
mod error;
mod index;
mod index_file;
mod matcher;
mod pairing;
mod peaks;
mod recognizer;
mod spectrogram;

/// Opens a persistent index under the given configuration.
///
/// Fails with [Error::ParamDigestMismatch] when the file was built with
/// different fingerprint parameters and with [Error::CorruptIndex] when
/// its structure or checksum is invalid.
pub fn open_index(
    path: impl AsRef<Path>,
    mode: OpenMode,
    config: &Configuration,
) -> Result<FileIndex> {
    FileIndex::open(path, mode, config)
}
