use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::index::{insert_posting, IndexStats, IndexStore, Posting};
use crate::pairing::Pair;

const MAGIC: [u8; 8] = *b"FPIDX\0\0\0";
const VERSION: u16 = 1;

/// magic + version + digest + num_hashes + num_postings
const HEADER_LEN: usize = 8 + 2 + 32 + 8 + 8;
/// dir_offset + dir_crc32 + magic
const FOOTER_LEN: usize = 8 + 4 + 8;
const POSTING_LEN: usize = 8;
const DIR_ENTRY_LEN: usize = 8 + 8 + 4;

/// Access mode of a [FileIndex] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Serve lookups only; writes fail with [Error::ReadOnlyIndex].
    Read,
    /// Accept appends; `flush` rewrites the file. A missing file starts
    /// an empty index.
    Append,
}

#[derive(Debug)]
struct DirEntry {
    hash: u32,
    start: usize,
    count: usize,
}

#[derive(Debug)]
enum Backing {
    /// Postings arena plus a hash-sorted directory for binary search.
    Read { directory: Vec<DirEntry>, arena: Vec<Posting> },
    /// Mutable posting lists, serialized wholesale on flush.
    Append { map: HashMap<u32, Vec<Posting>> },
}

/// Single-file persistent index.
///
/// Layout: `header | postings | directory | footer`. The header carries a
/// magic number, a format version and the SHA-256 digest of the
/// fingerprint configuration; opening refuses files whose digest differs
/// from the runtime configuration. The footer carries the directory
/// offset and a CRC32 of the directory.
#[derive(Debug)]
pub struct FileIndex {
    path: PathBuf,
    digest: [u8; 32],
    dedup: bool,
    backing: Backing,
    tracks: HashSet<u32>,
    num_postings: u64,
    dirty: bool,
}

impl FileIndex {
    /// Opens (or, in append mode, creates) an index file.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, config: &Configuration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let digest = config.digest();

        let loaded = match fs::read(&path) {
            Ok(bytes) => Some(parse(&path, &bytes, &digest)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && mode == OpenMode::Append => {
                None
            }
            Err(err) => return Err(err.into()),
        };

        let (directory, arena) = loaded.unwrap_or_default();
        let num_postings = arena.len() as u64;
        let tracks: HashSet<u32> = arena.iter().map(|p| p.track_id).collect();

        let backing = match mode {
            OpenMode::Read => Backing::Read { directory, arena },
            OpenMode::Append => {
                let mut map: HashMap<u32, Vec<Posting>> = HashMap::new();
                for entry in &directory {
                    map.insert(entry.hash, arena[entry.start..entry.start + entry.count].to_vec());
                }
                Backing::Append { map }
            }
        };

        info!(path = %path.display(), ?mode, num_postings, "opened index");
        Ok(Self {
            path,
            digest,
            dedup: config.dedup_postings,
            backing,
            tracks,
            num_postings,
            dirty: false,
        })
    }

    fn append_map(&mut self) -> Result<&mut HashMap<u32, Vec<Posting>>> {
        match &mut self.backing {
            Backing::Append { map } => Ok(map),
            Backing::Read { .. } => Err(Error::ReadOnlyIndex { path: self.path.clone() }),
        }
    }
}

/// Serializes the whole index image to a sibling temp file, then renames
/// it over the target so an interrupted flush never corrupts the previous
/// generation.
fn write_file(
    path: &Path,
    digest: &[u8; 32],
    num_postings: u64,
    map: &HashMap<u32, Vec<Posting>>,
) -> Result<()> {
    let mut hashes: Vec<u32> = map.keys().copied().collect();
    hashes.sort_unstable();

    let tmp_path = path.with_extension("fpidx.tmp");
    let file = File::create(&tmp_path)?;
    let mut out = BufWriter::new(file);

    out.write_all(&MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(digest)?;
    out.write_all(&(hashes.len() as u64).to_le_bytes())?;
    out.write_all(&num_postings.to_le_bytes())?;

    let mut offset = HEADER_LEN as u64;
    let mut directory = Vec::with_capacity(hashes.len() * DIR_ENTRY_LEN);
    for &hash in &hashes {
        let postings = &map[&hash];
        directory.extend_from_slice(&u64::from(hash).to_le_bytes());
        directory.extend_from_slice(&offset.to_le_bytes());
        directory.extend_from_slice(&(postings.len() as u32).to_le_bytes());

        for posting in postings {
            out.write_all(&posting.track_id.to_le_bytes())?;
            out.write_all(&posting.t_anchor.to_le_bytes())?;
        }
        offset += (postings.len() * POSTING_LEN) as u64;
    }

    let dir_offset = offset;
    let mut crc = crc32fast::Hasher::new();
    crc.update(&directory);
    out.write_all(&directory)?;

    out.write_all(&dir_offset.to_le_bytes())?;
    out.write_all(&crc.finalize().to_le_bytes())?;
    out.write_all(&MAGIC)?;

    let file = out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), hashes = hashes.len(), "flushed index file");
    Ok(())
}

impl IndexStore for FileIndex {
    fn put(&mut self, hash: u32, posting: Posting) -> Result<()> {
        let dedup = self.dedup;
        let map = self.append_map()?;
        if insert_posting(map, hash, posting, dedup) {
            self.num_postings += 1;
        }
        self.tracks.insert(posting.track_id);
        self.dirty = true;
        Ok(())
    }

    fn put_bulk(&mut self, track_id: u32, pairs: &[Pair]) -> Result<usize> {
        let dedup = self.dedup;
        let map = self.append_map()?;

        let mut written = 0;
        for pair in pairs {
            let posting = Posting { track_id, t_anchor: pair.anchor };
            if insert_posting(map, pair.hash, posting, dedup) {
                written += 1;
            }
        }
        self.num_postings += written as u64;
        self.tracks.insert(track_id);
        self.dirty = true;

        debug!(track_id, written, "bulk append to file index");
        Ok(written)
    }

    fn get(&self, hash: u32) -> Result<&[Posting]> {
        const NO_POSTINGS: &[Posting] = &[];
        let postings = match &self.backing {
            Backing::Read { directory, arena } => directory
                .binary_search_by_key(&hash, |e| e.hash)
                .map(|i| {
                    let entry = &directory[i];
                    &arena[entry.start..entry.start + entry.count]
                })
                .unwrap_or(NO_POSTINGS),
            Backing::Append { map } => map.get(&hash).map(Vec::as_slice).unwrap_or(NO_POSTINGS),
        };
        Ok(postings)
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Backing::Append { map } = &self.backing {
            write_file(&self.path, &self.digest, self.num_postings, map)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        let num_hashes = match &self.backing {
            Backing::Read { directory, .. } => directory.len() as u64,
            Backing::Append { map } => map.len() as u64,
        };
        IndexStats {
            num_hashes,
            num_postings: self.num_postings,
            num_tracks: self.tracks.len() as u64,
        }
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::CorruptIndex { path: path.to_path_buf(), reason: reason.into() }
}

/// Validates and decodes a serialized index image.
fn parse(path: &Path, bytes: &[u8], digest: &[u8; 32]) -> Result<(Vec<DirEntry>, Vec<Posting>)> {
    if bytes.len() < HEADER_LEN + FOOTER_LEN {
        return Err(corrupt(path, "file shorter than header and footer"));
    }

    if bytes[..8] != MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
    if version != VERSION {
        return Err(corrupt(path, format!("unsupported format version {version}")));
    }
    if &bytes[10..42] != digest {
        return Err(Error::ParamDigestMismatch { path: path.to_path_buf() });
    }
    let num_hashes = u64::from_le_bytes(bytes[42..50].try_into().unwrap()) as usize;
    let num_postings = u64::from_le_bytes(bytes[50..58].try_into().unwrap()) as usize;

    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    if footer[12..20] != MAGIC {
        return Err(corrupt(path, "bad footer magic"));
    }
    let dir_offset = u64::from_le_bytes(footer[..8].try_into().unwrap()) as usize;
    let dir_crc = u32::from_le_bytes(footer[8..12].try_into().unwrap());

    let expected_dir_offset = HEADER_LEN + num_postings * POSTING_LEN;
    let expected_len = expected_dir_offset + num_hashes * DIR_ENTRY_LEN + FOOTER_LEN;
    if dir_offset != expected_dir_offset || bytes.len() != expected_len {
        return Err(corrupt(path, "section sizes disagree with header"));
    }

    let directory_bytes = &bytes[dir_offset..dir_offset + num_hashes * DIR_ENTRY_LEN];
    let mut crc = crc32fast::Hasher::new();
    crc.update(directory_bytes);
    if crc.finalize() != dir_crc {
        return Err(corrupt(path, "directory checksum mismatch"));
    }

    let mut directory = Vec::with_capacity(num_hashes);
    let mut arena = Vec::with_capacity(num_postings);
    let mut previous_hash: Option<u32> = None;

    for entry in directory_bytes.chunks_exact(DIR_ENTRY_LEN) {
        let hash = u64::from_le_bytes(entry[..8].try_into().unwrap());
        let offset = u64::from_le_bytes(entry[8..16].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(entry[16..20].try_into().unwrap()) as usize;

        let hash = u32::try_from(hash).map_err(|_| corrupt(path, "hash exceeds 32 bits"))?;
        if previous_hash.is_some_and(|previous| previous >= hash) {
            return Err(corrupt(path, "directory is not sorted by hash"));
        }
        previous_hash = Some(hash);

        if offset < HEADER_LEN
            || (offset - HEADER_LEN) % POSTING_LEN != 0
            || offset + count * POSTING_LEN > dir_offset
        {
            return Err(corrupt(path, "posting list out of bounds"));
        }

        let start = arena.len();
        for posting in bytes[offset..offset + count * POSTING_LEN].chunks_exact(POSTING_LEN) {
            arena.push(Posting {
                track_id: u32::from_le_bytes(posting[..4].try_into().unwrap()),
                t_anchor: u32::from_le_bytes(posting[4..8].try_into().unwrap()),
            });
        }
        directory.push(DirEntry { hash, start, count });
    }

    if arena.len() != num_postings {
        return Err(corrupt(path, "posting count disagrees with header"));
    }

    Ok((directory, arena))
}
