//! Exact byte-signature matcher.
//!
//! Policy: signatures are tried in store order and the first offset of the
//! first signature that occurs anywhere in the file wins. At most one match is
//! reported per file.
//!
//! Files up to `buffer_limit_bytes` are read into one buffer. Larger files are
//! streamed through a fixed window that carries `longest_signature - 1` bytes
//! of overlap between reads, which yields exactly the same answer.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memchr::memmem::Finder;

use crate::core::config::ScannerConfig;
use crate::core::errors::{Result, SwdError};
use crate::store::Signature;

/// Buffering limits for one scan.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Files larger than this are scanned with the windowed reader.
    pub buffer_limit_bytes: u64,
    /// Fresh bytes read per window in windowed mode.
    pub window_bytes: usize,
}

impl MatcherConfig {
    pub fn from_scanner(config: &ScannerConfig) -> Self {
        Self {
            buffer_limit_bytes: config.buffer_limit_bytes,
            window_bytes: config.window_bytes,
        }
    }
}

/// A signature occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchHit<'s> {
    pub signature: &'s Signature,
    pub offset: u64,
}

/// Precompiled searchers for one signature set.
pub struct SignatureMatcher<'s> {
    entries: Vec<(&'s Signature, Finder<'s>)>,
    longest: usize,
}

impl<'s> SignatureMatcher<'s> {
    /// Compile searchers in store order. Empty signatures never match.
    pub fn new(signatures: &'s [Signature]) -> Self {
        let entries: Vec<_> = signatures
            .iter()
            .filter(|sig| !sig.is_empty())
            .map(|sig| (sig, Finder::new(&sig.bytes)))
            .collect();
        let longest = entries.iter().map(|(sig, _)| sig.len()).max().unwrap_or(0);
        Self { entries, longest }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search an in-memory buffer.
    pub fn find_in_buffer(&self, haystack: &[u8]) -> Option<MatchHit<'s>> {
        self.entries.iter().find_map(|(sig, finder)| {
            finder.find(haystack).map(|pos| MatchHit {
                signature: *sig,
                offset: pos as u64,
            })
        })
    }

    /// Scan one file, choosing buffered or windowed mode by its size.
    pub fn scan_file(&self, path: &Path, config: &MatcherConfig) -> Result<Option<MatchHit<'s>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut file = File::open(path).map_err(|source| SwdError::io(path, source))?;
        let size = file
            .metadata()
            .map_err(|source| SwdError::io(path, source))?
            .len();

        if size > config.buffer_limit_bytes {
            return self
                .find_in_reader(&mut file, config.window_bytes)
                .map_err(|source| SwdError::io(path, source));
        }

        let capacity = usize::try_from(size).map_err(|_| SwdError::Allocation {
            path: path.to_path_buf(),
            requested: size,
        })?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| SwdError::Allocation {
                path: path.to_path_buf(),
                requested: size,
            })?;
        file.read_to_end(&mut buffer)
            .map_err(|source| SwdError::io(path, source))?;
        Ok(self.find_in_buffer(&buffer))
    }

    /// Stream `reader` through a sliding window.
    ///
    /// Signatures are searched in store order per window; once signature `k`
    /// has been seen, only signatures before `k` are searched in later windows,
    /// since only they could still win. Signature 0 ends the scan immediately.
    pub fn find_in_reader<R: Read>(
        &self,
        reader: &mut R,
        window_bytes: usize,
    ) -> io::Result<Option<MatchHit<'s>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let window = window_bytes.max(1);
        let overlap = self.longest.saturating_sub(1);

        let mut buffer: Vec<u8> = Vec::with_capacity(overlap + window);
        // Absolute file offset of buffer[0].
        let mut base: u64 = 0;
        let mut best: Option<(usize, u64)> = None;

        loop {
            let kept = buffer.len();
            buffer.resize(kept + window, 0);
            let read = fill(reader, &mut buffer[kept..])?;
            buffer.truncate(kept + read);
            if read == 0 {
                break;
            }

            let limit = best.map_or(self.entries.len(), |(idx, _)| idx);
            for (idx, (_, finder)) in self.entries[..limit].iter().enumerate() {
                if let Some(pos) = finder.find(&buffer) {
                    best = Some((idx, base + pos as u64));
                    break;
                }
            }
            if matches!(best, Some((0, _))) {
                break;
            }

            let consumed = buffer.len().saturating_sub(overlap);
            buffer.drain(..consumed);
            base += consumed as u64;
        }

        Ok(best.map(|(idx, offset)| MatchHit {
            signature: self.entries[idx].0,
            offset,
        }))
    }
}

/// Read until `buf` is full or EOF. Returns bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

// ──────────────────── tests ────────────────────
