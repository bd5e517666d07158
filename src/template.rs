//! # Template Cache
//!
//! Single-slot owner of the decoded full-screen template bitmap. The
//! template is the pre-rendered static background (logos, section headers,
//! rules) that partial updates draw over; keeping it resident across cycles
//! is what makes partial refreshes possible at all on a device with a few
//! hundred kilobytes of RAM.
//!
//! ## Staleness and retention
//!
//! The cache is stale when it has never decoded anything, or when the cycle
//! counter says the periodic full repaint is due. A stale cache fetches
//! fresh compressed bytes and decodes them into a scratch allocation; only a
//! complete, successful decode replaces the active buffer. Any failure —
//! fetch error, decode error, dimension mismatch, memory-threshold refusal —
//! keeps the previous buffer byte-for-byte intact and reports
//! [`CacheError::RetainedStale`] (or [`CacheError::Empty`] on first run), so
//! the scheduler can fall back to text-only rendering instead of corrupting
//! or dropping a working background.
//!
//! ## Memory discipline
//!
//! Free memory is probed against a configured floor *before* the decode
//! buffer is allocated. Running the allocator into the ground on a small
//! board is an unrecoverable crash; refusing the allocation is a one-cycle
//! degradation.

use crate::panel::PixelDepth;
use crate::raster;
use crate::source::FetchError;
use std::fs;
use thiserror::Error;

/// Cache-level failures. Both leave prior cache contents untouched.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Refresh failed but an earlier template is still cached and usable
    #[error("template refresh failed ({cause}); retaining previous bitmap")]
    RetainedStale { cause: String },

    /// Refresh failed and nothing was ever cached
    #[error("no template available ({cause})")]
    Empty { cause: String },
}

/// Outcome of a successful [`TemplateCache::ensure_fresh`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// A new template was decoded this cycle; the caller must repaint Full
    /// and reset the cycle counter
    Fresh,
    /// The existing buffer is still within its staleness window
    Cached,
}

/// The decoded template bitmap, packed at panel depth.
/// Owned exclusively by the cache; borrowed read-only by the scheduler.
pub struct TemplateBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl TemplateBuffer {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Source of the "how much free memory is there" answer, injectable so the
/// threshold logic is testable off-target.
pub trait MemoryProbe {
    /// Available bytes, or `None` when the platform cannot say.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from /proc/meminfo. An unreadable or unparsable
/// file answers `None`, which the cache treats as "enough": the floor
/// exists to protect constrained targets, not to block development hosts.
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemAvailable:") {
                let kib: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kib * 1024);
            }
        }
        None
    }
}

/// Fixed-answer probe for tests.
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// Single-slot, lazily allocated cache for the decoded template.
pub struct TemplateCache {
    width: u32,
    height: u32,
    depth: PixelDepth,
    full_refresh_period: u32,
    min_free_bytes: u64,
    buffer: Option<TemplateBuffer>,
}

impl TemplateCache {
    pub fn new(
        width: u32,
        height: u32,
        depth: PixelDepth,
        full_refresh_period: u32,
        min_free_bytes: u64,
    ) -> Self {
        Self {
            width,
            height,
            depth,
            full_refresh_period,
            min_free_bytes,
            buffer: None,
        }
    }

    /// The cached bitmap, if any. Still valid after a `RetainedStale` error.
    pub fn buffer(&self) -> Option<&TemplateBuffer> {
        self.buffer.as_ref()
    }

    /// Drop the cached bitmap; the next cycle decodes from scratch.
    pub fn invalidate(&mut self) {
        self.buffer = None;
    }

    /// Stale when nothing is cached yet or the periodic repaint is due.
    pub fn is_stale(&self, cycle_counter: u32) -> bool {
        self.buffer.is_none() || cycle_counter >= self.full_refresh_period
    }

    /// Make sure the cache holds a usable template, refreshing it when
    /// stale. `fetch` is only invoked on the stale path.
    ///
    /// Returns [`Freshness::Fresh`] when a new bitmap was decoded this call
    /// (the caller must treat the cycle as a Full repaint) and
    /// [`Freshness::Cached`] when the existing one is still current.
    pub fn ensure_fresh<F>(
        &mut self,
        cycle_counter: u32,
        fetch: F,
        probe: &dyn MemoryProbe,
    ) -> Result<Freshness, CacheError>
    where
        F: FnOnce() -> Result<Vec<u8>, FetchError>,
    {
        if !self.is_stale(cycle_counter) {
            return Ok(Freshness::Cached);
        }

        let need = self.depth.buffer_len(self.width, self.height) as u64;
        if let Some(free) = probe.available_bytes() {
            if free < self.min_free_bytes.saturating_add(need) {
                return Err(self.failure(format!(
                    "{} bytes free, need {} plus {} floor",
                    free, need, self.min_free_bytes
                )));
            }
        }

        let compressed = match fetch() {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.failure(format!("fetch: {}", e))),
        };

        // Decode into a scratch allocation; the active buffer is only
        // replaced after the whole image decoded cleanly.
        let mut scratch = vec![0u8; need as usize];
        match raster::decode(&compressed, &mut scratch, self.width, self.height, self.depth) {
            Ok(_) => {
                self.buffer = Some(TemplateBuffer {
                    pixels: scratch,
                    width: self.width,
                    height: self.height,
                });
                Ok(Freshness::Fresh)
            }
            Err(e) => Err(self.failure(format!("decode: {}", e))),
        }
    }

    fn failure(&self, cause: String) -> CacheError {
        if self.buffer.is_some() {
            CacheError::RetainedStale { cause }
        } else {
            CacheError::Empty { cause }
        }
    }
}
