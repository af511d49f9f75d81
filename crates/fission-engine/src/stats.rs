//! Per-fragment execution statistics.

use fission_codec::{Output, SerializeOutput};
use fission_common::constants::PER_FRAGMENT_STATS_CAPACITY;
use fission_common::EngineResult;

/// Accumulates per-fragment timing for one batch.
///
/// Buffer layout: `[i8 timing_enabled][i32 succeeded_count][i64 ns…]`.
/// On a successful batch the buffer carries `succeeded_count` samples; on
/// a failed batch it carries `succeeded_count + 1`, the last being the
/// failing fragment's partial time.
#[derive(Debug)]
pub struct PerFragmentStats {
    out: SerializeOutput,
    timing_enabled: bool,
    samples: usize,
}

/// Byte offset of the back-patched succeeded count.
const SUCCEEDED_OFFSET: usize = 1;

impl PerFragmentStats {
    /// Creates an empty stats buffer.
    #[must_use]
    pub fn new() -> Self {
        let mut stats = Self {
            out: SerializeOutput::new(PER_FRAGMENT_STATS_CAPACITY),
            timing_enabled: false,
            samples: 0,
        };
        stats.reset(false).expect("fresh stats buffer");
        stats
    }

    /// Resets the buffer for a new batch.
    pub fn reset(&mut self, timing_enabled: bool) -> EngineResult<()> {
        self.out.reset();
        self.timing_enabled = timing_enabled;
        self.samples = 0;
        self.out.write_i8(i8::from(timing_enabled))?;
        self.out.write_i32(0)?;
        Ok(())
    }

    /// Returns true when timing is being collected for this batch.
    #[must_use]
    pub fn timing_enabled(&self) -> bool {
        self.timing_enabled
    }

    /// Records one fragment's execution time.
    pub fn record(&mut self, nanos: i64) -> EngineResult<()> {
        if !self.timing_enabled {
            return Ok(());
        }
        self.out.write_i64(nanos)?;
        self.samples += 1;
        Ok(())
    }

    /// Returns the number of recorded samples.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Back-patches the number of fragments that succeeded.
    pub fn finalize(&mut self, succeeded: i32) -> EngineResult<()> {
        self.out.write_i32_at(SUCCEEDED_OFFSET, succeeded)?;
        Ok(())
    }

    /// Returns the serialized stats buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.out.as_slice()
    }
}

impl Default for PerFragmentStats {
    fn default() -> Self {
        Self::new()
    }
}
