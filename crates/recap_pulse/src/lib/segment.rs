use serde::{Deserialize, Serialize};

/// Hard cap on fan-out: never more than three parts, trading per-part
/// accuracy for a bounded number of provider calls per job.
pub const MAX_PARTS: u32 = 3;

/// One time-bounded slice of the source media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentWindow {
    /// 1-based part number.
    pub part_index: u32,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

impl SegmentWindow {
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }
}

/// Ordered windows covering the full asset duration with no gaps and
/// no overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub parts: Vec<SegmentWindow>,
}

impl SegmentPlan {
    /// Decide how many equal-duration parts the asset needs and lay
    /// out their time ranges.
    ///
    /// One part if the asset fits a single provider call, two up to
    /// twice the limit, three otherwise. The final window absorbs the
    /// rounding remainder so the windows sum exactly to the total
    /// duration. A single-part plan covers the whole asset from zero,
    /// so downstream code has no "unsplit" special case.
    pub fn plan(
        total_duration_seconds: f64,
        total_size_bytes: u64,
        part_size_limit_bytes: u64,
    ) -> SegmentPlan {
        let count = if total_size_bytes <= part_size_limit_bytes {
            1
        } else if total_size_bytes <= part_size_limit_bytes * 2 {
            2
        } else {
            MAX_PARTS
        };

        let width = total_duration_seconds / f64::from(count);
        let parts = (0..count)
            .map(|i| {
                let start_seconds = f64::from(i) * width;
                let duration_seconds = if i == count - 1 {
                    total_duration_seconds - start_seconds
                } else {
                    width
                };
                SegmentWindow {
                    part_index: i + 1,
                    start_seconds,
                    duration_seconds,
                }
            })
            .collect();

        SegmentPlan { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.parts.len() == 1
    }
}
