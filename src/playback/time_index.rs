use crate::api::Chunk;
use serde::Serialize;

/// Shortest span an estimated block gets, so every block stays seekable
pub const MIN_BLOCK_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Where a block's duration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DurationSource {
    Measured,
    Estimated,
}

/// Playback position <-> text block mapping. Spans are contiguous and
/// ordered: block `i` covers `[spans[i].start, spans[i].end)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeIndex {
    spans: Vec<TimeSpan>,
    sources: Vec<DurationSource>,
}

impl TimeIndex {
    /// Builds from per-block durations in block order. Non-finite or
    /// non-positive durations fall back to `MIN_BLOCK_SECS`.
    pub fn from_durations(durations: &[f64]) -> Self {
        let mut index = Self::default();
        for &duration in durations {
            index.push(sanitize(duration), DurationSource::Measured);
        }
        index
    }

    /// Builds from chunks in `order_index` order, using the measured
    /// duration where present and a text-length estimate otherwise.
    pub fn from_chunks(chunks: &[Chunk], reading_rate_wpm: u32) -> Self {
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.order_index);

        let mut index = Self::default();
        for chunk in ordered {
            match chunk.duration_secs.filter(|d| d.is_finite() && *d > 0.0) {
                Some(measured) => index.push(measured, DurationSource::Measured),
                None => index.push(
                    estimate_duration_secs(&chunk.text, reading_rate_wpm),
                    DurationSource::Estimated,
                ),
            }
        }
        index
    }

    fn push(&mut self, duration: f64, source: DurationSource) {
        let start = self.total_duration();
        self.spans.push(TimeSpan {
            start,
            end: start + duration,
        });
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.spans.last().map(|s| s.end).unwrap_or(0.0)
    }

    /// True when every block uses a measured duration
    pub fn is_measured(&self) -> bool {
        self.sources.iter().all(|s| *s == DurationSource::Measured)
    }

    pub fn source(&self, block: usize) -> Option<DurationSource> {
        self.sources.get(block).copied()
    }

    /// Block playing at `t`, or `None` outside `[0, total_duration)`.
    pub fn time_to_block(&self, t: f64) -> Option<usize> {
        if !t.is_finite() || t < 0.0 || t >= self.total_duration() {
            return None;
        }
        let idx = self.spans.partition_point(|span| span.end <= t);
        self.spans
            .get(idx)
            .filter(|span| span.contains(t))
            .map(|_| idx)
    }

    pub fn block_to_time(&self, block: usize) -> Option<TimeSpan> {
        self.spans.get(block).copied()
    }

    pub fn spans(&self) -> &[TimeSpan] {
        &self.spans
    }
}

/// Reading-time estimate at `reading_rate_wpm` words per minute.
pub fn estimate_duration_secs(text: &str, reading_rate_wpm: u32) -> f64 {
    let words = text.split_whitespace().count();
    let wpm = reading_rate_wpm.max(1) as f64;
    (words as f64 / wpm * 60.0).max(MIN_BLOCK_SECS)
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        MIN_BLOCK_SECS
    }
}
