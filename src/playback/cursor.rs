use super::TimeIndex;

/// What a position update means for the highlighted block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorUpdate {
    pub block: Option<usize>,
    pub block_changed: bool,
    /// A staged index was swapped in on this update
    pub index_swapped: bool,
}

/// Highlight tracker sitting between the audio element and the text.
///
/// A rebuilt index arriving mid-playback is staged and only swapped in at
/// the next block boundary, pause or explicit seek. The audio position is
/// never moved by a swap; only the highlighted block is re-derived from it.
#[derive(Debug, Clone, Default)]
pub struct PlaybackCursor {
    active: TimeIndex,
    pending: Option<TimeIndex>,
    playing: bool,
    position: f64,
    current_block: Option<usize>,
}

impl PlaybackCursor {
    pub fn new(index: TimeIndex) -> Self {
        Self {
            active: index,
            ..Self::default()
        }
    }

    pub fn index(&self) -> &TimeIndex {
        &self.active
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_block(&self) -> Option<usize> {
        self.current_block
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Installs a new index now when paused, otherwise stages it.
    /// Returns true when it took effect immediately.
    pub fn rebuild(&mut self, index: TimeIndex) -> bool {
        if self.playing {
            tracing::debug!("Staging rebuilt time index ({} blocks)", index.len());
            self.pending = Some(index);
            return false;
        }
        self.pending = None;
        self.active = index;
        self.current_block = self.active.time_to_block(self.position);
        true
    }

    /// Play/pause transition; pausing is a safe point to swap a staged index.
    /// Returns true when a staged index was applied.
    pub fn set_playing(&mut self, playing: bool) -> bool {
        self.playing = playing;
        !playing && self.swap_pending()
    }

    /// Feeds the player's current time.
    pub fn update_position(&mut self, t: f64) -> CursorUpdate {
        let previous = self.current_block;
        self.position = t;
        let mut block = self.active.time_to_block(t);
        let mut index_swapped = false;

        if self.pending.is_some() && block != previous {
            index_swapped = self.swap_pending();
            block = self.current_block;
        }

        self.current_block = block;
        CursorUpdate {
            block,
            block_changed: block != previous,
            index_swapped,
        }
    }

    /// Start time of `block`, moving the cursor there. Seeking is itself a
    /// discontinuity, so a staged index is applied first.
    pub fn seek_to_block(&mut self, block: usize) -> Option<f64> {
        if let Some(pending) = self.pending.take() {
            self.active = pending;
        }
        let span = self.active.block_to_time(block)?;
        self.position = span.start;
        self.current_block = Some(block);
        Some(span.start)
    }

    fn swap_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        self.active = pending;
        self.current_block = self.active.time_to_block(self.position);
        tracing::debug!(
            "Applied rebuilt time index at {:.3}s, block {:?}",
            self.position,
            self.current_block
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_follow_position() {
        let mut cursor = PlaybackCursor::new(TimeIndex::from_durations(&[2.0, 2.0, 2.0]));
        cursor.set_playing(true);

        let first = cursor.update_position(0.5);
        assert_eq!(first.block, Some(0));
        assert!(first.block_changed);

        let same = cursor.update_position(1.5);
        assert!(!same.block_changed);

        let next = cursor.update_position(2.1);
        assert_eq!(next.block, Some(1));
        assert!(next.block_changed);

        let past_end = cursor.update_position(6.0);
        assert_eq!(past_end.block, None);
    }

    #[test]
    fn rebuild_while_playing_waits_for_a_boundary() {
        let mut cursor = PlaybackCursor::new(TimeIndex::from_durations(&[2.0, 2.0, 2.0]));
        cursor.set_playing(true);
        cursor.update_position(1.0);

        assert!(!cursor.rebuild(TimeIndex::from_durations(&[4.0, 1.0, 1.0])));
        assert!(cursor.has_pending());

        // still inside block 0 under the old index: nothing moves
        let update = cursor.update_position(1.5);
        assert_eq!(update.block, Some(0));
        assert!(!update.index_swapped);
        assert!(cursor.has_pending());

        // crossing the old boundary swaps; 2.5s is still block 0 under the new index
        let update = cursor.update_position(2.5);
        assert!(!cursor.has_pending());
        assert!(update.index_swapped);
        assert_eq!(update.block, Some(0));
        assert!(!update.block_changed);
        assert_eq!(cursor.position(), 2.5);
        assert_eq!(cursor.index().total_duration(), 6.0);

        let update = cursor.update_position(4.5);
        assert_eq!(update.block, Some(1));
        assert!(update.block_changed);
    }

    #[test]
    fn rebuild_while_paused_applies_immediately() {
        let mut cursor = PlaybackCursor::new(TimeIndex::from_durations(&[1.0]));
        assert!(cursor.rebuild(TimeIndex::from_durations(&[1.0, 1.0])));
        assert_eq!(cursor.index().len(), 2);
    }

    #[test]
    fn pausing_applies_staged_index() {
        let mut cursor = PlaybackCursor::new(TimeIndex::from_durations(&[2.0, 2.0]));
        cursor.set_playing(true);
        cursor.update_position(3.0);
        cursor.rebuild(TimeIndex::from_durations(&[1.0, 1.0]));

        // position stays at 3.0s, which is past the end of the rebuilt index
        assert!(cursor.set_playing(false));
        assert_eq!(cursor.position(), 3.0);
        assert_eq!(cursor.current_block(), None);

        cursor.rebuild(TimeIndex::from_durations(&[2.0, 2.0]));
        assert_eq!(cursor.current_block(), Some(1));
    }

    #[test]
    fn seek_to_block_uses_latest_index() {
        let mut cursor = PlaybackCursor::new(TimeIndex::from_durations(&[2.0, 2.0]));
        cursor.set_playing(true);
        cursor.rebuild(TimeIndex::from_durations(&[3.0, 3.0]));

        assert_eq!(cursor.seek_to_block(1), Some(3.0));
        assert_eq!(cursor.current_block(), Some(1));
        assert_eq!(cursor.seek_to_block(7), None);
    }
}
