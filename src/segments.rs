use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// An operator-marked time interval of interest within one source video.
///
/// Segments are immutable once committed; indices are 1-based, assigned in
/// creation order, and never reused within a session except after a full
/// `remove_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub video_id: String,
    pub index: u32,
    pub start_time: f64,
    pub end_time: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Canonical `{video_id}_segment_{index}` name used for every artifact
    /// derived from this segment.
    pub fn name(&self) -> String {
        format!("{}_segment_{}", self.video_id, self.index)
    }
}

/// Outcome of buffering a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    StartMarked,
    /// A start was already pending; the latest mark wins.
    StartReplaced,
    EndMarked,
    /// `mark_end` with no pending start: there is nothing to attach the end to.
    NoActiveSegment,
}

/// Per-video annotation session: pending marks plus committed segments.
///
/// Explicit session objects replace ambient player state so independent
/// sessions (and tests) never share mutable state.
#[derive(Debug, Clone)]
pub struct AnnotationSession {
    video_id: String,
    source_duration: Option<f64>,
    segments: Vec<Segment>,
    /// Highest index ever assigned; only `remove_all` resets it.
    last_index: u32,
    pending_start: Option<f64>,
    pending_end: Option<f64>,
}

impl AnnotationSession {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            source_duration: None,
            segments: Vec::new(),
            last_index: 0,
            pending_start: None,
            pending_end: None,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Attach the probed source duration so out-of-range ends fail at commit
    /// rather than at export.
    pub fn set_source_duration(&mut self, duration_seconds: f64) {
        self.source_duration = Some(duration_seconds);
    }

    pub fn mark_start(&mut self, time: f64) -> MarkOutcome {
        let replaced = self.pending_start.is_some();
        self.pending_start = Some(time);
        if replaced {
            debug!("🔁 {}: pending start replaced at {:.3}s", self.video_id, time);
            MarkOutcome::StartReplaced
        } else {
            MarkOutcome::StartMarked
        }
    }

    pub fn mark_end(&mut self, time: f64) -> MarkOutcome {
        if self.pending_start.is_none() {
            return MarkOutcome::NoActiveSegment;
        }
        self.pending_end = Some(time);
        MarkOutcome::EndMarked
    }

    /// Validate the pending bounds and append a new segment.
    ///
    /// On failure the pending state is left untouched so the operator can
    /// correct just the offending bound.
    pub fn commit_segment(&mut self) -> Result<Segment> {
        let start = self
            .pending_start
            .ok_or_else(|| self.invalid("no start mark is pending"))?;
        let end = self
            .pending_end
            .ok_or_else(|| self.invalid("no end mark is pending"))?;

        if !start.is_finite() || !end.is_finite() {
            return Err(self.invalid("bounds must be finite"));
        }
        if start < 0.0 {
            return Err(self.invalid(format!("start time {start:.3}s is negative")));
        }
        if end <= start {
            return Err(self.invalid(format!(
                "end time {end:.3}s is not after start time {start:.3}s"
            )));
        }
        if let Some(duration) = self.source_duration {
            if end > duration {
                return Err(self.invalid(format!(
                    "end time {end:.3}s is past the {duration:.3}s source"
                )));
            }
        }

        self.last_index += 1;
        let segment = Segment {
            video_id: self.video_id.clone(),
            index: self.last_index,
            start_time: start,
            end_time: end,
        };
        self.segments.push(segment.clone());
        self.pending_start = None;
        self.pending_end = None;

        debug!(
            "📌 {}: committed segment {} [{:.3}s, {:.3}s)",
            self.video_id, segment.index, segment.start_time, segment.end_time
        );
        Ok(segment)
    }

    /// Remove the most recently committed segment. Its index is retired, not
    /// reused.
    pub fn remove_last(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Remove every committed segment and reset the index counter to 0.
    pub fn remove_all(&mut self) -> usize {
        let count = self.segments.len();
        self.segments.clear();
        self.pending_start = None;
        self.pending_end = None;
        self.last_index = 0;
        count
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn pending_start(&self) -> Option<f64> {
        self.pending_start
    }

    pub fn pending_end(&self) -> Option<f64> {
        self.pending_end
    }

    fn invalid(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::InvalidSegmentBounds {
            video_id: self.video_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Store of independent per-video annotation sessions.
///
/// No concurrent writers are assumed per video; sessions for different
/// videos are fully independent.
#[derive(Debug, Default)]
pub struct SegmentStore {
    sessions: HashMap<String, AnnotationSession>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the session for a video, optionally binding the probed
    /// source duration.
    pub fn open_session(
        &mut self,
        video_id: &str,
        source_duration: Option<f64>,
    ) -> &mut AnnotationSession {
        let session = self
            .sessions
            .entry(video_id.to_string())
            .or_insert_with(|| AnnotationSession::new(video_id));
        if let Some(duration) = source_duration {
            session.set_source_duration(duration);
        }
        session
    }

    pub fn mark_start(&mut self, video_id: &str, time: f64) -> MarkOutcome {
        self.open_session(video_id, None).mark_start(time)
    }

    pub fn mark_end(&mut self, video_id: &str, time: f64) -> MarkOutcome {
        match self.sessions.get_mut(video_id) {
            Some(session) => session.mark_end(time),
            None => MarkOutcome::NoActiveSegment,
        }
    }

    pub fn commit_segment(&mut self, video_id: &str) -> Result<Segment> {
        match self.sessions.get_mut(video_id) {
            Some(session) => session.commit_segment(),
            None => Err(PipelineError::InvalidSegmentBounds {
                video_id: video_id.to_string(),
                reason: "no start mark is pending".to_string(),
            }),
        }
    }

    pub fn remove_last(&mut self, video_id: &str) -> Option<Segment> {
        self.sessions.get_mut(video_id)?.remove_last()
    }

    pub fn remove_all(&mut self, video_id: &str) -> usize {
        self.sessions
            .get_mut(video_id)
            .map(AnnotationSession::remove_all)
            .unwrap_or(0)
    }

    pub fn list_segments(&self, video_id: &str) -> &[Segment] {
        self.sessions
            .get(video_id)
            .map(AnnotationSession::segments)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_commit() {
        let mut store = SegmentStore::new();
        assert_eq!(store.mark_start("v1", 2.0), MarkOutcome::StartMarked);
        assert_eq!(store.mark_end("v1", 5.0), MarkOutcome::EndMarked);

        let segment = store.commit_segment("v1").unwrap();
        assert_eq!(segment.index, 1);
        assert_eq!(segment.start_time, 2.0);
        assert_eq!(segment.end_time, 5.0);
        assert_eq!(segment.name(), "v1_segment_1");
        assert_eq!(store.list_segments("v1").len(), 1);
    }

    #[test]
    fn test_mark_end_without_start_is_noop() {
        let mut store = SegmentStore::new();
        assert_eq!(store.mark_end("v1", 5.0), MarkOutcome::NoActiveSegment);
        assert!(store.list_segments("v1").is_empty());

        // Same once a session exists but no start is pending.
        store.mark_start("v1", 1.0);
        store.mark_end("v1", 2.0);
        store.commit_segment("v1").unwrap();
        assert_eq!(store.mark_end("v1", 9.0), MarkOutcome::NoActiveSegment);
        assert_eq!(store.list_segments("v1").len(), 1);
    }

    #[test]
    fn test_pending_start_latest_wins() {
        let mut store = SegmentStore::new();
        assert_eq!(store.mark_start("v1", 2.0), MarkOutcome::StartMarked);
        assert_eq!(store.mark_start("v1", 3.0), MarkOutcome::StartReplaced);
        store.mark_end("v1", 5.0);

        let segment = store.commit_segment("v1").unwrap();
        assert_eq!(segment.start_time, 3.0);
    }

    #[test]
    fn test_invalid_bounds_leave_pending_untouched() {
        let mut store = SegmentStore::new();
        store.mark_start("v1", 5.0);
        store.mark_end("v1", 5.0);

        let err = store.commit_segment("v1").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSegmentBounds { .. }));

        // The operator corrects only the offending bound and retries.
        let session = store.open_session("v1", None);
        assert_eq!(session.pending_start(), Some(5.0));
        assert_eq!(session.pending_end(), Some(5.0));
        store.mark_end("v1", 7.5);
        let segment = store.commit_segment("v1").unwrap();
        assert_eq!(segment.index, 1);
        assert_eq!(segment.end_time, 7.5);
    }

    #[test]
    fn test_end_past_source_duration_rejected() {
        let mut store = SegmentStore::new();
        store.open_session("v1", Some(10.0));
        store.mark_start("v1", 2.0);
        store.mark_end("v1", 12.0);
        assert!(store.commit_segment("v1").is_err());

        store.mark_end("v1", 10.0);
        assert!(store.commit_segment("v1").is_ok());
    }

    #[test]
    fn test_indices_never_reused_after_remove_last() {
        let mut store = SegmentStore::new();
        for (start, end) in [(0.0, 1.0), (2.0, 3.0), (4.0, 5.0)] {
            store.mark_start("v1", start);
            store.mark_end("v1", end);
            store.commit_segment("v1").unwrap();
        }

        let removed = store.remove_last("v1").unwrap();
        assert_eq!(removed.index, 3);

        store.mark_start("v1", 6.0);
        store.mark_end("v1", 7.0);
        let segment = store.commit_segment("v1").unwrap();
        assert_eq!(segment.index, 4);

        let indices: Vec<u32> = store.list_segments("v1").iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 4]);
    }

    #[test]
    fn test_remove_all_resets_counter() {
        let mut store = SegmentStore::new();
        store.mark_start("v1", 0.0);
        store.mark_end("v1", 1.0);
        store.commit_segment("v1").unwrap();

        assert_eq!(store.remove_all("v1"), 1);
        assert!(store.list_segments("v1").is_empty());

        store.mark_start("v1", 2.0);
        store.mark_end("v1", 3.0);
        assert_eq!(store.commit_segment("v1").unwrap().index, 1);
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut store = SegmentStore::new();
        store.mark_start("v1", 0.0);
        store.mark_end("v1", 1.0);
        store.commit_segment("v1").unwrap();

        store.mark_start("v2", 4.0);
        store.mark_end("v2", 6.0);
        store.commit_segment("v2").unwrap();

        assert_eq!(store.list_segments("v1").len(), 1);
        assert_eq!(store.list_segments("v2").len(), 1);
        assert_eq!(store.list_segments("v2")[0].index, 1);

        store.remove_all("v1");
        assert_eq!(store.list_segments("v2").len(), 1);
    }
}
