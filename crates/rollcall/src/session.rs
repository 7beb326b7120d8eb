//! Session state for one class period.
//!
//! All attendance-loop state lives here and is advanced by
//! [`Session::tick`], a pure function of the previous state, the wall
//! clock, and the classified label of the current frame. The engine owns
//! a `Session` and feeds it once per captured frame; nothing in this
//! module touches the camera, the models, or the database.

use chrono::NaiveTime;
use rollcall_core::UNKNOWN_LABEL;
use std::collections::BTreeMap;

/// The attendance-taking window derived from the configured start time
/// and maximum duration.
#[derive(Debug, Clone, Copy)]
pub struct ClassWindow {
    start: NaiveTime,
    max_secs: u32,
}

/// Where the current wall-clock time falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// Class has not started yet.
    Pending,
    /// Attendance may be taken; `remaining_secs` until it closes.
    Open { remaining_secs: u32 },
    /// The window has elapsed for the day.
    Closed,
}

impl ClassWindow {
    pub fn new(start: NaiveTime, max_secs: u32) -> Self {
        Self { start, max_secs }
    }

    pub fn status(&self, now: NaiveTime) -> WindowStatus {
        let elapsed = (now - self.start).num_seconds();
        if elapsed < 0 {
            WindowStatus::Pending
        } else if elapsed > i64::from(self.max_secs) {
            WindowStatus::Closed
        } else {
            WindowStatus::Open {
                remaining_secs: self.max_secs - elapsed as u32,
            }
        }
    }
}

/// Consecutive-frame debounce state.
///
/// A single noisy frame must not mark anyone present: an identification
/// only counts once the same label has been observed in enough
/// consecutive frames. Frames with no detected face leave the state
/// untouched, so a brief detector dropout does not restart the count.
#[derive(Debug, Default)]
pub struct RecognitionState {
    previous: Option<String>,
    consecutive: u32,
}

impl RecognitionState {
    /// Record one observed label and return the updated consecutive count.
    ///
    /// The count increments when the label repeats and resets to zero when
    /// it changes, so a label must be seen `threshold + 1` frames in a row
    /// to reach a count of `threshold`.
    pub fn observe(&mut self, label: &str) -> u32 {
        if self.previous.as_deref() == Some(label) {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.previous = Some(label.to_string());
        self.consecutive
    }
}

/// Per-session attendance: student id → time-of-day string, first
/// recognition wins.
#[derive(Debug, Default)]
pub struct AttendanceSheet {
    entries: BTreeMap<String, String>,
}

impl AttendanceSheet {
    /// Record a student. Returns false (and changes nothing) when they
    /// are already on the sheet.
    pub fn mark(&mut self, student_id: &str, time: String) -> bool {
        if self.entries.contains_key(student_id) {
            return false;
        }
        self.entries.insert(student_id.to_string(), time);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drain the sheet for persistence, leaving it empty.
    pub fn take(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.entries)
    }
}

/// What one frame's tick produced.
#[derive(Debug)]
pub enum TickOutcome {
    /// Window closed; `flush` carries the sheet contents exactly once.
    Closed {
        flush: Option<BTreeMap<String, String>>,
    },
    /// Class has not started.
    Pending,
    /// No face observed this frame.
    NoFace { remaining_secs: u32 },
    /// A face was observed but not yet confirmed (count below threshold,
    /// or the label is unknown).
    Unconfirmed { remaining_secs: u32 },
    /// First confirmation of this student this session.
    Marked {
        student_id: String,
        remaining_secs: u32,
    },
    /// Confirmed again after already being marked; idempotent.
    AlreadyMarked {
        student_id: String,
        remaining_secs: u32,
    },
}

/// State for one class session: window, debounce state, and the sheet.
pub struct Session {
    window: ClassWindow,
    threshold: u32,
    state: RecognitionState,
    sheet: AttendanceSheet,
}

impl Session {
    pub fn new(window: ClassWindow, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            state: RecognitionState::default(),
            sheet: AttendanceSheet::default(),
        }
    }

    pub fn marked_count(&self) -> usize {
        self.sheet.len()
    }

    /// Advance the session by one frame.
    ///
    /// `observed` is the classified label of the first detected face, or
    /// `None` when the frame had no usable face.
    pub fn tick(&mut self, now: NaiveTime, observed: Option<&str>) -> TickOutcome {
        let remaining_secs = match self.window.status(now) {
            WindowStatus::Closed => {
                let flush = if self.sheet.is_empty() {
                    None
                } else {
                    Some(self.sheet.take())
                };
                return TickOutcome::Closed { flush };
            }
            WindowStatus::Pending => return TickOutcome::Pending,
            WindowStatus::Open { remaining_secs } => remaining_secs,
        };

        let Some(label) = observed else {
            // Deliberately no counter reset here.
            return TickOutcome::NoFace { remaining_secs };
        };

        let count = self.state.observe(label);

        if label == UNKNOWN_LABEL || count < self.threshold {
            return TickOutcome::Unconfirmed { remaining_secs };
        }

        let time = now.format("%H:%M:%S").to_string();
        if self.sheet.mark(label, time) {
            TickOutcome::Marked {
                student_id: label.to_string(),
                remaining_secs,
            }
        } else {
            TickOutcome::AlreadyMarked {
                student_id: label.to_string(),
                remaining_secs,
            }
        }
    }

    /// Drain any entries that were never flushed by a window-close tick.
    /// Used on operator quit.
    pub fn drain_unflushed(&mut self) -> Option<BTreeMap<String, String>> {
        if self.sheet.is_empty() {
            None
        } else {
            Some(self.sheet.take())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn session(threshold: u32) -> Session {
        // 09:00 start, 10-minute window
        Session::new(ClassWindow::new(t(9, 0, 0), 600), threshold)
    }

    #[test]
    fn window_status_phases() {
        let w = ClassWindow::new(t(9, 0, 0), 600);
        assert_eq!(w.status(t(8, 59, 59)), WindowStatus::Pending);
        assert_eq!(w.status(t(9, 0, 0)), WindowStatus::Open { remaining_secs: 600 });
        assert_eq!(w.status(t(9, 5, 0)), WindowStatus::Open { remaining_secs: 300 });
        assert_eq!(w.status(t(9, 10, 0)), WindowStatus::Open { remaining_secs: 0 });
        assert_eq!(w.status(t(9, 10, 1)), WindowStatus::Closed);
    }

    #[test]
    fn observe_counts_repeats_and_resets_on_change() {
        let mut state = RecognitionState::default();
        assert_eq!(state.observe("s1"), 0);
        assert_eq!(state.observe("s1"), 1);
        assert_eq!(state.observe("s1"), 2);
        assert_eq!(state.observe("s2"), 0);
        assert_eq!(state.observe("s2"), 1);
        assert_eq!(state.observe("s1"), 0);
    }

    #[test]
    fn confirmation_marks_exactly_once() {
        let mut s = session(3);
        let now = t(9, 1, 0);

        // Frames 1-3: counter 0, 1, 2 — below threshold.
        for _ in 0..3 {
            assert!(matches!(
                s.tick(now, Some("s1001")),
                TickOutcome::Unconfirmed { .. }
            ));
        }
        // Frame 4: counter reaches 3 — marked.
        assert!(matches!(
            s.tick(now, Some("s1001")),
            TickOutcome::Marked { ref student_id, .. } if student_id == "s1001"
        ));
        // Further frames stay idempotent.
        for _ in 0..5 {
            assert!(matches!(
                s.tick(now, Some("s1001")),
                TickOutcome::AlreadyMarked { .. }
            ));
        }
        assert_eq!(s.marked_count(), 1);
    }

    #[test]
    fn identity_switch_resets_progress() {
        let mut s = session(3);
        let now = t(9, 1, 0);

        s.tick(now, Some("s1001"));
        s.tick(now, Some("s1001"));
        s.tick(now, Some("s1001"));
        // Interloper resets the count; s1001 must start over.
        s.tick(now, Some("s2002"));
        assert!(matches!(
            s.tick(now, Some("s1001")),
            TickOutcome::Unconfirmed { .. }
        ));
        assert_eq!(s.marked_count(), 0);
    }

    #[test]
    fn no_face_preserves_progress() {
        let mut s = session(2);
        let now = t(9, 1, 0);

        s.tick(now, Some("s1001")); // count 0
        s.tick(now, Some("s1001")); // count 1
        s.tick(now, None); // dropout, state untouched
        assert!(matches!(
            s.tick(now, Some("s1001")), // count 2 — confirmed
            TickOutcome::Marked { .. }
        ));
    }

    #[test]
    fn unknown_is_never_marked() {
        let mut s = session(1);
        let now = t(9, 1, 0);

        for _ in 0..10 {
            assert!(matches!(
                s.tick(now, Some("unknown")),
                TickOutcome::Unconfirmed { .. }
            ));
        }
        assert_eq!(s.marked_count(), 0);
    }

    #[test]
    fn window_close_flushes_exactly_once() {
        let mut s = session(0);
        s.tick(t(9, 1, 0), Some("s1001"));
        s.tick(t(9, 1, 0), Some("s1001"));
        assert_eq!(s.marked_count(), 1);

        let TickOutcome::Closed { flush } = s.tick(t(9, 30, 0), None) else {
            panic!("expected Closed outcome");
        };
        let entries = flush.expect("first close tick should flush");
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("s1001"));

        // Later closed ticks carry nothing.
        let TickOutcome::Closed { flush } = s.tick(t(9, 31, 0), None) else {
            panic!("expected Closed outcome");
        };
        assert!(flush.is_none());
    }

    #[test]
    fn quit_drains_unflushed_entries() {
        let mut s = session(0);
        s.tick(t(9, 1, 0), Some("s1001"));
        s.tick(t(9, 1, 0), Some("s1001"));

        let entries = s.drain_unflushed().expect("sheet was non-empty");
        assert_eq!(entries.len(), 1);
        assert!(s.drain_unflushed().is_none());
    }

    #[test]
    fn pending_before_start() {
        let mut s = session(1);
        assert!(matches!(s.tick(t(8, 30, 0), Some("s1001")), TickOutcome::Pending));
        assert_eq!(s.marked_count(), 0);
    }

    #[test]
    fn marked_time_is_time_of_day() {
        let mut s = session(1);
        s.tick(t(9, 2, 17), Some("s1001"));
        s.tick(t(9, 2, 18), Some("s1001"));

        let entries = s.drain_unflushed().unwrap();
        assert_eq!(entries["s1001"], "09:02:18");
    }
}
