use std::collections::BTreeSet;

use tracing::trace;

use crate::{
    display::DisplayKey,
    engine::{DisplayRequest, EngineResult, EngineSink},
    value::Value,
};

/// One `Write-Progress` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub id: i64,
    pub activity: String,
    pub status: String,
    /// `None` draws no bar.
    pub percent_complete: Option<i64>,
    pub completed: bool,
}

/// Renders a record as three text lines: activity, status and a bar of
/// `width` cells.
pub fn render(record: &ProgressRecord, width: usize) -> String {
    let bar = match record.percent_complete {
        Some(percent) => {
            let filled = width * percent.clamp(0, 100) as usize / 100;
            format!("[{}{}]", "o".repeat(filled), " ".repeat(width - filled))
        }
        None => String::new(),
    };
    format!(" {}\n {}\n {} \n", record.activity, record.status, bar)
}

pub fn display_key(id: i64) -> DisplayKey {
    DisplayKey::new(format!("progress-{}", id))
}

/// Progress displays that are still on screen for the current submission.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active: BTreeSet<i64>,
    width: usize,
}

impl ProgressTracker {
    pub fn new(width: usize) -> Self {
        Self {
            active: BTreeSet::new(),
            width,
        }
    }

    pub fn write(&mut self, record: &ProgressRecord, sink: &EngineSink) -> EngineResult<()> {
        let key = display_key(record.id);
        if record.completed {
            if self.active.remove(&record.id) {
                trace!("Progress {} completed", record.id);
                sink.display(DisplayRequest::completing(key, Value::String(String::new())))?;
            }
            return Ok(());
        }
        self.active.insert(record.id);
        sink.display(DisplayRequest::keyed(
            key,
            Value::String(render(record, self.width)),
        ))
    }

    /// Blanks every display still open. Called when a submission ends.
    pub fn clear(&mut self, sink: &EngineSink) -> EngineResult<()> {
        for id in std::mem::take(&mut self.active) {
            sink.display(DisplayRequest::completing(
                display_key(id),
                Value::String(String::new()),
            ))?;
        }
        Ok(())
    }

    pub fn is_active(&self, id: i64) -> bool {
        self.active.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::EngineOutput;

    fn record(percent: Option<i64>) -> ProgressRecord {
        ProgressRecord {
            id: 1,
            activity: "Search in Progress".to_string(),
            status: "Working".to_string(),
            percent_complete: percent,
            completed: false,
        }
    }

    #[test]
    fn test_render_bar() {
        assert_eq!(
            render(&record(Some(50)), 4),
            " Search in Progress\n Working\n [oo  ] \n"
        );
        assert_eq!(
            render(&record(Some(0)), 3),
            " Search in Progress\n Working\n [   ] \n"
        );
        assert_eq!(
            render(&record(Some(150)), 3),
            " Search in Progress\n Working\n [ooo] \n"
        );
        assert_eq!(render(&record(None), 3), " Search in Progress\n Working\n  \n");
    }

    #[test]
    fn test_clear_completes_active_displays() {
        let (sink, mut rx) = EngineSink::channel();
        let mut tracker = ProgressTracker::new(10);
        tracker.write(&record(Some(10)), &sink).unwrap();
        assert!(tracker.is_active(1));
        tracker.clear(&sink).unwrap();
        assert!(!tracker.is_active(1));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(first, EngineOutput::Display(DisplayRequest { completes: false, .. })));
        assert_eq!(
            second,
            EngineOutput::Display(DisplayRequest::completing(
                display_key(1),
                Value::String(String::new())
            ))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_completed_without_active_display_is_silent() {
        let (sink, mut rx) = EngineSink::channel();
        let mut tracker = ProgressTracker::new(10);
        let mut completed = record(None);
        completed.completed = true;
        tracker.write(&completed, &sink).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
