use super::{EventLog, LogEntryKind};
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Per-type entry counts and elapsed time. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub total_entries: usize,
    pub counts: BTreeMap<&'static str, usize>,
    pub unanswered_questions: usize,
    pub unrecovered_errors: usize,
    pub active_step: String,
    pub completed: bool,
    #[serde(serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
}

fn serialize_seconds<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(elapsed.num_seconds())
}

impl LogSummary {
    pub fn count(&self, type_name: &str) -> usize {
        self.counts.get(type_name).copied().unwrap_or(0)
    }
}

pub fn get_log_summary(log: &EventLog) -> LogSummary {
    let mut counts = BTreeMap::new();
    let mut unanswered_questions = 0;
    let mut unrecovered_errors = 0;

    for entry in &log.entries {
        *counts.entry(entry.type_name()).or_insert(0) += 1;
        match &entry.kind {
            LogEntryKind::AskUser { response: None, .. } => unanswered_questions += 1,
            LogEntryKind::Error {
                recovered: false, ..
            } => unrecovered_errors += 1,
            _ => {}
        }
    }

    LogSummary {
        total_entries: log.entries.len(),
        counts,
        unanswered_questions,
        unrecovered_errors,
        active_step: log.active_step.clone(),
        completed: log.completed,
        elapsed: log.updated_at - log.started_at,
    }
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.num_seconds();
        writeln!(
            f,
            "step {} | {} entries | elapsed {}h{:02}m{:02}s{}",
            self.active_step,
            self.total_entries,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            if self.completed { " | completed" } else { "" }
        )?;
        for (type_name, count) in &self.counts {
            writeln!(f, "  {:<18}{}", type_name, count)?;
        }
        if self.unanswered_questions > 0 {
            writeln!(f, "  open questions    {}", self.unanswered_questions)?;
        }
        if self.unrecovered_errors > 0 {
            writeln!(f, "  open errors       {}", self.unrecovered_errors)?;
        }
        Ok(())
    }
}
