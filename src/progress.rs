//! Project change notification.
//!
//! The scheduler notifies every registered [`ProjectListener`] synchronously
//! after each persisted project change. The CLI registers one of the
//! reporters below; they write to **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

use uplink_core::models::Project;

/// Observer of persisted project state.
pub trait ProjectListener: Send + Sync {
    /// Called after `project` has been written to the store.
    fn project_changed(&self, project: &Project);
}

/// Human-friendly progress on stderr:
/// `project 3 (alpha)  Validating...  validated 1,200  invalid 30  uploaded 0`.
pub struct StderrProgress;

impl ProjectListener for StderrProgress {
    fn project_changed(&self, project: &Project) {
        let mut line = format!(
            "project {} ({})  {}  validated {}  invalid {}  uploaded {}",
            project.id,
            project.name,
            project.status,
            format_number(project.records_validated),
            format_number(project.records_invalid),
            format_number(project.records_uploaded),
        );
        if project.paused {
            line.push_str("  [paused]");
        }
        if let Some(err) = &project.last_error {
            line.push_str(&format!("  error: {}", err));
        }
        line.push('\n');
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProjectListener for JsonProgress {
    fn project_changed(&self, project: &Project) {
        let obj = serde_json::json!({
            "event": "project",
            "id": project.id,
            "status": project.status.as_str(),
            "in_progress": project.in_progress,
            "paused": project.paused,
            "idle": project.idle,
            "records_validated": project.records_validated,
            "records_invalid": project.records_invalid,
            "records_uploaded": project.records_uploaded,
            "error": project.last_error,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op listener when progress is disabled.
pub struct NoProgress;

impl ProjectListener for NoProgress {
    fn project_changed(&self, _project: &Project) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn listener(&self) -> Box<dyn ProjectListener> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
