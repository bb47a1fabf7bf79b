//! Progress tracking for migration runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current phase of migration.
    pub phase: MigrationPhase,

    /// Repository the phase applies to, if any.
    pub repository: Option<String>,

    /// Repositories finished so far.
    pub completed: u64,

    /// Repositories planned for this run.
    pub total: u64,
}

/// States of a migration run, in the order they are entered.
///
/// The `Repo*` states and `CollaboratorsApplied` repeat once per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationPhase {
    Start,
    ProjectResolved,
    PermissionsResolved,
    UsersEnsured,
    OrgEnsured,
    RepoResolved,
    RepoPermissionsResolved,
    RepoUsersEnsured,
    RepoMigrated,
    CollaboratorsApplied,
    Done,
}

impl MigrationPhase {
    const ALL: [MigrationPhase; 11] = [
        Self::Start,
        Self::ProjectResolved,
        Self::PermissionsResolved,
        Self::UsersEnsured,
        Self::OrgEnsured,
        Self::RepoResolved,
        Self::RepoPermissionsResolved,
        Self::RepoUsersEnsured,
        Self::RepoMigrated,
        Self::CollaboratorsApplied,
        Self::Done,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(Self::Done)
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "Starting"),
            Self::ProjectResolved => write!(f, "Project resolved"),
            Self::PermissionsResolved => write!(f, "Project permissions resolved"),
            Self::UsersEnsured => write!(f, "Users ensured"),
            Self::OrgEnsured => write!(f, "Organization and teams ensured"),
            Self::RepoResolved => write!(f, "Repository resolved"),
            Self::RepoPermissionsResolved => write!(f, "Repository permissions resolved"),
            Self::RepoUsersEnsured => write!(f, "Repository users ensured"),
            Self::RepoMigrated => write!(f, "Repository imported"),
            Self::CollaboratorsApplied => write!(f, "Collaborators applied"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Progress tracker for migration runs.
pub struct MigrationProgress {
    phase: AtomicU8,
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl MigrationProgress {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(MigrationPhase::Start as u8),
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Enter a phase, optionally scoped to a repository.
    pub fn set_phase(&self, phase: MigrationPhase, repository: Option<&str>) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.notify(repository.map(str::to_string));
    }

    /// Set how many repositories this run covers.
    pub fn set_total(&self, total: u64) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Mark one repository as finished, successfully or not.
    pub fn repository_finished(&self, repository: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(Some(repository.to_string()));
    }

    /// Get current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }

    /// Get current phase.
    pub fn current_phase(&self) -> MigrationPhase {
        MigrationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn notify(&self, repository: Option<String>) {
        if let Some(callback) = &self.callback {
            let update = ProgressUpdate {
                phase: self.current_phase(),
                repository,
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
            };
            callback(update);
        }
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Console progress reporter using indicatif.
///
/// The bar stays hidden until [`start`](Self::start), so commands that never
/// migrate print nothing.
pub struct ConsoleProgressReporter {
    progress_bar: ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    pub fn new() -> Self {
        let progress_bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);

        Self { progress_bar }
    }

    /// Draw the bar on stderr and start the spinner.
    pub fn start(&self) {
        self.progress_bar
            .set_draw_target(ProgressDrawTarget::stderr());
        self.progress_bar
            .enable_steady_tick(std::time::Duration::from_millis(120));
    }

    /// Create a progress callback for use with migration.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Box::new(move |update: ProgressUpdate| {
            pb.set_length(update.total);
            pb.set_position(update.completed);

            let msg = match &update.repository {
                Some(repo) => format!("{}: {repo}", update.phase),
                None => update.phase.to_string(),
            };
            pb.set_message(msg);
        })
    }

    /// Stderr writer that clears the bar while a line is written, for log
    /// output that shares the terminal with the bar.
    pub fn log_writer(&self) -> ProgressLogWriter {
        ProgressLogWriter {
            progress_bar: self.progress_bar.clone(),
        }
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }

    pub fn is_hidden(&self) -> bool {
        self.progress_bar.is_hidden()
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes to stderr with the progress bar suspended.
#[derive(Clone)]
pub struct ProgressLogWriter {
    progress_bar: ProgressBar,
}

impl io::Write for ProgressLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress_bar
            .suspend(|| io::stderr().write_all(buf))
            .map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_tracker() {
        let progress = MigrationProgress::new();
        assert_eq!(progress.current_phase(), MigrationPhase::Start);

        progress.set_total(4);
        progress.set_phase(MigrationPhase::RepoMigrated, Some("api"));
        assert_eq!(progress.current_phase(), MigrationPhase::RepoMigrated);
        assert_eq!(progress.percentage(), 0.0);

        progress.repository_finished("api");
        assert!((progress.percentage() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_with_callback_records_phases() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);

        let progress = MigrationProgress::with_callback(Box::new(move |update: ProgressUpdate| {
            seen.lock().unwrap().push(update.phase);
        }));

        progress.set_phase(MigrationPhase::ProjectResolved, None);
        progress.set_phase(MigrationPhase::OrgEnsured, None);
        progress.set_phase(MigrationPhase::Done, None);

        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                MigrationPhase::ProjectResolved,
                MigrationPhase::OrgEnsured,
                MigrationPhase::Done
            ]
        );
    }

    #[test]
    fn test_console_reporter_hidden_until_started() {
        let reporter = ConsoleProgressReporter::new();
        assert!(reporter.is_hidden());

        let callback = reporter.callback();
        callback(ProgressUpdate {
            phase: MigrationPhase::RepoMigrated,
            repository: Some("api".to_string()),
            completed: 1,
            total: 2,
        });
        assert!(reporter.is_hidden());

        let mut writer = reporter.log_writer();
        assert_eq!(writer.write(b"log line\n").unwrap(), 9);
        writer.flush().unwrap();
        reporter.finish("done");
    }
}
