//! Terminal feedback for the `invigilator` binary: startup stages and a live
//! session line. Falls back to plain stderr lines when not on a TTY.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::monitor::{FrameReport, RunSummary};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner(ProgressStyle::with_template("{spinner} {msg}"));
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live status line for the monitoring session.
    pub fn session(&self, hall: &str) -> SessionStatus {
        let spinner = self.use_pretty().then(|| {
            let bar = spinner(ProgressStyle::with_template("{spinner} [{elapsed}] {msg}"));
            bar.set_message(format!("{hall}: watching"));
            bar
        });
        SessionStatus {
            hall: hall.to_string(),
            spinner,
            confirmed: 0,
        }
    }
}

fn spinner(style: Result<ProgressStyle, indicatif::style::TemplateError>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_style(style.unwrap_or_else(|_| ProgressStyle::default_spinner()));
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Close the stage with the outcome of its work and pass the result on.
    ///
    /// An error result closes the stage with ✘ instead of ✔.
    pub fn finish<T, E>(mut self, result: Result<T, E>) -> Result<T, E> {
        self.record(&result);
        result
    }

    fn record<T, E>(&mut self, result: &Result<T, E>) {
        self.failed = result.is_err();
    }

    fn closing_line(&self) -> String {
        let mark = if self.failed { "✘" } else { "✔" };
        format!("{} {} ({})", mark, self.name, format_duration(self.start.elapsed()))
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = self.closing_line();
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct SessionStatus {
    hall: String,
    spinner: Option<ProgressBar>,
    confirmed: u64,
}

impl SessionStatus {
    pub fn frame(&mut self, report: &FrameReport) {
        let newly_confirmed = report.confirmed().count() as u64;
        self.confirmed += newly_confirmed;
        let Some(spinner) = &self.spinner else {
            return;
        };
        let active: Vec<&str> = report.signals.active().map(|k| k.label()).collect();
        let activity = if active.is_empty() {
            "quiet".to_string()
        } else {
            active.join(", ")
        };
        spinner.set_message(format!(
            "{}: frame {} | events {} | {}",
            self.hall, report.index, self.confirmed, activity
        ));
    }

    pub fn finish(self, summary: &RunSummary) {
        let message = summary_line(summary);
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "stopped ({:?}) after {} frames: {} confirmed, {} discarded, {} not persisted",
        summary.stop,
        summary.frames,
        summary.confirmed,
        summary.discarded,
        summary.persistence_failures
    )
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
