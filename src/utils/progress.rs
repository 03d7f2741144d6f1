//! Spinner for long-running phases such as dependency resolution.
//!
//! Spinners are hidden when the caller asks for it (`--no-progress`), when
//! `DEVFLOW_NO_PROGRESS` is set, or when stderr is not a terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

fn is_progress_disabled() -> bool {
    std::env::var_os("DEVFLOW_NO_PROGRESS").is_some() || !std::io::stderr().is_terminal()
}

/// A spinner with a message, hidden in non-interactive environments.
#[derive(Clone)]
pub struct Spinner {
    inner: ProgressBar,
}

impl Spinner {
    /// Spinner showing `message`; `hidden` forces it off.
    pub fn new(message: impl Into<String>, hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        bar.set_message(message.into());
        Self { inner: bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.inner.set_message(message.into());
    }

    pub fn finish_with_message(&self, message: impl Into<String>) {
        self.inner.finish_with_message(message.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_on_request() {
        let spinner = Spinner::new("Resolving", true);
        assert!(spinner.is_hidden());
        spinner.finish_and_clear();
    }
}
