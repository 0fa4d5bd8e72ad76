//! Ordered compensating actions.
//!
//! A [`CleanupList`] collects the steps that undo partially completed work.
//! Steps run newest first, either explicitly through [`CleanupList::run`] or
//! when the list is dropped without being dismissed. A failing step is logged
//! and never stops the remaining steps, and it never replaces the error the
//! caller is already returning.

use strata_common::error::{Result, StrataError};

type Step<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Compensating actions to run if an operation does not complete.
#[derive(Default)]
pub struct CleanupList<'a> {
    steps: Vec<(&'static str, Step<'a>)>,
}

impl<'a> CleanupList<'a> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Registers a step, labelled for logging.
    pub fn push(&mut self, label: &'static str, step: impl FnOnce() -> Result<()> + 'a) {
        self.steps.push((label, Box::new(step)));
    }

    /// Returns the number of pending steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no steps are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Discards all pending steps; the guarded work completed.
    pub fn dismiss(mut self) {
        self.steps.clear();
    }

    /// Runs all pending steps newest first and returns their failures.
    pub fn run(mut self) -> Vec<StrataError> {
        self.run_pending()
    }

    fn run_pending(&mut self) -> Vec<StrataError> {
        let mut failures = Vec::new();
        while let Some((label, step)) = self.steps.pop() {
            if let Err(e) = step() {
                tracing::warn!(step = label, error = %e, "cleanup step failed");
                failures.push(e);
            }
        }
        failures
    }
}

impl Drop for CleanupList<'_> {
    fn drop(&mut self) {
        let _ = self.run_pending();
    }
}

impl std::fmt::Debug for CleanupList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(label, _)| label))
            .finish()
    }
}
