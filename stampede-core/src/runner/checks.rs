use std::panic::{AssertUnwindSafe, catch_unwind};

use super::stats::RunStats;

type Predicate<'a, T> = Box<dyn Fn(&T) -> bool + Send + 'a>;

/// A set of named assertions over one response (or any other subject).
///
/// ```
/// # use stampede_core::runner::Checks;
/// let checks = Checks::new()
///     .add("status is correct", |status: &u16| *status == 200)
///     .add("status is not server error", |status: &u16| *status < 500);
/// # let _ = checks;
/// ```
pub struct Checks<'a, T> {
    entries: Vec<(String, Predicate<'a, T>)>,
}

impl<T> Default for Checks<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> Checks<'a, T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn add(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + 'a,
    ) -> Self {
        self.entries.push((name.into(), Box::new(predicate)));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Evaluate every predicate against `subject` and record the outcomes.
///
/// Each predicate feeds a per-check result (tagged with the check name); the
/// evaluation as a whole feeds one aggregate `checks` sample and one `errors`
/// sample (true when any predicate failed). A panicking predicate counts as
/// a failure and is not propagated.
///
/// Returns the logical AND of all predicate outcomes.
pub fn run_checks<T>(
    stats: &RunStats,
    tags: &[(String, String)],
    subject: &T,
    checks: &Checks<'_, T>,
) -> bool {
    let mut all_passed = true;

    for (name, predicate) in &checks.entries {
        let passed = catch_unwind(AssertUnwindSafe(|| predicate(subject))).unwrap_or(false);
        all_passed &= passed;

        stats.record_check(name, passed, tags);
    }

    stats.record_check_evaluation(all_passed, tags);
    all_passed
}
