use std::ops::AddAssign;

/// Aggregate outcome of a batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleApplyResult {
    is_succeeded: bool,
    succeed_count: usize,
    failed_count: usize,
    skipped_count: usize,
}

impl RuleApplyResult {
    pub fn is_succeeded(&self) -> bool {
        self.is_succeeded
    }

    pub fn succeed_count(&self) -> usize {
        self.succeed_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// Items never attempted because the batch was cancelled
    pub fn skipped_count(&self) -> usize {
        self.skipped_count
    }

    pub fn total(&self) -> usize {
        self.succeed_count + self.failed_count + self.skipped_count
    }
}

/// Incremental counter that produces a [`RuleApplyResult`] once a batch is done
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyTally {
    succeeded: usize,
    failed: usize,
    skipped: usize,
}

impl ApplyTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, count: usize) {
        self.succeeded += count;
    }

    pub fn fail(&mut self, count: usize) {
        self.failed += count;
    }

    pub fn skip(&mut self, count: usize) {
        self.skipped += count;
    }

    pub fn finish(self) -> RuleApplyResult {
        RuleApplyResult {
            is_succeeded: self.failed == 0 && self.skipped == 0,
            succeed_count: self.succeeded,
            failed_count: self.failed,
            skipped_count: self.skipped,
        }
    }
}

impl AddAssign<RuleApplyResult> for ApplyTally {
    fn add_assign(&mut self, rhs: RuleApplyResult) {
        self.succeeded += rhs.succeed_count;
        self.failed += rhs.failed_count;
        self.skipped += rhs.skipped_count;
    }
}
