//! Pipeline metrics.

use metrics::counter;

pub mod names {
    /// Page transitions by outcome (generated, failed, skipped)
    pub const PAGE_TRANSITIONS_TOTAL: &str = "storybook_page_transitions_total";
    /// Stories reaching a terminal status
    pub const STORIES_FINISHED_TOTAL: &str = "storybook_stories_finished_total";
    /// Reconciliation sweeps run
    pub const SWEEPS_TOTAL: &str = "storybook_sweeps_total";
    /// Pages resolved by a sweep rather than a webhook
    pub const SWEEP_RECOVERED_PAGES_TOTAL: &str = "storybook_sweep_recovered_pages_total";
    /// Credit movements by kind (debit, refund, grant)
    pub const CREDITS_TOTAL: &str = "storybook_credits_total";
    /// Page submissions by outcome
    pub const PAGE_SUBMISSIONS_TOTAL: &str = "storybook_page_submissions_total";
}

pub fn record_page_transition(outcome: &'static str, source: &'static str) {
    counter!(names::PAGE_TRANSITIONS_TOTAL, "outcome" => outcome, "source" => source).increment(1);
}

pub fn record_story_finished(status: &'static str) {
    counter!(names::STORIES_FINISHED_TOTAL, "status" => status).increment(1);
}

pub fn record_sweep(recovered: u64) {
    counter!(names::SWEEPS_TOTAL).increment(1);
    if recovered > 0 {
        counter!(names::SWEEP_RECOVERED_PAGES_TOTAL).increment(recovered);
    }
}

pub fn record_credits(kind: &'static str, amount: u32) {
    counter!(names::CREDITS_TOTAL, "kind" => kind).increment(amount as u64);
}

pub fn record_page_submission(ok: bool) {
    counter!(
        names::PAGE_SUBMISSIONS_TOTAL,
        "outcome" => if ok { "submitted" } else { "failed" }
    )
    .increment(1);
}
