//! Structured page logging.
//!
//! Keeps story, page and job ids on every page lifecycle event so a single
//! page can be followed through submission, webhook and sweep.

use tracing::{error, info, warn, Span};

use story_models::{JobId, StoryPage};

#[derive(Debug, Clone)]
pub struct PageLogger {
    story_id: String,
    page_id: String,
    page_number: u32,
    job_id: Option<String>,
}

impl PageLogger {
    pub fn new(page: &StoryPage) -> Self {
        Self {
            story_id: page.story_id.to_string(),
            page_id: page.id.to_string(),
            page_number: page.page_number,
            job_id: page.job_id.as_ref().map(|j| j.to_string()),
        }
    }

    pub fn with_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    fn job(&self) -> &str {
        self.job_id.as_deref().unwrap_or("-")
    }

    pub fn log_submitted(&self, backend: &str) {
        info!(
            story_id = %self.story_id,
            page_id = %self.page_id,
            page_number = self.page_number,
            job_id = %self.job(),
            backend,
            "Page job submitted"
        );
    }

    pub fn log_generated(&self, source: &str) {
        info!(
            story_id = %self.story_id,
            page_id = %self.page_id,
            page_number = self.page_number,
            job_id = %self.job(),
            source,
            "Page generated"
        );
    }

    pub fn log_failed(&self, source: &str, reason: &str) {
        warn!(
            story_id = %self.story_id,
            page_id = %self.page_id,
            page_number = self.page_number,
            job_id = %self.job(),
            source,
            reason,
            "Page failed"
        );
    }

    pub fn log_skipped(&self, source: &str, reason: &str) {
        info!(
            story_id = %self.story_id,
            page_id = %self.page_id,
            job_id = %self.job(),
            source,
            reason,
            "Page result ignored"
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            story_id = %self.story_id,
            page_id = %self.page_id,
            page_number = self.page_number,
            job_id = %self.job(),
            "Page error: {}", message
        );
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "page",
            story_id = %self.story_id,
            page_id = %self.page_id,
            page_number = self.page_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_models::StoryId;

    #[test]
    fn test_logger_tracks_job() {
        let page = StoryPage::new(StoryId::new(), 3, "text", "prompt");
        let logger = PageLogger::new(&page);
        assert_eq!(logger.job(), "-");

        let logger = logger.with_job(&JobId::from("job-9"));
        assert_eq!(logger.job(), "job-9");
        assert_eq!(logger.page_number, 3);
    }
}
