//! Pipeline configuration.

use std::time::Duration;

use story_genai::NegativePromptPolicy;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Public base URL that webhook paths are appended to
    pub webhook_base_url: String,
    /// HMAC secret for webhook URL tokens; unauthenticated webhooks when unset
    pub webhook_secret: Option<String>,
    /// Pending pages older than this are polled by the sweeper
    pub sweep_grace: Duration,
    /// Credits granted when a user's account is first created
    pub signup_credits: u32,
    pub story_list_cache_ttl: Duration,
    pub story_list_limit: u32,
    /// Concurrent page submissions per story
    pub page_fanout_concurrency: usize,
    pub negative_prompt_policy: NegativePromptPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            webhook_base_url: "http://localhost:8000/webhooks".to_string(),
            webhook_secret: None,
            sweep_grace: Duration::from_secs(10),
            signup_credits: 20,
            story_list_cache_ttl: Duration::from_secs(60),
            story_list_limit: 50,
            page_fanout_concurrency: 4,
            negative_prompt_policy: NegativePromptPolicy::ChildSafe,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok());

        Self {
            webhook_base_url: std::env::var("WEBHOOK_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.webhook_base_url),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            sweep_grace: parse("SWEEP_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_grace),
            signup_credits: parse("SIGNUP_CREDITS")
                .map(|n| n as u32)
                .unwrap_or(defaults.signup_credits),
            story_list_cache_ttl: parse("STORY_LIST_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.story_list_cache_ttl),
            story_list_limit: parse("STORY_LIST_LIMIT")
                .map(|n| n.clamp(1, 200) as u32)
                .unwrap_or(defaults.story_list_limit),
            page_fanout_concurrency: parse("PAGE_FANOUT_CONCURRENCY")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.page_fanout_concurrency),
            negative_prompt_policy: match std::env::var("NEGATIVE_PROMPT_POLICY").as_deref() {
                Ok("artifacts_only") => NegativePromptPolicy::ArtifactsOnly,
                Ok("off") => NegativePromptPolicy::Off,
                _ => defaults.negative_prompt_policy,
            },
        }
    }

    /// Grace window as a chrono duration for timestamp comparisons.
    pub fn sweep_grace_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sweep_grace).unwrap_or_else(|_| chrono::Duration::seconds(10))
    }
}
