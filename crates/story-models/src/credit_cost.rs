//! Credit prices for billable work.
//!
//! Every billable unit is debited before its job is submitted and refunded by
//! exactly the same amount if that unit does not complete.

/// One illustrated page image (async job).
pub const PAGE_IMAGE_COST: u32 = 1;

/// Narration for one page.
pub const PAGE_AUDIO_COST: u32 = 1;

/// One synchronous preview image.
pub const PREVIEW_IMAGE_COST: u32 = 1;

/// Training a LoRA subject model.
pub const MODEL_TRAINING_COST: u32 = 10;

/// Credits needed up front to start a story of `page_count` pages.
///
/// Narration is billed per page as it is produced and is not reserved here.
pub fn story_generation_cost(page_count: u32) -> u32 {
    page_count.saturating_mul(PAGE_IMAGE_COST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_generation_cost_scales_with_pages() {
        assert_eq!(story_generation_cost(0), 0);
        assert_eq!(story_generation_cost(8), 8 * PAGE_IMAGE_COST);
    }
}
