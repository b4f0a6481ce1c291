//! Image prompt construction.
//!
//! Pure function of the scene description, art style, emotion and negative
//! prompt policy, so the same page always yields the same prompt.

use serde::{Deserialize, Serialize};

use story_models::ArtStyle;

/// What to steer the image model away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NegativePromptPolicy {
    /// Child-safe illustration defaults
    #[default]
    ChildSafe,
    /// Only fix common rendering artifacts
    ArtifactsOnly,
    /// No negative prompt
    Off,
}

const ARTIFACT_TERMS: &str = "blurry, low quality, distorted face, extra fingers, extra limbs, watermark, text, signature";
const CHILD_SAFE_TERMS: &str = "violence, gore, weapons, scary, horror, nudity, adult content";

impl NegativePromptPolicy {
    pub fn negative_prompt(&self) -> Option<String> {
        match self {
            NegativePromptPolicy::ChildSafe => Some(format!("{}, {}", CHILD_SAFE_TERMS, ARTIFACT_TERMS)),
            NegativePromptPolicy::ArtifactsOnly => Some(ARTIFACT_TERMS.to_string()),
            NegativePromptPolicy::Off => None,
        }
    }
}

/// A fully built image prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePrompt {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

/// Build the image prompt for one page.
///
/// `trigger_word` is the LoRA token for the subject, placed first so the model
/// binds it to the main character.
pub fn build_image_prompt(
    scene_description: &str,
    style: ArtStyle,
    emotion: Option<&str>,
    policy: NegativePromptPolicy,
    trigger_word: Option<&str>,
) -> ImagePrompt {
    let mut parts: Vec<String> = Vec::with_capacity(5);

    if let Some(token) = trigger_word.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(format!("{} as the main character", token));
    }

    let scene = scene_description.trim().trim_end_matches('.');
    if !scene.is_empty() {
        parts.push(scene.to_string());
    }

    if let Some(emotion) = emotion.map(str::trim).filter(|e| !e.is_empty()) {
        parts.push(format!("{} expression and mood", emotion.to_lowercase()));
    }

    parts.push(style.prompt_fragment().to_string());
    parts.push("children's book illustration, full scene, consistent character design".to_string());

    ImagePrompt {
        prompt: parts.join(", "),
        negative_prompt: policy.negative_prompt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_image_prompt("A fox in a forest.", ArtStyle::Watercolor, Some("Happy"), NegativePromptPolicy::ChildSafe, None);
        let b = build_image_prompt("A fox in a forest.", ArtStyle::Watercolor, Some("Happy"), NegativePromptPolicy::ChildSafe, None);
        assert_eq!(a, b);
        assert!(a.prompt.starts_with("A fox in a forest, happy expression"));
        assert!(a.prompt.contains(ArtStyle::Watercolor.prompt_fragment()));
        assert!(a.negative_prompt.unwrap().contains("violence"));
    }

    #[test]
    fn test_trigger_word_leads_prompt() {
        let p = build_image_prompt("flying a kite", ArtStyle::Cartoon, None, NegativePromptPolicy::Off, Some("sks child"));
        assert!(p.prompt.starts_with("sks child as the main character, flying a kite"));
        assert_eq!(p.negative_prompt, None);
    }

    #[test]
    fn test_blank_inputs_are_skipped() {
        let p = build_image_prompt("  ", ArtStyle::Pencil, Some(" "), NegativePromptPolicy::ArtifactsOnly, Some(""));
        assert!(p.prompt.starts_with(ArtStyle::Pencil.prompt_fragment()));
        assert!(!p.negative_prompt.unwrap().contains("violence"));
    }
}
