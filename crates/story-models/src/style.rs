//! Illustration art styles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Art style applied to every page of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtStyle {
    /// Soft watercolor washes
    #[default]
    Watercolor,
    /// Bold flat cartoon
    Cartoon,
    /// Classic picture-book gouache
    ClassicStorybook,
    /// Rendered 3D animation look
    Animated3d,
    /// Japanese anime
    Anime,
    /// Colored pencil sketch
    Pencil,
}

impl ArtStyle {
    pub const ALL: &'static [ArtStyle] = &[
        ArtStyle::Watercolor,
        ArtStyle::Cartoon,
        ArtStyle::ClassicStorybook,
        ArtStyle::Animated3d,
        ArtStyle::Anime,
        ArtStyle::Pencil,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtStyle::Watercolor => "watercolor",
            ArtStyle::Cartoon => "cartoon",
            ArtStyle::ClassicStorybook => "classic_storybook",
            ArtStyle::Animated3d => "animated_3d",
            ArtStyle::Anime => "anime",
            ArtStyle::Pencil => "pencil",
        }
    }

    /// Style phrase appended to image prompts.
    pub fn prompt_fragment(&self) -> &'static str {
        match self {
            ArtStyle::Watercolor => "soft watercolor illustration, gentle washes, paper texture",
            ArtStyle::Cartoon => "bright cartoon illustration, bold outlines, flat colors",
            ArtStyle::ClassicStorybook => "classic children's picture book illustration, gouache, warm palette",
            ArtStyle::Animated3d => "3d animated film still, soft global illumination, expressive characters",
            ArtStyle::Anime => "anime illustration, clean line art, vibrant cel shading",
            ArtStyle::Pencil => "colored pencil drawing, hand-drawn texture, light shading",
        }
    }
}

impl fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArtStyle {
    type Err = ArtStyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "watercolor" => Ok(ArtStyle::Watercolor),
            "cartoon" => Ok(ArtStyle::Cartoon),
            "classic_storybook" | "storybook" => Ok(ArtStyle::ClassicStorybook),
            "animated_3d" | "3d" => Ok(ArtStyle::Animated3d),
            "anime" => Ok(ArtStyle::Anime),
            "pencil" => Ok(ArtStyle::Pencil),
            _ => Err(ArtStyleParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown art style: {0}")]
pub struct ArtStyleParseError(String);
