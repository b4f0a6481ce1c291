//! Identifier newtypes.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a storybook.
    StoryId
);

string_id!(
    /// Unique identifier for one illustrated page.
    PageId
);

string_id!(
    /// Unique identifier for a subject (the child the book is about).
    SubjectModelId
);

string_id!(
    /// Opaque id returned by the external generation system for an async job.
    ///
    /// Correlates webhooks and polls back to the page (or model) that submitted it.
    JobId
);

impl StoryId {
    /// Generate a new random story ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl PageId {
    /// Generate a new random page ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectModelId {
    /// Generate a new random subject model ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SubjectModelId {
    fn default() -> Self {
        Self::new()
    }
}
