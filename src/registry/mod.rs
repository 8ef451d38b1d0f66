//! Artifact registry: maps (function name, language) to runnable images.
//!
//! The packaging pipeline that produces the images is an external
//! collaborator; the registry only resolves names to immutable references.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FuncletError, Result};

/// Languages with a packaged base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = FuncletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::Javascript),
            other => Err(FuncletError::UnsupportedLanguage {
                language: other.to_string(),
            }),
        }
    }
}

/// Immutable reference to a packaged function artifact.
///
/// Produced once by the packaging collaborator; never mutated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub function_name: String,
    pub language: Language,
    pub image_id: String,
}

/// Resolves function names to artifact references.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Look up the artifact for a function. Miss is `FunctionNotFound`.
    async fn resolve(&self, function_name: &str, language: Language) -> Result<ArtifactRef>;
}

/// Registry backed by the `[[functions]]` entries of the config file.
///
/// With `convention_images` enabled, unregistered functions fall back to the
/// `<name>_<language>` image naming the packaging step uses.
pub struct StaticRegistry {
    entries: HashMap<(String, Language), String>,
    convention_images: bool,
}

impl StaticRegistry {
    pub fn new(convention_images: bool) -> Self {
        Self {
            entries: HashMap::new(),
            convention_images,
        }
    }

    /// Build from (name, language, image) triples.
    pub fn from_entries<I>(entries: I, convention_images: bool) -> Self
    where
        I: IntoIterator<Item = (String, Language, String)>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, language, image)| ((name, language), image))
            .collect();
        Self {
            entries,
            convention_images,
        }
    }

    pub fn register(&mut self, name: &str, language: Language, image: &str) {
        self.entries
            .insert((name.to_string(), language), image.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate registered (name, language, image) entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Language, &str)> {
        self.entries
            .iter()
            .map(|((name, language), image)| (name.as_str(), *language, image.as_str()))
    }
}

#[async_trait]
impl ArtifactRegistry for StaticRegistry {
    async fn resolve(&self, function_name: &str, language: Language) -> Result<ArtifactRef> {
        if let Some(image) = self
            .entries
            .get(&(function_name.to_string(), language))
        {
            return Ok(ArtifactRef {
                function_name: function_name.to_string(),
                language,
                image_id: image.clone(),
            });
        }

        if self.convention_images {
            // Image naming produced by the packaging step: <name>_<language>
            return Ok(ArtifactRef {
                function_name: function_name.to_string(),
                language,
                image_id: format!("{}_{}", function_name, language),
            });
        }

        Err(FuncletError::FunctionNotFound {
            name: function_name.to_string(),
            language: language.to_string(),
        })
    }
}
