pub mod error;
pub mod registry;
pub mod template;

pub use error::{LanguageError, Result};
pub use registry::{Invocation, LanguageConfig, SourceFile};
pub use template::starter_template;

use serde::{Deserialize, Serialize};

/// Languages the platform can execute. Anything outside this set is
/// rejected before any resource is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Java,
}

pub const SUPPORTED_LANGUAGES: [Language; 3] =
    [Language::Javascript, Language::Python, Language::Java];

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
        }
    }

    pub fn parse(identifier: &str) -> Result<Self> {
        match identifier.to_ascii_lowercase().as_str() {
            "javascript" => Ok(Language::Javascript),
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            _ => Err(LanguageError::Unsupported(identifier.to_string())),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self> {
        Language::parse(s)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_languages() {
        assert_eq!(Language::parse("javascript").unwrap(), Language::Javascript);
        assert_eq!(Language::parse("python").unwrap(), Language::Python);
        assert_eq!(Language::parse("JAVA").unwrap(), Language::Java);
    }

    #[test]
    fn test_parse_unsupported_language() {
        let err = Language::parse("ruby").unwrap_err();
        assert!(matches!(err, LanguageError::Unsupported(ref l) if l == "ruby"));
        assert!(err.to_string().contains("ruby"));
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&Language::Javascript).unwrap();
        assert_eq!(json, "\"javascript\"");
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Language::Javascript);
    }
}
