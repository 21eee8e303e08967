//! Language tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// A guest-language tag such as `kite`, `bash` or `perl`.
///
/// Tags are normalized to trimmed lowercase so `"Bash"` and `"bash"` name the
/// same backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Language a session gets when a create request does not name one.
    pub const DEFAULT: &'static str = "python";

    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the environment variable that overrides this language's backend URL,
    /// e.g. `PERL_BACKEND_URL`.
    pub fn backend_url_var(&self) -> String {
        format!("{}_BACKEND_URL", self.0.to_uppercase().replace('-', "_"))
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl TryFrom<String> for Language {
    type Error = TypesError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.0
    }
}

impl FromStr for Language {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let language = Self::new(s);
        if language.0.is_empty() {
            return Err(TypesError::InvalidLanguage(s.to_string()));
        }
        Ok(language)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Language {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Language {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_normalization() {
        assert_eq!(Language::new("  Bash "), Language::new("bash"));
        assert_eq!(Language::new("node").backend_url_var(), "NODE_BACKEND_URL");
        assert!("   ".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_deserializes_normalized() {
        let language: Language = serde_json::from_str("\"PERL\"").unwrap();
        assert_eq!(language, "perl");
    }

    #[test]
    fn test_blank_language_is_rejected_on_the_wire() {
        assert!(serde_json::from_str::<Language>("\"  \"").is_err());
        assert!(serde_json::from_str::<crate::CreateSessionRequest>(r#"{"language": ""}"#).is_err());

        let request: crate::CreateSessionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.language, Language::DEFAULT);
    }
}
