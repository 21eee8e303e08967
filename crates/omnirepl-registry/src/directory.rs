//! Language → backend URL resolution.

use omnirepl_types::Language;
use std::collections::BTreeMap;

/// Languages that have a backend out of the box.
pub const SHIPPED_LANGUAGES: &[&str] = &["kite", "bash", "perl", "python", "ruby", "php", "node"];

/// Maps each language to the base URL of its execution backend.
#[derive(Debug, Clone, Default)]
pub struct BackendDirectory {
    backends: BTreeMap<Language, String>,
}

impl BackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shipped languages at `http://backend-<lang>:8000`, overridden or extended
    /// by any `<LANG>_BACKEND_URL` variable.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut directory = Self::new();
        for tag in SHIPPED_LANGUAGES {
            directory = directory.with_backend(Language::new(tag), format!("http://backend-{}:8000", tag));
        }

        for (key, value) in vars {
            let Some(prefix) = key.strip_suffix("_BACKEND_URL") else {
                continue;
            };
            if prefix.is_empty() || value.trim().is_empty() {
                continue;
            }
            let language = Language::new(prefix.replace('_', "-"));
            log::debug!("Backend for {} from {}: {}", language, key, value);
            directory = directory.with_backend(language, value);
        }

        directory
    }

    pub fn with_backend(mut self, language: Language, url: impl Into<String>) -> Self {
        let url = url.into();
        self.backends
            .insert(language, url.trim().trim_end_matches('/').to_string());
        self
    }

    pub fn resolve(&self, language: &Language) -> Option<&str> {
        self.backends.get(language).map(String::as_str)
    }

    pub fn languages(&self) -> impl Iterator<Item = &Language> {
        self.backends.keys()
    }
}
