//! Localized label catalogs embedded at build time.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

const EN_CATALOG: &str = include_str!("../i18n/en.yaml");
const RU_CATALOG: &str = include_str!("../i18n/ru.yaml");

/// Localized strings for chat-facing output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub execution_title: String,
    pub execution_correlation: String,
    pub execution_tool: String,
    pub execution_params: String,
    pub section_context: String,
    pub section_action: String,
    pub section_params: String,
    pub question_label: String,
    pub context_label: String,
    pub options_label: String,
    pub custom_option_button: String,
    pub cancel_custom_button: String,
    pub delete_button: String,
    pub custom_prompt: String,
    pub selected_note: String,
    pub timeout_note: String,
    pub error_note: String,
    pub invalid_action: String,
    pub already_resolved: String,
    pub invalid_chat: String,
    pub voice_disabled: String,
    pub transcription_failed: String,
}

#[derive(Debug, Error)]
pub enum I18nError {
    #[error("failed to parse {lang} catalog: {source}")]
    Parse {
        lang: &'static str,
        source: serde_yaml::Error,
    },
}

/// Load every embedded catalog keyed by language code.
///
/// Both languages are always present so per-request `lang` switching works
/// regardless of the configured default.
pub fn catalog() -> Result<HashMap<String, Messages>, I18nError> {
    let mut catalog = HashMap::new();
    catalog.insert("en".to_string(), parse_catalog("en", EN_CATALOG)?);
    catalog.insert("ru".to_string(), parse_catalog("ru", RU_CATALOG)?);
    Ok(catalog)
}

fn parse_catalog(lang: &'static str, raw: &str) -> Result<Messages, I18nError> {
    serde_yaml::from_str(raw).map_err(|source| I18nError::Parse { lang, source })
}

/// Resolve labels for a language: request language, then the configured
/// default, then English, then an all-blank set.
pub fn messages_for(
    catalog: &HashMap<String, Messages>,
    lang: &str,
    fallback_lang: &str,
) -> Messages {
    let mut lang = lang.trim().to_lowercase();
    if lang.is_empty() {
        lang = fallback_lang.trim().to_lowercase();
    }
    if let Some(messages) = catalog.get(&lang) {
        return messages.clone();
    }
    if let Some(messages) = catalog.get("en") {
        return messages.clone();
    }
    Messages::default()
}

/// Return `value` unless blank, else the fallback literal.
pub fn label_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_contains_both_languages() {
        let catalog = catalog().expect("embedded catalogs parse");
        assert_eq!(catalog.len(), 2);
        assert!(!catalog["en"].selected_note.is_empty());
        assert!(!catalog["ru"].selected_note.is_empty());
        assert_ne!(catalog["en"].selected_note, catalog["ru"].selected_note);
    }

    #[test]
    fn test_messages_for_fallback_chain() {
        let catalog = catalog().expect("embedded catalogs parse");
        assert_eq!(
            messages_for(&catalog, "RU", "en").selected_note,
            catalog["ru"].selected_note
        );
        assert_eq!(
            messages_for(&catalog, "", "ru").selected_note,
            catalog["ru"].selected_note
        );
        assert_eq!(
            messages_for(&catalog, "de", "fr").selected_note,
            catalog["en"].selected_note
        );
    }

    #[test]
    fn test_label_or_falls_back_when_blank() {
        assert_eq!(label_or("", "Context"), "Context");
        assert_eq!(label_or("  ", "Context"), "Context");
        assert_eq!(label_or("Kontext", "Context"), "Kontext");
    }
}
