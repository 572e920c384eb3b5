//! Operator choices remembered between runs.

use pa_shared::{is_supported_language, DEFAULT_LANGUAGE};

use crate::storage::Storage;

pub const LAST_LANGUAGES_KEY: &str = "pa_last_languages";

/// Languages for this run.
///
/// An explicit selection wins and is remembered for next time. Without one
/// the remembered selection is used, falling back to the default language.
pub fn resolve_languages(storage: &Storage, requested: Option<Vec<String>>) -> Vec<String> {
    if let Some(languages) = requested {
        if is_valid_selection(&languages) {
            if let Err(e) = storage.save(LAST_LANGUAGES_KEY, &languages) {
                tracing::warn!(error = %e, "failed to remember language selection");
            }
        }
        return languages;
    }

    match storage.load::<Vec<String>>(LAST_LANGUAGES_KEY) {
        Ok(Some(languages)) if is_valid_selection(&languages) => languages,
        Ok(_) => vec![DEFAULT_LANGUAGE.to_string()],
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable language selection");
            vec![DEFAULT_LANGUAGE.to_string()]
        }
    }
}

fn is_valid_selection(languages: &[String]) -> bool {
    !languages.is_empty() && languages.iter().all(|code| is_supported_language(code))
}
