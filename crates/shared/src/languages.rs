//! Fixed catalog of languages an announcement can target.

/// A language operators can select for an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
    pub native: &'static str,
}

pub const LANGUAGES: [Language; 10] = [
    Language { code: "en", name: "English", native: "English" },
    Language { code: "es", name: "Spanish", native: "Español" },
    Language { code: "fr", name: "French", native: "Français" },
    Language { code: "de", name: "German", native: "Deutsch" },
    Language { code: "it", name: "Italian", native: "Italiano" },
    Language { code: "pt", name: "Portuguese", native: "Português" },
    Language { code: "zh", name: "Chinese", native: "中文" },
    Language { code: "ja", name: "Japanese", native: "日本語" },
    Language { code: "ar", name: "Arabic", native: "العربية" },
    Language { code: "hi", name: "Hindi", native: "हिन्दी" },
];

/// Language selected when the operator has not picked one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Look up a catalog entry by its code.
pub fn find_language(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.code == code)
}

/// Whether `code` belongs to the catalog.
pub fn is_supported_language(code: &str) -> bool {
    find_language(code).is_some()
}
