//! Language hints from attachment filenames.
//!
//! Recorders often tag files with a suffix such as `memo_de.m4a` or
//! `standup_english.wav`. When a processor is configured with language
//! `auto`, the suffix is passed to the backend as a hint.

use notescribe_core::defaults;
use tracing::debug;

/// Filename fragments and the ISO 639-1 code they select. Checked in order.
const LANGUAGE_PATTERNS: &[(&str, &str)] = &[
    ("_en.", "en"),
    ("_english.", "en"),
    ("_eng.", "en"),
    ("_de.", "de"),
    ("_german.", "de"),
    ("_deutsch.", "de"),
    ("_fr.", "fr"),
    ("_french.", "fr"),
    ("_francais.", "fr"),
    ("_es.", "es"),
    ("_spanish.", "es"),
    ("_espanol.", "es"),
    ("_it.", "it"),
    ("_italian.", "it"),
    ("_italiano.", "it"),
    ("_pt.", "pt"),
    ("_portuguese.", "pt"),
    ("_portugues.", "pt"),
    ("_ru.", "ru"),
    ("_russian.", "ru"),
    ("_zh.", "zh"),
    ("_chinese.", "zh"),
    ("_ja.", "ja"),
    ("_japanese.", "ja"),
    ("_ko.", "ko"),
    ("_korean.", "ko"),
];

/// Detect a language code from a filename suffix, case-insensitively.
pub fn detect_language(filename: &str) -> Option<&'static str> {
    let lower = filename.to_lowercase();
    LANGUAGE_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(pattern, lang)| {
            debug!(filename, pattern, language = lang, "Detected language from filename");
            *lang
        })
}

/// Language to send for an attachment: the configured value, or the filename
/// hint when the configuration says `auto` (or nothing). `None` lets the
/// backend detect the language itself.
pub fn resolve_language(configured: Option<&str>, filename: &str) -> Option<String> {
    match configured.map(str::trim) {
        Some(lang) if !lang.is_empty() && !lang.eq_ignore_ascii_case(defaults::LANGUAGE_AUTO) => {
            Some(lang.to_string())
        }
        _ => detect_language(filename).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_short_and_long_suffixes() {
        assert_eq!(detect_language("memo_en.m4a"), Some("en"));
        assert_eq!(detect_language("Standup_German.wav"), Some("de"));
        assert_eq!(detect_language("notes_espanol.mp3"), Some("es"));
        assert_eq!(detect_language("call_ja.ogg"), Some("ja"));
    }

    #[test]
    fn test_detect_requires_separator_and_extension_dot() {
        assert_eq!(detect_language("recording.m4a"), None);
        assert_eq!(detect_language("frenchfries.m4a"), None);
        assert_eq!(detect_language("memo_en_draft.m4a"), None);
    }

    #[test]
    fn test_resolve_prefers_explicit_language() {
        assert_eq!(
            resolve_language(Some("fr"), "memo_de.m4a"),
            Some("fr".to_string())
        );
    }

    #[test]
    fn test_resolve_auto_uses_filename_hint() {
        assert_eq!(
            resolve_language(Some("auto"), "memo_de.m4a"),
            Some("de".to_string())
        );
        assert_eq!(resolve_language(None, "memo_it.m4a"), Some("it".to_string()));
        assert_eq!(resolve_language(Some("AUTO"), "memo.m4a"), None);
        assert_eq!(resolve_language(Some("  "), "memo.m4a"), None);
    }
}
