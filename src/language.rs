//! Language detection for item texts.

use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error};
use whatlang::{Detector, Lang};

use crate::app::{Result, TickerError};
use crate::domain::Item;

pub const DEFAULT_LANGUAGE: &str = "en";

const TEXT_WIDTH: usize = 4096;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

fn lang_for_code(code: &str) -> Option<Lang> {
    let lang = match code {
        "de" => Lang::Deu,
        "en" => Lang::Eng,
        "fr" => Lang::Fra,
        "es" => Lang::Spa,
        "it" => Lang::Ita,
        "nl" => Lang::Nld,
        "pt" => Lang::Por,
        "ru" => Lang::Rus,
        _ => return None,
    };
    Some(lang)
}

/// Strips the markup from an HTML fragment and collapses runs of whitespace.
/// If the fragment cannot be rendered it is used as it is.
pub fn plaintext(html: &str) -> String {
    let text = match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            debug!("Cannot render HTML as text: {}", e);
            html.to_string()
        }
    };
    collapse(&text)
}

fn collapse(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// The plaintext used for language detection and classification: title and
/// rendered description.
pub fn item_text(item: &Item) -> String {
    collapse(&format!("{} {}", item.title, plaintext(&item.description)))
}

pub struct LanguageDetector {
    detector: Detector,
    languages: Vec<(Lang, String)>,
    default: String,
    quiet_titles: Vec<String>,
}

impl LanguageDetector {
    /// `languages` are two-letter codes. `quiet_titles` suppresses the panic
    /// report for items whose title contains one of the given substrings.
    pub fn new<S: AsRef<str>>(languages: &[S], default: &str, quiet_titles: Vec<String>) -> Result<Self> {
        let languages = languages
            .iter()
            .map(|code| {
                let code = code.as_ref();
                lang_for_code(code)
                    .map(|lang| (lang, code.to_string()))
                    .ok_or_else(|| TickerError::Config(format!("Unsupported language {:?}", code)))
            })
            .collect::<Result<Vec<_>>>()?;
        if languages.is_empty() {
            return Err(TickerError::Config("No languages configured".to_string()));
        }
        if !languages.iter().any(|(_, c)| c == default) {
            return Err(TickerError::Config(format!(
                "Default language {:?} is not among the configured languages",
                default
            )));
        }

        let detector = Detector::with_allowlist(languages.iter().map(|(l, _)| *l).collect());
        Ok(Self {
            detector,
            languages,
            default: default.to_string(),
            quiet_titles,
        })
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.iter().map(|(_, c)| c.as_str())
    }

    pub fn default_language(&self) -> &str {
        &self.default
    }

    /// Returns the language code of `item` and its plaintext.
    pub fn detect_item(&self, item: &Item) -> (String, String) {
        let text = item_text(item);
        let lang = self.detect(&item.title, &text);
        (lang, text)
    }

    /// Detects the language of `text`. Never fails: if detection is
    /// inconclusive or panics, the default language is returned.
    pub fn detect(&self, title: &str, text: &str) -> String {
        match catch_unwind(AssertUnwindSafe(|| self.detector.detect_lang(text))) {
            Ok(Some(lang)) => self
                .languages
                .iter()
                .find(|(l, _)| *l == lang)
                .map(|(_, c)| c.clone())
                .unwrap_or_else(|| self.default.clone()),
            Ok(None) => self.default.clone(),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                if self.quiet_titles.iter().any(|q| title.contains(q.as_str())) {
                    debug!("Language detection panicked for {:?}: {}", title, msg);
                } else {
                    error!(
                        "Language detection panicked for {:?}: {}\n{}",
                        title,
                        msg,
                        Backtrace::force_capture()
                    );
                }
                self.default.clone()
            }
        }
    }
}
