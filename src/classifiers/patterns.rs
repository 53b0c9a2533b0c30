//! Token and URL patterns shared by the classifiers

use once_cell::sync::Lazy;
use regex::Regex;

/// `$` followed by two or more uppercase ASCII letters, e.g. `$XYZ`
pub static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[A-Z]{2,}").expect("token pattern is valid"));

/// `http://` or `https://` followed by non-whitespace
pub static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("url pattern is valid"));

/// First token symbol in `text`
pub fn find_token(text: &str) -> Option<&str> {
    TOKEN_PATTERN.find(text).map(|m| m.as_str())
}

/// First URL in `text`
pub fn find_url(text: &str) -> Option<&str> {
    URL_PATTERN.find(text).map(|m| m.as_str())
}
