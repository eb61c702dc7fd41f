//! Friendly explanations for Playwright failure messages
//!
//! Classification is purely cosmetic. It never decides whether a test passed.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest fallback explanation, in characters, before it is cut with `...`.
pub const MAX_FALLBACK_CHARS: usize = 200;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi pattern is valid"));

static LOCATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)locator\(\s*['"]([^'"]+)['"]"#).expect("locator pattern is valid")
});

static EXPECTED_MORE_THAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Expected:\s*>\s*(\d+)").expect("expected pattern is valid"));

static RECEIVED_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Received:\s*(\d+)").expect("received pattern is valid"));

static EXPECTED_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)Expected string:\s*"([^"]+)""#).expect("expected text pattern is valid")
});

/// What kind of failure a raw message describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// A click on a located element timed out.
    InteractionTimeout { element: Option<String> },
    /// Waiting for the page or an element timed out.
    PageLoadTimeout,
    /// The overall test timeout was hit.
    TestTimeout,
    VisibilityAssertion,
    CountAssertion {
        expected: Option<String>,
        received: Option<String>,
    },
    TextAssertion { text: Option<String> },
    UrlAssertion,
    GenericAssertion,
    ElementNotFound,
    NavigationFailure,
    ClickIntercepted,
    Unclassified,
}

/// Classify a raw failure message.
pub fn classify(raw: &str) -> FailureCategory {
    let lower = raw.to_lowercase();

    if lower.contains("timeout") && lower.contains("exceeded") {
        if lower.contains("locator.click") {
            return FailureCategory::InteractionTimeout {
                element: capture(&LOCATOR, raw),
            };
        }
        if lower.contains("waiting for") {
            return FailureCategory::PageLoadTimeout;
        }
        return FailureCategory::TestTimeout;
    }

    if lower.contains("expect(received)") {
        if lower.contains("tobevisible") {
            return FailureCategory::VisibilityAssertion;
        }
        if lower.contains("tobegreaterthan") {
            return FailureCategory::CountAssertion {
                expected: capture(&EXPECTED_MORE_THAN, raw),
                received: capture(&RECEIVED_COUNT, raw),
            };
        }
        if lower.contains("tocontaintext") {
            return FailureCategory::TextAssertion {
                text: capture(&EXPECTED_TEXT, raw),
            };
        }
        if lower.contains("tohaveurl") {
            return FailureCategory::UrlAssertion;
        }
        return FailureCategory::GenericAssertion;
    }

    if lower.contains("element not found") || lower.contains("unable to locate") {
        return FailureCategory::ElementNotFound;
    }
    if lower.contains("navigation") || lower.contains("net::err") {
        return FailureCategory::NavigationFailure;
    }
    if lower.contains("click") && lower.contains("intercept") {
        return FailureCategory::ClickIntercepted;
    }

    FailureCategory::Unclassified
}

/// Turn a raw Playwright failure into one sentence a non-engineer can act on.
pub fn humanize(raw: &str) -> String {
    let cleaned = ANSI_ESCAPE.replace_all(raw, "");
    let raw = cleaned.trim();
    if raw.is_empty() {
        return "Test failed".to_string();
    }

    match classify(raw) {
        FailureCategory::InteractionTimeout { element } => format!(
            "⏱️ Timeout: Could not find or click \"{}\" within 30 seconds. The element may not exist or took too long to load.",
            element.as_deref().unwrap_or("an element")
        ),
        FailureCategory::PageLoadTimeout => {
            "⏱️ Timeout: Page took too long to load or respond (exceeded 30 seconds).".to_string()
        }
        FailureCategory::TestTimeout => {
            "⏱️ Timeout: Test exceeded the maximum time limit of 30 seconds.".to_string()
        }
        FailureCategory::VisibilityAssertion => {
            "👁️ Element not visible: Expected element to be visible on the page, but it was not found or hidden.".to_string()
        }
        FailureCategory::CountAssertion { expected, received } => format!(
            "📊 Count mismatch: Expected more than {} items, but found {}. Some content may be missing from the page.",
            expected.as_deref().unwrap_or("some"),
            received.as_deref().unwrap_or("0")
        ),
        FailureCategory::TextAssertion { text } => format!(
            "📝 Text not found: Expected to find \"{}\" on the page, but it was not present.",
            text.as_deref().unwrap_or("expected text")
        ),
        FailureCategory::UrlAssertion => {
            "🔗 Wrong page: The test ended up on a different page than expected.".to_string()
        }
        FailureCategory::GenericAssertion => {
            "❌ Assertion failed: The page content did not match what was expected.".to_string()
        }
        FailureCategory::ElementNotFound => {
            "🔍 Element not found: A required element could not be located on the page. The page structure may have changed.".to_string()
        }
        FailureCategory::NavigationFailure => {
            "🌐 Navigation failed: Could not load the page. The site may be down or the URL is incorrect.".to_string()
        }
        FailureCategory::ClickIntercepted => {
            "🖱️ Click blocked: Could not click the element because another element is covering it.".to_string()
        }
        FailureCategory::Unclassified => match first_meaningful_line(raw) {
            Some(line) => truncate(line, MAX_FALLBACK_CHARS),
            None => truncate(raw, MAX_FALLBACK_CHARS),
        },
    }
}

fn capture(pattern: &Regex, raw: &str) -> Option<String> {
    pattern
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// First line that is not part of a stack trace or a call log.
fn first_meaningful_line(raw: &str) -> Option<&str> {
    raw.lines().map(str::trim).find(|line| {
        line.chars().count() > 10
            && !line.contains("Call log:")
            && !line.starts_with("at ")
            && !line.starts_with("- ")
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
