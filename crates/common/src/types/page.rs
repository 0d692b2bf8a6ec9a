use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the text of a page was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Readability-style main-content extraction.
    Primary,
    /// Permissive HTML-to-text conversion.
    Fallback,
    Failed,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }
}

/// Extracted content for one fetched URL.
///
/// Invariant: `extraction_method == Failed` exactly when `char_count == 0`.
/// Construct through [`PageContent::extracted`] / [`PageContent::failed`] to
/// keep it that way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
    pub extraction_method: ExtractionMethod,
    pub text: String,
    pub char_count: usize,
    /// Fetch attempts beyond the first that this page needed.
    pub retry_count: u32,
}

impl PageContent {
    /// A successfully extracted page. Empty text degrades to `Failed`.
    pub fn extracted(
        url: impl Into<String>,
        http_status: u16,
        method: ExtractionMethod,
        text: String,
        retry_count: u32,
    ) -> Self {
        let char_count = text.chars().count();
        let extraction_method = if char_count == 0 {
            ExtractionMethod::Failed
        } else {
            method
        };

        Self {
            url: url.into(),
            fetched_at: Utc::now(),
            http_status,
            extraction_method,
            text,
            char_count,
            retry_count,
        }
    }

    /// A page whose fetch or extraction failed outright.
    pub fn failed(url: impl Into<String>, http_status: u16, retry_count: u32) -> Self {
        Self {
            url: url.into(),
            fetched_at: Utc::now(),
            http_status,
            extraction_method: ExtractionMethod::Failed,
            text: String::new(),
            char_count: 0,
            retry_count,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.extraction_method == ExtractionMethod::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_iff_zero_chars() {
        let ok = PageContent::extracted(
            "https://acme.example/about",
            200,
            ExtractionMethod::Primary,
            "Acme builds rockets.".into(),
            0,
        );
        assert!(!ok.is_failed());
        assert_eq!(ok.char_count, 20);

        let failed = PageContent::failed("https://acme.example/missing", 404, 1);
        assert!(failed.is_failed());
        assert_eq!(failed.char_count, 0);

        // Empty extraction degrades to Failed, preserving the invariant.
        let empty = PageContent::extracted(
            "https://acme.example/blank",
            200,
            ExtractionMethod::Fallback,
            String::new(),
            0,
        );
        assert!(empty.is_failed());
        assert_eq!(empty.char_count, 0);
    }

    #[test]
    fn test_char_count_is_chars_not_bytes() {
        let page = PageContent::extracted(
            "https://acme.example",
            200,
            ExtractionMethod::Primary,
            "héllo".into(),
            0,
        );
        assert_eq!(page.char_count, 5);
    }
}
