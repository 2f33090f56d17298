//! Change detection between the stored and freshly fetched listing.
//!
//! Equality is exact: no whitespace or line-ending normalisation happens
//! before comparing, because the content is opaque generated text.

use sha2::{Digest, Sha256};
use similar::TextDiff;

use sp500_core::ChangeEvent;

/// `true` when `current` should be announced to subscribers.
///
/// An absent `previous` (first run, or an expired cache entry) always counts
/// as a change.
pub fn has_changed(previous: Option<&str>, current: &str) -> bool {
    previous != Some(current)
}

/// SHA-256 hex digest of listing content.
pub fn content_digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}

/// Line-level unified diff of a change event, used as a notification body.
pub fn unified_diff(event: &ChangeEvent) -> String {
    let previous = event.previous_content.as_deref().unwrap_or("");
    TextDiff::from_lines(previous, event.new_content.as_str())
        .unified_diff()
        .header("previous", &format!("as of {}", event.as_of))
        .context_radius(3)
        .to_string()
}

/// Count of `(inserted, deleted)` lines in a change event.
pub fn line_delta(event: &ChangeEvent) -> (usize, usize) {
    let previous = event.previous_content.as_deref().unwrap_or("");
    let diff = TextDiff::from_lines(previous, event.new_content.as_str());
    let mut inserted = 0;
    let mut deleted = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Insert => inserted += 1,
            similar::ChangeTag::Delete => deleted += 1,
            similar::ChangeTag::Equal => {}
        }
    }
    (inserted, deleted)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn event(previous: Option<&str>, new: &str) -> ChangeEvent {
        ChangeEvent {
            previous_content: previous.map(str::to_owned),
            new_content: new.to_owned(),
            as_of: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    #[test]
    fn absent_previous_is_always_a_change() {
        for current in ["", "AAPL,MSFT", "\n"] {
            assert!(has_changed(None, current), "current={current:?}");
        }
    }

    #[test]
    fn change_iff_contents_differ() {
        let samples = ["", "AAPL", "AAPL,MSFT", "AAPL,MSFT\n", "aapl,msft", "AAPL,MSFT\r\n"];
        for prev in samples {
            for curr in samples {
                assert_eq!(
                    has_changed(Some(prev), curr),
                    prev != curr,
                    "prev={prev:?} curr={curr:?}"
                );
            }
        }
    }

    #[test]
    fn digest_is_stable_sha256_hex() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_digest("AAPL"), content_digest("AAPL"));
        assert_ne!(content_digest("AAPL"), content_digest("MSFT"));
    }

    #[test]
    fn unified_diff_shows_added_and_removed_lines() {
        let diff = unified_diff(&event(Some("AAPL\nMSFT\n"), "AAPL\nNVDA\n"));
        assert!(diff.contains("--- previous"), "{diff}");
        assert!(diff.contains("+++ as of 2024-03-01"), "{diff}");
        assert!(diff.contains("-MSFT"), "{diff}");
        assert!(diff.contains("+NVDA"), "{diff}");
        assert!(diff.contains("@@"), "{diff}");
    }

    #[test]
    fn line_delta_against_empty_previous_counts_all_lines() {
        assert_eq!(line_delta(&event(None, "AAPL\nMSFT\n")), (2, 0));
        assert_eq!(line_delta(&event(Some("AAPL\nMSFT\n"), "AAPL\n")), (0, 1));
    }
}
