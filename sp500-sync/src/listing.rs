//! Extension points for turning generated listing text into records.
//!
//! The generated text has no fixed shape, so neither parsing nor the
//! "qualitative" selection has a built-in rule. The defaults are no-ops:
//! [`UnparsedListing`] yields no records (the raw text stays available on the
//! snapshot) and [`PassThrough`] returns its input unchanged.

use sp500_core::Stock;

/// Extracts structured records from raw listing text.
pub trait ListingParser: Send + Sync {
    fn parse(&self, content: &str) -> Vec<Stock>;
}

/// Narrows a record list for the qualitative view.
pub trait QualitativeFilter: Send + Sync {
    fn filter(&self, stocks: Vec<Stock>) -> Vec<Stock>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnparsedListing;

impl ListingParser for UnparsedListing {
    fn parse(&self, _content: &str) -> Vec<Stock> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl QualitativeFilter for PassThrough {
    fn filter(&self, stocks: Vec<Stock>) -> Vec<Stock> {
        stocks
    }
}
