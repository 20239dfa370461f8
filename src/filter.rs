//! Pluggable acceptability check for harvested items
//!
//! The engine consults this as a pure predicate before an item enters the
//! merged result. The default implementation drops noise comments: minimum
//! length plus a rough English check based on the share of ASCII letters.

use crate::harvest::HarvestedItem;

/// Decides whether an item is worth keeping
pub trait ValidityFilter: Send + Sync {
    fn accept(&self, item: &HarvestedItem) -> bool;
}

/// Default filter: drops blank, very short, and likely non-English comments
///
/// Profiles always pass; only comment bodies are judged.
#[derive(Debug, Clone)]
pub struct DefaultValidityFilter {
    /// Minimum trimmed body length in characters
    pub min_length: usize,
    /// Minimum share of ASCII letters among non-whitespace characters
    pub min_alpha_ratio: f64,
}

impl Default for DefaultValidityFilter {
    fn default() -> Self {
        Self {
            min_length: 10,
            min_alpha_ratio: 0.4,
        }
    }
}

impl ValidityFilter for DefaultValidityFilter {
    fn accept(&self, item: &HarvestedItem) -> bool {
        let body = match item {
            HarvestedItem::Comment(c) => c.body.trim(),
            HarvestedItem::Profile(_) => return true,
        };

        if body.is_empty() {
            tracing::debug!("Skipping blank comment");
            return false;
        }

        if body.chars().count() < self.min_length {
            tracing::debug!("Skipping short comment: {}", body);
            return false;
        }

        let alpha = body.chars().filter(|c| c.is_ascii_alphabetic()).count();
        let non_space = body.chars().filter(|c| !c.is_whitespace()).count();

        if non_space == 0 {
            return false;
        }

        let ratio = alpha as f64 / non_space as f64;
        if ratio < self.min_alpha_ratio {
            tracing::debug!("Skipping likely non-English comment (ratio: {:.2})", ratio);
            return false;
        }

        true
    }
}

/// Filter that accepts everything, for full-historical collection runs
#[derive(Debug, Clone, Default)]
pub struct AcceptAll;

impl ValidityFilter for AcceptAll {
    fn accept(&self, _item: &HarvestedItem) -> bool {
        true
    }
}
