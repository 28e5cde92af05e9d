//! Header namespace translation between the S3 (`x-amz-`) and GCS (`x-goog-`) vocabularies.
//!
//! Both directions are the same operation with the prefixes swapped, so each
//! is exposed as a total function over a header map. Values are moved
//! verbatim, including every value of a multi-valued header.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

pub const AMZ_PREFIX: &str = "x-amz-";
pub const GOOG_PREFIX: &str = "x-goog-";

/// Renames headers whose name starts with `source` so they start with `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceRule {
    pub source: &'static str,
    pub target: &'static str,
}

/// Request direction: S3 vocabulary to GCS.
pub const OUTBOUND: NamespaceRule = NamespaceRule {
    source: AMZ_PREFIX,
    target: GOOG_PREFIX,
};

/// Response direction: GCS vocabulary back to S3.
pub const INBOUND: NamespaceRule = NamespaceRule {
    source: GOOG_PREFIX,
    target: AMZ_PREFIX,
};

impl NamespaceRule {
    pub fn inverse(&self) -> NamespaceRule {
        NamespaceRule {
            source: self.target,
            target: self.source,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        name.len() >= self.source.len()
            && name.as_bytes()[..self.source.len()].eq_ignore_ascii_case(self.source.as_bytes())
    }

    /// Name with the source prefix replaced, or `None` when the rule does not apply.
    pub fn rename(&self, name: &str) -> Option<String> {
        if !self.matches(name) {
            return None;
        }
        let suffix = &name[self.source.len()..];
        Some(format!("{}{}", self.target, suffix.to_ascii_lowercase()))
    }

    /// Moves every matching header under the target prefix. Returns how many names moved.
    ///
    /// An existing header with the target name is overwritten.
    pub fn apply(&self, headers: &mut HeaderMap) -> usize {
        let matching: Vec<HeaderName> = headers
            .keys()
            .filter(|name| self.matches(name.as_str()))
            .cloned()
            .collect();

        let mut moved = 0;
        for source in matching {
            let Some(target) = self
                .rename(source.as_str())
                .and_then(|name| HeaderName::from_bytes(name.as_bytes()).ok())
            else {
                continue;
            };

            let values: Vec<HeaderValue> = headers.get_all(&source).iter().cloned().collect();
            headers.remove(&source);
            headers.remove(&target);
            for value in values {
                headers.append(target.clone(), value);
            }
            trace!(from = %source, to = %target, "renamed header");
            moved += 1;
        }
        moved
    }
}

/// Rewrites `x-amz-*` request headers to `x-goog-*`.
pub fn outbound(headers: &mut HeaderMap) -> usize {
    OUTBOUND.apply(headers)
}

/// Rewrites `x-goog-*` response headers to `x-amz-*`.
pub fn inbound(headers: &mut HeaderMap) -> usize {
    INBOUND.apply(headers)
}
