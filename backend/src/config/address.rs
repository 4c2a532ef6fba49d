//! Recipient address lists.
//!
//! Lists are `;`-separated. Each address must look like `local@domain.tld`;
//! anything else is dropped with a warning and never fails the load.

use regex::Regex;
use std::sync::OnceLock;

use crate::logging::ActivityLog;

const SEPARATOR: char = ';';

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("address pattern is a valid regex")
    })
}

pub fn is_valid_address(candidate: &str) -> bool {
    address_re().is_match(candidate)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitAddresses {
    /// Valid addresses in first-seen order, without duplicates.
    pub valid: Vec<String>,
    pub rejected: Vec<String>,
}

/// Splits a raw list into valid and rejected addresses. Empty segments (a
/// trailing `;`, blank cells, spreadsheet `nan`) are ignored.
pub fn split_addresses(raw: &str) -> SplitAddresses {
    let mut out = SplitAddresses::default();
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return out;
    }
    for piece in raw.split(SEPARATOR).map(str::trim).filter(|p| !p.is_empty()) {
        if is_valid_address(piece) {
            if !out.valid.iter().any(|known| known == piece) {
                out.valid.push(piece.to_string());
            }
        } else {
            out.rejected.push(piece.to_string());
        }
    }
    out
}

/// Like [`split_addresses`], warning about every rejected address.
pub fn split(raw: &str, log: &ActivityLog) -> Vec<String> {
    let split = split_addresses(raw);
    if !split.rejected.is_empty() {
        log.warn(format!(
            "Invalid email addresses dropped: {}",
            split.rejected.join(", ")
        ));
    }
    split.valid
}
