//! Baggage header codec.
//!
//! Baggage is a comma-separated list of `key=value` pairs carried alongside
//! the trace continuation header. Entries under the `sentry-` namespace belong
//! to this SDK and carry the dynamic sampling context; everything else is
//! third-party data that must survive a pass through this process verbatim.

use crate::sdk_warn;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b';').add(b',').add(b'=');

/// Namespace prefix of the entries owned by this SDK.
pub const SENTRY_BAGGAGE_PREFIX: &str = "sentry-";

/// An ordered collection of baggage entries.
///
/// Keys are stored percent-decoded and trimmed; values are kept exactly as
/// received so that third-party entries re-serialize byte-for-byte. Values
/// written through [`Baggage::insert`] are percent-encoded on the way in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    /// Creates an empty `Baggage`.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Parses a baggage header value.
    ///
    /// Parsing never fails as a whole: malformed entries are skipped
    /// individually and duplicate keys resolve to the last occurrence.
    pub fn parse(header_value: &str) -> Baggage {
        let mut baggage = Baggage::new();
        for member in header_value.split(',') {
            if member.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = member.split_once('=') else {
                sdk_warn!(
                    name: "Baggage.Parse.InvalidKeyValueFormat",
                    message = "baggage list member without `=` skipped",
                    member = member
                );
                continue;
            };
            let Ok(key) = percent_decode_str(key.trim()).decode_utf8() else {
                sdk_warn!(
                    name: "Baggage.Parse.InvalidUtf8",
                    message = "baggage key with invalid UTF-8 skipped"
                );
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            baggage.set_raw(key, value.trim().to_owned());
        }
        baggage
    }

    /// Returns the percent-decoded value for `key`, if present and valid
    /// UTF-8.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .and_then(|(_, raw)| percent_decode_str(raw).decode_utf8().ok())
    }

    /// Inserts an entry, percent-encoding the value. An existing entry with
    /// the same key is replaced in place.
    pub fn insert(&mut self, key: impl Into<String>, value: &str) {
        let encoded: String = utf8_percent_encode(value, FRAGMENT).collect();
        self.set_raw(&key.into(), encoded);
    }

    /// Removes every entry in the `sentry-` namespace.
    pub fn clear_sentry_entries(&mut self) {
        self.entries
            .retain(|(key, _)| !key.starts_with(SENTRY_BAGGAGE_PREFIX));
    }

    /// Iterates over `(key, raw value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the entries back into a header value. Third-party values
    /// are emitted exactly as they were received.
    pub fn to_header(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| {
                let mut member: String = utf8_percent_encode(key, FRAGMENT).collect();
                member.push('=');
                member.push_str(value);
                member
            })
            .collect::<Vec<String>>()
            .join(",")
    }

    fn set_raw(&mut self, key: &str, raw_value: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(entry_key, _)| entry_key == key) {
            entry.1 = raw_value;
        } else {
            self.entries.push((key.to_owned(), raw_value));
        }
    }
}
