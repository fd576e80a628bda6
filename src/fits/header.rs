use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::{WcsError, WcsResult};

// ---------------------------------------------------------------------------
// HeaderValue – a single keyword value
// ---------------------------------------------------------------------------

/// A scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    String(String),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Logical(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Card – one keyword record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: String,
    pub value: Option<HeaderValue>,
    pub comment: Option<String>,
}

impl Card {
    pub fn new(key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// COMMENT / HISTORY / blank cards carry text but no value.
    pub fn commentary(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            comment: Some(text.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Header – ordered cards
// ---------------------------------------------------------------------------

/// Keyword records in file order.
///
/// Keys touched through `set` or `remove` are remembered, so that saving a
/// file read from disk only rewrites those keywords.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<Card>,
    modified: BTreeSet<String>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Append a card as read, without marking it modified.
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.card(key).and_then(|c| c.value.as_ref())
    }

    /// First valued card for `key`.
    pub fn card(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.key == key && c.value.is_some())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace the value of `key` (keeping its comment) or append a new card.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let value = value.into();
        match self
            .cards
            .iter_mut()
            .find(|c| c.key == key && c.value.is_some())
        {
            Some(card) => card.value = Some(value),
            None => self.cards.push(Card {
                key: key.to_string(),
                value: Some(value),
                comment: None,
            }),
        }
        self.modified.insert(key.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let index = self
            .cards
            .iter()
            .position(|c| c.key == key && c.value.is_some())?;
        self.modified.insert(key.to_string());
        self.cards.remove(index).value
    }

    /// Keys changed since the header was read, sorted.
    pub fn modified(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// Valued keywords in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards
            .iter()
            .filter_map(|c| c.value.as_ref().map(|v| (c.key.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// `NAXISn` values in FITS axis order (fastest axis first).
    pub fn axes(&self) -> Vec<usize> {
        let naxis = self.get("NAXIS").and_then(HeaderValue::as_integer).unwrap_or(0);
        (1..=naxis)
            .map(|i| {
                self.get(&format!("NAXIS{i}"))
                    .and_then(HeaderValue::as_integer)
                    .unwrap_or(0)
                    .max(0) as usize
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Typed keyword access for coordinate models
// ---------------------------------------------------------------------------

pub trait KeywordProvider {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_float(&self, key: &str) -> Option<f64>;
    fn get_int(&self, key: &str) -> Option<i64>;

    fn require_float(&self, key: &str) -> WcsResult<f64> {
        self.get_float(key)
            .ok_or_else(|| WcsError::missing_keyword(key))
    }
}

impl KeywordProvider for Header {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(str::to_string)
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_real()
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_integer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut header = Header::new();
        header.push(Card::new("CUNIT1", "deg ").with_comment("axis unit"));
        header.push(Card::new("CUNIT2", "deg"));
        header.set("CUNIT1", "deg");
        header.set("CUNIT3", "um");

        assert_eq!(header.cards()[0].key, "CUNIT1");
        assert_eq!(header.cards()[0].comment.as_deref(), Some("axis unit"));
        assert_eq!(header.get("CUNIT1").and_then(HeaderValue::as_str), Some("deg"));
        assert_eq!(header.cards()[2].key, "CUNIT3");
    }

    #[test]
    fn test_only_set_and_remove_mark_modified() {
        let mut header = Header::new();
        header.push(Card::new("CTYPE3", "FREQ"));
        header.push(Card::new("CUNIT3", "um"));
        header.push(Card::commentary("HISTORY", "reduced"));
        assert_eq!(header.modified().count(), 0);

        header.set("CTYPE3", "WAVE");
        header.remove("CUNIT3");
        header.remove("CRVAL3");
        assert_eq!(header.modified().collect::<Vec<_>>(), vec!["CTYPE3", "CUNIT3"]);
        assert_eq!(header.len(), 2);
    }

    #[test]
    fn test_commentary_cards_are_not_values() {
        let mut header = Header::new();
        header.push(Card::commentary("COMMENT", "EXTNAME is set below"));
        header.push(Card::new("EXTNAME", "FLUX"));
        assert_eq!(header.card("EXTNAME").map(|c| c.key.as_str()), Some("EXTNAME"));
        assert!(!header.contains("COMMENT"));
        assert_eq!(header.iter().count(), 1);
    }

    #[test]
    fn test_axes() {
        let mut header = Header::new();
        header.set("NAXIS", 3i64);
        header.set("NAXIS1", 17i64);
        header.set("NAXIS2", 17i64);
        header.set("NAXIS3", 2048i64);
        assert_eq!(header.axes(), vec![17, 17, 2048]);
    }

    #[test]
    fn test_keyword_provider() {
        let mut header = Header::new();
        header.set("CRVAL3", 1.9005);
        header.set("CRPIX3", 1i64);
        assert_eq!(header.require_float("CRVAL3").unwrap(), 1.9005);
        assert_eq!(header.get_float("CRPIX3"), Some(1.0));
        let err = header.require_float("CDELT3").unwrap_err();
        assert!(err.to_string().contains("CDELT3"));
    }
}
