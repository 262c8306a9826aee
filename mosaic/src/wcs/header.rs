//! Minimal FITS-style header model.
//!
//! Holds the keyword/value cards a coordinate mapping is built from, and the
//! cards a combined mapping is written back as. Keywords are stored trimmed and
//! upper-cased, so `"crpix1"` and `"CRPIX1"` address the same card. HIERARCH
//! keywords keep their inner spaces (`"HIERARCH ESO OCS CUMOFFS RA"`).

use std::fmt;

/// Spectral unit literal written by the ERIS pipeline that WCS consumers reject.
pub const MICRON_UNIT: &str = "MICRON";

/// Recognised spelling of the micrometre unit.
pub const MICROMETRE_UNIT: &str = "um";

/// Value of a single header card.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl HeaderValue {
    /// Numeric view of the card. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Bool(v) => write!(f, "{}", if *v { "T" } else { "F" }),
            HeaderValue::Int(v) => write!(f, "{}", v),
            HeaderValue::Float(v) => write!(f, "{}", v),
            HeaderValue::Str(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        HeaderValue::Int(value as i64)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

/// Ordered collection of header cards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_ascii_uppercase()
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Header::set`].
    pub fn with(mut self, keyword: &str, value: impl Into<HeaderValue>) -> Self {
        self.set(keyword, value);
        self
    }

    /// Insert or replace a card, keeping the original position on replace.
    pub fn set(&mut self, keyword: &str, value: impl Into<HeaderValue>) {
        let keyword = normalize_keyword(keyword);
        let value = value.into();
        match self.cards.iter_mut().find(|(k, _)| *k == keyword) {
            Some(card) => card.1 = value,
            None => self.cards.push((keyword, value)),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        let keyword = normalize_keyword(keyword);
        self.cards
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(HeaderValue::as_i64)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn remove(&mut self, keyword: &str) -> Option<HeaderValue> {
        let keyword = normalize_keyword(keyword);
        let index = self.cards.iter().position(|(k, _)| *k == keyword)?;
        Some(self.cards.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Rewrite `CUNIT3 = 'MICRON'` to the recognised `'um'` spelling.
    ///
    /// Returns true when the card was rewritten.
    pub fn normalize_micron_unit(&mut self) -> bool {
        let is_micron = self
            .get_str("CUNIT3")
            .is_some_and(|unit| unit.trim() == MICRON_UNIT);
        if is_micron {
            self.set("CUNIT3", MICROMETRE_UNIT);
        }
        is_micron
    }
}
