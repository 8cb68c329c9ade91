//! Ordered image metadata
//!
//! A [Header] is the key/value record attached to every exposure, in the order
//! the instrument wrote it. Commentary cards (`COMMENT`, `HISTORY` and blank
//! keywords) may appear any number of times, every other keyword is unique once
//! it has been [set](Header::set) or the header has been [normalized](Header::normalize).

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("line {line}: cannot parse value {raw:?} of keyword {key}")]
    Value {
        line: usize,
        key: String,
        raw: String,
    },
    #[error("line {line}: unterminated string value of keyword {key}")]
    UnterminatedString { line: usize, key: String },
}
type Result<T> = std::result::Result<T, HeaderError>;

const COMMENTARY: [&str; 3] = ["COMMENT", "HISTORY", ""];

/// Returns true for keywords that may repeat
pub fn is_commentary(key: &str) -> bool {
    COMMENTARY.contains(&key)
}

/// Header card value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}
impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "T"),
            Value::Bool(false) => write!(f, "F"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write_float(f, *v),
            Value::Str(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// Plain decimal where it reads well, upper case `E` exponent otherwise
fn write_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v == 0.0 || !v.is_finite() || (1e-4..1e15).contains(&v.abs()) {
        return write!(f, "{v:?}");
    }
    let text = format!("{v:E}");
    match text.split_once('E') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => {
            write!(f, "{mantissa}.0E{exponent}")
        }
        _ => f.write_str(&text),
    }
}

/// A single header record
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: String,
    pub value: Option<Value>,
    pub comment: Option<String>,
}
impl Card {
    pub fn new<K: Into<String>, V: Into<Value>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            comment: None,
        }
    }
    /// A `COMMENT`, `HISTORY` or blank keyword card
    pub fn commentary<K: Into<String>, S: Into<String>>(key: K, text: S) -> Self {
        Self {
            key: key.into(),
            value: None,
            comment: Some(text.into()),
        }
    }
    pub fn is_commentary(&self) -> bool {
        is_commentary(&self.key)
    }
}
impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_commentary() {
            return write!(
                f,
                "{:<8}{}",
                self.key,
                self.comment.as_deref().unwrap_or_default()
            );
        }
        match (&self.value, &self.comment) {
            (Some(value), Some(comment)) => {
                write!(f, "{:<8}= {:>20} / {}", self.key, value.to_string(), comment)
            }
            (Some(value), None) => write!(f, "{:<8}= {:>20}", self.key, value.to_string()),
            (None, Some(comment)) => write!(f, "{:<8}= {:>20} / {}", self.key, "", comment),
            (None, None) => write!(f, "{:<8}=", self.key),
        }
    }
}

/// Ordered collection of header cards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header(Vec<Card>);

impl Header {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.0.iter()
    }
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|card| card.key.as_str())
    }
    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|card| card.key == key)
    }
    /// Value of the first card with the given keyword
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|card| card.key == key)
            .and_then(|card| card.value.as_ref())
    }
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
    /// Appends a card as is, duplicates included
    pub fn push(&mut self, card: Card) {
        self.0.push(card);
    }
    /// Sets the value of a keyword, replacing the first card in place
    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        let card = Card::new(key, value);
        self.upsert(card);
    }
    fn upsert(&mut self, card: Card) {
        if card.is_commentary() {
            self.0.push(card);
            return;
        }
        match self.0.iter_mut().find(|c| c.key == card.key) {
            Some(existing) => {
                existing.value = card.value;
                if card.comment.is_some() {
                    existing.comment = card.comment;
                }
            }
            None => self.0.push(card),
        }
    }
    /// Removes every card with the given keyword, returning the number removed
    pub fn remove(&mut self, key: &str) -> usize {
        let n = self.0.len();
        self.0.retain(|card| card.key != key);
        n - self.0.len()
    }
    pub fn retain<F: FnMut(&Card) -> bool>(&mut self, f: F) {
        self.0.retain(f);
    }
    /// Updates this header with the cards of another one
    ///
    /// Existing keywords are overwritten in place, new keywords and commentary
    /// cards are appended.
    pub fn merge(&mut self, other: &Header) {
        other.iter().cloned().for_each(|card| self.upsert(card));
    }
    /// Canonical form: one card per keyword (last value wins) in first-seen order,
    /// commentary cards kept in sequence
    pub fn normalize(self) -> Self {
        let mut header = Header::new();
        self.0.into_iter().for_each(|card| header.upsert(card));
        header
    }
    /// Parses header text, either 80 column cards or one card per line
    pub fn parse(text: &str) -> Result<Self> {
        let mut header = Header::new();
        let lines = text.lines().flat_map(|line| {
            if line.len() > 80 && line.is_ascii() && line.len() % 80 == 0 {
                line.as_bytes()
                    .chunks(80)
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<Vec<_>>()
            } else {
                vec![line.to_string()]
            }
        });
        for (i, line) in lines.enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let keyword = line.get(..8).unwrap_or(line).trim();
            if keyword == "END" {
                break;
            }
            if is_commentary(keyword) {
                let text = line.get(8..).unwrap_or_default().trim();
                header.push(Card::commentary(keyword, text));
                continue;
            }
            match line.split_once('=') {
                Some((key, field))
                    if !key.trim().is_empty() && !key.trim().contains(char::is_whitespace) =>
                {
                    let key = key.trim();
                    let (value, comment) = parse_field(field, i + 1, key)?;
                    header.push(Card {
                        key: key.to_string(),
                        value,
                        comment,
                    });
                }
                _ => header.push(Card {
                    key: keyword.to_string(),
                    value: None,
                    comment: None,
                }),
            }
        }
        Ok(header)
    }
    /// Newline separated cards terminated by `END`
    pub fn to_text(&self) -> String {
        let mut text: Vec<String> = self.iter().map(|card| card.to_string()).collect();
        text.push("END".to_string());
        text.join("\n")
    }
}
impl FromIterator<Card> for Header {
    fn from_iter<T: IntoIterator<Item = Card>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl IntoIterator for Header {
    type Item = Card;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn parse_field(field: &str, line: usize, key: &str) -> Result<(Option<Value>, Option<String>)> {
    let field = field.trim_start();
    if let Some(quoted) = field.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut rest = None;
        while let Some((idx, c)) = chars.next() {
            if c == '\'' {
                if let Some((_, '\'')) = chars.peek() {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                rest = Some(&quoted[idx + 1..]);
                break;
            }
            value.push(c);
        }
        let rest = rest.ok_or_else(|| HeaderError::UnterminatedString {
            line,
            key: key.to_string(),
        })?;
        let comment = rest
            .split_once('/')
            .map(|(_, comment)| comment.trim().to_string());
        return Ok((Some(Value::Str(value.trim_end().to_string())), comment));
    }
    let (raw, comment) = match field.split_once('/') {
        Some((raw, comment)) => (raw.trim(), Some(comment.trim().to_string())),
        None => (field.trim(), None),
    };
    let value = match raw {
        "" => None,
        "T" => Some(Value::Bool(true)),
        "F" => Some(Value::Bool(false)),
        _ => Some(if let Ok(v) = raw.parse::<i64>() {
            Value::Int(v)
        } else {
            raw.replace(['D', 'd'], "E")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| HeaderError::Value {
                    line,
                    key: key.to_string(),
                    raw: raw.to_string(),
                })?
        }),
    };
    Ok((value, comment))
}
