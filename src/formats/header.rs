//! FITS header cards: parsing, typed access and serialization.

use anyhow::{bail, Result};

pub const FITS_BLOCK_SIZE: usize = 2880;
pub const FITS_CARD_SIZE: usize = 80;

/// Keywords whose cards carry free text instead of a `= value` field.
const COMMENTARY_KEYWORDS: [&str; 3] = ["COMMENT", "HISTORY", ""];

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Logical(b) => Some(*b),
            _ => None,
        }
    }

    /// Render the value field as it appears in a card (columns 11-80).
    fn to_field(&self) -> String {
        match self {
            HeaderValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
            HeaderValue::Integer(v) => format!("{:>20}", v),
            HeaderValue::Float(v) => format!("{:>20}", format_float(*v)),
            HeaderValue::Text(s) => {
                let escaped = s.replace('\'', "''");
                format!("'{:<8}'", escaped)
            }
        }
    }
}

/// Shortest round-trip representation with an explicit decimal point and exponent.
fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return "0.0".to_string();
    }
    let s = format!("{:E}", v);
    match s.split_once('E') {
        Some((mantissa, exp)) if !mantissa.contains('.') => format!("{}.0E{}", mantissa, exp),
        _ => s,
    }
}

/// One 80-character header record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: Option<HeaderValue>,
    pub comment: Option<String>,
}

impl Card {
    pub fn new(keyword: &str, value: HeaderValue, comment: Option<&str>) -> Self {
        Card {
            keyword: keyword.trim().to_uppercase(),
            value: Some(value),
            comment: comment.map(str::to_string),
        }
    }

    pub fn commentary(keyword: &str, text: &str) -> Self {
        Card {
            keyword: keyword.trim().to_uppercase(),
            value: None,
            comment: Some(text.to_string()),
        }
    }

    pub fn parse(card: &str) -> Self {
        let keyword = card.get(..8).unwrap_or(card).trim().to_uppercase();

        let has_value =
            card.get(8..10) == Some("= ") && !COMMENTARY_KEYWORDS.contains(&keyword.as_str());
        if !has_value {
            let text = card.get(8..).unwrap_or("").trim_end();
            return Card {
                keyword,
                value: None,
                comment: (!text.is_empty()).then(|| text.to_string()),
            };
        }

        let (value, comment) = parse_value_field(card.get(10..).unwrap_or(""));
        Card {
            keyword,
            value,
            comment,
        }
    }

    /// Serialize to exactly 80 ASCII bytes.
    pub fn to_record(&self) -> String {
        let mut record = format!("{:<8}", self.keyword);
        match &self.value {
            Some(value) => {
                record.push_str("= ");
                record.push_str(&value.to_field());
                if let Some(comment) = &self.comment {
                    record.push_str(" / ");
                    record.push_str(comment);
                }
            }
            None => {
                if let Some(text) = &self.comment {
                    record.push_str(text);
                }
            }
        }
        let mut record: String = record.chars().filter(|c| c.is_ascii()).take(FITS_CARD_SIZE).collect();
        while record.len() < FITS_CARD_SIZE {
            record.push(' ');
        }
        record
    }
}

fn parse_value_field(field: &str) -> (Option<HeaderValue>, Option<String>) {
    let field = field.trim_start();

    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string: '' is an escaped quote, a lone quote closes it.
        let mut text = String::new();
        let mut chars = rest.char_indices().peekable();
        let mut end = rest.len();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    text.push('\'');
                    chars.next();
                } else {
                    end = i + 1;
                    break;
                }
            } else {
                text.push(c);
            }
        }
        let comment = rest[end..]
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return (Some(HeaderValue::Text(text.trim_end().to_string())), comment);
    }

    let (token, comment) = match field.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (field.trim(), None),
    };

    let value = match token {
        "" => None,
        "T" => Some(HeaderValue::Logical(true)),
        "F" => Some(HeaderValue::Logical(false)),
        _ => {
            if let Ok(v) = token.parse::<i64>() {
                Some(HeaderValue::Integer(v))
            } else if let Ok(v) = token.replace(['D', 'd'], "E").parse::<f64>() {
                Some(HeaderValue::Float(v))
            } else {
                Some(HeaderValue::Text(token.to_string()))
            }
        }
    };
    (value, comment)
}

/// Ordered collection of header cards (without the terminating `END`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<Card>,
}

impl FitsHeader {
    pub fn new() -> Self {
        FitsHeader { cards: Vec::new() }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        let keyword = keyword.to_uppercase();
        self.cards
            .iter()
            .find(|c| c.keyword == keyword && c.value.is_some())
            .and_then(|c| c.value.as_ref())
    }

    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(HeaderValue::as_i64)
    }

    pub fn get_string(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(HeaderValue::as_str)
    }

    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(HeaderValue::as_bool)
    }

    /// Replace the first card with this keyword, or append a new one.
    pub fn set(&mut self, keyword: &str, value: HeaderValue, comment: Option<&str>) {
        let card = Card::new(keyword, value, comment);
        match self
            .cards
            .iter_mut()
            .find(|c| c.keyword == card.keyword && c.value.is_some())
        {
            Some(existing) => {
                existing.value = card.value;
                if card.comment.is_some() {
                    existing.comment = card.comment;
                }
            }
            None => self.cards.push(card),
        }
    }

    pub fn set_float(&mut self, keyword: &str, value: f64, comment: Option<&str>) {
        self.set(keyword, HeaderValue::Float(value), comment);
    }

    pub fn set_int(&mut self, keyword: &str, value: i64, comment: Option<&str>) {
        self.set(keyword, HeaderValue::Integer(value), comment);
    }

    pub fn set_string(&mut self, keyword: &str, value: &str, comment: Option<&str>) {
        self.set(keyword, HeaderValue::Text(value.to_string()), comment);
    }

    pub fn set_bool(&mut self, keyword: &str, value: bool, comment: Option<&str>) {
        self.set(keyword, HeaderValue::Logical(value), comment);
    }

    pub fn add_history(&mut self, text: &str) {
        self.cards.push(Card::commentary("HISTORY", text));
    }

    /// Integer keyword that must be present.
    pub fn require_int(&self, keyword: &str) -> Result<i64> {
        match self.get_int(keyword) {
            Some(v) => Ok(v),
            None => bail!("Missing {} keyword in FITS header", keyword),
        }
    }

    /// Serialize the cards plus `END`, padded with spaces to whole blocks.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.cards.len() + 1) * FITS_CARD_SIZE);
        for card in &self.cards {
            out.extend_from_slice(card.to_record().as_bytes());
        }
        out.extend_from_slice(format!("{:<80}", "END").as_bytes());
        let padded = out.len().div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
        out.resize(padded, b' ');
        out
    }
}
