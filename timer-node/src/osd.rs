//! # osd
//!
//! Lap text for the pilot's goggle overlay.
//!
//! ## Template language
//! | placeholder      | renders                                  |
//! |------------------|------------------------------------------|
//! | `%L`             | lap number                               |
//! | `%ts`            | lap time in seconds (`12.34`)            |
//! | `%tm`            | lap time as minutes (`1:02.5`)           |
//! | `%tms`           | lap time in milliseconds                 |
//! | `%ds` `%dm` `%dms` | signed delta to the fastest lap        |
//! | `%%`             | a literal `%`                            |
//!
//! A placeholder may carry a minimum width (`1`–`9`, possibly more digits)
//! and a precision (`.2`), e.g. `%5.2ts`. Everything else is copied.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sft_types::Millis;

pub const DEFAULT_OSD_FORMAT: &str = "%2L: %5.2ts(%6.2ds)";

/// Largest width or precision a placeholder may ask for
pub const MAX_FIELD_WIDTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OsdFormatError {
    #[error("unknown time unit in {0:?}")]
    UnknownUnit(String),
    #[error("unexpected character {0:?} in placeholder")]
    Unexpected(char),
    #[error("placeholder not terminated")]
    Unterminated,
    #[error("width or precision {0} above {max}", max = MAX_FIELD_WIDTH)]
    TooWide(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Seconds,
    Minutes,
    Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Percent,
    Lap,
    Time(Unit),
    Delta(Unit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Field { field: Field, width: usize, digits: usize },
}

/// A parsed lap template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapTemplate {
    pieces: Vec<Piece>,
}

impl LapTemplate {
    /// A template that renders nothing.
    pub fn empty() -> Self {
        Self { pieces: Vec::new() }
    }

    pub fn parse(template: &str) -> Result<Self, OsdFormatError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                text.push(c);
                continue;
            }

            let mut width = 0usize;
            let mut digits = 0usize;
            let field = loop {
                match chars.next() {
                    None => return Err(OsdFormatError::Unterminated),
                    Some('%') => break Field::Percent,
                    Some('L') => break Field::Lap,
                    Some('.') => digits = take_number(&mut chars, 0)?,
                    Some(d @ '1'..='9') => width = take_number(&mut chars, d as usize - '0' as usize)?,
                    Some('t') => break Field::Time(take_unit(&mut chars)?),
                    Some('d') => break Field::Delta(take_unit(&mut chars)?),
                    Some(other) => return Err(OsdFormatError::Unexpected(other)),
                }
            };

            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(Piece::Field { field, width, digits });
        }

        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        Ok(Self { pieces })
    }

    pub fn render(&self, lap: u32, duration_ms: Millis, delta_ms: i64) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Field { field, width, digits } => {
                    let (w, p) = (*width, *digits);
                    let s = match field {
                        Field::Percent => "%".to_string(),
                        Field::Lap => format!("{:>w$}", lap),
                        Field::Time(Unit::Seconds) => format!("{:>w$.p$}", duration_ms as f64 / 1000.0),
                        Field::Time(Unit::Millis) => format!("{:>w$}", duration_ms),
                        Field::Time(Unit::Minutes) => minutes(duration_ms, p),
                        Field::Delta(Unit::Seconds) => format!("{:>+w$.p$}", delta_ms as f64 / 1000.0),
                        Field::Delta(Unit::Millis) => format!("{:>+w$}", delta_ms),
                        Field::Delta(Unit::Minutes) => {
                            let sign = if delta_ms < 0 { '-' } else { '+' };
                            format!("{}{}", sign, minutes(delta_ms.unsigned_abs(), p))
                        }
                    };
                    out.push_str(&s);
                }
            }
        }
        out
    }
}

/// Continue the decimal number starting with `n` from the following digits.
fn take_number<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>, mut n: usize) -> Result<usize, OsdFormatError> {
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    if n > MAX_FIELD_WIDTH {
        return Err(OsdFormatError::TooWide(n));
    }
    Ok(n)
}

fn take_unit<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) -> Result<Unit, OsdFormatError> {
    match chars.next() {
        Some('s') => Ok(Unit::Seconds),
        Some('m') => {
            if chars.peek() == Some(&'s') {
                chars.next();
                Ok(Unit::Millis)
            } else {
                Ok(Unit::Minutes)
            }
        }
        Some(c) => Err(OsdFormatError::UnknownUnit(c.to_string())),
        None => Err(OsdFormatError::Unterminated),
    }
}

/// `m:ss.d` with `digits` fractional digits.
fn minutes(ms: Millis, digits: usize) -> String {
    let m = ms / 60_000;
    let rest = (ms % 60_000) as f64 / 1000.0;
    let pad = if rest < 10.0 { "0" } else { "" };
    format!("{}:{}{:.p$}", m, pad, rest, p = digits)
}

/// Render one lap with `template`.
pub fn format_lap(template: &str, lap: u32, duration_ms: Millis, delta_ms: i64) -> Result<String, OsdFormatError> {
    Ok(LapTemplate::parse(template)?.render(lap, duration_ms, delta_ms))
}

// ── Overlay ───────────────────────────────────────────────────────────────────

/// Text placed at a fixed position on the goggle overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayText {
    pub x: u16,
    pub y: u16,
    pub text: String,
}

/// Overlay writer. The display keeps characters it was not sent, so a
/// shorter text is padded with spaces to the length of the previous one.
#[derive(Debug, Clone)]
pub struct Overlay {
    x: u16,
    y: u16,
    template: LapTemplate,
    last_len: usize,
}

impl Overlay {
    pub fn new(x: u16, y: u16, template: LapTemplate) -> Self {
        Self { x, y, template, last_len: 0 }
    }

    pub fn lap(&mut self, lap: u32, duration_ms: Millis, delta_ms: i64) -> OverlayText {
        let text = self.template.render(lap, duration_ms, delta_ms);
        self.text(text)
    }

    pub fn text(&mut self, mut text: String) -> OverlayText {
        let len = text.chars().count();
        if len < self.last_len {
            text.extend(std::iter::repeat(' ').take(self.last_len - len));
        }
        self.last_len = len;
        OverlayText { x: self.x, y: self.y, text }
    }
}
