//! Category cell parsing.
//!
//! A category cell is either a plain tag (`sports`), blank, or a list literal
//! stored as text (`['sports', "running"]`). Quotes may be single or double;
//! a backslash escapes the next character inside a quoted item.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellParseError {
    #[error("list literal is missing its closing ']'")]
    Unterminated,

    #[error("unterminated quoted item")]
    UnterminatedQuote,

    #[error("unquoted item in list literal at offset {0}")]
    UnquotedItem(usize),

    #[error("expected ',' or ']' at offset {0}")]
    ExpectedSeparator(usize),
}

/// Parses one category cell into its tags. Blank items are dropped.
pub fn parse_category_cell(cell: &str) -> Result<Vec<String>, CellParseError> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if !trimmed.starts_with('[') {
        return Ok(vec![trimmed.to_string()]);
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(CellParseError::Unterminated)?;

    let mut tags = Vec::new();
    let mut chars = inner.chars().peekable();
    let mut offset = 1;
    loop {
        offset += skip_whitespace(&mut chars);
        let Some(&quote) = chars.peek() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return Err(CellParseError::UnquotedItem(offset));
        }
        chars.next();
        offset += 1;
        let (item, consumed) = read_quoted(&mut chars, quote)?;
        offset += consumed;
        let item = item.trim();
        if !item.is_empty() {
            tags.push(item.to_string());
        }

        offset += skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some(',') => offset += 1,
            Some(_) => return Err(CellParseError::ExpectedSeparator(offset)),
        }
    }
    Ok(tags)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) -> usize {
    let mut skipped = 0;
    while chars.next_if(|c| c.is_whitespace()).is_some() {
        skipped += 1;
    }
    skipped
}

/// Reads up to and including the closing quote; the opening quote is already
/// consumed.
fn read_quoted(
    chars: &mut Peekable<Chars<'_>>,
    quote: char,
) -> Result<(String, usize), CellParseError> {
    let mut item = String::new();
    let mut consumed = 0;
    while let Some(c) = chars.next() {
        consumed += 1;
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(CellParseError::UnterminatedQuote)?;
                consumed += 1;
                item.push(escaped);
            }
            c if c == quote => return Ok((item, consumed)),
            c => item.push(c),
        }
    }
    Err(CellParseError::UnterminatedQuote)
}
