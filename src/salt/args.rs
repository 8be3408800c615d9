//! Free-form argument string parsing.
//!
//! `"ls -la" test=True pillar='{"key": "value"}'` becomes
//!   positional: ["ls -la"]
//!   keyword:    {"test": "True", "pillar": {"key": "value"}}
//!
//! Tokens are split on whitespace outside quotes. A token is a keyword
//! argument when it holds an `=` outside quotes; the text before the first
//! such `=` is the key. Quote removal and backslash escapes follow POSIX
//! shell-word rules (delegated to `shell_words`).

use serde_json::{Map, Value};
use shell_words::split as shell_split;

use super::error::{Result, SaltError};

/// Positional and keyword arguments extracted from one argument string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArguments {
    pub positional: Vec<String>,
    pub keyword: Map<String, Value>,
}

impl ParsedArguments {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// A whitespace-delimited token still carrying its quotes, plus the byte
/// offset of its first unquoted `=`.
#[derive(Debug)]
struct RawToken {
    text: String,
    eq: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Parse an argument string into positional and keyword arguments.
///
/// Keyword values that are JSON object or array literals are stored as the
/// parsed structure; every other value is kept as a string. A repeated key
/// overwrites the earlier value.
pub fn parse_arguments(input: &str) -> Result<ParsedArguments> {
    let mut parsed = ParsedArguments::default();
    for token in split_raw(input)? {
        match token.eq {
            Some(idx) => {
                let key = unquote(&token.text[..idx])?;
                if key.is_empty() {
                    return Err(SaltError::config(format!(
                        "keyword argument with empty name: {}",
                        token.text
                    )));
                }
                let value = keyword_value(&token.text[idx + 1..])?;
                parsed.keyword.insert(key, value);
            }
            None => parsed.positional.push(unquote(&token.text)?),
        }
    }
    Ok(parsed)
}

/// Parse a string that may only hold `key=value` pairs (runner pillar data,
/// hook payloads).
pub fn parse_keywords(input: &str) -> Result<Map<String, Value>> {
    let parsed = parse_arguments(input)?;
    if let Some(stray) = parsed.positional.first() {
        return Err(SaltError::config(format!(
            "expected key=value pairs, found bare value '{stray}'"
        )));
    }
    Ok(parsed.keyword)
}

fn split_raw(input: &str) -> Result<Vec<RawToken>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut eq: Option<usize> = None;
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::None => match c {
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(RawToken {
                            text: std::mem::take(&mut current),
                            eq: eq.take(),
                        });
                        in_token = false;
                    }
                    continue;
                }
                '\'' => quote = Quote::Single,
                '"' => quote = Quote::Double,
                '\\' => {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_token = true;
                    continue;
                }
                '=' if eq.is_none() => eq = Some(current.len()),
                _ => {}
            },
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    continue;
                }
                _ => {}
            },
        }
        current.push(c);
        in_token = true;
    }

    if quote != Quote::None {
        return Err(SaltError::config(format!(
            "unbalanced quotes in arguments: {input}"
        )));
    }
    if in_token {
        tokens.push(RawToken { text: current, eq });
    }
    Ok(tokens)
}

/// Strip quotes / escapes from a single shell word.
fn unquote(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    // A leading '#' would otherwise start a shell comment.
    let word = if raw.starts_with('#') {
        format!("\\{raw}")
    } else {
        raw.to_string()
    };
    let mut parts = shell_split(&word)
        .map_err(|e| SaltError::config(format!("cannot parse argument '{raw}': {e}")))?;
    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        parts.concat()
    })
}

fn keyword_value(raw: &str) -> Result<Value> {
    // Unquoted JSON keeps its inner double quotes only before shell unquoting.
    if let Some(structured) = structured_literal(raw) {
        return Ok(structured);
    }
    let text = unquote(raw)?;
    Ok(structured_literal(&text).unwrap_or(Value::String(text)))
}

fn structured_literal(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}
