//! Decoding of `VBoxManage` text output.
//!
//! Two line grammars are understood: `key: value` as printed by the list and
//! info commands, and `key=value` as printed by `--machinereadable` dumps.
//! [`try_parse_key_values`] is the primitive both build on; record kinds are
//! reconstructed by the passes in [`machine`] and [`lists`], which only ever
//! read from an already decoded [`ValueMap`] or from the raw line events.

pub mod lists;
pub mod machine;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::Result;

/// Line grammar of a command's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    /// `key: value`, at least one blank after the colon
    Colon,
    /// `key=value`
    Equals,
}

impl Grammar {
    fn split(self, line: &str) -> Option<(&str, &str)> {
        match self {
            Grammar::Colon => split_pair(line, ':', true),
            Grammar::Equals => split_pair(line, '=', false),
        }
    }
}

/// One classified line of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Pair { key: &'a str, value: &'a str },
    /// Whitespace only; list decoders use it to terminate a record.
    Blank,
    /// Neither a pair nor blank.
    Unmatched(&'a str),
}

/// Key is the non-empty run of non-separator characters directly before a
/// separator; scanning moves to the next separator until one qualifies.
fn split_pair(line: &str, sep: char, needs_space: bool) -> Option<(&str, &str)> {
    let mut start = 0;
    for (i, _) in line.match_indices(sep) {
        let key = &line[start..i];
        let rest = &line[i + sep.len_utf8()..];
        start = i + sep.len_utf8();

        if key.is_empty() {
            continue;
        }
        if needs_space && !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
            continue;
        }
        return Some((key, rest.trim_start_matches(|c: char| c.is_ascii_whitespace())));
    }
    None
}

/// Feed every line of `text` to `handler` as a [`Line`] event.
pub fn try_parse_key_values<F>(text: &str, grammar: Grammar, mut handler: F) -> Result<()>
where
    F: FnMut(Line<'_>) -> Result<()>,
{
    for line in text.lines() {
        if line.trim().is_empty() {
            handler(Line::Blank)?;
            continue;
        }

        match grammar.split(line) {
            Some((key, value)) => handler(Line::Pair { key, value })?,
            None => handler(Line::Unmatched(line))?,
        }
    }
    Ok(())
}

/// Like [`try_parse_key_values`] but only reports key/value pairs.
pub fn parse_key_values<F>(text: &str, grammar: Grammar, mut handler: F) -> Result<()>
where
    F: FnMut(&str, &str) -> Result<()>,
{
    try_parse_key_values(text, grammar, |line| match line {
        Line::Pair { key, value } => handler(key, value),
        _ => Ok(()),
    })
}

/// Value of a machine-readable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i64),
}

/// Decoded `key=value` dump. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueMap {
    values: BTreeMap<String, Value>,
}

impl ValueMap {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value; integers are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Integer value; strings are not coerced.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Integer value, also accepting a quoted decimal string such as `"30"`.
    pub fn get_number(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(Value::Int(i)) => Some(*i),
            Some(Value::Str(s)) => s.trim().parse().ok(),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }
}

/// Undo the double quoting `VBoxManage` applies to strings.
///
/// Escapes follow JSON string rules. Raw control characters such as a tab
/// inside a description are accepted as literal text.
pub fn unquote(s: &str) -> Option<String> {
    if !s.chars().any(char::is_control) {
        return serde_json::from_str::<String>(s).ok();
    }
    let mut escaped = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        if c.is_control() {
            escaped.push_str(&format!("\\u{:04x}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    serde_json::from_str::<String>(&escaped).ok()
}

/// Decode a `--machinereadable` dump into typed values.
///
/// Quoted values are strings, unquoted decimal values are integers; anything
/// else is dropped with a diagnostic rather than guessed at.
pub fn decode_machine_readable(text: &str) -> Result<ValueMap> {
    let mut map = ValueMap::default();

    parse_key_values(text, Grammar::Equals, |key, val| {
        let key = if key.starts_with('"') {
            match unquote(key) {
                Some(k) => k,
                None => {
                    warn!(key, "unable to unquote key, keeping it verbatim");
                    key.to_string()
                }
            }
        } else {
            key.to_string()
        };

        if val.starts_with('"') {
            match unquote(val) {
                Some(v) => map.insert(key, Value::Str(v)),
                None => warn!(key = %key, value = val, "dropping value that failed to unquote"),
            }
        } else if let Ok(i) = val.trim_end().parse::<i64>() {
            map.insert(key, Value::Int(i));
        } else {
            debug!(key = %key, value = val, "ignoring unquoted non-integer value");
        }
        Ok(())
    })?;

    Ok(map)
}
