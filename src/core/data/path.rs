//! Field paths such as `a.b[0]["c d"]`: dotted keys, zero-based indices and quoted keys.

use crate::core::data::coerce::kind_name;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde_json::{Map, Value};
use std::fmt;

/// Highest array index a write may pad up to.
pub const MAX_WRITE_INDEX: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Parse a complete path; trailing characters are an error.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let trimmed = text.trim();
        let (path, consumed) = Self::parse_prefix(trimmed, true)?;
        if consumed != trimmed.len() {
            return Err(path_error(
                trimmed,
                consumed,
                "unexpected trailing characters in path",
            ));
        }
        Ok(path)
    }

    /// Parse the longest path at the start of `text`, returning it with the number of bytes
    /// consumed. `braced` paths (inside `${...}`) also accept `-`, `$` and `@` in keys.
    pub fn parse_prefix(text: &str, braced: bool) -> Result<(Self, usize), AppError> {
        PathParser::new(text, braced).parse()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First index segment above [`MAX_WRITE_INDEX`], if any.
    pub fn oversized_index(&self) -> Option<usize> {
        self.segments.iter().find_map(|segment| match segment {
            PathSegment::Index(index) if *index > MAX_WRITE_INDEX => Some(*index),
            _ => None,
        })
    }

    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => Some(key.as_str()),
            _ => None,
        }
    }

    /// Segments after the leading keys `prefix`, if the path starts with them.
    pub fn strip_keys(&self, prefix: &[&str]) -> Option<&[PathSegment]> {
        if self.segments.len() < prefix.len() {
            return None;
        }
        for (segment, expected) in self.segments.iter().zip(prefix) {
            match segment {
                PathSegment::Key(key) if key == expected => {}
                _ => return None,
            }
        }
        Some(&self.segments[prefix.len()..])
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if is_plain_key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Key(key) => {
                    write!(f, "[\"{}\"]", key.replace('\\', "\\\\").replace('"', "\\\""))?
                }
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_')
}

struct PathParser<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    braced: bool,
}

impl<'a> PathParser<'a> {
    fn new(text: &'a str, braced: bool) -> Self {
        Self {
            text,
            chars: text.char_indices().collect(),
            pos: 0,
            braced,
        }
    }

    fn parse(mut self) -> Result<(FieldPath, usize), AppError> {
        let mut segments = Vec::new();
        if self.peek() == Some('[') {
            segments.push(self.bracket()?);
        } else {
            segments.push(PathSegment::Key(self.key()?));
        }
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    segments.push(PathSegment::Key(self.key()?));
                }
                Some('[') => segments.push(self.bracket()?),
                _ => break,
            }
        }
        let consumed = self.offset();
        Ok((FieldPath::new(segments), consumed))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.text.len())
    }

    fn is_key_char(&self, c: char) -> bool {
        c.is_alphanumeric() || c == '_' || (self.braced && matches!(c, '-' | '$' | '@'))
    }

    fn key(&mut self) -> Result<String, AppError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !self.is_key_char(c) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(path_error(self.text, self.offset(), "expected field name"));
        }
        Ok(self.chars[start..self.pos].iter().map(|(_, c)| *c).collect())
    }

    fn bracket(&mut self) -> Result<PathSegment, AppError> {
        self.pos += 1;
        let segment = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut key = String::new();
                loop {
                    match self.peek() {
                        None => {
                            return Err(path_error(
                                self.text,
                                self.offset(),
                                "unterminated quoted key",
                            ))
                        }
                        Some('\\') => {
                            self.pos += 1;
                            if let Some(escaped) = self.peek() {
                                key.push(escaped);
                                self.pos += 1;
                            }
                        }
                        Some(c) if c == quote => {
                            self.pos += 1;
                            break;
                        }
                        Some(c) => {
                            key.push(c);
                            self.pos += 1;
                        }
                    }
                }
                PathSegment::Key(key)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
                let index = digits.parse::<usize>().map_err(|_| {
                    path_error(self.text, self.offset(), "array index out of range")
                })?;
                PathSegment::Index(index)
            }
            _ => {
                return Err(path_error(
                    self.text,
                    self.offset(),
                    "expected array index or quoted key",
                ))
            }
        };
        if self.peek() != Some(']') {
            return Err(path_error(self.text, self.offset(), "expected ']'"));
        }
        self.pos += 1;
        Ok(segment)
    }
}

fn path_error(text: &str, offset: usize, message: &str) -> AppError {
    AppError::new(
        ErrorCategory::ParseError,
        format!("{} at offset {} in path '{}'", message, offset, text),
    )
    .with_code("DATA-PATH-001")
}

/// Read the value under `segments`, if present.
pub fn get_path<'v>(value: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new` under `segments`, creating intermediate objects and arrays as needed.
/// Arrays are padded with nulls up to the written index, which may not exceed
/// [`MAX_WRITE_INDEX`].
pub fn set_path(target: &mut Value, segments: &[PathSegment], new: Value) -> Result<(), AppError> {
    let Some((first, rest)) = segments.split_first() else {
        *target = new;
        return Ok(());
    };
    match first {
        PathSegment::Key(key) => {
            if target.is_null() {
                *target = Value::Object(Map::new());
            }
            match target {
                Value::Object(map) => {
                    let slot = map.entry(key.clone()).or_insert(Value::Null);
                    set_path(slot, rest, new)
                }
                other => Err(write_error(format!(
                    "cannot set field '{}' on {} value",
                    key,
                    kind_name(other)
                ))),
            }
        }
        PathSegment::Index(index) => {
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) => {
                    if *index > MAX_WRITE_INDEX && items.len() <= *index {
                        return Err(write_error(format!(
                            "index {} exceeds the write limit of {}",
                            index, MAX_WRITE_INDEX
                        )));
                    }
                    if items.len() <= *index {
                        items.resize(index + 1, Value::Null);
                    }
                    set_path(&mut items[*index], rest, new)
                }
                other => Err(write_error(format!(
                    "cannot set index {} on {} value",
                    index,
                    kind_name(other)
                ))),
            }
        }
    }
}

fn write_error(message: String) -> AppError {
    AppError::new(ErrorCategory::EvalError, message).with_code("DATA-PATH-002")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.to_string())
    }

    #[test]
    fn parses_dotted_indexed_and_quoted_segments() {
        let path = FieldPath::parse(r#"a.b[0]["c d"]"#).unwrap();
        assert_eq!(
            path.segments(),
            &[key("a"), key("b"), PathSegment::Index(0), key("c d")]
        );
        let single = FieldPath::parse("a['x.y']").unwrap();
        assert_eq!(single.segments(), &[key("a"), key("x.y")]);
    }

    #[test]
    fn prefix_parse_stops_at_operator() {
        let (path, consumed) = FieldPath::parse_prefix("status == ok", false).unwrap();
        assert_eq!(path.segments(), &[key("status")]);
        assert_eq!(consumed, 6);
        let (dashed, _) = FieldPath::parse_prefix("content-type", true).unwrap();
        assert_eq!(dashed.segments(), &[key("content-type")]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(FieldPath::parse("a.").is_err());
        assert!(FieldPath::parse("a[x]").is_err());
        assert!(FieldPath::parse("a[\"open").is_err());
        assert!(FieldPath::parse("a b").is_err());
    }

    #[test]
    fn display_round_trips() {
        let text = r#"a.b[2]["c d"]"#;
        assert_eq!(FieldPath::parse(text).unwrap().to_string(), text);
    }

    #[test]
    fn set_path_creates_intermediate_containers() {
        let mut value = Value::Null;
        let path = FieldPath::parse("items[1].name").unwrap();
        set_path(&mut value, path.segments(), json!("second")).unwrap();
        assert_eq!(value, json!({"items": [null, {"name": "second"}]}));
        assert_eq!(get_path(&value, path.segments()), Some(&json!("second")));
    }

    #[test]
    fn set_path_refuses_to_index_scalars() {
        let mut value = json!({"a": 5});
        let path = FieldPath::parse("a.b").unwrap();
        let err = set_path(&mut value, path.segments(), json!(1)).unwrap_err();
        assert_eq!(err.code, "DATA-PATH-002");
    }

    #[test]
    fn set_path_caps_array_padding() {
        let huge = FieldPath::parse("a[4000000000]").unwrap();
        assert_eq!(huge.oversized_index(), Some(4_000_000_000));
        let mut value = Value::Null;
        let err = set_path(&mut value, huge.segments(), json!(1)).unwrap_err();
        assert_eq!(err.code, "DATA-PATH-002");
        assert_eq!(value, json!({"a": []}));

        let edge = FieldPath::parse("a[10000]").unwrap();
        assert_eq!(edge.oversized_index(), None);
    }
}
