//! Field path parsing and label extraction for fetched documents.
//!
//! A job configures labels as `name -> path` pairs. Each path is parsed once
//! into a [`PathIndex`] and then resolved against every document the source
//! returns.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::PathError;
use crate::message::{Document, LabelSet};

/// Quote character that wraps a segment containing delimiters
pub const ESCAPE_CHAR: char = '"';

/// Segment delimiter
pub const DELIMITER_CHAR: char = '.';

/// Text used for a label whose path did not resolve. Matches the `<nil>`
/// value existing alert routes already select on.
pub const MISSING_PLACEHOLDER: &str = "<nil>";

/// Parsed path into a nested document
///
/// # Examples
///
/// - `service.host` - two segments
/// - `"kubernetes.pod".name` - `kubernetes.pod`, `name`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathIndex {
    segments: Vec<String>,
}

impl PathIndex {
    /// Parse a dotted path string.
    ///
    /// Segments are split on `.`; a segment wrapped in `"` is taken verbatim,
    /// delimiters included. Empty pieces from leading, trailing or doubled
    /// delimiters are dropped.
    ///
    /// An unterminated quote is not an error: everything after the lone quote
    /// becomes one final segment, and a lone trailing quote contributes
    /// nothing.
    ///
    /// # Example
    ///
    /// ```
    /// use alert_fetcher::PathIndex;
    ///
    /// let index = PathIndex::parse("\"a.b\".c").unwrap();
    /// assert_eq!(index.segments(), &["a.b", "c"]);
    /// ```
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut index = PathIndex::default();
        let mut rest = raw;

        while !rest.is_empty() {
            let mut chunks = rest.splitn(3, ESCAPE_CHAR);
            let literal = chunks.next().unwrap_or_default();
            let quoted = chunks.next();
            let remainder = chunks.next();

            index.push_split(literal);
            if let Some(quoted) = quoted {
                index.push(quoted);
            }

            match remainder {
                Some(remainder) => rest = remainder,
                None => break,
            }
        }

        Ok(index)
    }

    /// Build an index from already separated segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = PathIndex::default();
        for segment in segments {
            let segment: String = segment.into();
            index.push(&segment);
        }
        index
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn push(&mut self, segment: &str) {
        if !segment.is_empty() {
            self.segments.push(segment.to_string());
        }
    }

    fn push_split(&mut self, literal: &str) {
        for piece in literal.split(DELIMITER_CHAR) {
            self.push(piece);
        }
    }
}

impl fmt::Display for PathIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|s| {
                if s.contains(DELIMITER_CHAR) {
                    format!("{ESCAPE_CHAR}{s}{ESCAPE_CHAR}")
                } else {
                    s.clone()
                }
            })
            .collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// Walk `index` through `doc`.
///
/// Every segment but the last must land on a nested object, otherwise the
/// result is `None`. The final segment returns whatever value is stored there.
pub fn resolve<'a>(index: &PathIndex, doc: Option<&'a Document>) -> Option<&'a Value> {
    let (last, parents) = index.segments.split_last()?;
    let mut current = doc?;

    for segment in parents {
        match current.get(segment) {
            Some(Value::Object(nested)) => current = nested,
            _ => return None,
        }
    }

    current.get(last)
}

/// Default textual form of a resolved value.
///
/// Strings are used as-is, scalars and containers in their JSON form.
/// Unresolved values and JSON `null` both become [`MISSING_PLACEHOLDER`].
pub fn value_to_label(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING_PLACEHOLDER.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Compiled `label name -> path` mapping for one job
#[derive(Debug, Clone, Default)]
pub struct FieldExtractor {
    mappings: IndexMap<String, PathIndex>,
}

impl FieldExtractor {
    /// Parse every configured path. The first bad path fails the whole build.
    pub fn new(mappings: &IndexMap<String, String>) -> Result<Self, PathError> {
        let mappings = mappings
            .iter()
            .map(|(name, raw)| Ok((name.clone(), PathIndex::parse(raw)?)))
            .collect::<Result<IndexMap<_, _>, PathError>>()?;

        Ok(Self { mappings })
    }

    /// Raw values per label name; `None` where the path did not resolve.
    pub fn extract(&self, doc: Option<&Document>) -> IndexMap<String, Option<Value>> {
        self.mappings
            .iter()
            .map(|(name, index)| (name.clone(), resolve(index, doc).cloned()))
            .collect()
    }

    /// Textual values per label name. Every configured name is present.
    pub fn extract_string(&self, doc: Option<&Document>) -> LabelSet {
        self.mappings
            .iter()
            .map(|(name, index)| (name.clone(), value_to_label(resolve(index, doc))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
