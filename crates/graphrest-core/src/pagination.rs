//! Pagination translation
//!
//! Converts REST results into forward-only connections:
//!
//! - **Paged**: the backend paginates. It is asked for `limit`/`pageSize`/`cursor` and
//!   answers `{ items, meta: { cursors, hasNextPage, ... } }`. Items pair
//!   with cursors by position; extra `meta` fields pass through.
//! - **Unpaged**: the backend returns the whole collection as an array and
//!   slicing happens here, with array-connection cursors
//!   (`base64("arrayconnection:<offset>")`).
//!
//! Response shapes are checked once, in [`PageResult::classify`]; everything
//! downstream works on typed values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Argument names consumed by pagination rather than forwarded as filters.
pub const PAGINATION_KEYS: [&str; 4] = ["after", "first", "before", "last"];

const ARRAY_CURSOR_PREFIX: &str = "arrayconnection:";

// ============================================================================
// Connection Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub node: Value,
    pub cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

/// Uniform forward-only connection returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
    pub meta: Map<String, Value>,
}

impl Connection {
    /// Start/end cursors come from the first/last edge, `None` when empty.
    fn from_edges(
        edges: Vec<Edge>,
        has_previous_page: bool,
        has_next_page: bool,
        meta: Map<String, Value>,
    ) -> Self {
        let page_info = PageInfo {
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
            has_previous_page,
            has_next_page,
        };
        Self {
            edges,
            page_info,
            meta,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Value> {
        self.edges.iter().map(|e| &e.node)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    /// The backend answered a paged request with the wrong shape.
    #[error("paged response violates contract: {0}")]
    Malformed(String),
    #[error("expected an array for an unpaged collection, got {0}")]
    NotAnArray(&'static str),
    #[error("invalid pagination argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}

// ============================================================================
// Arguments
// ============================================================================

/// Forward pagination arguments. `before`/`last` are accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationArgs {
    pub first: Option<i64>,
    pub after: Option<String>,
}

impl PaginationArgs {
    /// Whether the caller supplied a (non-empty) `after` cursor.
    pub fn has_after(&self) -> bool {
        self.after.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// Separate pagination arguments from the filters forwarded to the backend.
pub fn split_pagination_args(
    args: &Map<String, Value>,
) -> Result<(PaginationArgs, Map<String, Value>), PaginationError> {
    let mut page = PaginationArgs::default();
    let mut filters = Map::new();

    for (key, value) in args {
        match key.as_str() {
            "first" => page.first = parse_first(value)?,
            "after" => page.after = parse_after(value)?,
            k if PAGINATION_KEYS.contains(&k) => {}
            _ => {
                filters.insert(key.clone(), value.clone());
            }
        }
    }
    Ok((page, filters))
}

fn parse_first(value: &Value) -> Result<Option<i64>, PaginationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(first) if first >= 0 => Ok(Some(first)),
            _ => Err(PaginationError::InvalidArgument {
                name: "first",
                reason: format!("must be a non-negative integer, got {n}"),
            }),
        },
        other => Err(PaginationError::InvalidArgument {
            name: "first",
            reason: format!("must be a non-negative integer, got {}", kind(other)),
        }),
    }
}

fn parse_after(value: &Value) -> Result<Option<String>, PaginationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(PaginationError::InvalidArgument {
            name: "after",
            reason: format!("must be a cursor string, got {}", kind(other)),
        }),
    }
}

/// Backend arguments for a paged request: filters plus `limit`/`pageSize`
/// (both set to `first`) and `cursor`.
pub fn paged_args(page: &PaginationArgs, filters: &Map<String, Value>) -> Map<String, Value> {
    let mut args = filters.clone();
    if let Some(first) = page.first {
        args.insert("limit".to_string(), Value::from(first));
        args.insert("pageSize".to_string(), Value::from(first));
    }
    if let Some(after) = &page.after {
        args.insert("cursor".to_string(), Value::from(after.clone()));
    }
    args
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Paged Strategy
// ============================================================================

/// A raw paged response, classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    Found {
        items: Vec<Value>,
        cursors: Vec<String>,
        has_next_page: bool,
        /// `meta` without `cursors` and `hasNextPage`.
        meta: Map<String, Value>,
    },
    NotFound,
    Malformed(String),
}

impl PageResult {
    pub fn classify(raw: Option<Value>) -> Self {
        let mut body = match raw {
            None | Some(Value::Null) => return Self::NotFound,
            Some(Value::Object(body)) => body,
            Some(other) => {
                return Self::Malformed(format!("expected an object, got {}", kind(&other)))
            }
        };

        let mut meta = match body.remove("meta") {
            Some(Value::Object(meta)) => meta,
            Some(other) => {
                return Self::Malformed(format!("`meta` must be an object, got {}", kind(&other)))
            }
            None => return Self::Malformed("missing `meta`".to_string()),
        };

        let items = match body.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Self::Malformed(format!("`items` must be an array, got {}", kind(&other)))
            }
            None => return Self::Malformed("missing `items`".to_string()),
        };

        let cursors = match meta.remove("cursors") {
            Some(Value::Array(cursors)) => {
                let mut out = Vec::with_capacity(cursors.len());
                for cursor in cursors {
                    match cursor {
                        Value::String(c) => out.push(c),
                        other => {
                            return Self::Malformed(format!(
                                "`meta.cursors` must hold strings, got {}",
                                kind(&other)
                            ))
                        }
                    }
                }
                out
            }
            Some(other) => {
                return Self::Malformed(format!(
                    "`meta.cursors` must be an array, got {}",
                    kind(&other)
                ))
            }
            None => return Self::Malformed("missing `meta.cursors`".to_string()),
        };

        if cursors.len() != items.len() {
            return Self::Malformed(format!(
                "{} items but {} cursors",
                items.len(),
                cursors.len()
            ));
        }

        let has_next_page = match meta.remove("hasNextPage") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Self::Malformed(format!(
                    "`meta.hasNextPage` must be a boolean, got {}",
                    kind(&other)
                ))
            }
        };

        Self::Found {
            items,
            cursors,
            has_next_page,
            meta,
        }
    }
}

/// Build a connection from a classified paged response.
///
/// `Ok(None)` propagates "not found"; a malformed response is an error.
pub fn connection_from_page(
    result: PageResult,
    page: &PaginationArgs,
) -> Result<Option<Connection>, PaginationError> {
    match result {
        PageResult::NotFound => Ok(None),
        PageResult::Malformed(reason) => Err(PaginationError::Malformed(reason)),
        PageResult::Found {
            items,
            cursors,
            has_next_page,
            meta,
        } => {
            let edges = items
                .into_iter()
                .zip(cursors)
                .map(|(node, cursor)| Edge { node, cursor })
                .collect();
            Ok(Some(Connection::from_edges(
                edges,
                page.has_after(),
                has_next_page,
                meta,
            )))
        }
    }
}

// ============================================================================
// Unpaged Strategy
// ============================================================================

pub fn offset_to_cursor(offset: usize) -> String {
    STANDARD.encode(format!("{ARRAY_CURSOR_PREFIX}{offset}"))
}

/// Offset encoded in an array cursor, or `None` if it is not one.
///
/// Decoding is strict: the decoded text must start with `arrayconnection:`
/// exactly, so foreign cursors are rejected rather than sliced.
pub fn cursor_to_offset(cursor: &str) -> Option<i64> {
    let bytes = STANDARD.decode(cursor).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    text.strip_prefix(ARRAY_CURSOR_PREFIX)?.parse().ok()
}

/// Slice a full collection into a connection.
///
/// Starts right after the `after` offset (or at the beginning when the
/// cursor does not decode) and takes up to `first` items.
pub fn connection_from_array(items: Vec<Value>, page: &PaginationArgs) -> Connection {
    let len = items.len();
    let start = page
        .after
        .as_deref()
        .and_then(cursor_to_offset)
        .map_or(0, |offset| offset.saturating_add(1).max(0))
        .min(len as i64) as usize;
    let end = match page.first {
        Some(first) => start.saturating_add(first.max(0) as usize).min(len),
        None => len,
    };

    let edges = items
        .into_iter()
        .enumerate()
        .skip(start)
        .take(end - start)
        .map(|(offset, node)| Edge {
            node,
            cursor: offset_to_cursor(offset),
        })
        .collect();

    let has_next_page = page.first.is_some() && end < len;
    Connection::from_edges(edges, false, has_next_page, Map::new())
}

/// Check an unpaged backend response and slice it.
pub fn connection_from_collection(
    raw: Option<Value>,
    page: &PaginationArgs,
) -> Result<Connection, PaginationError> {
    match raw {
        Some(Value::Array(items)) => Ok(connection_from_array(items, page)),
        Some(other) => Err(PaginationError::NotAnArray(kind(&other))),
        None => Err(PaginationError::NotAnArray("nothing")),
    }
}

// ============================================================================
// Tests
// ============================================================================
