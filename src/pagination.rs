//! Backward pagination over append-only conversation logs.
//!
//! A cursor encodes the append index at which the next (older) page ends. Logs only grow at
//! the recent end, so an index counted from the oldest message never moves: the same cursor
//! always addresses the same slice, and following `next_cursor` strictly decreases the bound.

use base64::{ engine::general_purpose::URL_SAFE_NO_PAD, Engine as _ };

use crate::error::{ MessagingError, Result };
use crate::models::{ Cursor, Message, Page };

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

const CURSOR_VERSION: &str = "v1";

pub fn encode_cursor(boundary: usize) -> Cursor {
    Cursor(URL_SAFE_NO_PAD.encode(format!("{}:{}", CURSOR_VERSION, boundary)))
}

pub fn decode_cursor(cursor: &Cursor) -> Result<usize> {
    let invalid = || MessagingError::InvalidCursor(cursor.as_str().to_string());
    let raw = URL_SAFE_NO_PAD.decode(cursor.as_str()).map_err(|_| invalid())?;
    let text = String::from_utf8(raw).map_err(|_| invalid())?;
    match text.split_once(':') {
        Some((CURSOR_VERSION, boundary)) => boundary.parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

pub fn clamp_page_size(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}

/// Half-open index range `[start, end)` of the page plus the cursor for the page before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBounds {
    pub start: usize,
    pub end: usize,
    pub next_cursor: Option<Cursor>,
}

pub fn page_bounds(total: usize, cursor: Option<&Cursor>, limit: usize) -> Result<PageBounds> {
    let end = match cursor {
        Some(c) => {
            let boundary = decode_cursor(c)?;
            if boundary > total {
                return Err(MessagingError::InvalidCursor(c.as_str().to_string()));
            }
            boundary
        }
        None => total,
    };
    let start = end.saturating_sub(clamp_page_size(limit));
    let next_cursor = if start > 0 { Some(encode_cursor(start)) } else { None };
    Ok(PageBounds { start, end, next_cursor })
}

/// Pages an in-memory log stored oldest first.
pub fn paginate(log: &[Message], cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
    let bounds = page_bounds(log.len(), cursor, limit)?;
    Ok(Page {
        messages: log[bounds.start..bounds.end].to_vec(),
        next_cursor: bounds.next_cursor,
    })
}
