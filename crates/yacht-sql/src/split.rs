//! Lexical batch splitting.
//!
//! A multi-statement submission is cut on top-level `;` while honouring
//! MySQL's quoting and comment rules. The pieces are slices of the original
//! text, so what gets parsed is exactly what the server will see.

use crate::error::SqlError;

/// Lexical options that depend on the server session.
#[derive(Debug, Clone, Copy)]
pub struct LexOptions {
    /// Backslash escapes inside quoted strings. Off when the server reports
    /// `NO_BACKSLASH_ESCAPES`.
    pub backslash_escapes: bool,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            backslash_escapes: true,
        }
    }
}

/// Split `sql` into statement pieces, dropping pieces that hold only
/// whitespace and comments.
///
/// Executable comments (`/*! ... */`, `/*M! ... */`) are rejected outright:
/// the server runs their content, so they cannot be treated as comments.
pub fn split_statements(sql: &str, options: LexOptions) -> Result<Vec<&str>, SqlError> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                has_content = true;
                i = skip_quoted(bytes, i, quote, options)?;
            }
            b'#' => i = skip_line(bytes, i),
            b'-' if is_dash_comment(bytes, i) => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let body = &bytes[i + 2..];
                if body.first() == Some(&b'!') || body.starts_with(b"M!") {
                    return Err(SqlError::ExecutableComment);
                }
                i = skip_block_comment(bytes, i)?;
            }
            b';' => {
                if has_content {
                    pieces.push(sql[start..i].trim());
                }
                start = i + 1;
                has_content = false;
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                has_content = true;
                i += 1;
            }
        }
    }

    if has_content {
        pieces.push(sql[start..].trim());
    }

    if pieces.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(pieces)
}

/// Returns the index just past the closing quote.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, options: LexOptions) -> Result<usize, SqlError> {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && quote != b'`' && options.backslash_escapes {
            i += 2;
            continue;
        }
        if b == quote {
            // Doubled quote is an escaped quote.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(SqlError::Unterminated(match quote {
        b'`' => "identifier",
        _ => "string literal",
    }))
}

/// `--` only starts a comment when followed by whitespace, a control
/// character or the end of input.
fn is_dash_comment(bytes: &[u8], i: usize) -> bool {
    if bytes.get(i + 1) != Some(&b'-') {
        return false;
    }
    match bytes.get(i + 2) {
        None => true,
        Some(b) => b.is_ascii_whitespace() || b.is_ascii_control(),
    }
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], open: usize) -> Result<usize, SqlError> {
    bytes[open + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map(|p| open + 2 + p + 2)
        .ok_or(SqlError::Unterminated("comment"))
}
