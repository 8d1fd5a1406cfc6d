//! Client character sets.
//!
//! The handshake names the client's character set by collation id. Only
//! character sets whose multibyte sequences never contain an ASCII byte are
//! accepted; in any other (GBK, Big5, SJIS, ...) the server can read a quote
//! or backslash as part of a wider character and see different statements
//! than the proxy did.

use yacht_sql::ASCII_SAFE_CHARSETS;

/// Character set of a collation id as sent in the handshake.
pub fn charset_name(collation: u8) -> Option<&'static str> {
    let name = match collation {
        5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => "latin1",
        11 | 65 => "ascii",
        33 | 76 | 83 | 192..=215 | 223 => "utf8mb3",
        45 | 46 | 224..=247 | 255 => "utf8mb4",
        63 => "binary",
        1 | 84 => "big5",
        13 | 88 => "sjis",
        28 | 87 => "gbk",
        95 | 96 => "cp932",
        248..=250 => "gb18030",
        _ => return None,
    };
    Some(name)
}

/// Whether the proxy can lex text sent in this collation's character set.
pub fn is_ascii_safe(collation: u8) -> bool {
    charset_name(collation).is_some_and(|name| ASCII_SAFE_CHARSETS.contains(&name))
}
