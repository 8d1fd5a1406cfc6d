//! Literal-free statement fingerprints.
//!
//! Two statements that differ only in literal values, whitespace, comments or
//! keyword casing share a fingerprint. Audit records carry the fingerprint
//! instead of the statement text so parameter values stay out of the trail.

use sha2::{Digest, Sha256};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::Token;

/// Hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Render the normalized form of a token stream. Tokens are space-separated
/// so `a=1` and `a = 1` normalize alike.
pub fn normalize(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let piece = match token {
            Token::Number(..)
            | Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::NationalStringLiteral(_)
            | Token::HexStringLiteral(_)
            | Token::Placeholder(_) => "?".to_string(),
            Token::Whitespace(_) => " ".to_string(),
            Token::EOF => continue,
            Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
                word.value.to_uppercase()
            }
            Token::Word(word) => word.value.to_lowercase(),
            other => other.to_string(),
        };
        out.push(' ');
        out.push_str(&piece);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hash a normalized statement.
pub fn hash(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Normalize and hash in one step.
pub fn fingerprint(tokens: &[Token]) -> String {
    hash(&normalize(tokens))
}
