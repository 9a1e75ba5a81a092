//! SQL fingerprinting.
//!
//! # Purpose
//! Reduces a raw SQL statement to a stable key so that statements differing
//! only in literal values, spacing, comments or keyword case land in the same
//! stats bucket.
//!
//! # Key invariants
//! - `fingerprint` is total: any input, including malformed SQL, yields a key.
//! - The output depends only on the input text.
//! - Blank input yields the empty string.
//!
//! # How it works
//! The statement is tokenized with `sqlparser`'s MySQL tokenizer. Literals and
//! bind placeholders become `?`, placeholder-only lists become `(?+)`, and the
//! remaining tokens are re-joined with canonical spacing. When the tokenizer
//! rejects the input, a character scanner splits it into the same kind of
//! tokens without any grammar knowledge, and both paths share list collapsing
//! and spacing.
use sqlparser::dialect::MySqlDialect;
use sqlparser::keywords::{ALL_KEYWORDS, Keyword};
use sqlparser::tokenizer::{Token, Tokenizer};

const PLACEHOLDER: &str = "?";
const LIST: &str = "(?+)";

/// Normalized key for `sql`.
///
/// ```
/// use proxy_cc::sqlfp::fingerprint;
///
/// assert_eq!(
///     fingerprint("SELECT * FROM shop_orders WHERE order_id IN (1, 2, 3)"),
///     fingerprint("select * from shop_orders where order_id in (7)"),
/// );
/// ```
pub fn fingerprint(sql: &str) -> String {
    if sql.trim().is_empty() {
        return String::new();
    }
    match Tokenizer::new(&MySqlDialect {}, sql).tokenize() {
        Ok(tokens) => from_tokens(tokens),
        Err(err) => {
            tracing::trace!(error = %err, "sql tokenizer rejected input, scanning bytes");
            scan_fallback(sql)
        }
    }
}

fn from_tokens(tokens: Vec<Token>) -> String {
    let significant: Vec<Token> = tokens
        .into_iter()
        .filter(|token| !matches!(token, Token::Whitespace(_) | Token::EOF))
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(significant.len());
    let mut i = 0;
    while i < significant.len() {
        let token = &significant[i];
        let prev = i.checked_sub(1).map(|p| &significant[p]);
        if matches!(token, Token::Minus)
            && matches!(significant.get(i + 1), Some(Token::Number(..)))
            && !ends_operand(prev)
        {
            out.push(PLACEHOLDER.to_string());
            i += 2;
            continue;
        }
        out.push(normalize_token(token));
        i += 1;
    }

    finish(out)
}

fn finish(tokens: Vec<String>) -> String {
    let mut out = collapse_lists(tokens);
    while out.last().is_some_and(|token| token == ";") {
        out.pop();
    }
    join(&out)
}

fn normalize_token(token: &Token) -> String {
    match token {
        Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
            word.value.to_ascii_lowercase()
        }
        Token::Number(..)
        | Token::Placeholder(_)
        | Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::EscapedStringLiteral(_)
        | Token::HexStringLiteral(_)
        | Token::SingleQuotedByteStringLiteral(_)
        | Token::DoubleQuotedByteStringLiteral(_)
        | Token::DollarQuotedString(_) => PLACEHOLDER.to_string(),
        other => other.to_string(),
    }
}

/// True when `prev` completes an operand, which makes a following `-` binary.
fn ends_operand(prev: Option<&Token>) -> bool {
    match prev {
        None => false,
        Some(Token::Word(word)) => {
            word.quote_style.is_some()
                || !matches!(
                    word.keyword,
                    Keyword::SELECT
                        | Keyword::WHERE
                        | Keyword::AND
                        | Keyword::OR
                        | Keyword::NOT
                        | Keyword::BY
                        | Keyword::IN
                        | Keyword::VALUES
                        | Keyword::SET
                        | Keyword::LIMIT
                        | Keyword::OFFSET
                        | Keyword::THEN
                        | Keyword::ELSE
                        | Keyword::WHEN
                        | Keyword::BETWEEN
                        | Keyword::LIKE
                        | Keyword::IS
                        | Keyword::ON
                        | Keyword::HAVING
                        | Keyword::CASE
                        | Keyword::INTERVAL
                        | Keyword::RETURN
                )
        }
        Some(token) => matches!(
            token,
            Token::Number(..)
                | Token::Placeholder(_)
                | Token::RParen
                | Token::SingleQuotedString(_)
                | Token::DoubleQuotedString(_)
                | Token::NationalStringLiteral(_)
                | Token::EscapedStringLiteral(_)
                | Token::HexStringLiteral(_)
        ),
    }
}

/// Replace `( ? , ? ... )` with `(?+)`. Comma-joined groups merge only in the
/// row list of `VALUES`.
fn collapse_lists(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut in_rows = false;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "(" {
            if let Some(close) = placeholder_list_end(&tokens, i) {
                let merges = in_rows
                    && out.len() >= 2
                    && out[out.len() - 1] == ","
                    && out[out.len() - 2] == LIST;
                if merges {
                    out.pop();
                } else {
                    in_rows = out
                        .last()
                        .is_some_and(|prev| prev == "values" || prev == "value");
                    out.push(LIST.to_string());
                }
                i = close + 1;
                continue;
            }
        }
        if tokens[i] != "," {
            in_rows = false;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn placeholder_list_end(tokens: &[String], open: usize) -> Option<usize> {
    let mut j = open + 1;
    loop {
        if tokens.get(j)? != PLACEHOLDER {
            return None;
        }
        j += 1;
        match tokens.get(j)?.as_str() {
            ")" => return Some(j),
            "," => j += 1,
            _ => return None,
        }
    }
}

fn join(tokens: &[String]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            let prev = tokens[i - 1].as_str();
            let tight = matches!(prev, "(" | ".") || matches!(token.as_str(), ")" | "," | ".");
            if !tight {
                out.push(' ');
            }
        }
        out.push_str(token);
    }
    out
}

/// Grammar-free tokenizing used when the tokenizer fails.
fn scan_fallback(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '\'' | '"' => {
                i = skip_quoted(&chars, i);
                tokens.push(PLACEHOLDER.to_string());
            }
            '`' => {
                i += 1;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                i = (i + 1).min(chars.len());
                tokens.push(chars[start..i].iter().collect());
            }
            '?' => {
                i += 1;
                tokens.push(PLACEHOLDER.to_string());
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(PLACEHOLDER.to_string());
            }
            c if is_word_char(c) => {
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(normalize_word(word));
            }
            '<' | '>' | '=' | '!' => {
                while i < chars.len() && matches!(chars[i], '<' | '>' | '=' | '!') {
                    i += 1;
                }
                tokens.push(chars[start..i].iter().collect());
            }
            c => {
                i += 1;
                tokens.push(c.to_string());
            }
        }
    }

    finish(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Keywords are lowercased, identifiers keep their case.
fn normalize_word(word: String) -> String {
    let upper = word.to_ascii_uppercase();
    if ALL_KEYWORDS.binary_search(&upper.as_str()).is_ok() {
        word.to_ascii_lowercase()
    } else {
        word
    }
}

/// Index just past the quoted run starting at `open`, or the end of input.
fn skip_quoted(chars: &[char], open: usize) -> usize {
    let quote = chars[open];
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    chars.len()
}
