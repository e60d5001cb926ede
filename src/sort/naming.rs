//! Naming templates that turn a source file and its capture time into a
//! destination path relative to the sort target.

use std::fmt::Write;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

pub const DEFAULT_FILE_PATTERN: &str = "%d(%Y)/%d(%Y_%m_%d)/%d(%Y_%m_%d-%H%M%S).%e";
pub const DEFAULT_UNDATED_PATTERN: &str = "undated/%n.%e";

/// Tokens understood in a pattern, with a description for usage text.
pub const TOKENS: [(&str, &str); 5] = [
    ("%n", "Name of source file (without extension)"),
    ("%e", "Extension of source file (eg. jpg, png)"),
    ("%d(fmt)", "Capture time in strftime format (eg. %d(%Y-%m-%d_%H%M%S))"),
    ("%p", "Parent directory of source file"),
    ("%%", "Percent sign"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    FileName,
    FileExt,
    Date(String),
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFormatter {
    tokens: Vec<Token>,
}

impl NameFormatter {
    /// Parses `pattern`. A `%` followed by an unknown letter is kept as
    /// written.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;

        while let Some(at) = rest.find('%') {
            literal.push_str(&rest[..at]);
            let mut chars = rest[at + 1..].chars();
            let Some(c) = chars.next() else {
                return Err(Error::Pattern(format!("'{pattern}' ends with %")));
            };
            rest = chars.as_str();

            let token = match c {
                'n' => Token::FileName,
                'e' => Token::FileExt,
                'p' => Token::Parent,
                'd' => {
                    let (format, after) = date_argument(rest).ok_or_else(|| {
                        Error::Pattern(format!("'{pattern}' is missing an argument for %d"))
                    })?;
                    if !renders(format) {
                        return Err(Error::Pattern(format!("invalid date format '{format}'")));
                    }
                    rest = after;
                    Token::Date(format.to_string())
                }
                '%' => {
                    literal.push('%');
                    continue;
                }
                other => {
                    literal.push('%');
                    literal.push(other);
                    continue;
                }
            };

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Ok(NameFormatter { tokens })
    }

    /// Whether the pattern uses the capture time.
    pub fn needs_timestamp(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Date(_)))
    }

    /// Renders the pattern for `source`. Date tokens render empty when no
    /// capture time is known.
    pub fn format(&self, source: &Path, taken: Option<&NaiveDateTime>) -> String {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, ext) = match name.rfind('.') {
            Some(i) => (&name[..i], &name[i + 1..]),
            None => (name.as_str(), ""),
        };

        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::FileName => out.push_str(stem),
                Token::FileExt => out.push_str(ext),
                Token::Date(format) => {
                    if let Some(taken) = taken {
                        // Formats that fail to render are refused by `compile`.
                        let _ = write!(out, "{}", taken.format(format));
                    }
                }
                Token::Parent => {
                    if let Some(parent) = source.parent().and_then(Path::file_name) {
                        out.push_str(&parent.to_string_lossy());
                    }
                }
            }
        }
        out
    }
}

/// Whether a strftime format renders for a date-time without an offset.
/// Unknown specifiers and zone specifiers such as `%z` do not.
fn renders(format: &str) -> bool {
    let mut out = String::new();
    write!(out, "{}", NaiveDateTime::default().format(format)).is_ok()
}

/// Splits `(fmt)rest` into `fmt` and `rest`.
fn date_argument(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('(')?;
    let close = inner.find(')')?;
    Some((&inner[..close], &inner[close + 1..]))
}
