//! Native type specifications: `varchar(255)`, `decimal(10,2)`,
//! `nvarchar(max)`, `enum('a','b')`, `integer[]`, `int unsigned`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed native column type.
///
/// The base name is stored lowercase with single spaces, so two specs that
/// differ only in case or spacing compare equal. Enum and set values keep
/// their original case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeTypeSpec {
    /// Base type name, e.g. `varchar`, `double precision`,
    /// `timestamp with time zone`.
    pub name: String,
    /// Parenthesized arguments, e.g. `["10", "2"]` or `["max"]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// MySQL `UNSIGNED` modifier.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unsigned: bool,
    /// Trailing `[]` (PostgreSQL arrays). `name`/`args` describe the element.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_array: bool,
}

impl NativeTypeSpec {
    /// A bare type name without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            args: Vec::new(),
            unsigned: false,
            is_array: false,
        }
    }

    /// A length-parameterized type such as `varchar(255)`.
    pub fn sized(name: impl Into<String>, length: u32) -> Self {
        Self::new(name).with_args([length.to_string()])
    }

    /// A type with `max` length such as `nvarchar(max)`.
    pub fn max(name: impl Into<String>) -> Self {
        Self::new(name).with_args(["max".to_string()])
    }

    /// A precision/scale type such as `decimal(10,2)`.
    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self::new(name).with_args([precision.to_string(), scale.to_string()])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args_appended(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn array_of(element: NativeTypeSpec) -> Self {
        Self {
            is_array: true,
            ..element
        }
    }

    /// The element type of an array spec.
    pub fn element(&self) -> NativeTypeSpec {
        Self {
            is_array: false,
            ..self.clone()
        }
    }

    /// Parse a native type string. Parsing never fails; unrecognized shapes
    /// end up as a name the engine mappers will not know.
    pub fn parse(input: &str) -> Self {
        let mut raw = input.trim();
        let mut is_array = false;
        while let Some(stripped) = raw.strip_suffix("[]") {
            is_array = true;
            raw = stripped.trim_end();
        }

        let (name_part, args) = match (raw.find('('), raw.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                let before = &raw[..open];
                let inner = &raw[open + 1..close];
                let after = &raw[close + 1..];
                let name = format!("{} {}", before.trim(), after.trim());
                let is_enum = matches!(before.trim().to_lowercase().as_str(), "enum" | "set");
                (name, split_args(inner, is_enum))
            }
            _ => (raw.to_string(), Vec::new()),
        };

        let mut unsigned = false;
        let words: Vec<String> = name_part
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| match w.as_str() {
                "unsigned" => {
                    unsigned = true;
                    false
                }
                "zerofill" | "signed" => false,
                _ => true,
            })
            .collect();

        Self {
            name: words.join(" "),
            args,
            unsigned,
            is_array,
        }
    }

    /// First argument as a length. `max` (and `-1`) map to `-1`.
    pub fn length(&self) -> Option<i64> {
        let first = self.args.first()?;
        if first == "max" {
            return Some(-1);
        }
        first.parse().ok()
    }

    /// Whether the length argument is `max`.
    pub fn is_max(&self) -> bool {
        self.length() == Some(-1)
    }

    /// First argument as a numeric precision.
    pub fn precision(&self) -> Option<u32> {
        self.args.first().and_then(|a| a.parse().ok())
    }

    /// Second argument as a numeric scale.
    pub fn scale(&self) -> Option<u32> {
        self.args.get(1).and_then(|a| a.parse().ok())
    }

    /// Length argument as a positive `u32`, ignoring `max`.
    pub fn length_u32(&self) -> Option<u32> {
        self.length()
            .filter(|n| *n > 0)
            .map(|n| n.min(u32::MAX as i64) as u32)
    }

    /// Copy with the arguments removed.
    pub fn without_args(&self) -> NativeTypeSpec {
        Self {
            args: Vec::new(),
            ..self.clone()
        }
    }

    /// Copy with a different base name, keeping arguments.
    pub fn renamed(&self, name: &str) -> NativeTypeSpec {
        Self {
            name: normalize_name(name),
            ..self.clone()
        }
    }

    fn is_enum_like(&self) -> bool {
        matches!(self.name.as_str(), "enum" | "set")
    }
}

impl From<&str> for NativeTypeSpec {
    fn from(s: &str) -> Self {
        NativeTypeSpec::parse(s)
    }
}

impl fmt::Display for NativeTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let upper = self.name.to_uppercase();
        let args = if self.args.is_empty() {
            String::new()
        } else if self.is_enum_like() {
            let quoted: Vec<String> = self
                .args
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect();
            format!("({})", quoted.join(","))
        } else {
            format!("({})", self.args.join(",").to_uppercase())
        };

        // Arguments attach to the first word: TIMESTAMP(6) WITH TIME ZONE
        match upper.split_once(' ') {
            Some((head, tail)) if !args.is_empty() && tail.starts_with("WITH") => {
                write!(f, "{}{} {}", head, args, tail)?
            }
            _ => write!(f, "{}{}", upper, args)?,
        }
        if self.unsigned {
            f.write_str(" UNSIGNED")?;
        }
        if self.is_array {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `a, b` or `'x','y'` argument lists, honoring quotes.
fn split_args(inner: &str, keep_case: bool) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                current.push('\'');
                chars.next();
            }
            '\'' => in_quote = !in_quote,
            c if c.is_whitespace() && !in_quote => {}
            ',' if !in_quote => {
                args.push(finish_arg(&current, keep_case));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(finish_arg(&current, keep_case));
    }
    args
}

fn finish_arg(arg: &str, keep_case: bool) -> String {
    if keep_case {
        arg.to_string()
    } else {
        arg.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let spec = NativeTypeSpec::parse("INT");
        assert_eq!(spec.name, "int");
        assert!(spec.args.is_empty());
        assert_eq!(spec.to_string(), "INT");
    }

    #[test]
    fn test_parse_length_and_max() {
        let spec = NativeTypeSpec::parse("nvarchar(50)");
        assert_eq!(spec.length(), Some(50));
        let spec = NativeTypeSpec::parse("NVARCHAR(MAX)");
        assert!(spec.is_max());
        assert_eq!(spec, NativeTypeSpec::max("nvarchar"));
    }

    #[test]
    fn test_parse_precision_scale() {
        let spec = NativeTypeSpec::parse("decimal(10, 2)");
        assert_eq!(spec.precision(), Some(10));
        assert_eq!(spec.scale(), Some(2));
        assert_eq!(spec, NativeTypeSpec::decimal("decimal", 10, 2));
        assert_eq!(spec.to_string(), "DECIMAL(10,2)");
    }

    #[test]
    fn test_parse_multiword_with_args() {
        let spec = NativeTypeSpec::parse("timestamp(3) with time zone");
        assert_eq!(spec.name, "timestamp with time zone");
        assert_eq!(spec.precision(), Some(3));
        assert_eq!(spec.to_string(), "TIMESTAMP(3) WITH TIME ZONE");

        let spec = NativeTypeSpec::parse("double   precision");
        assert_eq!(spec.name, "double precision");
    }

    #[test]
    fn test_parse_enum_keeps_case_and_quotes() {
        let spec = NativeTypeSpec::parse("enum('Small','it''s')");
        assert_eq!(spec.name, "enum");
        assert_eq!(spec.args, vec!["Small".to_string(), "it's".to_string()]);
        assert_eq!(spec.to_string(), "ENUM('Small','it''s')");
    }

    #[test]
    fn test_parse_unsigned_and_array() {
        let spec = NativeTypeSpec::parse("int(10) unsigned");
        assert!(spec.unsigned);
        assert_eq!(spec.name, "int");

        let spec = NativeTypeSpec::parse("integer[]");
        assert!(spec.is_array);
        assert_eq!(spec.element(), NativeTypeSpec::new("integer"));
        assert_eq!(spec.to_string(), "INTEGER[]");
    }
}
