//! Command templates with `{{name}}` placeholders.
//!
//! Templates are parsed once, when they are built, so a typo in a placeholder
//! fails at construction instead of producing a half-substituted command.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Text(String),
    Placeholder(String),
}

/// A parsed, immutable command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let segments = parse_segments(&source)?;
        Ok(Self { source, segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance, without duplicates.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        }
        names
    }

    pub fn has_placeholder(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(n) if n == name))
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl FromStr for Template {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }

        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            return Err(BridgeError::MalformedTemplate {
                offset: offset + open,
                reason: "unclosed placeholder".to_string(),
            });
        };

        let name = after_open[..close].trim();
        if name.is_empty() {
            return Err(BridgeError::MalformedTemplate {
                offset: offset + open,
                reason: "empty placeholder name".to_string(),
            });
        }
        if !is_identifier(name) {
            return Err(BridgeError::MalformedTemplate {
                offset: offset + open,
                reason: format!("invalid placeholder name '{name}'"),
            });
        }
        segments.push(Segment::Placeholder(name.to_string()));

        let consumed = open + 2 + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    Ok(segments)
}

/// Engine identifier: letter, `_` or `$` followed by alphanumerics, `_` or `$`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_placeholders() {
        let t = Template::parse("var {{refId}} = {{inRefId}}.predict({{testData}});").unwrap();
        assert_eq!(t.placeholders(), vec!["refId", "inRefId", "testData"]);
        assert_eq!(
            t.segments(),
            &[
                Segment::Text("var ".to_string()),
                Segment::Placeholder("refId".to_string()),
                Segment::Text(" = ".to_string()),
                Segment::Placeholder("inRefId".to_string()),
                Segment::Text(".predict(".to_string()),
                Segment::Placeholder("testData".to_string()),
                Segment::Text(");".to_string()),
            ]
        );
    }

    #[test]
    fn placeholder_whitespace_is_trimmed() {
        let t = Template::parse("f({{ x }})").unwrap();
        assert_eq!(t.placeholders(), vec!["x"]);
    }

    #[test]
    fn repeated_placeholder_listed_once() {
        let t = Template::parse("{{a}} + {{a}} + {{b}}").unwrap();
        assert_eq!(t.placeholders(), vec!["a", "b"]);
        assert!(t.has_placeholder("b"));
        assert!(!t.has_placeholder("c"));
    }

    #[test]
    fn template_without_placeholders() {
        let t = Template::parse("sc.stop();").unwrap();
        assert!(t.placeholders().is_empty());
        assert_eq!(t.to_string(), "sc.stop();");
    }

    #[test]
    fn stray_closing_braces_are_text() {
        let t = Template::parse("var o = {a: {b: {{x}}}};").unwrap();
        assert_eq!(t.placeholders(), vec!["x"]);
    }

    #[test]
    fn unclosed_placeholder_is_rejected() {
        let err = Template::parse("x.predict({{testData);").unwrap_err();
        match err {
            BridgeError::MalformedTemplate { offset, reason } => {
                assert_eq!(offset, 10);
                assert!(reason.contains("unclosed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_and_invalid_names_are_rejected() {
        assert!(matches!(
            Template::parse("f({{}})"),
            Err(BridgeError::MalformedTemplate { .. })
        ));
        assert!(matches!(
            Template::parse("f({{  }})"),
            Err(BridgeError::MalformedTemplate { .. })
        ));
        assert!(matches!(
            Template::parse("f({{a.b}})"),
            Err(BridgeError::MalformedTemplate { .. })
        ));
        assert!(matches!(
            Template::parse("f({{ok}}, {{9lives}})"),
            Err(BridgeError::MalformedTemplate { offset: 10, .. })
        ));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("refId"));
        assert!(is_identifier("_x1"));
        assert!(is_identifier("$jq"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
    }
}
