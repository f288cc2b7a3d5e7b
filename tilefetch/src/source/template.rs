//! Path templates with `{X}`, `{Y}` and `{Z}` placeholders.

use super::SourceError;

/// One piece of a parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Text copied verbatim into the URL.
    Literal(String),
    /// Tile column.
    X,
    /// Tile row.
    Y,
    /// Zoom level.
    Z,
}

/// Parsed path template, e.g. `/{Z}/{X}/{Y}.png`.
///
/// Placeholders are matched case-insensitively. Any other text between
/// braces, or an unbalanced brace, is rejected at parse time so that a
/// resolved URL never carries a stray placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathTemplate {
    /// Parses a template string.
    pub fn parse(template: &str) -> Result<Self, SourceError> {
        let invalid = |reason: &str| SourceError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = template;
        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                None => {
                    segments.push(PathSegment::Literal(rest.to_string()));
                    break;
                }
                Some(pos) if rest.as_bytes()[pos] == b'}' => {
                    return Err(invalid("unmatched '}'"));
                }
                Some(pos) => {
                    if pos > 0 {
                        segments.push(PathSegment::Literal(rest[..pos].to_string()));
                    }
                    let after = &rest[pos + 1..];
                    let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                    let name = &after[..close];
                    let segment = match name {
                        "X" | "x" => PathSegment::X,
                        "Y" | "y" => PathSegment::Y,
                        "Z" | "z" => PathSegment::Z,
                        _ => return Err(invalid(&format!("unknown placeholder '{{{}}}'", name))),
                    };
                    segments.push(segment);
                    rest = &after[close + 1..];
                }
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// The parsed segments in order.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The template as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_template() {
        let template = PathTemplate::parse("/{Z}/{X}/{Y}.png").unwrap();
        assert_eq!(
            template.segments(),
            &[
                PathSegment::Literal("/".into()),
                PathSegment::Z,
                PathSegment::Literal("/".into()),
                PathSegment::X,
                PathSegment::Literal("/".into()),
                PathSegment::Y,
                PathSegment::Literal(".png".into()),
            ]
        );
    }

    #[test]
    fn test_bare_letters_stay_literal() {
        let template = PathTemplate::parse("/X/{z}Y").unwrap();
        assert_eq!(
            template.segments(),
            &[
                PathSegment::Literal("/X/".into()),
                PathSegment::Z,
                PathSegment::Literal("Y".into()),
            ]
        );
    }

    #[test]
    fn test_empty_template() {
        let template = PathTemplate::parse("").unwrap();
        assert!(template.segments().is_empty());
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let result = PathTemplate::parse("/{Q}/{X}");
        assert!(matches!(result, Err(SourceError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(PathTemplate::parse("/{Z/{X}").is_err());
        assert!(PathTemplate::parse("/Z}/{X}").is_err());
        assert!(PathTemplate::parse("/{Z").is_err());
    }
}
