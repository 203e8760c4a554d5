//! Path template parsing and matching.
//!
//! # Responsibilities
//! - Split request paths into segments (lowercased for matching, case-kept for captures)
//! - Parse route templates into literal, capture and wildcard segments
//! - Structural matching of a template against a split path
//! - Extract positional captures in template order
//!
//! # Design Decisions
//! - Literal matching is case-insensitive: both sides are lowercased at split time
//! - Captures keep the client's casing
//! - `#name` templates are system routes and never match client paths

use crate::error::RouteError;

/// One parsed template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{name}`; matches any single segment.
    Capture(String),
    /// Trailing `*`; matches any remaining suffix.
    Wildcard,
}

/// Split a path into segments, dropping leading and trailing slashes.
///
/// The root path yields no segments.
pub fn split_path(path: &str, lowercase: bool) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('/')
        .map(|s| if lowercase { s.to_lowercase() } else { s.to_string() })
        .collect()
}

/// Ensure a path ends with a slash, e.g. `/chat` becomes `/chat/`.
pub fn with_trailing_slash(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// A parsed route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    system: bool,
}

impl Template {
    /// Parse a template such as `/users/{id}/` or `/files/*` or `#404`.
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        let source = source.trim();
        let system = source.starts_with('#');

        if system {
            return Ok(Self {
                source: source.to_string(),
                segments: vec![Segment::Literal(source.to_lowercase())],
                system,
            });
        }

        let parts = split_path(source, false);
        let last = parts.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.into_iter().enumerate() {
            if part == "*" {
                if index != last {
                    return Err(RouteError::Template(source.to_string()));
                }
                segments.push(Segment::Wildcard);
            } else if part.starts_with('{') {
                if !part.ends_with('}') || part.len() < 2 {
                    return Err(RouteError::Template(source.to_string()));
                }
                segments.push(Segment::Capture(part[1..part.len() - 1].to_string()));
            } else if part.is_empty() {
                return Err(RouteError::Template(source.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_lowercase()));
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            system,
        })
    }

    /// `/*`, matching every client path.
    pub fn any() -> Self {
        Self {
            source: "/*".to_string(),
            segments: vec![Segment::Wildcard],
            system: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this is a `#name` system route.
    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn has_captures(&self) -> bool {
        self.capture_count() > 0
    }

    pub fn capture_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Capture(_)))
            .count()
    }

    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Names of the capture segments in template order.
    pub fn capture_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Capture(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Priority contributed by the template shape.
    ///
    /// One point per slash, minus one per capture, minus one for a system
    /// marker or a trailing wildcard.
    pub fn priority(&self) -> i32 {
        let mut priority = self.source.matches('/').count() as i32;
        priority -= self.capture_count() as i32;
        if self.source.contains('#') {
            priority -= 1;
        }
        if self.has_wildcard() {
            priority -= 1;
        }
        priority
    }

    /// Match against a lowercased split path.
    ///
    /// `system` is true only for internal `#name` lookups; a system template
    /// never matches a client path and vice versa.
    pub fn matches<S: AsRef<str>>(&self, path: &[S], system: bool) -> bool {
        if self.system != system {
            return false;
        }

        let fixed = if self.has_wildcard() {
            if path.len() < self.segments.len() - 1 {
                return false;
            }
            &self.segments[..self.segments.len() - 1]
        } else {
            if path.len() != self.segments.len() {
                return false;
            }
            &self.segments[..]
        };

        fixed.iter().zip(path).all(|(segment, value)| match segment {
            Segment::Literal(literal) => literal == value.as_ref(),
            Segment::Capture(_) | Segment::Wildcard => true,
        })
    }

    /// Collect capture values from a case-preserved split path.
    pub fn captures<S: AsRef<str>>(&self, path: &[S]) -> Vec<String> {
        self.segments
            .iter()
            .zip(path)
            .filter_map(|(segment, value)| match segment {
                Segment::Capture(_) => Some(value.as_ref().to_string()),
                _ => None,
            })
            .collect()
    }
}
