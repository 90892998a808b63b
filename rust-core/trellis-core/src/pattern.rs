//! # Pattern Compiler
//!
//! Turns route templates such as `/users/:id:/posts` into a matcher plus the
//! ordered list of parameter names, one per capture group.
//!
//! ## Syntax
//!
//! - `:name:` captures a single segment fragment (`[^/]+`)
//! - `:name*:` captures the remainder of the path, slashes included
//! - Parameters may sit inside a segment: `/files/:stem:.json`
//!
//! Templates without any `:` delimiter compile to a literal matcher and never
//! touch the regex engine.

use crate::error::{Error, Result};
use regex::Regex;

const DELIMITER: char = ':';
const CATCH_ALL: char = '*';

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Literal text, matched verbatim
    Literal(String),
    /// A named parameter
    Param {
        /// Parameter name
        name: String,
        /// Whether the parameter may span `/`
        catch_all: bool,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Regex(Regex),
}

/// A compiled route template
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    raw: String,
    pieces: Vec<Piece>,
    params: Vec<String>,
    matcher: Matcher,
}

impl CompiledPattern {
    /// Compile a route template
    ///
    /// The template is normalized first (leading slash, no duplicate or
    /// trailing slashes) so literal patterns compare equal to normalized
    /// request paths.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRoutePattern` for an unterminated delimiter
    /// - `Error::InvalidParamName` when a name breaks the identifier grammar
    /// - `Error::DuplicateParam` when a name is used twice
    pub fn compile(template: &str) -> Result<Self> {
        let raw = normalize_path(template);

        if !raw.contains(DELIMITER) {
            return Ok(Self {
                pieces: vec![Piece::Literal(raw.clone())],
                params: Vec::new(),
                matcher: Matcher::Literal(raw.clone()),
                raw,
            });
        }

        let pieces = parse_pieces(&raw)?;
        let mut params: Vec<String> = Vec::new();
        let mut regex_src = String::with_capacity(raw.len() + 16);
        regex_src.push('^');

        for piece in &pieces {
            match piece {
                Piece::Literal(text) => regex_src.push_str(&regex::escape(text)),
                Piece::Param { name, catch_all } => {
                    if params.iter().any(|p| p == name) {
                        return Err(Error::DuplicateParam {
                            pattern: raw.clone(),
                            name: name.clone(),
                        });
                    }
                    params.push(name.clone());
                    regex_src.push_str(if *catch_all { "(.+)" } else { "([^/]+)" });
                }
            }
        }
        regex_src.push('$');

        let regex = Regex::new(&regex_src).map_err(|e| Error::InvalidRoutePattern {
            pattern: raw.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw,
            pieces,
            params,
            matcher: Matcher::Regex(regex),
        })
    }

    /// The normalized template this pattern was compiled from
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parameter names in capture-group order
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Parsed template pieces
    #[must_use]
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Whether this pattern short-circuited to a literal comparison
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self.matcher, Matcher::Literal(_))
    }

    /// Match a normalized path, returning `(name, value)` pairs on success
    ///
    /// Values are zipped positionally with the parameter names. A capture
    /// group that did not participate in the match is skipped, never assigned.
    #[must_use]
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        match &self.matcher {
            Matcher::Literal(literal) => (literal == path).then(Vec::new),
            Matcher::Regex(regex) => {
                let caps = regex.captures(path)?;
                Some(
                    self.params
                        .iter()
                        .enumerate()
                        .filter_map(|(i, name)| {
                            caps.get(i + 1).map(|m| (name.as_str(), m.as_str()))
                        })
                        .collect(),
                )
            }
        }
    }
}

fn parse_pieces(raw: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find(DELIMITER) {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(DELIMITER)
            .ok_or_else(|| Error::InvalidRoutePattern {
                pattern: raw.to_string(),
                reason: "unterminated parameter delimiter".to_string(),
            })?;

        let token = &after[..end];
        let (name, catch_all) = token
            .strip_suffix(CATCH_ALL)
            .map_or((token, false), |name| (name, true));

        if !is_identifier(name) {
            return Err(Error::InvalidParamName {
                pattern: raw.to_string(),
                name: token.to_string(),
            });
        }

        if !literal.is_empty() {
            pieces.push(Piece::Literal(std::mem::take(&mut literal)));
        }
        pieces.push(Piece::Param {
            name: name.to_string(),
            catch_all,
        });
        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

/// Check a parameter name against `[A-Za-z_][A-Za-z0-9_]*`
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Canonical leading-slash form: duplicate slashes collapsed, no trailing slash
///
/// The root path stays `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_pattern_is_literal() {
        let p = CompiledPattern::compile("/users/list").unwrap();
        assert!(p.is_literal());
        assert!(p.params().is_empty());
        assert_eq!(p.captures("/users/list"), Some(vec![]));
        assert_eq!(p.captures("/users/list/extra"), None);
    }

    #[test]
    fn test_literal_is_normalized() {
        let p = CompiledPattern::compile("users//list/").unwrap();
        assert_eq!(p.raw(), "/users/list");
        assert_eq!(CompiledPattern::compile("").unwrap().raw(), "/");
    }

    #[test]
    fn test_single_param() {
        let p = CompiledPattern::compile("/users/:id:").unwrap();
        assert!(!p.is_literal());
        assert_eq!(p.params(), ["id".to_string()]);
        assert_eq!(p.captures("/users/42"), Some(vec![("id", "42")]));
        assert_eq!(p.captures("/users/42/edit"), None);
        assert_eq!(p.captures("/users/"), None);
    }

    #[test]
    fn test_params_in_order() {
        let p = CompiledPattern::compile("/users/:user_id:/posts/:post_id:").unwrap();
        assert_eq!(p.params(), ["user_id".to_string(), "post_id".to_string()]);
        assert_eq!(
            p.captures("/users/7/posts/9"),
            Some(vec![("user_id", "7"), ("post_id", "9")])
        );
    }

    #[test]
    fn test_param_inside_segment() {
        let p = CompiledPattern::compile("/files/:stem:.json").unwrap();
        assert_eq!(p.captures("/files/report.json"), Some(vec![("stem", "report")]));
        // the dot is literal, not a regex wildcard
        assert_eq!(p.captures("/files/reportxjson"), None);
    }

    #[test]
    fn test_catch_all() {
        let p = CompiledPattern::compile("/assets/:path*:").unwrap();
        assert_eq!(p.params(), ["path".to_string()]);
        assert_eq!(
            p.captures("/assets/css/site/main.css"),
            Some(vec![("path", "css/site/main.css")])
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        for template in ["/users/:1id:", "/users/::", "/users/:user-id:", "/a/:id/b:"] {
            let err = CompiledPattern::compile(template).unwrap_err();
            assert!(
                matches!(err, Error::InvalidParamName { .. }),
                "{template}: {err}"
            );
            assert!(err.is_registration());
        }
    }

    #[test]
    fn test_unterminated_delimiter() {
        let err = CompiledPattern::compile("/users/:id").unwrap_err();
        assert!(matches!(err, Error::InvalidRoutePattern { .. }));
    }

    #[test]
    fn test_duplicate_param() {
        let err = CompiledPattern::compile("/a/:id:/b/:id:").unwrap_err();
        assert!(matches!(err, Error::DuplicateParam { ref name, .. } if name == "id"));
    }

    #[test]
    fn test_identifier_grammar() {
        assert!(is_identifier("id"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("post_id2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("with space"));
    }
}
