//! Documentation-comment tag extraction.
//!
//! Purely lexical: a doc comment is split into description paragraphs and `@tag` lines.
//! Nothing here interprets type hints; that is left to the type resolver.

use serde::{Deserialize, Serialize};

/// A structured tag found in a documentation comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocTag {
    Description(String),
    Param {
        name: String,
        type_hint: Option<String>,
        description: Option<String>,
    },
    Return {
        type_hint: String,
        description: Option<String>,
    },
    Var {
        type_hint: String,
        description: Option<String>,
    },
    Response {
        status: String,
        type_hint: Option<String>,
        description: Option<String>,
    },
    Header {
        name: String,
        type_hint: Option<String>,
        description: Option<String>,
    },
    Deprecated(Option<String>),
    Example(String),
    Tag(String),
    Relation {
        kind: String,
        target: String,
        foreign_key: Option<String>,
    },
    Unknown {
        name: String,
        body: String,
    },
}

/// Parsed documentation comment, tags in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocBlock {
    pub tags: Vec<DocTag>,
}

impl DocBlock {
    /// Parse the joined text of a doc comment.
    ///
    /// Description lines are grouped into paragraphs (split on blank lines). A known
    /// tag whose body does not fit its shape is kept verbatim as a description.
    pub fn parse(text: &str) -> DocBlock {
        let mut tags = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.starts_with('@') {
                flush_paragraph(&mut paragraph, &mut tags);
                tags.push(parse_tag_line(line));
            } else if line.is_empty() {
                flush_paragraph(&mut paragraph, &mut tags);
            } else {
                paragraph.push(line);
            }
        }
        flush_paragraph(&mut paragraph, &mut tags);

        DocBlock { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| match t {
            DocTag::Description(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// First description paragraph
    pub fn summary(&self) -> Option<String> {
        self.descriptions().next().map(str::to_string)
    }

    /// Every description paragraph after the first
    pub fn description(&self) -> Option<String> {
        let rest: Vec<&str> = self.descriptions().skip(1).collect();
        if rest.is_empty() {
            None
        } else {
            Some(rest.join("\n\n"))
        }
    }

    /// All description paragraphs joined
    pub fn full_description(&self) -> Option<String> {
        let all: Vec<&str> = self.descriptions().collect();
        if all.is_empty() {
            None
        } else {
            Some(all.join("\n\n"))
        }
    }

    pub fn param(&self, name: &str) -> Option<(&Option<String>, &Option<String>)> {
        self.tags.iter().find_map(|t| match t {
            DocTag::Param {
                name: n,
                type_hint,
                description,
            } if n == name => Some((type_hint, description)),
            _ => None,
        })
    }

    pub fn params(&self) -> impl Iterator<Item = &DocTag> {
        self.tags.iter().filter(|t| matches!(t, DocTag::Param { .. }))
    }

    pub fn var_type(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            DocTag::Var { type_hint, .. } => Some(type_hint.as_str()),
            _ => None,
        })
    }

    pub fn return_type(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            DocTag::Return { type_hint, .. } => Some(type_hint.as_str()),
            _ => None,
        })
    }

    pub fn return_description(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            DocTag::Return { description, .. } => description.as_deref(),
            _ => None,
        })
    }

    pub fn responses(&self) -> impl Iterator<Item = &DocTag> {
        self.tags.iter().filter(|t| matches!(t, DocTag::Response { .. }))
    }

    pub fn headers(&self) -> impl Iterator<Item = &DocTag> {
        self.tags.iter().filter(|t| matches!(t, DocTag::Header { .. }))
    }

    pub fn is_deprecated(&self) -> bool {
        self.tags.iter().any(|t| matches!(t, DocTag::Deprecated(_)))
    }

    pub fn example(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            DocTag::Example(body) => Some(body.as_str()),
            _ => None,
        })
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter_map(|t| match t {
                DocTag::Tag(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn relations(&self) -> impl Iterator<Item = &DocTag> {
        self.tags.iter().filter(|t| matches!(t, DocTag::Relation { .. }))
    }
}

fn flush_paragraph(paragraph: &mut Vec<&str>, tags: &mut Vec<DocTag>) {
    if !paragraph.is_empty() {
        tags.push(DocTag::Description(paragraph.join(" ")));
        paragraph.clear();
    }
}

fn parse_tag_line(line: &str) -> DocTag {
    let without_at = &line[1..];
    let (name, body) = match without_at.find(char::is_whitespace) {
        Some(idx) => (&without_at[..idx], without_at[idx..].trim()),
        None => (without_at, ""),
    };

    let parsed = match name {
        "param" | "arg" | "argument" => parse_param(body),
        "return" | "returns" => parse_typed(body).map(|(type_hint, description)| DocTag::Return {
            type_hint,
            description,
        }),
        "var" | "type" => parse_typed(body).map(|(type_hint, description)| DocTag::Var {
            type_hint,
            description,
        }),
        "response" | "status" => parse_response(body),
        "header" => parse_header(body),
        "deprecated" => Some(DocTag::Deprecated(non_empty(body))),
        "example" => non_empty(body).map(DocTag::Example),
        "tag" | "group" => non_empty(body).map(DocTag::Tag),
        "relation" => parse_relation(body),
        _ => Some(DocTag::Unknown {
            name: name.to_string(),
            body: body.to_string(),
        }),
    };

    parsed.unwrap_or_else(|| DocTag::Description(line.to_string()))
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split off the first `n` whitespace-separated tokens; the rest is free text
fn split_tokens(body: &str, n: usize) -> (Vec<&str>, Option<String>) {
    let mut tokens = Vec::new();
    let mut rest = body.trim_start();
    while tokens.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (tokens, non_empty(rest))
}

const TYPE_WORDS: &[&str] = &[
    "int", "integer", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "usize", "isize",
    "float", "double", "f32", "f64", "number", "numeric", "decimal", "string", "str", "char",
    "bool", "boolean", "array", "object", "mixed", "null", "date", "datetime", "uuid", "binary",
    "file", "void", "list", "map",
];

/// Heuristic for "this token is a type hint rather than a name"
pub fn looks_like_type(token: &str) -> bool {
    if token.starts_with('$') {
        return false;
    }
    if token.contains('|')
        || token.contains("[]")
        || token.contains('<')
        || token.starts_with('?')
        || token.starts_with('[')
    {
        return true;
    }
    let lower = token.to_ascii_lowercase();
    TYPE_WORDS.contains(&lower.as_str()) || token.chars().next().is_some_and(char::is_uppercase)
}

fn parse_param(body: &str) -> Option<DocTag> {
    let (tokens, rest) = split_tokens(body, 2);
    let first = *tokens.first()?;
    let second = tokens.get(1).copied();

    let strip = |s: &str| s.trim_start_matches('$').to_string();

    let (name, type_hint, description) = if first.starts_with('$') {
        match second {
            Some(t) if looks_like_type(t) => (strip(first), Some(t.to_string()), rest),
            Some(t) => (strip(first), None, join_desc(t, rest)),
            None => (strip(first), None, rest),
        }
    } else if let Some(s) = second.filter(|s| s.starts_with('$')) {
        (strip(s), Some(first.to_string()), rest)
    } else if looks_like_type(first) {
        // A lone type with no name is malformed
        let s = second?;
        (strip(s), Some(first.to_string()), rest)
    } else {
        match second {
            Some(t) if looks_like_type(t) => (first.to_string(), Some(t.to_string()), rest),
            Some(t) => (first.to_string(), None, join_desc(t, rest)),
            None => (first.to_string(), None, rest),
        }
    };

    Some(DocTag::Param {
        name,
        type_hint,
        description,
    })
}

fn join_desc(token: &str, rest: Option<String>) -> Option<String> {
    match rest {
        Some(rest) => Some(format!("{} {}", token, rest)),
        None => Some(token.to_string()),
    }
}

fn parse_typed(body: &str) -> Option<(String, Option<String>)> {
    let (tokens, rest) = split_tokens(body, 1);
    let type_hint = tokens.first()?;
    Some((type_hint.to_string(), rest))
}

fn parse_response(body: &str) -> Option<DocTag> {
    let (tokens, rest) = split_tokens(body, 1);
    let status = *tokens.first()?;
    let valid_status = status == "default"
        || (status.len() == 3 && status.parse::<u16>().is_ok_and(|s| (100..600).contains(&s)));
    if !valid_status {
        return None;
    }

    let (type_hint, description) = match rest {
        Some(rest) => {
            let (tokens, tail) = split_tokens(&rest, 1);
            match tokens.first() {
                Some(t) if looks_like_type(t) => (Some(t.to_string()), tail),
                _ => (None, Some(rest.clone())),
            }
        }
        None => (None, None),
    };

    Some(DocTag::Response {
        status: status.to_string(),
        type_hint,
        description,
    })
}

fn parse_header(body: &str) -> Option<DocTag> {
    let (tokens, rest) = split_tokens(body, 2);
    let name = tokens.first()?.to_string();
    let (type_hint, description) = match tokens.get(1) {
        Some(t) if looks_like_type(t) => (Some(t.to_string()), rest),
        Some(t) => (None, join_desc(t, rest)),
        None => (None, None),
    };
    Some(DocTag::Header {
        name,
        type_hint,
        description,
    })
}

fn parse_relation(body: &str) -> Option<DocTag> {
    let (tokens, _) = split_tokens(body, 3);
    if tokens.len() < 2 {
        return None;
    }
    Some(DocTag::Relation {
        kind: tokens[0].to_string(),
        target: tokens[1].to_string(),
        foreign_key: tokens.get(2).map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_description_paragraphs() {
        let block = DocBlock::parse(" List users.\n\n Supports paging\n and filtering.");
        assert_eq!(block.summary(), Some("List users.".to_string()));
        assert_eq!(
            block.description(),
            Some("Supports paging and filtering.".to_string())
        );
    }

    #[test]
    fn test_param_orders() {
        let block = DocBlock::parse(
            "@param int $page Page number\n@param $limit int\n@param name string The name\n@param string query",
        );
        let params: Vec<&DocTag> = block.params().collect();
        assert_eq!(params.len(), 4);
        assert_eq!(
            params[0],
            &DocTag::Param {
                name: "page".to_string(),
                type_hint: Some("int".to_string()),
                description: Some("Page number".to_string()),
            }
        );
        assert_eq!(block.param("limit").unwrap().0, &Some("int".to_string()));
        assert_eq!(block.param("name").unwrap().0, &Some("string".to_string()));
        assert_eq!(block.param("query").unwrap().0, &Some("string".to_string()));
    }

    #[test]
    fn test_repeated_and_ordered_tags() {
        let block = DocBlock::parse(
            "Get user\n@response 200 User The user\n@response 404 missing user\n@deprecated\n@tag users",
        );
        assert_eq!(block.tags.len(), 5);
        let responses: Vec<&DocTag> = block.responses().collect();
        assert_eq!(
            responses[1],
            &DocTag::Response {
                status: "404".to_string(),
                type_hint: None,
                description: Some("missing user".to_string()),
            }
        );
        assert!(block.is_deprecated());
        assert_eq!(block.tag_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_malformed_tag_kept_as_description() {
        let block = DocBlock::parse("@return\n@response abc\n@param");
        assert_eq!(
            block.tags,
            vec![
                DocTag::Description("@return".to_string()),
                DocTag::Description("@response abc".to_string()),
                DocTag::Description("@param".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let block = DocBlock::parse("@since 1.2");
        assert_eq!(
            block.tags,
            vec![DocTag::Unknown {
                name: "since".to_string(),
                body: "1.2".to_string()
            }]
        );
    }

    #[test]
    fn test_var_and_relation() {
        let block = DocBlock::parse("@var int|null\n@relation has_many Post author_id");
        assert_eq!(block.var_type(), Some("int|null"));
        let relations: Vec<&DocTag> = block.relations().collect();
        assert_eq!(
            relations[0],
            &DocTag::Relation {
                kind: "has_many".to_string(),
                target: "Post".to_string(),
                foreign_key: Some("author_id".to_string()),
            }
        );
    }
}
