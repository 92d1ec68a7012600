//! SCIM filter engine (RFC 7644 §3.4.2.2)
//!
//! Hand-written recursive descent parser producing a small AST, an
//! in-memory evaluator over resource JSON, and a compiler for the
//! bounded subset of filters that can be pushed down to an indexed
//! storage lookup. Attribute names are case-insensitive throughout.

use crate::error::{AppError, Result};
use crate::scim::value::{collect_values, get_ci};
use chrono::DateTime;
use serde_json::Value;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Co,
    Sw,
    Ew,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "co" => Some(Self::Co),
            "sw" => Some(Self::Sw),
            "ew" => Some(Self::Ew),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }
}

/// Attribute path within a filter: optional extension URN, attribute,
/// optional sub-attribute (`name.givenName`).
#[derive(Debug, Clone, PartialEq)]
pub struct AttrPath {
    pub urn: Option<String>,
    pub attr: String,
    pub sub: Option<String>,
}

impl AttrPath {
    fn parse(raw: &str) -> Self {
        // Extension URN prefix: everything up to the last ':'.
        let (urn, rest) = if raw.to_ascii_lowercase().starts_with("urn:") {
            match raw.rfind(':') {
                Some(idx) => (Some(raw[..idx].to_string()), &raw[idx + 1..]),
                None => (None, raw),
            }
        } else {
            (None, raw)
        };
        let (attr, sub) = match rest.split_once('.') {
            Some((a, s)) => (a.to_string(), Some(s.to_string())),
            None => (rest.to_string(), None),
        };
        Self { urn, attr, sub }
    }
}

/// Literal operand of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        attr: AttrPath,
        op: CompareOp,
        value: FilterValue,
    },
    Present {
        attr: AttrPath,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    /// `emails[type eq "work"]`: inner filter scoped to array elements
    ValuePath {
        attr: AttrPath,
        inner: Box<FilterExpr>,
    },
}

/// Parse a SCIM filter string into an expression AST.
pub fn parse_filter(input: &str) -> Result<FilterExpr> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let expr = parse_or(&tokens, &mut pos)?;
    if pos < tokens.len() {
        return Err(AppError::InvalidFilter(format!(
            "Unexpected token '{}'",
            tokens[pos].text()
        )));
    }
    Ok(expr)
}

// ============================================================
// Tokenizer
// ============================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Str(String),
    Word(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::LBracket => "[".to_string(),
            Token::RBracket => "]".to_string(),
            Token::Str(s) => format!("\"{}\"", s),
            Token::Word(w) => w.clone(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '[' {
            tokens.push(Token::LBracket);
            i += 1;
        } else if c == ']' {
            tokens.push(Token::RBracket);
            i += 1;
        } else if c == '"' {
            i += 1;
            let mut value = String::new();
            loop {
                if i >= chars.len() {
                    return Err(AppError::InvalidFilter(
                        "Unterminated string in filter".to_string(),
                    ));
                }
                match chars[i] {
                    '"' => break,
                    '\\' if i + 1 < chars.len() => {
                        let escaped = chars[i + 1];
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    other => {
                        value.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
            i += 1;
        } else {
            let start = i;
            while i < chars.len()
                && !chars[i].is_whitespace()
                && !matches!(chars[i], '(' | ')' | '[' | ']')
            {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        }
    }
    Ok(tokens)
}

// ============================================================
// Recursive descent parser
// ============================================================

fn word_is(tokens: &[Token], pos: usize, keyword: &str) -> bool {
    matches!(tokens.get(pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
}

fn parse_or(tokens: &[Token], pos: &mut usize) -> Result<FilterExpr> {
    let mut left = parse_and(tokens, pos)?;
    while word_is(tokens, *pos, "or") {
        *pos += 1;
        let right = parse_and(tokens, pos)?;
        left = FilterExpr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> Result<FilterExpr> {
    let mut left = parse_not(tokens, pos)?;
    while word_is(tokens, *pos, "and") {
        *pos += 1;
        let right = parse_not(tokens, pos)?;
        left = FilterExpr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_not(tokens: &[Token], pos: &mut usize) -> Result<FilterExpr> {
    if word_is(tokens, *pos, "not") {
        *pos += 1;
        let inner = parse_atom(tokens, pos)?;
        Ok(FilterExpr::Not(Box::new(inner)))
    } else {
        parse_atom(tokens, pos)
    }
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<FilterExpr> {
    match tokens.get(*pos) {
        None => Err(AppError::InvalidFilter(
            "Unexpected end of filter".to_string(),
        )),
        Some(Token::LParen) => {
            *pos += 1;
            let expr = parse_or(tokens, pos)?;
            if tokens.get(*pos) != Some(&Token::RParen) {
                return Err(AppError::InvalidFilter(
                    "Missing closing parenthesis".to_string(),
                ));
            }
            *pos += 1;
            Ok(expr)
        }
        Some(Token::Word(attr_raw)) => {
            let attr_raw = attr_raw.clone();
            *pos += 1;

            // valuePath: attr [ inner-filter ]
            if tokens.get(*pos) == Some(&Token::LBracket) {
                *pos += 1;
                let inner = parse_or(tokens, pos)?;
                if tokens.get(*pos) != Some(&Token::RBracket) {
                    return Err(AppError::InvalidFilter(
                        "Missing closing bracket in valuePath".to_string(),
                    ));
                }
                *pos += 1;
                return Ok(FilterExpr::ValuePath {
                    attr: AttrPath::parse(&attr_raw),
                    inner: Box::new(inner),
                });
            }

            let attr = AttrPath::parse(&attr_raw);
            let op_word = match tokens.get(*pos) {
                Some(Token::Word(w)) => w.clone(),
                _ => {
                    return Err(AppError::InvalidFilter(format!(
                        "Expected operator after '{}'",
                        attr_raw
                    )))
                }
            };
            *pos += 1;

            if op_word.eq_ignore_ascii_case("pr") {
                return Ok(FilterExpr::Present { attr });
            }

            let op = CompareOp::parse(&op_word).ok_or_else(|| {
                AppError::InvalidFilter(format!("Unknown operator '{}'", op_word))
            })?;

            let value = match tokens.get(*pos) {
                Some(Token::Str(s)) => FilterValue::Str(s.clone()),
                Some(Token::Word(w)) => {
                    if w.eq_ignore_ascii_case("true") {
                        FilterValue::Bool(true)
                    } else if w.eq_ignore_ascii_case("false") {
                        FilterValue::Bool(false)
                    } else if w.eq_ignore_ascii_case("null") {
                        FilterValue::Null
                    } else if let Ok(n) = w.parse::<f64>() {
                        FilterValue::Num(n)
                    } else {
                        // Entra occasionally sends unquoted values; accept them.
                        FilterValue::Str(w.clone())
                    }
                }
                _ => {
                    return Err(AppError::InvalidFilter(format!(
                        "Expected value after '{}'",
                        op_word
                    )))
                }
            };
            *pos += 1;

            Ok(FilterExpr::Compare { attr, op, value })
        }
        Some(other) => Err(AppError::InvalidFilter(format!(
            "Unexpected token '{}'",
            other.text()
        ))),
    }
}

// ============================================================
// In-memory evaluator
// ============================================================

/// Evaluate a filter against a resource JSON object. `and`/`or`
/// short-circuit left to right.
pub fn matches(expr: &FilterExpr, resource: &Value) -> bool {
    match expr {
        FilterExpr::And(l, r) => matches(l, resource) && matches(r, resource),
        FilterExpr::Or(l, r) => matches(l, resource) || matches(r, resource),
        FilterExpr::Not(inner) => !matches(inner, resource),
        FilterExpr::Present { attr } => attr_values(resource, attr)
            .iter()
            .any(|v| !v.is_null()),
        FilterExpr::Compare { attr, op, value } => attr_values(resource, attr)
            .iter()
            .any(|candidate| compare(candidate, *op, value)),
        FilterExpr::ValuePath { attr, inner } => {
            let target = attr_target(resource, attr);
            match target {
                Some(Value::Array(items)) => items.iter().any(|item| matches(inner, item)),
                Some(obj @ Value::Object(_)) => matches(inner, obj),
                _ => false,
            }
        }
    }
}

fn attr_target<'a>(resource: &'a Value, attr: &AttrPath) -> Option<&'a Value> {
    let scope = match &attr.urn {
        Some(urn) => get_ci(resource, urn)?,
        None => resource,
    };
    get_ci(scope, &attr.attr)
}

fn attr_values<'a>(resource: &'a Value, attr: &AttrPath) -> Vec<&'a Value> {
    let scope = match &attr.urn {
        Some(urn) => match get_ci(resource, urn) {
            Some(s) => s,
            None => return Vec::new(),
        },
        None => resource,
    };
    collect_values(scope, &attr.attr, attr.sub.as_deref())
}

fn compare(candidate: &Value, op: CompareOp, value: &FilterValue) -> bool {
    use CompareOp::*;
    match (candidate, value) {
        (Value::String(have), FilterValue::Str(want)) => {
            let have_l = have.to_lowercase();
            let want_l = want.to_lowercase();
            match op {
                Eq => have_l == want_l,
                Ne => have_l != want_l,
                Co => have_l.contains(&want_l),
                Sw => have_l.starts_with(&want_l),
                Ew => have_l.ends_with(&want_l),
                Gt | Ge | Lt | Le => ordered_compare(have, want, op),
            }
        }
        (Value::Bool(have), FilterValue::Bool(want)) => match op {
            Eq => have == want,
            Ne => have != want,
            _ => false,
        },
        // Stringly-typed booleans on either side
        (Value::Bool(have), FilterValue::Str(want)) => {
            let want_bool = want.eq_ignore_ascii_case("true");
            let is_bool_literal = want_bool || want.eq_ignore_ascii_case("false");
            match op {
                Eq => is_bool_literal && *have == want_bool,
                Ne => is_bool_literal && *have != want_bool,
                _ => false,
            }
        }
        (Value::Number(have), FilterValue::Num(want)) => {
            let have = have.as_f64().unwrap_or(f64::NAN);
            match op {
                Eq => have == *want,
                Ne => have != *want,
                Gt => have > *want,
                Ge => have >= *want,
                Lt => have < *want,
                Le => have <= *want,
                _ => false,
            }
        }
        (Value::Number(_), FilterValue::Str(want)) => match want.parse::<f64>() {
            Ok(want) => compare(candidate, op, &FilterValue::Num(want)),
            Err(_) => false,
        },
        (Value::String(have), FilterValue::Num(want)) => match have.parse::<f64>() {
            Ok(have) => match op {
                Eq => have == *want,
                Ne => have != *want,
                Gt => have > *want,
                Ge => have >= *want,
                Lt => have < *want,
                Le => have <= *want,
                _ => false,
            },
            Err(_) => false,
        },
        (Value::Null, FilterValue::Null) => matches!(op, Eq),
        _ => false,
    }
}

/// Ordering comparisons coerce: ISO-8601 datetimes, then numbers, then
/// case-insensitive lexical.
fn ordered_compare(have: &str, want: &str, op: CompareOp) -> bool {
    use std::cmp::Ordering;
    let ordering = match (
        DateTime::parse_from_rfc3339(have),
        DateTime::parse_from_rfc3339(want),
    ) {
        (Ok(h), Ok(w)) => h.cmp(&w),
        _ => match (have.parse::<f64>(), want.parse::<f64>()) {
            (Ok(h), Ok(w)) => h.partial_cmp(&w).unwrap_or(Ordering::Equal),
            _ => have.to_lowercase().cmp(&want.to_lowercase()),
        },
    };
    match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        _ => false,
    }
}

// ============================================================
// Storage pushdown
// ============================================================

/// Which resource table a pushdown targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    User,
    Group,
}

/// Compiled WHERE fragment for the bounded pushdown subset.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub where_clause: String,
    pub bindings: Vec<String>,
}

/// Compile the safe subset (`userName eq X`, `externalId eq X`,
/// `id eq X`, and `displayName eq X` for groups) to an indexed lookup.
/// Everything else returns `None` and is evaluated in memory.
pub fn try_pushdown(expr: &FilterExpr, kind: ResourceKind) -> Option<CompiledFilter> {
    let FilterExpr::Compare { attr, op, value } = expr else {
        return None;
    };
    if *op != CompareOp::Eq || attr.urn.is_some() || attr.sub.is_some() {
        return None;
    }
    let literal = match value {
        FilterValue::Str(s) => s.clone(),
        _ => return None,
    };

    let (column, binding) = match (kind, attr.attr.to_ascii_lowercase().as_str()) {
        (_, "id") => ("scim_id", literal),
        (_, "externalid") => ("external_id", literal),
        (ResourceKind::User, "username") => ("user_name_lower", literal.to_lowercase()),
        (ResourceKind::Group, "displayname") => ("display_name_lower", literal.to_lowercase()),
        _ => return None,
    };

    Some(CompiledFilter {
        where_clause: format!("{} = ?", column),
        bindings: vec![binding],
    })
}
