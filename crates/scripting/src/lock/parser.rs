//! Lock grammar
//!
//! ```text
//! or      := and ('|' and)*
//! and     := not ('&' not)*
//! not     := '!' not | primary
//! primary := '(' or ')' | atom
//! ```
//!
//! Operators are left-associative within a tier and the tree keeps the
//! exact shape of the input, including parentheses.

use super::ast::{LockAtom, LockExpr, LockTarget};
use mush_core::ObjectRef;
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{alpha1, char, digit1, multispace0},
    combinator::{all_consuming, cut, map, map_res, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair},
    Finish, IResult,
};

type ParseResult<'a, T> = IResult<&'a str, T>;

/// Where and why lock text failed to parse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unexpected {found} at character {offset}")]
pub struct LockParseError {
    /// Character offset into the lock text
    pub offset: usize,
    pub found: String,
}

impl LockParseError {
    fn at(text: &str, rest: &str) -> Self {
        let byte_offset = text.len() - rest.len();
        let found = rest
            .split_whitespace()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| "<EOF>".to_string());
        Self {
            offset: text[..byte_offset].chars().count(),
            found,
        }
    }
}

/// Parse lock text into an expression tree
pub fn parse_lock(text: &str) -> Result<LockExpr, LockParseError> {
    match all_consuming(ws(or_expr))(text).finish() {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(LockParseError::at(text, e.input)),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: FnMut(&'a str) -> ParseResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn or_expr(input: &str) -> ParseResult<LockExpr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(char('|')), cut(and_expr)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, e| LockExpr::Or(Box::new(acc), Box::new(e)));
    Ok((input, expr))
}

fn and_expr(input: &str) -> ParseResult<LockExpr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(ws(char('&')), cut(not_expr)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, e| LockExpr::And(Box::new(acc), Box::new(e)));
    Ok((input, expr))
}

fn not_expr(input: &str) -> ParseResult<LockExpr> {
    alt((
        map(preceded(ws(char('!')), cut(not_expr)), |e| {
            LockExpr::Not(Box::new(e))
        }),
        primary,
    ))(input)
}

fn primary(input: &str) -> ParseResult<LockExpr> {
    ws(alt((
        map(
            delimited(char('('), cut(or_expr), cut(ws(char(')')))),
            |e| LockExpr::Group(Box::new(e)),
        ),
        map(atom, LockExpr::Atom),
    )))(input)
}

fn atom(input: &str) -> ParseResult<LockAtom> {
    alt((
        value(LockAtom::True, tag_no_case("#TRUE")),
        value(LockAtom::False, tag_no_case("#FALSE")),
        keyed,
        map(preceded(char('='), target), LockAtom::Exact),
        map(preceded(char('+'), target), LockAtom::Carry),
        map(preceded(char('$'), target), LockAtom::Owner),
        map(
            pair(preceded(char('@'), target), opt(preceded(char('/'), alpha1))),
            |(object, lock): (LockTarget, Option<&str>)| LockAtom::Indirect {
                object,
                lock: lock.map(str::to_string),
            },
        ),
        map(object_ref, |r| LockAtom::Bare(r.into())),
        map(
            separated_pair(attribute_name, char(':'), atom_value),
            |(name, pattern): (&str, &str)| LockAtom::Attribute {
                name: name.to_ascii_uppercase(),
                pattern: pattern.to_string(),
            },
        ),
        map(
            separated_pair(attribute_name, char('/'), atom_value),
            |(name, value): (&str, &str)| LockAtom::Evaluation {
                name: name.to_ascii_uppercase(),
                value: value.to_string(),
            },
        ),
        map(attribute_name, |name: &str| {
            LockAtom::Bare(LockTarget::Name(name.to_string()))
        }),
    ))(input)
}

/// `#N[:T]` or an object name
fn target(input: &str) -> ParseResult<LockTarget> {
    alt((
        map(object_ref, LockTarget::Ref),
        map(object_name, |name: &str| LockTarget::Name(name.to_string())),
    ))(input)
}

/// A name up to the next operator, parenthesis, or `/`, trimmed
fn object_name(input: &str) -> ParseResult<&str> {
    map(
        verify(
            take_while1(|c: char| !matches!(c, '&' | '|' | '(' | ')' | '/' | '#' | ':' | '^')),
            |s: &str| !s.trim().is_empty(),
        ),
        str::trim,
    )(input)
}

/// `key^value` atoms
fn keyed(input: &str) -> ParseResult<LockAtom> {
    let (rest, (key, text)) = separated_pair(alpha1, char('^'), atom_value)(input)?;
    let text = text.to_string();
    let atom = match key.to_ascii_lowercase().as_str() {
        "type" => LockAtom::Type(text),
        "name" => LockAtom::Name(text),
        "flag" => LockAtom::Flag(text),
        "power" => LockAtom::Power(text),
        "dbreflist" => LockAtom::DbRefList(text),
        "ip" => LockAtom::Ip(text),
        "hostname" => LockAtom::Hostname(text),
        "channel" => LockAtom::Channel(text),
        _ => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Tag))),
    };
    Ok((rest, atom))
}

/// `#N` or `#N:timestamp`
fn object_ref(input: &str) -> ParseResult<ObjectRef> {
    map_res(
        recognize(pair(
            pair(char('#'), pair(opt(char('-')), digit1)),
            opt(pair(char(':'), digit1)),
        )),
        |s: &str| s.parse::<ObjectRef>(),
    )(input)
}

fn attribute_name(input: &str) -> ParseResult<&str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '`' | '~'))(input)
}

/// Free text up to the next operator or parenthesis, trimmed
fn atom_value(input: &str) -> ParseResult<&str> {
    map(
        verify(
            take_while1(|c: char| !matches!(c, '&' | '|' | '(' | ')')),
            |s: &str| !s.trim().is_empty(),
        ),
        str::trim,
    )(input)
}
