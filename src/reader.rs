// ABOUTME: Reader module lexing and parsing S-expressions using nom combinators
//
// Reading is split in two: a pure parse from text to an `Sexp` tree, and a
// rooted lowering pass that builds heap values from it. Keeping nom out of
// the heap means no allocation (and therefore no collection) can happen
// mid-parse.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace1},
    combinator::{map_res, opt, recognize, value},
    multi::many0,
    IResult, Parser,
};

use crate::error::Error;
use crate::eval::Interp;
use crate::value::{Cons, Value};

/// Parsed surface syntax, not yet on the heap. A list keeps its optional
/// dotted tail separate.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    Int(i64),
    Str(String),
    Sym(String),
    List(Vec<Sexp>, Option<Box<Sexp>>),
}

/// Symbol characters are everything but whitespace, parens, and NUL.
fn is_symbol_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != '\0'
}

fn line_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char(';')(input)?;
    let (input, _) = take_while(|c| c != '\n')(input)?;
    Ok((input, ()))
}

/// Skip whitespace and `;` comments between tokens.
fn ws(input: &str) -> IResult<&str, ()> {
    many0(alt((value((), multispace1), line_comment)))
        .map(|_| ())
        .parse(input)
}

/// An integer literal: `-?digit+`. A `-` with no digit after it falls
/// through to the symbol parser.
fn parse_int(input: &str) -> IResult<&str, Sexp> {
    map_res(recognize((opt(char('-')), digit1)), |text: &str| {
        text.parse::<i64>().map(Sexp::Int)
    })
    .parse(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Sexp> {
    take_while1(is_symbol_char)
        .map(|s: &str| Sexp::Sym(s.to_string()))
        .parse(input)
}

fn fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Fail))
}

/// A string literal with C-style escapes. A backslash before a newline
/// produces no character. Once the opening quote is seen, errors are
/// final: a bad escape never backtracks into a symbol.
fn parse_string(input: &str) -> IResult<&str, Sexp> {
    let (mut rest, _) = char('"')(input)?;
    let mut text = String::new();
    loop {
        let mut chars = rest.char_indices();
        match chars.next() {
            None => return Err(fail(rest)),
            Some((_, '"')) => return Ok((&rest[1..], Sexp::Str(text))),
            Some((_, '\\')) => {
                let Some((idx, escaped)) = chars.next() else {
                    return Err(fail(rest));
                };
                match escaped {
                    'n' => text.push('\n'),
                    'f' => text.push('\u{0c}'),
                    'b' => text.push('\u{8}'),
                    'r' => text.push('\r'),
                    't' => text.push('\t'),
                    '\'' => text.push('\''),
                    '"' => text.push('"'),
                    '\\' => text.push('\\'),
                    '\n' => {} // line continuation
                    _ => return Err(fail(rest)),
                }
                rest = &rest[idx + escaped.len_utf8()..];
            }
            Some((idx, c)) => {
                text.push(c);
                rest = &rest[idx + c.len_utf8()..];
            }
        }
    }
}

/// `(items)`, `()`, or a tail-dotted `(items . expr)`. At least one item
/// must precede the dot.
fn parse_list(input: &str) -> IResult<&str, Sexp> {
    let (input, _) = char('(')(input)?;
    let mut items = Vec::new();
    let mut rest = input;
    loop {
        let (after_ws, _) = ws(rest)?;
        rest = after_ws;
        if let Ok((after, _)) = char::<_, nom::error::Error<_>>(')')(rest) {
            return Ok((after, Sexp::List(items, None)));
        }
        if let Ok((after, _)) = char::<_, nom::error::Error<_>>('.')(rest) {
            if items.is_empty() {
                return Err(fail(rest));
            }
            let (after, tail) = parse_expr(after)?;
            let (after, _) = ws(after)?;
            let (after, _) = char::<_, nom::error::Error<_>>(')')(after).map_err(|_| fail(after))?;
            return Ok((after, Sexp::List(items, Some(Box::new(tail)))));
        }
        if rest.is_empty() {
            return Err(fail(rest));
        }
        let (after, item) = parse_expr(rest)?;
        items.push(item);
        rest = after;
    }
}

fn parse_expr(input: &str) -> IResult<&str, Sexp> {
    let (input, _) = ws(input)?;
    alt((parse_list, parse_int, parse_string, parse_symbol)).parse(input)
}

/// Consume exactly one expression from `input`. `Ok(None)` when nothing
/// but whitespace and comments remain.
pub fn parse_one(input: &str) -> Result<Option<(Sexp, &str)>, Error> {
    let (rest, _) = ws(input).map_err(|e| Error::Parse(e.to_string()))?;
    if rest.is_empty() {
        return Ok(None);
    }
    match parse_expr(rest) {
        Ok((rest, sexp)) => Ok(Some((sexp, rest))),
        Err(e) => Err(Error::Parse(e.to_string())),
    }
}

/// Whether `input` holds at least the shape of complete expressions:
/// parens balance outside of strings and comments, and no string is left
/// open. Over-closed input counts as complete so the parser gets to
/// report the error.
pub fn is_balanced(input: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            '"' => loop {
                match chars.next() {
                    None => return false,
                    Some('"') => break,
                    Some('\\') => {
                        if chars.next().is_none() {
                            return false;
                        }
                    }
                    Some(_) => {}
                }
            },
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    depth == 0
}

// ============================================================================
// Lowering onto the heap
// ============================================================================

impl Interp {
    /// Build the heap value for a parsed tree. Intermediate conses are
    /// rooted across the allocations of their siblings; the returned value
    /// is unrooted and must be rooted by the caller before it allocates
    /// again.
    pub fn lower(&mut self, sexp: &Sexp) -> Result<Value, Error> {
        match sexp {
            Sexp::Int(n) => self.make_int(*n),
            Sexp::Str(s) => self.make_string(s),
            Sexp::Sym(name) => self.intern(name),
            Sexp::List(items, tail) => {
                let mut acc = match tail {
                    Some(t) => self.lower(t)?,
                    None => self.nil(),
                };
                self.heap.root(acc);
                for item in items.iter().rev() {
                    let car = match self.lower(item) {
                        Ok(v) => v,
                        Err(e) => {
                            self.heap.unroot(acc);
                            return Err(e);
                        }
                    };
                    self.heap.root(car);
                    let cell = self.heap.alloc_cons(Cons { car, cdr: acc });
                    self.heap.unroot(car);
                    match cell {
                        Ok(c) => {
                            let next = Value::Cons(c);
                            self.heap.root(next);
                            self.heap.unroot(acc);
                            acc = next;
                        }
                        Err(e) => {
                            self.heap.unroot(acc);
                            return Err(e);
                        }
                    }
                }
                self.heap.unroot(acc);
                Ok(acc)
            }
        }
    }

    /// Read one expression from text straight onto the heap.
    #[allow(dead_code)]
    pub fn read_str(&mut self, input: &str) -> Result<Value, Error> {
        match parse_one(input)? {
            Some((sexp, _)) => self.lower(&sexp),
            None => Err(Error::Parse("empty input".to_string())),
        }
    }
}
