//! S-expression reader producing raw (unexpanded) [`Value`] trees.
//!
//! Shorthand prefixes become two-element lists: `'x` reads as `(quote x)`, `` `x ``
//! as `(quasiquote x)`, `,x` as `(unquote x)` and `,@x` as `(unquote-splicing x)`.
//! Lists may be dotted: `(a b . c)`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1, satisfy},
    combinator::{cut, not, opt, peek, recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::{pair, preceded, terminated},
};

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{
    NumberType, SYMBOL_SPECIAL_CHARS, Symbol, Value, is_valid_symbol, keywords, list,
    list_with_tail,
};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseConfig {
    /// Treat `;` up to the end of the line as whitespace
    pub handle_comments: bool,
}

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::Char => format!("Expected character at position {position}"),
                ErrorKind::Tag => format!("Unexpected token at position {position}"),
                ErrorKind::TooLarge => {
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                _ => {
                    if position < input.len() {
                        let remaining_chars: String =
                            input.chars().skip(position).take(10).collect();
                        format!("Invalid syntax near '{remaining_chars}'")
                    } else {
                        "Unexpected end of input".into()
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Skip whitespace and, when enabled, `;` line comments
fn skip_whitespace(input: &str, config: ParseConfig) -> IResult<&str, ()> {
    if config.handle_comments {
        let comment = recognize(pair(char(';'), take_while(|c: char| c != '\n')));
        value((), many0_count(alt((multispace1, comment)))).parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

/// Parse a number (integer only, supports decimal and hexadecimal)
fn parse_number(input: &str) -> IResult<&str, Value> {
    alt((parse_hexadecimal, parse_decimal)).parse(input)
}

/// Parse a decimal number
fn parse_decimal(input: &str) -> IResult<&str, Value> {
    let (input, number_str) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;

    match number_str.parse::<NumberType>() {
        Ok(n) => Ok((input, Value::Number(n))),
        // Out of range; the symbol parser rejects leading digits as well
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

/// Parse a hexadecimal number (#x or #X prefix)
fn parse_hexadecimal(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('#').parse(input)?;
    let (input, _) = alt((char('x'), char('X'))).parse(input)?;
    let (input, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(input)?;

    match NumberType::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((input, Value::Number(n))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::HexDigit,
        ))),
    }
}

/// Parse a boolean (#t or #f)
fn parse_bool(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), tag("#t")),
        value(Value::Bool(false), tag("#f")),
    ))
    .parse(input)
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let (remaining, candidate) = take_while1(is_symbol_char).parse(input)?;

    if is_valid_symbol(candidate) {
        Ok((remaining, Value::Symbol(Symbol::new(candidate))))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        )))
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::String(chars))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    // Unknown escape, or a backslash at the end of input
                    _ => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            remaining,
                            ErrorKind::Char,
                        )));
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                // Reached end of input without finding closing quote
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parse an atom. Numbers and booleans must not run into symbol characters (`1a`, `#true`).
fn parse_atom(input: &str) -> IResult<&str, Value> {
    alt((
        terminated(alt((parse_number, parse_bool)), not(satisfy(is_symbol_char))),
        parse_string,
        parse_symbol,
    ))
    .parse(input)
}

fn close_paren(input: &str) -> IResult<&str, char> {
    char(')').parse(input)
}

/// A lone `.` separating the last list element from a dotted tail
fn dot_token(input: &str) -> IResult<&str, char> {
    terminated(
        char('.'),
        peek(alt((multispace1, tag("("), tag(")"), tag(";")))),
    )
    .parse(input)
}

/// Parse a proper or dotted list; once `(` is seen there is no backtracking
fn parse_list(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('(').parse(input)?;
    cut(|input| parse_list_elements(input, config, depth)).parse(input)
}

fn parse_list_elements(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let mut input = input;
    let mut elements = Vec::new();

    loop {
        let (rest, ()) = skip_whitespace(input, config)?;

        if let Ok((rest, _)) = close_paren(rest) {
            return Ok((rest, list(elements)));
        }

        if !elements.is_empty()
            && let Ok((rest, _)) = dot_token(rest)
        {
            let (rest, tail) = parse_sexpr(rest, config, depth + 1)?;
            let (rest, ()) = skip_whitespace(rest, config)?;
            let (rest, _) = close_paren(rest)?;
            return Ok((rest, list_with_tail(elements, tail)));
        }

        let (rest, element) = parse_sexpr(rest, config, depth + 1)?;
        elements.push(element);
        input = rest;
    }
}

/// Parse a shorthand prefix and its datum into a two-element list
fn parse_quote(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let kw = keywords();
    let (input, keyword) = alt((
        value(kw.quote, char('\'')),
        value(kw.quasiquote, char('`')),
        value(kw.unquote_splicing, tag(",@")),
        value(kw.unquote, char(',')),
    ))
    .parse(input)?;

    let (input, datum) = cut(|input| parse_sexpr(input, config, depth + 1)).parse(input)?;
    Ok((input, list([Value::Symbol(keyword), datum])))
}

/// Parse one datum, skipping leading whitespace
fn parse_sexpr(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        |input| skip_whitespace(input, config),
        alt((
            |input| parse_quote(input, config, depth),
            |input| parse_list(input, config, depth),
            parse_atom,
        )),
    )
    .parse(input)
}

/// Parse exactly one S-expression from input, without comment support.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    parse_scheme_with_config(input, ParseConfig::default())
}

/// Parse exactly one S-expression from input.
pub fn parse_scheme_with_config(input: &str, config: ParseConfig) -> Result<Value, Error> {
    match terminated(
        |input| parse_sexpr(input, config, 0),
        |input| skip_whitespace(input, config),
    )
    .parse(input)
    {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(format!(
            "Unexpected remaining input: '{remaining}'"
        ))),
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e))),
    }
}

/// Parse a whole program: any number of S-expressions, with `;` comments.
pub fn parse_scheme_program(input: &str) -> Result<Vec<Value>, Error> {
    let config = ParseConfig {
        handle_comments: true,
    };
    let to_error = |e| Error::ParseError(parse_error_to_message(input, e));

    let mut data = Vec::new();
    let mut rest = input;
    loop {
        let (after, ()) = skip_whitespace(rest, config).map_err(to_error)?;
        if after.is_empty() {
            return Ok(data);
        }
        let (after, datum) = parse_sexpr(after, config, 0).map_err(to_error)?;
        data.push(datum);
        rest = after;
    }
}
