use std::fmt;

use anyhow::anyhow;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take, take_while, take_while1},
    character::complete::{crlf, multispace1, none_of, not_line_ending, one_of, space0, digit1},
    combinator::{eof, map, map_res, opt, recognize, value, verify},
    multi::{fold_many0, many0, many_till, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

fn is_idalpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_idalphanum(c: char) -> bool {
    is_idalpha(c) || c.is_ascii_digit()
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_idalpha), take_while(is_idalphanum)))(input)
}

fn line_end(input: &str) -> IResult<&str, &str> {
    alt((crlf, tag("\n")))(input)
}

/// Yields the comment text after `#`.
fn hash_comment(input: &str) -> IResult<&str, &str> {
    delimited(
        tag("#"),
        take_while(|c: char| c != '\r' && c != '\n'),
        alt((line_end, eof)),
    )(input)
}

fn bracket_comment(input: &str) -> IResult<&str, ()> {
    value((), pair(tag("/*"), many_till(take(1usize), tag("*/"))))(input)
}

fn comment(input: &str) -> IResult<&str, ()> {
    alt((value((), hash_comment), bracket_comment))(input)
}

/// Whitespace and comments between tokens.
fn ws(input: &str) -> IResult<&str, ()> {
    fold_many0(alt((value((), multispace1), comment)), (), |_, _| ())(input)
}

/// Like `ws`, but remembers the text of the last `#` comment seen, which
/// names the command that follows it.
fn leading_trivia(input: &str) -> IResult<&str, Option<&str>> {
    fold_many0(
        alt((
            map(hash_comment, |c: &str| Some(c.trim())),
            value(None, bracket_comment),
            value(None, multispace1),
        )),
        None,
        |last, c| c.or(last),
    )(input)
}

fn multiline_line(input: &str) -> IResult<&str, &str> {
    map(
        verify(terminated(not_line_ending, line_end), |s: &str| s != "."),
        // Dot-stuffing: a leading dot is removed.
        |s: &str| s.strip_prefix('.').unwrap_or(s),
    )(input)
}

fn multi_line(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        tuple((tag("text:"), space0, alt((value((), hash_comment), value((), line_end))))),
        many0(multiline_line),
        pair(tag("."), alt((line_end, eof))),
    )(input)
}

#[derive(Debug, PartialEq)]
enum Quantifier {
    U, K, M, G
}

impl Quantifier {
    fn weight(&self) -> u64 {
        match self {
            Quantifier::U => 1,
            Quantifier::K => 1024,
            Quantifier::M => 1024 * 1024,
            Quantifier::G => 1024 * 1024 * 1024,
        }
    }
}

fn quantifier(input: &str) -> IResult<&str, Quantifier> {
    use Quantifier::*;
    map(opt(one_of("KMGkmg")), |c| match c {
        Some('K') | Some('k') => K,
        Some('M') | Some('m') => M,
        Some('G') | Some('g') => G,
        _ => U,
    })(input)
}
#[test]
fn parse_quantifier() {
    assert_eq!(quantifier("K"), Ok(("", Quantifier::K)));
    assert_eq!(quantifier(""), Ok(("", Quantifier::U)));
}

fn number(input: &str) -> IResult<&str, u64> {
    map_res(pair(digit1, quantifier), |(n, q): (&str, Quantifier)| {
        n.parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(q.weight()))
            .ok_or("number too large")
    })(input)
}
#[test]
fn parse_number() {
    assert_eq!(number("1234K blah"), Ok((" blah", 1234 * 1024)));
    assert_eq!(number("1234 foo"), Ok((" foo", 1234)));
    assert_eq!(number("2M"), Ok(("", 2 * 1024 * 1024)));
    assert!(number("99999999999999999999G").is_err());
}

// Called "tag" in RFC5228
fn tagged_id(input: &str) -> IResult<&str, &str> {
    preceded(tag(":"), identifier)(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        tag("\""),
        map(
            opt(escaped_transform(none_of("\\\""), '\\', take(1usize))),
            Option::unwrap_or_default,
        ),
        tag("\""),
    )(input)
}

// PARSING BEGINS HERE

pub fn document(input: &str) -> IResult<&str, Document> {
    map(
        terminated(many0(command), pair(ws, eof)),
        |commands| Document { commands },
    )(input)
}

/// Parse a whole script, reporting where parsing stopped on failure.
pub fn parse_document(input: &str) -> anyhow::Result<Document> {
    match document(input) {
        Ok((_, doc)) => Ok(doc),
        Err(e) => {
            let rest = match &e {
                nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
                nom::Err::Incomplete(_) => "",
            };
            let offset = input.len() - rest.len();
            let line = input[..offset].matches('\n').count() + 1;
            let near: String = rest.chars().take(20).collect();
            Err(anyhow!("Syntax error on line {} near {:?}", line, near))
        }
    }
}

fn block(input: &str) -> IResult<&str, Vec<Command>> {
    delimited(tag("{"), many0(command), preceded(ws, tag("}")))(input)
}

fn command(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            leading_trivia,
            identifier,
            argument_group,
            preceded(ws, alt((value(None, tag(";")), map(block, Some)))),
        )),
        |(comment, id, args, block)| Command {
            id,
            args,
            block,
            comment,
        },
    )(input)
}

fn test_list(input: &str) -> IResult<&str, Vec<Test>> {
    alt((
        map(test, |t| vec![t]),
        delimited(
            tag("("),
            separated_list1(preceded(ws, tag(",")), preceded(ws, test)),
            preceded(ws, tag(")")),
        ),
    ))(input)
}

fn argument_group(input: &str) -> IResult<&str, ArgumentGroup> {
    map(
        pair(many0(preceded(ws, argument)), opt(preceded(ws, test_list))),
        |(args, tests)| ArgumentGroup {
            inner: args,
            tests: tests.unwrap_or_default(),
        },
    )(input)
}

fn string_list(input: &str) -> IResult<&str, Vec<StringIsh>> {
    alt((
        map(stringish, |s| vec![s]),
        delimited(
            tag("["),
            separated_list1(preceded(ws, tag(",")), preceded(ws, stringish)),
            preceded(ws, tag("]")),
        ),
    ))(input)
}

fn stringish(input: &str) -> IResult<&str, StringIsh> {
    alt((
        map(quoted_string, StringIsh::Quoted),
        map(multi_line, StringIsh::MultiLine),
    ))(input)
}

fn argument(input: &str) -> IResult<&str, Argument> {
    alt((
        map(string_list, Argument::Strings),
        map(number, Argument::Number),
        map(tagged_id, Argument::Tag),
    ))(input)
}

fn test(input: &str) -> IResult<&str, Test> {
    map(pair(identifier, argument_group), |(id, args)| Test { id, args })(input)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document<'doc> {
    pub commands: Vec<Command<'doc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Command<'doc> {
    pub id: &'doc str,
    pub args: ArgumentGroup<'doc>,
    /// `None` for a command ended by `;`.
    pub block: Option<Vec<Command<'doc>>>,
    /// Text of the last `#` comment before the command.
    pub comment: Option<&'doc str>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArgumentGroup<'doc> {
    pub inner: Vec<Argument<'doc>>,
    pub tests: Vec<Test<'doc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Argument<'doc> {
    Strings(Vec<StringIsh<'doc>>),
    Number(u64),
    Tag(&'doc str),
}

#[derive(Clone, Debug, PartialEq)]
pub enum StringIsh<'doc> {
    Quoted(String),
    MultiLine(Vec<&'doc str>),
}

impl fmt::Display for StringIsh<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringIsh::Quoted(s) => f.write_str(s),
            StringIsh::MultiLine(lines) => {
                for line in lines {
                    write!(f, "{}\r\n", line)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Test<'doc> {
    pub id: &'doc str,
    pub args: ArgumentGroup<'doc>,
}

#[test]
fn parse_quoted_string() {
    assert_eq!(quoted_string(r#""asdf\"jk\\l""#), Ok(("", String::from(r#"asdf"jk\l"#))));
    assert_eq!(quoted_string(r#""""#), Ok(("", String::new())));
    assert_eq!(quoted_string(r#""\a\*b""#), Ok(("", String::from("a*b"))));
    assert_eq!(quoted_string(r#""user\\*@zimbra.com""#), Ok(("", String::from(r"user\*@zimbra.com"))));
}

#[cfg(test)]
const HASHES: &[&str] = &["# This is a #hash comment\r\n", "# Unix line\n", "# At the end"];
#[cfg(test)]
const NON_HASHES: &[&str] = &["This is not\r. \r\n", " # Nor this.\r\n"];
#[cfg(test)]
const BRACKETS: &[&str] = &[
    "/* This is a bracket comment*/",
    "/* And so /* \r\n is this */",
    "/* But \n this too */",
];
#[cfg(test)]
const NON_BRACKETS: &[&str] = &["/* Unterminated", "* not opened */"];
#[test]
fn parse_id() {
    assert_eq!(identifier("hello_there0"), Ok(("", "hello_there0")));
    assert!(identifier("0hello_there0").is_err());
}
#[test]
fn parse_hash_comment() {
    for s in HASHES {
        assert!(hash_comment(s).is_ok());
    }
    for s in NON_HASHES {
        assert!(hash_comment(s).is_err());
    }
}
#[test]
fn parse_bracket_comment() {
    for s in BRACKETS {
        assert!(bracket_comment(s).is_ok());
    }
    for s in NON_BRACKETS {
        assert!(bracket_comment(s).is_err());
    }
}
#[test]
fn parse_comment() {
    for s in BRACKETS.iter().chain(HASHES) {
        assert!(comment(s).is_ok());
    }
    for s in NON_BRACKETS.iter().chain(NON_HASHES) {
        assert!(comment(s).is_err());
    }
}
#[test]
fn parse_multiline_line() {
    assert_eq!(multiline_line("Hello, there!\r\n"), Ok(("", "Hello, there!")));
    assert_eq!(multiline_line("..stuffed\r\n"), Ok(("", ".stuffed")));
    assert!(multiline_line(".\r\n").is_err());
}
#[test]
fn parse_multi_line() {
    assert_eq!(
        multi_line("text: \t #begin text\r\nThis is some multi-line text\r\n..With embedded dots\r\n..\r\n.\r\n"),
        Ok(("", vec!["This is some multi-line text", ".With embedded dots", "."]))
    );
    assert_eq!(multi_line("text:\nunix\n.\n"), Ok(("", vec!["unix"])));
}
#[test]
fn multi_line_value() {
    let s = StringIsh::MultiLine(vec!["a", "b"]);
    assert_eq!(s.to_string(), "a\r\nb\r\n");
}
