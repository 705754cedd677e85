//! RFC 5322 address lists, parsed strictly where possible and split
//! heuristically when a header is too broken for the grammar.

use nom::branch::alt;
use nom::bytes::complete::take_while;
use nom::bytes::complete::take_while1;
use nom::character::complete::anychar;
use nom::character::complete::char;
use nom::character::complete::none_of;
use nom::combinator::all_consuming;
use nom::combinator::map;
use nom::combinator::opt;
use nom::combinator::recognize;
use nom::combinator::value;
use nom::multi::fold_many0;
use nom::multi::many0_count;
use nom::multi::many1;
use nom::multi::many1_count;
use nom::multi::separated_list0;
use nom::sequence::delimited;
use nom::sequence::pair;
use nom::sequence::preceded;
use nom::sequence::terminated;
use nom::sequence::tuple;
use nom::IResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressPart {
    All,
    LocalPart,
    Domain,
}

impl Default for AddressPart {
    fn default() -> Self {
        AddressPart::All
    }
}

impl AddressPart {
    pub fn tag(self) -> &'static str {
        match self {
            AddressPart::All => "all",
            AddressPart::LocalPart => "localpart",
            AddressPart::Domain => "domain",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddrSpec {
    pub local_part: String,
    pub domain: Option<String>,
}

impl AddrSpec {
    /// Split a bare address at its last `@`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.rfind('@') {
            Some(at) => AddrSpec {
                local_part: raw[..at].to_owned(),
                domain: Some(raw[at + 1..].to_owned()),
            },
            None => AddrSpec {
                local_part: raw.to_owned(),
                domain: None,
            },
        }
    }

    pub fn part(&self, part: AddressPart) -> String {
        match (part, &self.domain) {
            (AddressPart::All, Some(domain)) => format!("{}@{}", self.local_part, domain),
            (AddressPart::All, None) | (AddressPart::LocalPart, _) => self.local_part.clone(),
            (AddressPart::Domain, domain) => domain.clone().unwrap_or_default(),
        }
    }
}

fn is_wsp(ch: char) -> bool {
    ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n'
}

/// Folding white space; header values arrive unfolded, so any run of blanks.
fn fws(input: &str) -> IResult<&str, ()> {
    value((), take_while1(is_wsp))(input)
}

fn quoted_pair(input: &str) -> IResult<&str, char> {
    preceded(char('\\'), anychar)(input)
}

fn is_ctext(ch: char) -> bool {
    !is_wsp(ch) && ch != '(' && ch != ')' && ch != '\\'
}

fn comment(input: &str) -> IResult<&str, ()> {
    value(
        (),
        tuple((
            char('('),
            many0_count(alt((
                value((), take_while1(is_ctext)),
                value((), quoted_pair),
                comment,
                fws,
            ))),
            char(')'),
        )),
    )(input)
}

fn cfws(input: &str) -> IResult<&str, ()> {
    value((), many1_count(alt((fws, comment))))(input)
}

fn is_atext(ch: char) -> bool {
    ch.is_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(ch) || !ch.is_ascii()
}

fn atom(input: &str) -> IResult<&str, &str> {
    delimited(opt(cfws), take_while1(is_atext), opt(cfws))(input)
}

fn dot_atom_text(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_atext),
        many0_count(pair(char('.'), take_while1(is_atext))),
    ))(input)
}

fn dot_atom(input: &str) -> IResult<&str, &str> {
    delimited(opt(cfws), dot_atom_text, opt(cfws))(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        pair(opt(cfws), char('"')),
        fold_many0(
            alt((quoted_pair, none_of("\\\""))),
            String::new(),
            |mut acc, ch| {
                acc.push(ch);
                acc
            },
        ),
        pair(char('"'), opt(cfws)),
    )(input)
}

fn word(input: &str) -> IResult<&str, String> {
    alt((map(atom, String::from), quoted_string))(input)
}

// obs-phrase allows periods, as in `John Q. Public`.
fn phrase(input: &str) -> IResult<&str, Vec<String>> {
    many1(alt((word, map(char('.'), |c| c.to_string()))))(input)
}

fn local_part(input: &str) -> IResult<&str, String> {
    alt((map(dot_atom, String::from), quoted_string))(input)
}

fn domain_literal(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            pair(opt(cfws), char('[')),
            take_while(|c: char| c != ']'),
            pair(char(']'), opt(cfws)),
        ),
        |lit: &str| format!("[{}]", lit.trim()),
    )(input)
}

fn domain(input: &str) -> IResult<&str, String> {
    alt((map(dot_atom, String::from), domain_literal))(input)
}

fn addr_spec(input: &str) -> IResult<&str, AddrSpec> {
    map(
        tuple((local_part, char('@'), domain)),
        |(local_part, _, domain)| AddrSpec {
            local_part,
            domain: Some(domain),
        },
    )(input)
}

/// `<>` is accepted and carries no address.
fn angle_addr(input: &str) -> IResult<&str, Option<AddrSpec>> {
    delimited(
        pair(opt(cfws), char('<')),
        opt(addr_spec),
        pair(char('>'), opt(cfws)),
    )(input)
}

fn mailbox(input: &str) -> IResult<&str, Option<AddrSpec>> {
    alt((
        preceded(opt(phrase), angle_addr),
        map(addr_spec, Some),
    ))(input)
}

fn list_comma(input: &str) -> IResult<&str, char> {
    preceded(opt(cfws), char(','))(input)
}

fn mailbox_list(input: &str) -> IResult<&str, Vec<AddrSpec>> {
    map(separated_list0(list_comma, opt(mailbox)), |v| {
        v.into_iter().flatten().flatten().collect()
    })(input)
}

fn group(input: &str) -> IResult<&str, Vec<AddrSpec>> {
    map(
        tuple((
            phrase,
            char(':'),
            opt(cfws),
            mailbox_list,
            opt(cfws),
            opt(char(';')),
            opt(cfws),
        )),
        |(_, _, _, mailboxes, _, _, _)| mailboxes,
    )(input)
}

fn address(input: &str) -> IResult<&str, Vec<AddrSpec>> {
    alt((group, map(mailbox, |m| m.into_iter().collect())))(input)
}

fn address_list(input: &str) -> IResult<&str, Vec<AddrSpec>> {
    map(
        all_consuming(terminated(
            separated_list0(list_comma, opt(address)),
            opt(cfws),
        )),
        |v| v.into_iter().flatten().flatten().collect(),
    )(input)
}

/// Every address in a header value. Never fails: text the grammar rejects
/// is split on top-level commas and each piece taken as best it can be.
pub fn parse_address_list(value: &str) -> Vec<AddrSpec> {
    match address_list(value) {
        Ok((_, addrs)) => addrs,
        Err(_) => split_leniently(value),
    }
}

fn split_leniently(value: &str) -> Vec<AddrSpec> {
    let mut pieces = vec![];
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                current.push(ch);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            '"' if depth == 0 => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                pieces.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        if depth == 0 && ch != ')' || in_quote {
            current.push(ch);
        }
    }
    pieces.push(current);

    pieces
        .iter()
        .filter_map(|piece| {
            let piece = piece.trim();
            let inner = match piece.rfind('<') {
                Some(open) => {
                    let rest = &piece[open + 1..];
                    rest.find('>').map(|close| &rest[..close]).unwrap_or(rest)
                }
                None if !piece.contains('@') => "",
                None => piece.rsplit(':').next().unwrap_or(piece),
            };
            let inner = inner.trim().trim_end_matches(';').trim();
            if inner.is_empty() {
                None
            } else {
                Some(AddrSpec::from_raw(inner))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn all(value: &str) -> Vec<String> {
        parse_address_list(value)
            .iter()
            .map(|a| a.part(AddressPart::All))
            .collect()
    }

    #[rstest]
    #[case("test1@in.telligent.com", &["test1@in.telligent.com"])]
    #[case("undisclosed-recipients:;", &[])]
    #[case("undisclosed-recipients: ;", &[])]
    #[case(r#""bar, foo" <foo@x.com>, baz@y.com"#, &["foo@x.com", "baz@y.com"])]
    #[case("John Q. Public <jqp@example.org>", &["jqp@example.org"])]
    #[case("friends: a@x.com, B <b@y.com>;, c@z.com", &["a@x.com", "b@y.com", "c@z.com"])]
    #[case("a@x.com (Alice), , b@y.com", &["a@x.com", "b@y.com"])]
    #[case(r#""quoted local"@example.com"#, &["quoted local@example.com"])]
    #[case("<>", &[])]
    #[case("user@[127.0.0.1]", &["user@[127.0.0.1]"])]
    fn strict_lists(#[case] value: &str, #[case] expected: &[&str]) {
        assert_eq!(all(value), expected);
    }

    #[rstest]
    #[case("Broken <a@x.com, b@y.com", &["a@x.com", "b@y.com"])]
    #[case("no address here", &[])]
    #[case(r#""unterminated, <c@z.com>"#, &["c@z.com"])]
    #[case("list:a@b.c,,", &["a@b.c"])]
    fn lenient_lists(#[case] value: &str, #[case] expected: &[&str]) {
        assert_eq!(all(value), expected);
    }

    #[test]
    fn parts() {
        let addr = AddrSpec::from_raw("Test1@In.Telligent.com");
        assert_eq!(addr.part(AddressPart::LocalPart), "Test1");
        assert_eq!(addr.part(AddressPart::Domain), "In.Telligent.com");
        let local = AddrSpec::from_raw("root");
        assert_eq!(local.part(AddressPart::All), "root");
        assert_eq!(local.part(AddressPart::Domain), "");
    }
}
