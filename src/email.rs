//! Message model used by tests: the `MessageSource` trait the evaluator
//! reads from, the SMTP/LMTP envelope, and `ParsedMessage`, a minimal
//! header/body splitter that implements `MessageSource` for raw RFC 5322
//! text.

use std::fmt::Debug;

use thiserror::Error;

pub mod address;
pub mod encoded_word;

pub use address::{parse_address_list, AddrSpec, AddressPart};

/// Read access to the message being filtered.
pub trait MessageSource {
    /// Names of all header fields, in message order.
    fn header_names(&self) -> Vec<String>;

    /// Values of every header field called `name` (compared without regard
    /// to ASCII case), unfolded and with RFC 2047 encoded words decoded.
    fn header_values(&self, name: &str) -> Vec<String>;

    /// Undecoded values of the header fields called `name`, used for
    /// address parsing so encoded display names cannot break the list apart.
    fn raw_header_values(&self, name: &str) -> Vec<String> {
        self.header_values(name)
    }

    /// Header values from every MIME part, top level included.
    fn mime_header_values(&self, name: &str) -> Vec<String> {
        self.header_values(name)
    }

    /// Text of the message body, transfer encoding removed.
    fn body_text(&self) -> String;

    /// Size of the message in octets.
    fn size(&self) -> usize;
}

/// Addresses found in the header fields called `name`, reduced to `part`.
pub fn address_values(msg: &dyn MessageSource, name: &str, part: AddressPart) -> Vec<String> {
    msg.raw_header_values(name)
        .iter()
        .flat_map(|raw| parse_address_list(raw))
        .map(|addr| addr.part(part))
        .collect()
}

/// SMTP/LMTP envelope of the delivery.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub from: Option<String>,
    pub to: Vec<String>,
}

impl Envelope {
    pub fn new(from: Option<String>, to: Vec<String>) -> Self {
        Self { from, to }
    }

    /// Reverse path without angle brackets. The null sender `<>` is `Some("")`.
    pub fn sender(&self) -> Option<String> {
        self.from.as_deref().map(strip_angles)
    }

    pub fn recipients(&self) -> Vec<String> {
        self.to.iter().map(|r| strip_angles(r)).collect()
    }

    /// Envelope addresses for an `envelope` test part name.
    pub fn part_values(&self, part_name: &str) -> Vec<String> {
        match part_name.to_ascii_lowercase().as_str() {
            "from" => self.sender().into_iter().collect(),
            "to" => self.recipients(),
            _ => vec![],
        }
    }
}

fn strip_angles(addr: &str) -> String {
    let addr = addr.trim();
    addr.strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
        .unwrap_or(addr)
        .trim()
        .to_owned()
}

#[derive(Clone)]
pub struct ParsedMessage {
    pub headers: Vec<(String, MessageHeader)>,
    pub body: Vec<u8>,
    pub size: usize,
}

impl Debug for ParsedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "==HEADER==")?;
        for (name, val) in self.headers.iter() {
            write!(f, "{}\n{:?}", name, val)?;
        }
        writeln!(f, "==BODY==")?;
        write!(f, "{}", String::from_utf8_lossy(&self.body))?;
        Ok(())
    }
}

impl ParsedMessage {
    pub fn to_vec(&self) -> Vec<u8> {
        let mut result = vec![];
        for (h, val) in &self.headers {
            result.extend(h.as_bytes());
            result.extend(b":");
            for raw_line in val.raw.iter() {
                result.extend(raw_line.iter());
                result.extend(b"\r\n");
            }
        }
        result.extend(b"\r\n");
        result.extend(self.body.iter());
        result
    }

    fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MessageHeader> + 'a {
        self.headers
            .iter()
            .filter(move |(h, _)| h.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    fn first_header(&self, name: &str) -> Option<String> {
        self.headers_named(name).next().map(MessageHeader::text)
    }
}

impl MessageSource for ParsedMessage {
    fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|(h, _)| h.clone()).collect()
    }

    fn header_values(&self, name: &str) -> Vec<String> {
        self.headers_named(name)
            .map(|h| encoded_word::decode(&h.text()))
            .collect()
    }

    fn raw_header_values(&self, name: &str) -> Vec<String> {
        self.headers_named(name).map(MessageHeader::text).collect()
    }

    fn body_text(&self) -> String {
        let encoding = self
            .first_header("Content-Transfer-Encoding")
            .map(|e| e.trim().to_ascii_lowercase());
        let decoded = match encoding.as_deref() {
            Some("base64") => {
                let compact: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::decode(&compact).unwrap_or_else(|_| self.body.clone())
            }
            Some("quoted-printable") => encoded_word::decode_quoted_printable(&self.body, false),
            _ => self.body.clone(),
        };
        let charset = self
            .first_header("Content-Type")
            .and_then(|ct| content_type_charset(&ct));
        encoded_word::decode_charset(charset.as_deref().unwrap_or("utf-8"), &decoded)
    }

    fn size(&self) -> usize {
        self.size
    }
}

fn content_type_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_owned())
        } else {
            None
        }
    })
}

/// Lines of a message, accepting both CRLF and bare LF endings.
#[derive(Clone, Copy)]
struct ByteLines<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for ByteLines<'a> {
    type Item = &'a [u8];
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let (line, rest) = match self.remaining.iter().position(|&b| b == b'\n') {
            Some(i) => (&self.remaining[..i], &self.remaining[i + 1..]),
            None => (self.remaining, &self.remaining[self.remaining.len()..]),
        };
        self.remaining = rest;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

#[derive(Debug, Error)]
pub enum MsgParseError {
    #[error("Continuation line at beginning of message")]
    ContinuationAtBeginning,
    #[error("Malformed header line: {}", String::from_utf8_lossy(.0))]
    MalformedHeader(Vec<u8>),
}

#[derive(Clone)]
pub struct MessageHeader {
    raw: Vec<Vec<u8>>,
    unfolded: Vec<u8>,
}

impl Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Raw: ")?;
        for ln in self.raw.iter() {
            writeln!(f, "{}", String::from_utf8_lossy(ln))?;
        }
        writeln!(f, "Unfolded: {}", String::from_utf8_lossy(&self.unfolded))?;
        Ok(())
    }
}

impl MessageHeader {
    fn new(first_line: &[u8]) -> Self {
        Self {
            raw: vec![first_line.to_vec()],
            unfolded: trim_bytes(first_line).to_vec(),
        }
    }

    pub fn push_continuation(&mut self, continuation: &[u8]) {
        let trimmed = trim_bytes(continuation);
        self.raw.push(continuation.to_vec());
        self.unfolded.push(b' ');
        self.unfolded.extend_from_slice(trimmed);
    }

    pub fn raw(&self) -> &[Vec<u8>] {
        &self.raw
    }

    pub fn unfolded(&self) -> &[u8] {
        &self.unfolded
    }

    /// Unfolded value as text with surrounding whitespace removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.unfolded).trim().to_owned()
    }
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let first_non_ws = bytes
        .iter()
        .position(|ch| !ch.is_ascii_whitespace())
        .unwrap_or_else(|| bytes.len());
    &bytes[first_non_ws..]
}

pub fn parse(msg: &[u8]) -> Result<ParsedMessage, MsgParseError> {
    let mut lines = ByteLines { remaining: msg };
    let mut headers = vec![];
    let mut last_header: Option<(String, MessageHeader)> = None;
    for l in &mut lines {
        let is_continuation = l.first().map(|&b| b == b' ' || b == b'\t').unwrap_or(false);
        if is_continuation {
            let header = &mut last_header
                .as_mut()
                .ok_or(MsgParseError::ContinuationAtBeginning)?
                .1;
            header.push_continuation(l);
            continue;
        }
        if let Some(header) = last_header.take() {
            headers.push(header);
        }
        if l.is_empty() {
            break;
        }
        let pos = l
            .iter()
            .position(|&ch| ch == b':')
            .ok_or_else(|| MsgParseError::MalformedHeader(l.to_vec()))?;
        let name = String::from_utf8_lossy(&l[..pos]).into_owned();
        last_header = Some((name, MessageHeader::new(&l[pos + 1..])));
    }
    if let Some(header) = last_header.take() {
        headers.push(header);
    }
    let mut body = vec![];
    for l in lines {
        body.extend_from_slice(l);
        body.extend(b"\r\n");
    }
    Ok(ParsedMessage {
        headers,
        body,
        size: msg.len(),
    })
}
