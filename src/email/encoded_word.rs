//! RFC 2047 encoded words and the transfer encodings they share with
//! message bodies. Decoding is best effort: anything that cannot be
//! decoded is passed through as it appeared.

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;

static ENCODED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").unwrap());

/// Decode every encoded word in a header value and trim the result.
pub fn decode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_end = 0;
    let mut after_word = false;
    for caps in ENCODED_WORD.captures_iter(value) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let gap = &value[last_end..whole.start()];
        // Whitespace between two encoded words is not part of the text.
        if !(after_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }
        match decode_word(&caps[1], &caps[2], &caps[3]) {
            Some(text) => {
                out.push_str(&text);
                after_word = true;
            }
            None => {
                out.push_str(whole.as_str());
                after_word = false;
            }
        }
        last_end = whole.end();
    }
    out.push_str(&value[last_end..]);
    out.trim().to_owned()
}

fn decode_word(charset: &str, encoding: &str, text: &str) -> Option<String> {
    let bytes = if encoding.eq_ignore_ascii_case("b") {
        base64::decode(text).ok()?
    } else {
        decode_quoted_printable(text.as_bytes(), true)
    };
    // RFC 2231 allows a language suffix: `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);
    Some(decode_charset(charset, &bytes))
}

/// Convert `bytes` from the named charset, falling back to lossy UTF-8 for
/// labels nobody recognises.
pub fn decode_charset(label: &str, bytes: &[u8]) -> String {
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn hex_byte(digits: Option<&[u8]>) -> Option<u8> {
    let digits = std::str::from_utf8(digits?).ok()?;
    u8::from_str_radix(digits, 16).ok()
}

/// Quoted-printable decoding. In encoded words (`in_header`) an underscore
/// stands for a space.
pub fn decode_quoted_printable(bytes: &[u8], in_header: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' if in_header => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                let rest = &bytes[i + 1..];
                if rest.starts_with(b"\r\n") {
                    i += 3;
                } else if rest.starts_with(b"\n") {
                    i += 2;
                } else if let Some(b) = hex_byte(bytes.get(i + 1..i + 3)) {
                    out.push(b);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}
