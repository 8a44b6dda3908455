//! Argument grammar for MAIL, RCPT, BDAT and HELO/EHLO.

use crate::error::Rejection;
use crate::types::{
    AddressError, BodyType, Mailbox, ReversePath, parse_forward_path, parse_reverse_path,
};

/// Parsed `MAIL FROM:` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailArgs {
    /// Reverse-path.
    pub path: ReversePath,
    /// The path exactly as sent, brackets included.
    pub raw: String,
    /// ESMTP parameters.
    pub params: MailParameters,
}

/// ESMTP parameters accepted on MAIL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParameters {
    /// `SIZE=` declared message size (RFC 1870).
    pub size: Option<usize>,
    /// `BODY=` body type (RFC 6152, RFC 3030).
    pub body: Option<BodyType>,
    /// `SMTPUTF8` flag (RFC 6531).
    pub smtputf8: bool,
}

/// Parsed `RCPT TO:` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcptArgs {
    /// Forward-path.
    pub mailbox: Mailbox,
    /// The path exactly as sent, brackets included.
    pub raw: String,
}

/// Parsed `BDAT` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BdatArgs {
    /// Chunk size in octets.
    pub size: usize,
    /// True if this is the final chunk.
    pub last: bool,
}

/// Parses the arguments of `MAIL`.
///
/// `allow_utf8` permits non-ASCII addresses and is set when SMTPUTF8 was
/// negotiated for the session.
///
/// # Errors
///
/// Returns a syntax-class rejection for malformed paths or parameters, and
/// [`Rejection::UnknownParameter`] for unknown keywords.
pub fn parse_mail(args: &str, allow_utf8: bool) -> Result<MailArgs, Rejection> {
    let input = strip_keyword(args, "FROM:")
        .ok_or_else(|| Rejection::Syntax("expected MAIL FROM:<address>".into()))?;

    let (path, rest) = parse_reverse_path(input, allow_utf8).map_err(address_rejection)?;
    let raw = input[..input.len() - rest.len()].to_string();

    let mut params = MailParameters::default();
    for (keyword, value) in split_parameters(rest)? {
        match (keyword.to_ascii_uppercase().as_str(), value) {
            ("SIZE", Some(value)) => {
                let size = value
                    .parse()
                    .map_err(|_| Rejection::Syntax(format!("invalid SIZE value: {value}")))?;
                params.size = Some(size);
            }
            ("BODY", Some(value)) => {
                let body = BodyType::parse(value)
                    .ok_or_else(|| Rejection::Syntax(format!("invalid BODY value: {value}")))?;
                params.body = Some(body);
            }
            ("SMTPUTF8", None) => params.smtputf8 = true,
            ("SIZE" | "BODY", None) | ("SMTPUTF8", Some(_)) => {
                return Err(Rejection::Syntax(format!("malformed {keyword} parameter")));
            }
            _ => return Err(Rejection::UnknownParameter(keyword.to_string())),
        }
    }

    Ok(MailArgs { path, raw, params })
}

/// Parses the arguments of `RCPT`. No RCPT parameters are supported.
///
/// # Errors
///
/// Returns a syntax-class rejection for malformed paths, and
/// [`Rejection::UnknownParameter`] if any parameter is present.
pub fn parse_rcpt(args: &str, allow_utf8: bool) -> Result<RcptArgs, Rejection> {
    let input = strip_keyword(args, "TO:")
        .ok_or_else(|| Rejection::Syntax("expected RCPT TO:<address>".into()))?;

    let (mailbox, rest) = parse_forward_path(input, allow_utf8).map_err(address_rejection)?;
    let raw = input[..input.len() - rest.len()].to_string();

    if let Some((keyword, _)) = split_parameters(rest)?.into_iter().next() {
        return Err(Rejection::UnknownParameter(keyword.to_string()));
    }

    Ok(RcptArgs { mailbox, raw })
}

/// Parses the arguments of `BDAT <size> [LAST]`.
///
/// # Errors
///
/// Returns [`Rejection::Syntax`] if the size is missing or not a number.
pub fn parse_bdat(args: &str) -> Result<BdatArgs, Rejection> {
    let mut parts = args.split_ascii_whitespace();
    let size = parts
        .next()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Rejection::Syntax("expected BDAT <chunk-size> [LAST]".into()))?;

    let last = match parts.next() {
        None => false,
        Some(word) if word.eq_ignore_ascii_case("LAST") => true,
        Some(_) => return Err(Rejection::Syntax("expected BDAT <chunk-size> [LAST]".into())),
    };
    if parts.next().is_some() {
        return Err(Rejection::Syntax("expected BDAT <chunk-size> [LAST]".into()));
    }

    Ok(BdatArgs { size, last })
}

/// Parses the client identity given to HELO or EHLO.
///
/// Any single token is accepted; the identity is informational.
///
/// # Errors
///
/// Returns [`Rejection::Syntax`] if the argument is missing.
pub fn parse_helo_argument(args: &str) -> Result<String, Rejection> {
    args.split_ascii_whitespace()
        .next()
        .map(ToString::to_string)
        .ok_or_else(|| Rejection::Syntax("domain name required".into()))
}

fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    Some(args[keyword.len()..].trim_start_matches(' '))
}

/// Splits ` KEY[=VALUE] KEY[=VALUE]` after a path.
fn split_parameters(rest: &str) -> Result<Vec<(&str, Option<&str>)>, Rejection> {
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    if !rest.starts_with(' ') {
        return Err(Rejection::Syntax("expected space after path".into()));
    }

    rest.split_ascii_whitespace()
        .map(|param| {
            let (keyword, value) = match param.split_once('=') {
                Some((keyword, value)) => (keyword, Some(value)),
                None => (param, None),
            };
            let valid = !keyword.is_empty()
                && keyword.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
            if valid {
                Ok((keyword, value))
            } else {
                Err(Rejection::Syntax(format!("malformed parameter: {param}")))
            }
        })
        .collect()
}

fn address_rejection(err: AddressError) -> Rejection {
    match err {
        AddressError::NonAscii => Rejection::NonAsciiAddress,
        other => Rejection::Syntax(other.to_string()),
    }
}
