//! Envelope address types and the RFC 5321 path grammar.
//!
//! Paths arrive as `<local-part@domain>`, optionally preceded by a legacy
//! source route (`<@relay1,@relay2:user@example.com>`) which is parsed and
//! discarded. Non-ASCII characters are accepted in both the local part and
//! the domain only when the caller allows UTF-8 (RFC 6531).

use std::fmt;

/// Maximum length of the local part in octets (RFC 5321 §4.5.3.1.1).
pub const MAX_LOCAL_PART_LENGTH: usize = 64;

/// Maximum length of the domain in octets (RFC 5321 §4.5.3.1.2).
pub const MAX_DOMAIN_LENGTH: usize = 255;

/// Reasons an address fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The path is not enclosed in angle brackets.
    #[error("path must be enclosed in angle brackets")]
    MissingBrackets,
    /// The path is empty where a mailbox is required.
    #[error("mailbox required")]
    Empty,
    /// The local part is malformed.
    #[error("invalid local part")]
    InvalidLocalPart,
    /// The domain is malformed.
    #[error("invalid domain")]
    InvalidDomain,
    /// The local part or domain exceeds its length limit.
    #[error("address too long")]
    TooLong,
    /// The address contains non-ASCII characters but SMTPUTF8 is not in effect.
    #[error("non-ASCII address requires SMTPUTF8")]
    NonAscii,
}

/// A parsed `local-part@domain` mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox {
    local_part: String,
    domain: String,
}

impl Mailbox {
    /// Parses a mailbox without angle brackets.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox does not follow the RFC 5321 grammar.
    pub fn parse(input: &str, allow_utf8: bool) -> Result<Self, AddressError> {
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        let local_len = scan_local_part(input, allow_utf8)?;
        let (local_part, rest) = input.split_at(local_len);
        let domain = rest
            .strip_prefix('@')
            .ok_or(AddressError::InvalidDomain)?;

        validate_domain(domain, allow_utf8)?;

        if local_part.len() > MAX_LOCAL_PART_LENGTH || domain.len() > MAX_DOMAIN_LENGTH {
            return Err(AddressError::TooLong);
        }

        Ok(Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        })
    }

    /// The special `Postmaster` recipient, which may be given without a domain.
    #[must_use]
    pub fn postmaster() -> Self {
        Self {
            local_part: "Postmaster".to_string(),
            domain: String::new(),
        }
    }

    /// Returns the local part as written by the client (quotes included).
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// Returns the domain, or an empty string for the bare postmaster.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns true if the mailbox contains only ASCII characters.
    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.local_part.is_ascii() && self.domain.is_ascii()
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            f.write_str(&self.local_part)
        } else {
            write!(f, "{}@{}", self.local_part, self.domain)
        }
    }
}

/// The MAIL FROM path, which may be null for delivery status notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReversePath {
    /// The null reverse-path `<>`.
    Null,
    /// A sender mailbox.
    Mailbox(Mailbox),
}

impl ReversePath {
    /// Returns the sender mailbox, if any.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Null => None,
            Self::Mailbox(mailbox) => Some(mailbox),
        }
    }

    /// Returns true if the path contains only ASCII characters.
    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.mailbox().is_none_or(Mailbox::is_ascii)
    }
}

impl fmt::Display for ReversePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<>"),
            Self::Mailbox(mailbox) => write!(f, "<{mailbox}>"),
        }
    }
}

/// Parses a reverse-path (`<>` or `<mailbox>`) at the start of `input`.
///
/// Returns the path and the remainder after the closing bracket, which holds
/// any ESMTP parameters.
///
/// # Errors
///
/// Returns an error if the path is malformed.
pub fn parse_reverse_path(input: &str, allow_utf8: bool) -> Result<(ReversePath, &str), AddressError> {
    let (inner, rest) = split_path(input)?;
    if inner.is_empty() {
        return Ok((ReversePath::Null, rest));
    }
    let mailbox = Mailbox::parse(strip_source_route(inner)?, allow_utf8)?;
    Ok((ReversePath::Mailbox(mailbox), rest))
}

/// Parses a forward-path (`<mailbox>` or `<Postmaster>`) at the start of `input`.
///
/// # Errors
///
/// Returns an error if the path is malformed or empty.
pub fn parse_forward_path(input: &str, allow_utf8: bool) -> Result<(Mailbox, &str), AddressError> {
    let (inner, rest) = split_path(input)?;
    if inner.eq_ignore_ascii_case("postmaster") {
        return Ok((Mailbox::postmaster(), rest));
    }
    let mailbox = Mailbox::parse(strip_source_route(inner)?, allow_utf8)?;
    Ok((mailbox, rest))
}

/// Splits `<...>rest` into the bracketed text and the remainder.
fn split_path(input: &str) -> Result<(&str, &str), AddressError> {
    let body = input.strip_prefix('<').ok_or(AddressError::MissingBrackets)?;

    let mut in_quotes = false;
    let mut escaped = false;
    for (index, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => return Ok((&body[..index], &body[index + 1..])),
            _ => {}
        }
    }

    Err(AddressError::MissingBrackets)
}

/// Removes an `@a,@b:` source route prefix.
fn strip_source_route(inner: &str) -> Result<&str, AddressError> {
    if !inner.starts_with('@') {
        return Ok(inner);
    }
    let (route, mailbox) = inner.split_once(':').ok_or(AddressError::InvalidDomain)?;
    for hop in route.split(',') {
        let domain = hop.strip_prefix('@').ok_or(AddressError::InvalidDomain)?;
        validate_domain(domain, false)?;
    }
    Ok(mailbox)
}

/// Returns the byte length of the local part at the start of `input`.
fn scan_local_part(input: &str, allow_utf8: bool) -> Result<usize, AddressError> {
    if input.starts_with('"') {
        return scan_quoted_string(input, allow_utf8);
    }

    // Dot-string: atoms separated by single dots.
    let mut previous_dot = true;
    for (index, ch) in input.char_indices() {
        match ch {
            '@' if !previous_dot => return Ok(index),
            '.' if !previous_dot => previous_dot = true,
            c if is_atext(c) => previous_dot = false,
            c if !c.is_ascii() => {
                if !allow_utf8 {
                    return Err(AddressError::NonAscii);
                }
                previous_dot = false;
            }
            _ => return Err(AddressError::InvalidLocalPart),
        }
    }

    Err(AddressError::InvalidLocalPart)
}

fn scan_quoted_string(input: &str, allow_utf8: bool) -> Result<usize, AddressError> {
    let mut escaped = false;
    for (index, ch) in input.char_indices().skip(1) {
        if escaped {
            if !(' '..='~').contains(&ch) {
                return Err(AddressError::InvalidLocalPart);
            }
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => {
                return if index == 1 {
                    Err(AddressError::InvalidLocalPart)
                } else {
                    Ok(index + 1)
                };
            }
            ' '..='~' => {}
            c if !c.is_ascii() => {
                if !allow_utf8 {
                    return Err(AddressError::NonAscii);
                }
            }
            _ => return Err(AddressError::InvalidLocalPart),
        }
    }

    Err(AddressError::InvalidLocalPart)
}

/// Validates a domain name or an address literal such as `[192.0.2.1]`.
fn validate_domain(domain: &str, allow_utf8: bool) -> Result<(), AddressError> {
    if domain.is_empty() {
        return Err(AddressError::InvalidDomain);
    }

    if let Some(literal) = domain.strip_prefix('[') {
        let literal = literal.strip_suffix(']').ok_or(AddressError::InvalidDomain)?;
        let valid = !literal.is_empty()
            && literal
                .chars()
                .all(|c| c.is_ascii_graphic() && !matches!(c, '[' | ']' | '\\'));
        return if valid { Ok(()) } else { Err(AddressError::InvalidDomain) };
    }

    for label in domain.split('.') {
        validate_label(label, allow_utf8)?;
    }
    Ok(())
}

fn validate_label(label: &str, allow_utf8: bool) -> Result<(), AddressError> {
    let (Some(first), Some(last)) = (label.chars().next(), label.chars().last()) else {
        return Err(AddressError::InvalidDomain);
    };
    if first == '-' || last == '-' {
        return Err(AddressError::InvalidDomain);
    }

    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            continue;
        }
        if ch.is_ascii() {
            return Err(AddressError::InvalidDomain);
        }
        if !allow_utf8 {
            return Err(AddressError::NonAscii);
        }
        if !ch.is_alphanumeric() {
            return Err(AddressError::InvalidDomain);
        }
    }
    Ok(())
}

const fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
                | '`' | '{' | '|' | '}' | '~'
        )
}
