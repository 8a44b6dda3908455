//! ESMTP extension keywords and MAIL BODY types.

use std::fmt;
use std::mem;

/// SMTP service extensions announced in the EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade (RFC 3207)
    StartTls,
    /// SIZE - Maximum message size (RFC 1870)
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport (RFC 6152)
    EightBitMime,
    /// PIPELINING - Command pipelining (RFC 2920)
    Pipelining,
    /// CHUNKING - Chunked message transfer with BDAT (RFC 3030)
    Chunking,
    /// SMTPUTF8 - UTF-8 email addresses (RFC 6531)
    SmtpUtf8,
    /// BINARYMIME - Binary MIME (RFC 3030)
    BinaryMime,
    /// ENHANCEDSTATUSCODES - Enhanced status codes in replies (RFC 2034)
    EnhancedStatusCodes,
}

impl Extension {
    /// Parses an extension line as it appears in an EHLO response.
    ///
    /// Returns `None` for keywords this engine does not implement.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next()?.to_uppercase();

        match keyword.as_str() {
            "STARTTLS" => Some(Self::StartTls),
            "SIZE" => Some(Self::Size(parts.next().and_then(|s| s.parse().ok()))),
            "8BITMIME" => Some(Self::EightBitMime),
            "PIPELINING" => Some(Self::Pipelining),
            "CHUNKING" => Some(Self::Chunking),
            "SMTPUTF8" => Some(Self::SmtpUtf8),
            "BINARYMIME" => Some(Self::BinaryMime),
            "ENHANCEDSTATUSCODES" => Some(Self::EnhancedStatusCodes),
            _ => None,
        }
    }

    /// Returns the registered EHLO keyword for this extension.
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::StartTls => "STARTTLS",
            Self::Size(_) => "SIZE",
            Self::EightBitMime => "8BITMIME",
            Self::Pipelining => "PIPELINING",
            Self::Chunking => "CHUNKING",
            Self::SmtpUtf8 => "SMTPUTF8",
            Self::BinaryMime => "BINARYMIME",
            Self::EnhancedStatusCodes => "ENHANCEDSTATUSCODES",
        }
    }

    /// Returns true if both values name the same extension, ignoring parameters.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(Some(limit)) => write!(f, "SIZE {limit}"),
            other => f.write_str(other.keyword()),
        }
    }
}

/// Message body type declared with the MAIL `BODY=` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BodyType {
    /// 7BIT - US-ASCII only (the default when no parameter is given)
    #[default]
    SevenBit,
    /// 8BITMIME - arbitrary octets in CRLF-delimited lines
    EightBitMime,
    /// BINARYMIME - arbitrary octets, BDAT transfer only
    BinaryMime,
}

impl BodyType {
    /// Parses a `BODY=` parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "7BIT" => Some(Self::SevenBit),
            "8BITMIME" => Some(Self::EightBitMime),
            "BINARYMIME" => Some(Self::BinaryMime),
            _ => None,
        }
    }

    /// Returns the parameter value as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7BIT",
            Self::EightBitMime => "8BITMIME",
            Self::BinaryMime => "BINARYMIME",
        }
    }

    /// Returns true if octets >= 0x80 are permitted in the body.
    #[must_use]
    pub const fn allows_8bit(self) -> bool {
        !matches!(self, Self::SevenBit)
    }

    /// Returns the extension that must be negotiated to use this body type.
    #[must_use]
    pub const fn required_extension(self) -> Option<Extension> {
        match self {
            Self::SevenBit => None,
            Self::EightBitMime => Some(Extension::EightBitMime),
            Self::BinaryMime => Some(Extension::BinaryMime),
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
