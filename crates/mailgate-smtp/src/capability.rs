//! Capability registry and per-session negotiation.
//!
//! The registry is built once from [`Config`] and shared read-only by all
//! sessions. EHLO asks it for the capabilities eligible on the current
//! transport and stores the answer in the session's [`Negotiated`] set,
//! which no other command may change.

use crate::config::Config;
use crate::types::Extension;

/// When a capability may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// On every EHLO.
    Always,
    /// Only while the transport is still plaintext.
    BeforeTls,
}

impl Activation {
    /// Returns true if the capability is eligible on the given transport.
    #[must_use]
    pub const fn is_eligible(self, secure: bool) -> bool {
        match self {
            Self::Always => true,
            Self::BeforeTls => !secure,
        }
    }
}

/// A capability the server can offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// The extension and its parameters.
    pub extension: Extension,
    /// Activation predicate.
    pub activation: Activation,
}

/// The ordered set of capabilities a server offers.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    /// Builds the registry from configuration.
    ///
    /// STARTTLS is registered only if `tls_available` is set.
    #[must_use]
    pub fn from_config(config: &Config, tls_available: bool) -> Self {
        let mut registry = Self::default();
        registry.register(Extension::Size(Some(config.max_message_size)), Activation::Always);
        if config.eight_bit_mime {
            registry.register(Extension::EightBitMime, Activation::Always);
        }
        registry.register(Extension::Pipelining, Activation::Always);
        if config.smtputf8 {
            registry.register(Extension::SmtpUtf8, Activation::Always);
        }
        if config.chunking {
            registry.register(Extension::Chunking, Activation::Always);
        }
        if config.binary_mime {
            registry.register(Extension::BinaryMime, Activation::Always);
        }
        if config.enhanced_status_codes {
            registry.register(Extension::EnhancedStatusCodes, Activation::Always);
        }
        if tls_available {
            registry.register(Extension::StartTls, Activation::BeforeTls);
        }
        registry
    }

    /// Adds a capability, replacing any previous entry of the same kind.
    pub fn register(&mut self, extension: Extension, activation: Activation) {
        self.capabilities
            .retain(|capability| !capability.extension.same_kind(&extension));
        self.capabilities.push(Capability {
            extension,
            activation,
        });
    }

    /// Returns every registered capability in offer order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Returns the extensions eligible on the given transport, in offer order.
    #[must_use]
    pub fn eligible(&self, secure: bool) -> Vec<Extension> {
        self.capabilities
            .iter()
            .filter(|capability| capability.activation.is_eligible(secure))
            .map(|capability| capability.extension.clone())
            .collect()
    }
}

/// The capabilities negotiated into one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    extended: bool,
    extensions: Vec<Extension>,
}

impl Negotiated {
    /// The empty set of a session that has not greeted.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            extended: false,
            extensions: Vec::new(),
        }
    }

    /// The set after HELO: no extensions at all.
    #[must_use]
    pub const fn helo() -> Self {
        Self::none()
    }

    /// The set after EHLO.
    #[must_use]
    pub const fn ehlo(extensions: Vec<Extension>) -> Self {
        Self {
            extended: true,
            extensions,
        }
    }

    /// Returns true if the session greeted with EHLO.
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        self.extended
    }

    /// Returns true if the extension was offered in this session's EHLO reply.
    #[must_use]
    pub fn offers(&self, extension: &Extension) -> bool {
        self.extensions.iter().any(|offered| offered.same_kind(extension))
    }

    /// Returns the offered extensions in order.
    #[must_use]
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn keywords(extensions: &[Extension]) -> Vec<String> {
        extensions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_default_offer_order() {
        let registry = CapabilityRegistry::from_config(&Config::default(), true);
        assert_eq!(
            keywords(&registry.eligible(false)),
            [
                "SIZE 10485760",
                "8BITMIME",
                "PIPELINING",
                "SMTPUTF8",
                "CHUNKING",
                "BINARYMIME",
                "ENHANCEDSTATUSCODES",
                "STARTTLS",
            ]
        );
    }

    #[test]
    fn test_starttls_not_offered_once_secure() {
        let registry = CapabilityRegistry::from_config(&Config::default(), true);
        assert!(registry.eligible(false).contains(&Extension::StartTls));
        let secure = registry.eligible(true);
        assert!(!secure.contains(&Extension::StartTls));
        assert!(secure.contains(&Extension::Pipelining));
    }

    #[test]
    fn test_starttls_requires_tls_support() {
        let registry = CapabilityRegistry::from_config(&Config::default(), false);
        assert!(!registry.eligible(false).contains(&Extension::StartTls));
    }

    #[test]
    fn test_disabled_extensions_absent() {
        let config = Config::builder("mx.example.com")
            .smtputf8(false)
            .eight_bit_mime(false)
            .chunking(false)
            .binary_mime(false)
            .build()
            .unwrap();
        let registry = CapabilityRegistry::from_config(&config, false);
        let offered = registry.eligible(false);
        assert!(!offered.contains(&Extension::SmtpUtf8));
        assert!(!offered.contains(&Extension::EightBitMime));
        assert!(!offered.contains(&Extension::Chunking));
        assert!(offered.contains(&Extension::Pipelining));
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let mut registry = CapabilityRegistry::default();
        registry.register(Extension::Size(Some(1)), Activation::Always);
        registry.register(Extension::Size(Some(2)), Activation::Always);
        assert_eq!(registry.capabilities().len(), 1);
        assert_eq!(registry.eligible(false), [Extension::Size(Some(2))]);
    }

    #[test]
    fn test_negotiated_sets() {
        assert!(!Negotiated::none().is_extended());
        assert!(!Negotiated::helo().offers(&Extension::Pipelining));

        let negotiated = Negotiated::ehlo(vec![Extension::Size(Some(10)), Extension::Pipelining]);
        assert!(negotiated.is_extended());
        assert!(negotiated.offers(&Extension::Size(None)));
        assert!(negotiated.offers(&Extension::Pipelining));
        assert!(!negotiated.offers(&Extension::Chunking));
        assert_eq!(negotiated.extensions().len(), 2);
    }
}
