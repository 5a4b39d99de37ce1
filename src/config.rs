//! Channel Configuration
//!
//! Both roles must agree on the peer domains, the well-known control token
//! and the data-page count out of band. The defaults describe the reference
//! deployment: the grantor runs in domain 9, the accessor in domain 8, and
//! the control page is published under token 843.
//!
//! Hosts that load the channel as a module can override any value with a
//! parameter string such as `"peer=8 gref=843 pages=4"`.

use core::fmt;

use crate::cap::{CapabilityToken, DomainId};
use crate::channel::manifest::MAX_DATA_PAGES;

/// Domain running the grantor in the reference deployment.
pub const DEFAULT_GRANTOR_DOMAIN: DomainId = DomainId::new(9);
/// Domain running the accessor in the reference deployment.
pub const DEFAULT_ACCESSOR_DOMAIN: DomainId = DomainId::new(8);
/// Control-page token agreed between both roles.
pub const DEFAULT_CONTROL_TOKEN: CapabilityToken = CapabilityToken::new(843);

/// Error produced by configuration parsing or validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter key is not recognized.
    UnknownKey,
    /// A parameter is not of the form `key=value`.
    MissingValue,
    /// A parameter value does not parse.
    BadValue,
    /// Data-page count outside `1..=MAX_DATA_PAGES`.
    PageCount(usize),
    /// Both roles configured in the same domain.
    SameDomain,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => write!(f, "unknown parameter"),
            Self::MissingValue => write!(f, "parameter without value"),
            Self::BadValue => write!(f, "unparsable parameter value"),
            Self::PageCount(n) => {
                write!(f, "data page count {} outside 1..={}", n, MAX_DATA_PAGES)
            }
            Self::SameDomain => write!(f, "self and peer domain are identical"),
        }
    }
}

/// Static description of one end of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Domain this end runs in.
    pub self_domain: DomainId,
    /// Domain of the other end.
    pub peer_domain: DomainId,
    /// Token the control page is granted and mapped under.
    pub control_token: CapabilityToken,
    /// Number of data pages the grantor shares. The accessor takes the
    /// count from the manifest instead.
    pub data_pages: usize,
    /// Share and map data pages read-only.
    pub read_only: bool,
}

impl ChannelConfig {
    /// Reference grantor configuration.
    pub const fn grantor() -> Self {
        Self {
            self_domain: DEFAULT_GRANTOR_DOMAIN,
            peer_domain: DEFAULT_ACCESSOR_DOMAIN,
            control_token: DEFAULT_CONTROL_TOKEN,
            data_pages: MAX_DATA_PAGES,
            read_only: false,
        }
    }

    /// Reference accessor configuration.
    pub const fn accessor() -> Self {
        Self {
            self_domain: DEFAULT_ACCESSOR_DOMAIN,
            peer_domain: DEFAULT_GRANTOR_DOMAIN,
            ..Self::grantor()
        }
    }

    /// Apply `key=value` parameters on top of `self`.
    ///
    /// Recognized keys: `self`, `peer`, `gref` (alias `ctrl_token`),
    /// `pages`, `ro` (`0`/`1`). The result is validated.
    pub fn with_params(mut self, params: &str) -> Result<Self, ConfigError> {
        for param in params.split_whitespace() {
            let (key, value) = param.split_once('=').ok_or(ConfigError::MissingValue)?;
            match key {
                "self" => self.self_domain = DomainId::new(parse(value)?),
                "peer" => self.peer_domain = DomainId::new(parse(value)?),
                "gref" | "ctrl_token" => self.control_token = CapabilityToken::new(parse(value)?),
                "pages" => self.data_pages = parse(value)?,
                "ro" => self.read_only = parse::<u8>(value)? != 0,
                _ => return Err(ConfigError::UnknownKey),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for values no channel can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_pages == 0 || self.data_pages > MAX_DATA_PAGES {
            return Err(ConfigError::PageCount(self.data_pages));
        }
        if self.self_domain == self.peer_domain {
            return Err(ConfigError::SameDomain);
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::grantor()
    }
}

fn parse<T: core::str::FromStr>(value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_defaults() {
        let grantor = ChannelConfig::grantor();
        let accessor = ChannelConfig::accessor();
        assert_eq!(grantor.self_domain, accessor.peer_domain);
        assert_eq!(grantor.peer_domain, accessor.self_domain);
        assert_eq!(grantor.control_token, CapabilityToken::new(843));
        assert_eq!(grantor.data_pages, 8);
        assert!(grantor.validate().is_ok());
        assert!(accessor.validate().is_ok());
    }

    #[test]
    fn test_params_override() {
        let config = ChannelConfig::accessor()
            .with_params("gref=900  pages=4 ro=1")
            .unwrap();
        assert_eq!(config.control_token, CapabilityToken::new(900));
        assert_eq!(config.data_pages, 4);
        assert!(config.read_only);
        assert_eq!(config.self_domain, DEFAULT_ACCESSOR_DOMAIN);

        let config = ChannelConfig::grantor().with_params("").unwrap();
        assert_eq!(config, ChannelConfig::grantor());
    }

    #[test]
    fn test_params_rejected() {
        let base = ChannelConfig::grantor();
        assert_eq!(base.with_params("color=blue"), Err(ConfigError::UnknownKey));
        assert_eq!(base.with_params("pages"), Err(ConfigError::MissingValue));
        assert_eq!(base.with_params("pages=eight"), Err(ConfigError::BadValue));
        assert_eq!(base.with_params("pages=9"), Err(ConfigError::PageCount(9)));
        assert_eq!(base.with_params("pages=0"), Err(ConfigError::PageCount(0)));
        assert_eq!(base.with_params("peer=9"), Err(ConfigError::SameDomain));
        assert_eq!(base.with_params("self=70000"), Err(ConfigError::BadValue));
    }
}
