//! Chain specs, well-known chains and the chain sources handed to the
//! light client.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::ManagerError;

/// Chains the light client ships specs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownChain {
    Polkadot,
    Kusama,
    Westend,
    Rococo,
}

impl WellKnownChain {
    pub const ALL: [WellKnownChain; 4] = [
        WellKnownChain::Polkadot,
        WellKnownChain::Kusama,
        WellKnownChain::Westend,
        WellKnownChain::Rococo,
    ];

    /// Chain id as found in the chain spec.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Polkadot => "polkadot",
            Self::Kusama => "ksmcc3",
            Self::Westend => "westend2",
            Self::Rococo => "rococo_v2_2",
        }
    }

    /// Network name apps use to refer to the chain.
    pub fn network_name(&self) -> &'static str {
        match self {
            Self::Polkadot => "polkadot",
            Self::Kusama => "kusama",
            Self::Westend => "westend",
            Self::Rococo => "rococo",
        }
    }
}

impl FromStr for WellKnownChain {
    type Err = ManagerError;

    /// Accepts either the chain id or the network name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.id() == s || chain.network_name() == s)
            .ok_or_else(|| ManagerError::UnknownNetwork(s.to_string()))
    }
}

impl fmt::Display for WellKnownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The fields of a chain spec the manager needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub name: String,
    pub id: String,
    pub relay_chain: Option<String>,
}

impl ChainSpec {
    /// Parse a JSON chain spec. `name` and `id` must be strings.
    pub fn parse(raw: &str) -> Result<Self, ManagerError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ManagerError::InvalidChainSpec(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ManagerError::InvalidChainSpec("not a JSON object".into()));
        };
        let field = |key: &str| -> Result<String, ManagerError> {
            fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ManagerError::InvalidChainSpec(format!("missing string field `{key}`")))
        };

        Ok(Self {
            name: field("name")?,
            id: field("id")?,
            relay_chain: fields
                .get("relay_chain")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Network name: the lowercased spec name.
    pub fn network_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Relay chain referenced by a parachain spec, without validating the rest.
pub fn relay_chain_of(raw: &str) -> Result<String, ManagerError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ManagerError::InvalidChainSpec(e.to_string()))?;
    value
        .get("relay_chain")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ManagerError::InvalidChainSpec("missing string field `relay_chain`".into()))
}

/// What the light client is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSource {
    /// A JSON chain spec.
    Spec(String),
    WellKnown(WellKnownChain),
    /// A parachain spec together with the source of its relay chain.
    Parachain { spec: String, relay: Box<ChainSource> },
}

impl ChainSource {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Spec(_) => "chain spec".to_string(),
            Self::WellKnown(chain) => format!("well-known chain {chain}"),
            Self::Parachain { relay, .. } => format!("parachain of {}", relay.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_well_known_by_id_or_name() {
        assert_eq!("ksmcc3".parse::<WellKnownChain>().unwrap(), WellKnownChain::Kusama);
        assert_eq!("kusama".parse::<WellKnownChain>().unwrap(), WellKnownChain::Kusama);
        assert_eq!("westend".parse::<WellKnownChain>().unwrap().id(), "westend2");
        assert!(matches!(
            "someRelayChain".parse::<WellKnownChain>(),
            Err(ManagerError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn parse_chain_spec() {
        let spec = ChainSpec::parse(r#"{"name":"Westend","id":"westend2","bootNodes":[]}"#).unwrap();
        assert_eq!(spec.network_name(), "westend");
        assert_eq!(spec.id, "westend2");
        assert_eq!(spec.relay_chain, None);
    }

    #[test]
    fn reject_invalid_specs() {
        assert!(ChainSpec::parse("westend").is_err());
        assert!(ChainSpec::parse("[]").is_err());
        assert!(ChainSpec::parse(r#"{"name":"Westend"}"#).is_err());
        assert!(ChainSpec::parse(r#"{"name":1,"id":"x"}"#).is_err());
    }

    #[test]
    fn relay_chain_lookup() {
        let raw = r#"{"name":"parachainSpec","relay_chain":"someRelayChain"}"#;
        assert_eq!(relay_chain_of(raw).unwrap(), "someRelayChain");
        assert!(relay_chain_of(r#"{"name":"p"}"#).is_err());
    }
}
