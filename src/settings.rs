//! Node settings recognized by the service core.

use crate::blockcfg::PublicKey;
use serde::{Deserialize, Serialize};

/// Currency and node options, loaded by the configuration layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Name of the currency this node serves.
    pub currency: String,

    /// Maximum allowed rewind depth for side blocks.
    #[serde(default = "default_forksize")]
    pub forksize: u64,

    /// Target seconds between two blocks.
    #[serde(default = "default_avg_gen_time")]
    pub avg_gen_time: u64,

    /// Lifetime of a membership, in seconds.
    #[serde(default = "default_ms_validity")]
    pub ms_validity: u64,

    /// Lifetime of a certification signature, in seconds.
    #[serde(default = "default_sig_validity")]
    pub sig_validity: u64,

    /// Seconds between two universal dividend emissions.
    #[serde(default = "default_dt")]
    pub dt: u64,

    /// Self-throttle after an own block, in seconds.
    #[serde(default)]
    pub pow_delay: u64,

    /// Whether this node runs proof-of-work generation.
    #[serde(default)]
    pub participate: bool,

    /// Public key this node issues blocks with, when it has one.
    #[serde(default)]
    pub self_pubkey: Option<PublicKey>,
}

fn default_forksize() -> u64 {
    100
}

fn default_avg_gen_time() -> u64 {
    960
}

fn default_ms_validity() -> u64 {
    31_557_600 // one year
}

fn default_sig_validity() -> u64 {
    63_115_200 // two years
}

fn default_dt() -> u64 {
    86_400
}

impl Settings {
    /// Minimal settings for the given currency, with every option at its
    /// default.
    pub fn new(currency: impl Into<String>) -> Self {
        Settings {
            currency: currency.into(),
            forksize: default_forksize(),
            avg_gen_time: default_avg_gen_time(),
            ms_validity: default_ms_validity(),
            sig_validity: default_sig_validity(),
            dt: default_dt(),
            pow_delay: 0,
            participate: false,
            self_pubkey: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_on_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{"currency": "testnet"}"#)
            .expect("minimal settings should deserialize");
        assert_eq!(settings.currency, "testnet");
        assert_eq!(settings.forksize, 100);
        assert_eq!(settings.avg_gen_time, 960);
        assert_eq!(settings.dt, 86_400);
        assert!(!settings.participate);
        assert!(settings.self_pubkey.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<Settings, _> =
            serde_json::from_str(r#"{"currency": "testnet", "fork_size": 5}"#);
        assert!(res.is_err());
    }
}
