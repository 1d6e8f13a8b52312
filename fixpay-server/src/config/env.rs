// Environment variable loading

use std::collections::HashMap;
use std::env;

/// Default variable prefix
pub const ENV_PREFIX: &str = "FIXPAY";

/// Prefixed environment variable loader.
///
/// `FIXPAY_GATEWAY_SERVER_KEY` is exposed as `gateway_server_key`.
pub struct EnvLoader {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvLoader {
    /// Snapshot the process environment
    pub fn from_env(prefix: impl Into<String>) -> Self {
        Self::from_vars(prefix, env::vars())
    }

    /// Build from explicit pairs
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.into();
        let marker = format!("{}_", prefix);
        let vars = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.into();
                key.strip_prefix(&marker)
                    .map(|rest| (rest.to_lowercase(), value.into()))
            })
            .collect();
        Self { prefix, vars }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Look up a key without the prefix, e.g. `server_port`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(&key.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Full variable name for a key, for error messages
    pub fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.to_uppercase())
    }

    /// All loaded keys
    pub fn load(&self) -> &HashMap<String, String> {
        &self.vars
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::from_env(ENV_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_stripped_and_lowercased() {
        let loader = EnvLoader::from_vars(
            "FIXPAY",
            [
                ("FIXPAY_SERVER_PORT", "9000"),
                ("FIXPAY_GATEWAY_SERVER_KEY", "SB-Mid-server-x"),
                ("PATH", "/usr/bin"),
                ("FIXPAYMENT_OTHER", "no"),
            ],
        );

        assert_eq!(loader.get("server_port"), Some("9000"));
        assert_eq!(loader.get("GATEWAY_SERVER_KEY"), Some("SB-Mid-server-x"));
        assert_eq!(loader.load().len(), 2);
    }

    #[test]
    fn test_empty_value_is_unset() {
        let loader = EnvLoader::from_vars("FIXPAY", [("FIXPAY_ORDERS_BASE_URL", "")]);
        assert_eq!(loader.get("orders_base_url"), None);
    }

    #[test]
    fn test_var_name() {
        let loader = EnvLoader::from_vars("FIXPAY", Vec::<(String, String)>::new());
        assert_eq!(loader.var_name("server_port"), "FIXPAY_SERVER_PORT");
    }
}
