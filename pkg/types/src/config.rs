use serde::{Deserialize, Serialize};

/// Which identity strategy the API server uses. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Hand the request to an external authenticator; negative answers proceed as unauthenticated.
    Delegated,
    /// Decrypt a session token carried by the request; any failure is rejected.
    #[default]
    Token,
}

impl std::str::FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "delegated" => Ok(AuthMode::Delegated),
            "token" => Ok(AuthMode::Token),
            other => anyhow::bail!("unknown auth mode '{}' (expected delegated|token)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Slatedb,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// One entry of the static token table used in token mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTokenEntry {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8443
/// data-dir: /var/lib/virtrs/data
/// auth-mode: delegated
/// authenticator-url: https://rancher.local/v3/tokenreview
/// auth-ignore-prefixes: ["/api/v1/public"]
/// resync-interval-secs: 60
/// log-format: json
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub store: Option<StoreBackend>,
    #[serde(default, alias = "auth-mode")]
    pub auth_mode: Option<AuthMode>,
    #[serde(default, alias = "auth-path-prefix")]
    pub auth_path_prefix: Option<String>,
    #[serde(default, alias = "auth-ignore-prefixes")]
    pub auth_ignore_prefixes: Vec<String>,
    #[serde(default, alias = "authenticator-url")]
    pub authenticator_url: Option<String>,
    #[serde(default, alias = "static-tokens")]
    pub static_tokens: Vec<StaticTokenEntry>,
    #[serde(default, alias = "request-timeout-ms")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, alias = "store-timeout-ms")]
    pub store_timeout_ms: Option<u64>,
    #[serde(default, alias = "resync-interval-secs")]
    pub resync_interval_secs: Option<u64>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<LogFormat>,
    #[serde(default, alias = "managed-global-roles")]
    pub managed_global_roles: Option<Vec<String>>,
    #[serde(default, alias = "managed-role-templates")]
    pub managed_role_templates: Option<Vec<String>>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_keys() {
        let yaml = r#"
port: 9443
data-dir: /var/lib/virtrs
auth-mode: delegated
auth-ignore-prefixes: ["/api/v1/public"]
static-tokens:
  - token: abc
    user: alice
    groups: ["devs"]
log-format: json
"#;
        let cfg: ServerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.port, Some(9443));
        assert_eq!(cfg.data_dir.as_deref(), Some("/var/lib/virtrs"));
        assert_eq!(cfg.auth_mode, Some(AuthMode::Delegated));
        assert_eq!(cfg.auth_ignore_prefixes, vec!["/api/v1/public"]);
        assert_eq!(cfg.static_tokens[0].user, "alice");
        assert_eq!(cfg.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn missing_file_yields_default() {
        let cfg: ServerConfigFile =
            load_config_file("/nonexistent/virtrs/config.yaml").unwrap();
        assert!(cfg.port.is_none());
        assert!(cfg.static_tokens.is_empty());
    }

    #[test]
    fn auth_mode_from_str() {
        assert_eq!("token".parse::<AuthMode>().unwrap(), AuthMode::Token);
        assert!("basic".parse::<AuthMode>().is_err());
    }
}
