use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ProxyConfig;

/// Prefix of environment overrides, e.g. `GAMESERVER_PROXY__DIRECTORY__SECRET_KEY`.
pub const ENV_PREFIX: &str = "GAMESERVER_PROXY";

/// Load configuration from an optional file layered under environment overrides.
///
/// Supports TOML, YAML, JSON and INI, picked by file extension.
pub async fn load_config(config_path: Option<&str>) -> Result<ProxyConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>) -> Result<ProxyConfig> {
    load_config_with_env(config_path, None)
}

/// Load configuration with an explicit environment instead of the process one.
pub fn load_config_with_env(
    config_path: Option<&str>,
    env: Option<HashMap<String, String>>,
) -> Result<ProxyConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("ini") => FileFormat::Ini,
            _ => FileFormat::Toml,
        };
        builder = builder.add_source(File::new(config_path, format));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .with_context(|| match config_path {
            Some(path) => format!("Failed to build config from {path}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let proxy_config: ProxyConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize proxy configuration")?;

    Ok(proxy_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::core::{resolver::PortSelection, route::RouteScheme};

    fn empty_env() -> Option<HashMap<String, String>> {
        Some(HashMap::new())
    }

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:3000"
route_scheme = "build_session_region"

[forwarding]
activity_timeout_secs = 7

[endpoint]
scheme = "http"
port_selection = { policy = "named", name = "game_port" }

[directory]
title_id = "A1B2C"
secret_key = "from-file"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{toml_content}").unwrap();

        let config =
            load_config_with_env(Some(temp_file.path().to_str().unwrap()), empty_env()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.forwarding.activity_timeout_secs, 7);
        assert_eq!(config.forwarding.connect_timeout_secs, 5);
        assert_eq!(config.directory.title_id, "A1B2C");
        assert_eq!(
            config.endpoint.port_selection,
            PortSelection::Named {
                name: "game_port".to_string()
            }
        );
    }

    #[test]
    fn test_load_yaml_match_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3001"
route_scheme: match_id
match_servers:
  m-42: "http://10.0.0.5:30201"
cors:
  enabled: false
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{yaml_content}").unwrap();

        let config =
            load_config_with_env(Some(temp_file.path().to_str().unwrap()), empty_env()).unwrap();
        assert_eq!(config.route_scheme, RouteScheme::MatchId);
        assert_eq!(
            config.match_servers.get("m-42").map(String::as_str),
            Some("http://10.0.0.5:30201")
        );
        assert!(!config.cors.enabled);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            temp_file,
            "[directory]\ntitle_id = \"A1B2C\"\nsecret_key = \"from-file\"\n"
        )
        .unwrap();

        let env = HashMap::from([
            (
                "GAMESERVER_PROXY__DIRECTORY__SECRET_KEY".to_string(),
                "from-env".to_string(),
            ),
            (
                "GAMESERVER_PROXY__FORWARDING__ACTIVITY_TIMEOUT_SECS".to_string(),
                "9".to_string(),
            ),
        ]);

        let config =
            load_config_with_env(Some(temp_file.path().to_str().unwrap()), Some(env)).unwrap();
        assert_eq!(config.directory.title_id, "A1B2C");
        assert_eq!(config.directory.secret_key, "from-env");
        assert_eq!(config.forwarding.activity_timeout_secs, 9);
    }

    #[test]
    fn test_environment_only() {
        let env = HashMap::from([(
            "GAMESERVER_PROXY__LISTEN_ADDR".to_string(),
            "127.0.0.1:9999".to_string(),
        )]);
        let config = load_config_with_env(None, Some(env)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.forwarding.activity_timeout_secs, 5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config_with_env(Some("/nonexistent/proxy.toml"), empty_env()).is_err());
    }
}
