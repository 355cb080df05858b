//! Server configuration: TOML file + CLI overrides.

use crate::admission::AdmissionPolicy;
use crate::relay::RelaySettings;
use crate::transport::QuicSettings;
use quicbridge_core::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,
    #[serde(default = "default_cert_path")]
    pub cert: String,
    #[serde(default = "default_key_path")]
    pub key: String,
    #[serde(default = "default_alpn")]
    pub alpn: Vec<String>,
    /// Seconds; 0 disables the idle timeout.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Seconds; 0 disables keep-alives.
    #[serde(default)]
    pub keep_alive: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cert: default_cert_path(),
            key: default_key_path(),
            alpn: default_alpn(),
            idle_timeout: default_idle_timeout(),
            keep_alive: 0,
        }
    }
}

/// `[backend]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(default = "default_backend")]
    pub address: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            address: default_backend(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// `[limits]` section of the config TOML. Absent keys mean unbounded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    pub max_sessions: Option<usize>,
    pub max_relays_per_session: Option<usize>,
}

fn default_listen() -> Vec<String> {
    vec!["0.0.0.0:4242".to_string()]
}
fn default_cert_path() -> String {
    "~/.quicbridge/cert.pem".to_string()
}
fn default_key_path() -> String {
    "~/.quicbridge/key.pem".to_string()
}
fn default_alpn() -> Vec<String> {
    vec!["quic-echo-example".to_string()]
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_backend() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    2000
}
fn default_buffer_size() -> usize {
    16 * 1024
}
fn default_shutdown_grace() -> u64 {
    10
}

/// Values given on the command line or through the environment. `None`
/// leaves the config file (or default) value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<Vec<String>>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub alpn: Option<Vec<String>>,
    pub idle_timeout: Option<u64>,
    pub keep_alive: Option<u64>,
    pub backend: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub max_sessions: Option<usize>,
    pub max_relays: Option<usize>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: Vec<SocketAddr>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub alpn: Vec<String>,
    pub quic: QuicSettings,
    pub backend_addr: String,
    pub connect_timeout: Duration,
    pub relay: RelaySettings,
    pub admission: AdmissionPolicy,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> BridgeResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| BridgeError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    /// Merge CLI overrides over a parsed config file and validate the result.
    pub fn resolve(file: ConfigFile, cli: &CliOverrides) -> BridgeResult<Self> {
        let listen_addrs = cli.listen.clone().unwrap_or(file.server.listen);
        let listen = listen_addrs
            .iter()
            .map(String::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_listen_address)
            .collect::<BridgeResult<Vec<_>>>()?;
        if listen.is_empty() {
            return Err(BridgeError::Config("no listen address configured".into()));
        }

        let alpn = cli.alpn.clone().unwrap_or(file.server.alpn);
        if alpn.is_empty() || alpn.iter().any(String::is_empty) {
            return Err(BridgeError::Config("ALPN list must contain non-empty identifiers".into()));
        }

        let backend_addr = cli.backend.clone().unwrap_or(file.backend.address);
        if backend_addr.trim().is_empty() {
            return Err(BridgeError::Config("backend address is empty".into()));
        }

        if file.relay.buffer_size == 0 {
            return Err(BridgeError::Config("relay.buffer_size must be positive".into()));
        }

        let connect_timeout_ms = cli
            .connect_timeout_ms
            .unwrap_or(file.backend.connect_timeout_ms);
        if connect_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "backend.connect_timeout_ms must be positive".into(),
            ));
        }

        let idle_secs = cli.idle_timeout.unwrap_or(file.server.idle_timeout);
        let keep_alive_secs = cli.keep_alive.unwrap_or(file.server.keep_alive);
        let seconds = |s: u64| (s > 0).then(|| Duration::from_secs(s));

        let cert = cli.cert.clone().unwrap_or(file.server.cert);
        let key = cli.key.clone().unwrap_or(file.server.key);

        Ok(Self {
            listen,
            cert_path: expand_tilde_str(&cert),
            key_path: expand_tilde_str(&key),
            alpn,
            quic: QuicSettings {
                idle_timeout: seconds(idle_secs),
                keep_alive: seconds(keep_alive_secs),
            },
            backend_addr,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            relay: RelaySettings {
                buffer_size: file.relay.buffer_size,
                shutdown_grace: Duration::from_secs(file.relay.shutdown_grace),
            },
            admission: AdmissionPolicy {
                max_sessions: cli.max_sessions.or(file.limits.max_sessions),
                max_relays_per_session: cli.max_relays.or(file.limits.max_relays_per_session),
            },
        })
    }
}

/// Parse one listen address. `":4242"` binds all IPv4 interfaces; host names
/// are resolved once, here.
pub fn parse_listen_address(addr: &str) -> BridgeResult<SocketAddr> {
    if let Ok(addr) = addr.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| BridgeError::Config(format!("invalid listen port in {addr:?}")))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    addr.to_socket_addrs()
        .map_err(|e| BridgeError::Config(format!("invalid listen address {addr:?}: {e}")))?
        .next()
        .ok_or_else(|| BridgeError::Config(format!("listen address {addr:?} resolved to nothing")))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen, vec!["0.0.0.0:4242".parse::<SocketAddr>().unwrap()]);
        assert_eq!(cfg.alpn, vec!["quic-echo-example"]);
        assert_eq!(cfg.quic.idle_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.quic.keep_alive, None);
        assert_eq!(cfg.backend_addr, "127.0.0.1:8080");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(2));
        assert_eq!(cfg.relay, RelaySettings::default());
        assert_eq!(cfg.admission, AdmissionPolicy::default());
        assert!(cfg.cert_path.ends_with(".quicbridge/cert.pem"));
    }

    #[test]
    fn test_file_values_and_cli_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
listen = ["127.0.0.1:5000", ":6000"]
idle_timeout = 0
keep_alive = 15

[backend]
address = "10.0.0.5:9000"
connect_timeout_ms = 500

[relay]
buffer_size = 4096
shutdown_grace = 3

[limits]
max_sessions = 50
"#
        )
        .unwrap();

        let cli = CliOverrides {
            backend: Some("127.0.0.1:7000".into()),
            max_relays: Some(8),
            ..Default::default()
        };
        let cfg = ServerConfig::load(Some(file.path()), &cli).unwrap();

        assert_eq!(
            cfg.listen,
            vec![
                "127.0.0.1:5000".parse::<SocketAddr>().unwrap(),
                "0.0.0.0:6000".parse::<SocketAddr>().unwrap(),
            ]
        );
        assert_eq!(cfg.quic.idle_timeout, None);
        assert_eq!(cfg.quic.keep_alive, Some(Duration::from_secs(15)));
        assert_eq!(cfg.backend_addr, "127.0.0.1:7000");
        assert_eq!(cfg.connect_timeout, Duration::from_millis(500));
        assert_eq!(cfg.relay.buffer_size, 4096);
        assert_eq!(cfg.relay.shutdown_grace, Duration::from_secs(3));
        assert_eq!(cfg.admission.max_sessions, Some(50));
        assert_eq!(cfg.admission.max_relays_per_session, Some(8));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(Some(&dir.path().join("absent.toml")), &CliOverrides::default())
            .unwrap();
        assert_eq!(cfg.backend_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten = 42").unwrap();
        let err = ServerConfig::load(Some(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)), "{err}");
    }

    #[test]
    fn test_validation() {
        let empty_listen = CliOverrides {
            listen: Some(vec![" ".into()]),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &empty_listen).is_err());

        let empty_backend = CliOverrides {
            backend: Some(String::new()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &empty_backend).is_err());

        let empty_alpn = CliOverrides {
            alpn: Some(Vec::new()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &empty_alpn).is_err());

        let mut zero_buffer = ConfigFile::default();
        zero_buffer.relay.buffer_size = 0;
        assert!(ServerConfig::resolve(zero_buffer, &CliOverrides::default()).is_err());

        let mut zero_connect = ConfigFile::default();
        zero_connect.backend.connect_timeout_ms = 0;
        let err = ServerConfig::resolve(zero_connect, &CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("connect_timeout_ms"), "{err}");

        let zero_connect_flag = CliOverrides {
            connect_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &zero_connect_flag).is_err());
    }

    #[test]
    fn test_parse_listen_address() {
        assert_eq!(
            parse_listen_address(":4242").unwrap(),
            "0.0.0.0:4242".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_address("[::1]:443").unwrap(),
            "[::1]:443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen_address("localhost:4242").unwrap().port(), 4242);
        assert!(parse_listen_address(":notaport").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/foo/bar"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
