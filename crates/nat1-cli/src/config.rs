//! Configuration system for the NAT1 Traversal CLI.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

use crate::dns;

/// Port assumed when an address omits it
pub const DEFAULT_PORT: u16 = 25565;

/// Default IP for the local listen address
pub const DEFAULT_LOCAL_IP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Default IP for the forward target
pub const DEFAULT_REMOTE_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// NAT1 Traversal configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Forwarding configuration
    pub forward: ForwardConfig,
    /// STUN configuration
    pub stun: StunConfig,
    /// DNS publishing configuration
    pub dns: DnsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Local listen address (`[ip]:[port]`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    /// Forward target (`[ip]:[port]`); absent means shared-port mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// `tcp` or `udp`
    #[serde(default = "default_transport")]
    pub transport: String,
}

/// STUN configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StunConfig {
    /// STUN server for TCP (`host:port`)
    #[serde(default = "default_tcp_server")]
    pub tcp_server: String,
    /// STUN server for UDP (`host:port`)
    #[serde(default = "default_udp_server")]
    pub udp_server: String,
    /// Per-exchange timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// UDP retransmissions
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// DNS publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// Provider name
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider account ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Provider API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Zone, e.g. `example.com`
    #[serde(default)]
    pub domain: String,
    /// Record name inside the zone
    #[serde(default)]
    pub sub_domain: String,
    /// Service kind, selects the SRV prefix
    #[serde(default = "default_service")]
    pub service: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_tcp_server() -> String {
    "turn.cloud-rtc.com:80".to_string()
}

fn default_udp_server() -> String {
    "stun.douyucdn.cn:18000".to_string()
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_retries() -> u32 {
    2
}

fn default_provider() -> String {
    "no_dns".to_string()
}

fn default_service() -> String {
    "mcje".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            local: None,
            remote: None,
            transport: default_transport(),
        }
    }
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            tcp_server: default_tcp_server(),
            udp_server: default_udp_server(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            id: None,
            token: None,
            domain: String::new(),
            sub_domain: String::new(),
            service: default_service(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// SRV prefix for a service kind
#[must_use]
pub fn srv_prefix(service: &str) -> Option<&'static str> {
    match service {
        "mcje" => Some("_minecraft._tcp."),
        "web" => Some("_web._tcp."),
        "tcp" => Some("_tcp."),
        _ => None,
    }
}

/// What happened to the file after loading
#[derive(Debug)]
pub enum WriteBack {
    /// File already in normal form
    Unchanged,
    /// File rewritten with defaults filled in
    Rewritten,
    /// Rewrite failed; the loaded config is still used
    Failed(anyhow::Error),
}

impl Config {
    /// Parse configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration and write it back in normal form
    ///
    /// The file is rewritten only when its text differs from the normalised
    /// serialisation, so defaults become visible to the user. A failed
    /// rewrite is reported in the returned [`WriteBack`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_normalised<P: AsRef<Path>>(path: P) -> anyhow::Result<(Self, WriteBack)> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;

        if config.to_toml()? == contents {
            return Ok((config, WriteBack::Unchanged));
        }
        let write_back = match config.save(path) {
            Ok(()) => WriteBack::Rewritten,
            Err(e) => WriteBack::Failed(e),
        };
        Ok((config, write_back))
    }

    /// Serialise to TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = self.to_toml()?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Parsed local address, if configured
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn local_addr(&self) -> anyhow::Result<Option<SocketAddrV4>> {
        match &self.forward.local {
            Some(local) => parse_endpoint(local, DEFAULT_LOCAL_IP).context("invalid forward.local"),
            None => Ok(None),
        }
    }

    /// Parsed forward target, if configured
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn remote_addr(&self) -> anyhow::Result<Option<SocketAddrV4>> {
        match &self.forward.remote {
            Some(remote) => {
                parse_endpoint(remote, DEFAULT_REMOTE_IP).context("invalid forward.remote")
            }
            None => Ok(None),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.local_addr()?;
        self.remote_addr()?;

        // Validate transport
        let valid_transports = ["tcp", "udp"];
        if !valid_transports.contains(&self.forward.transport.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid transport: {}. Must be one of: {}",
                self.forward.transport,
                valid_transports.join(", ")
            );
        }

        // Validate STUN servers (must be valid host:port format)
        Self::validate_host_port(&self.stun.tcp_server, "TCP STUN server")?;
        Self::validate_host_port(&self.stun.udp_server, "UDP STUN server")?;
        if self.stun.timeout_secs == 0 || self.stun.timeout_secs > 60 {
            anyhow::bail!("STUN timeout must be between 1 and 60 seconds");
        }

        // Validate DNS provider and service
        if !dns::provider_names().any(|name| name == self.dns.provider) {
            anyhow::bail!(
                "Unsupported DNS provider: {}. Must be one of: {}",
                self.dns.provider,
                dns::provider_names().collect::<Vec<_>>().join(", ")
            );
        }
        if srv_prefix(&self.dns.service).is_none() {
            anyhow::bail!(
                "Unsupported service: {}. Must be one of: mcje, web, tcp",
                self.dns.service
            );
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Validate host:port format
    fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
        let Some((host, port_str)) = addr.rsplit_once(':') else {
            anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
        };

        let port: u16 = port_str
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;
        if port == 0 {
            anyhow::bail!("{name} '{addr}' has invalid port: 0");
        }
        if host.is_empty() {
            anyhow::bail!("{name} '{addr}' has empty hostname");
        }
        if host.contains('/') || host.contains('\\') {
            anyhow::bail!("{name} '{addr}' contains invalid characters");
        }

        Ok(())
    }
}

/// Parse an `[ip]:[port]` address
///
/// An empty string means "not set". An empty ip takes `default_ip`, an empty
/// port takes [`DEFAULT_PORT`]. The ip must be dotted IPv4.
///
/// # Errors
///
/// Returns an error for a missing or extra `:`, a malformed ip, or a port
/// outside 0-65535.
pub fn parse_endpoint(value: &str, default_ip: Ipv4Addr) -> anyhow::Result<Option<SocketAddrV4>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let Some((ip, port)) = value.split_once(':') else {
        anyhow::bail!("address '{value}' must have the form ip:port");
    };
    if port.contains(':') {
        anyhow::bail!("address '{value}' must have the form ip:port");
    }

    let ip = if ip.is_empty() {
        default_ip
    } else {
        ip.parse::<Ipv4Addr>()
            .with_context(|| format!("'{ip}' is not an IPv4 address"))?
    };
    let port = if port.is_empty() {
        DEFAULT_PORT
    } else {
        port.parse::<u16>()
            .with_context(|| format!("port '{port}' must be a number between 0 and 65535"))?
    };

    Ok(Some(SocketAddrV4::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.forward.transport, "tcp");
        assert_eq!(config.stun.tcp_server, "turn.cloud-rtc.com:80");
        assert_eq!(config.stun.udp_server, "stun.douyucdn.cn:18000");
        assert_eq!(config.stun.timeout_secs, 3);
        assert_eq!(config.dns.provider, "no_dns");
        assert_eq!(config.dns.service, "mcje");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.forward.transport = "sctp".to_string();
        assert!(config.validate().is_err());
        config.forward.transport = "UDP".to_string();
        assert!(config.validate().is_ok());

        config.dns.provider = "cloudflare".to_string();
        assert!(config.validate().is_err());
        config.dns.provider = "log".to_string();

        config.dns.service = "ftp".to_string();
        assert!(config.validate().is_err());
        config.dns.service = "web".to_string();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.forward.local = Some("1.2.3:80".to_string());
        assert!(config.validate().is_err());
        config.forward.local = Some(":8080".to_string());
        assert!(config.validate().is_ok());

        config.stun.udp_server = "stun.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let config = Config::parse(
            r#"
            [forward]
            local = ":25565"

            [dns]
            domain = "example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.forward.local.as_deref(), Some(":25565"));
        assert_eq!(config.forward.transport, "tcp");
        assert_eq!(config.dns.domain, "example.com");
        assert_eq!(config.stun, StunConfig::default());
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = Config::default();
        config.forward.remote = Some("127.0.0.1:25566".to_string());
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_load_normalised_writes_back_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[forward]\nlocal = \":25565\"\n").unwrap();

        let (config, write_back) = Config::load_normalised(&path).unwrap();
        assert!(matches!(write_back, WriteBack::Rewritten));
        assert!(fs::read_to_string(&path).unwrap().contains("turn.cloud-rtc.com:80"));

        let (again, write_back) = Config::load_normalised(&path).unwrap();
        assert!(matches!(write_back, WriteBack::Unchanged));
        assert_eq!(config, again);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::default();
        config.save(&path).unwrap();
        let (loaded, write_back) = Config::load_normalised(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(matches!(write_back, WriteBack::Unchanged));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_normalised(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        let parse = |s| parse_endpoint(s, DEFAULT_LOCAL_IP).unwrap();

        assert_eq!(parse(""), None);
        assert_eq!(parse("  "), None);
        assert_eq!(parse(":"), Some("0.0.0.0:25565".parse().unwrap()));
        assert_eq!(parse(":8080"), Some("0.0.0.0:8080".parse().unwrap()));
        assert_eq!(parse("192.168.1.2:"), Some("192.168.1.2:25565".parse().unwrap()));
        assert_eq!(parse(" 10.0.0.1:0 "), Some("10.0.0.1:0".parse().unwrap()));
        assert_eq!(
            parse_endpoint(":", DEFAULT_REMOTE_IP).unwrap(),
            Some("127.0.0.1:25565".parse().unwrap())
        );

        assert!(parse_endpoint("10.0.0.1", DEFAULT_LOCAL_IP).is_err());
        assert!(parse_endpoint("10.0.0.1:80:1", DEFAULT_LOCAL_IP).is_err());
        assert!(parse_endpoint("host:80", DEFAULT_LOCAL_IP).is_err());
        assert!(parse_endpoint("10.0.0.1:65536", DEFAULT_LOCAL_IP).is_err());
        assert!(parse_endpoint("10.0.0.1:http", DEFAULT_LOCAL_IP).is_err());
    }

    #[test]
    fn test_srv_prefix() {
        assert_eq!(srv_prefix("mcje"), Some("_minecraft._tcp."));
        assert_eq!(srv_prefix("web"), Some("_web._tcp."));
        assert_eq!(srv_prefix("tcp"), Some("_tcp."));
        assert_eq!(srv_prefix("udp"), None);
    }
}
