use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use meter_log::LogConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {name})", self.kind),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Raised for malformed values that have no parse error of their own.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidValue(String);

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }

    /// Serializes the configuration object to YAML.
    fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The address of the HTTP listener.
    pub http_addr: Option<String>,
    /// The address of the gRPC listener.
    pub grpc_addr: Option<String>,
    /// The CIDR from which agents are accepted.
    pub trusted_subnet: Option<String>,
    /// The path of the snapshot file.
    pub file_path: Option<String>,
    /// Seconds between snapshot dumps, `0` for synchronous dumps.
    pub store_interval: Option<String>,
    /// Whether to restore the snapshot on startup.
    pub restore: Option<String>,
    /// The database connection string.
    pub database_dsn: Option<String>,
    /// The shared signing secret.
    pub key: Option<String>,
    /// The path to the PEM encoded RSA key.
    pub crypto_key: Option<String>,
    /// The collector address the agent reports to.
    pub address: Option<String>,
    /// The agent transport, `http` or `grpc`.
    pub transport: Option<String>,
    /// Seconds between two reports of the agent.
    pub report_interval: Option<String>,
    /// Seconds between two samples of the agent.
    pub poll_interval: Option<String>,
    /// The number of concurrent delivery workers.
    pub rate_limit: Option<String>,
    /// Whether the agent sends batches.
    pub batch: Option<String>,
}

/// Collector listener configuration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Server {
    /// The address of the HTTP listener.
    http_addr: SocketAddr,
    /// The address of the gRPC listener, disabled if not set.
    grpc_addr: Option<SocketAddr>,
    /// Requests from outside this network are rejected.
    trusted_subnet: Option<IpNetwork>,
    /// Seconds to wait for in-flight requests on shutdown.
    shutdown_timeout: u64,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            grpc_addr: None,
            trusted_subnet: None,
            shutdown_timeout: 10,
        }
    }
}

/// Storage backend configuration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Storage {
    /// The snapshot file of the file backend.
    file_path: Option<PathBuf>,
    /// Seconds between snapshot dumps, `0` dumps after every write.
    store_interval: u64,
    /// Load the snapshot file on startup.
    restore: bool,
    /// Connection string of the relational backend. Takes precedence over `file_path`.
    database_dsn: Option<String>,
    /// Maximum number of database connections.
    max_connections: u32,
}

impl Default for Storage {
    fn default() -> Self {
        Storage {
            file_path: None,
            store_interval: 300,
            restore: true,
            database_dsn: None,
            max_connections: 10,
        }
    }
}

/// Signing and encryption configuration.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct Auth {
    /// The shared HMAC secret. Signing is disabled when empty.
    key: Option<String>,
    /// The PEM encoded RSA key: private on the collector, public on the agent.
    crypto_key: Option<PathBuf>,
}

/// The protocol used by the agent to deliver metrics.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON over HTTP.
    #[default]
    Http,
    /// Protobuf over gRPC.
    Grpc,
}

impl FromStr for TransportKind {
    type Err = InvalidTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "grpc" => Ok(Self::Grpc),
            other => Err(InvalidTransport(other.to_owned())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Grpc => f.write_str("grpc"),
        }
    }
}

/// Raised when parsing an unknown [`TransportKind`].
#[derive(Debug, thiserror::Error)]
#[error("unknown transport {0:?}, expected http or grpc")]
pub struct InvalidTransport(String);

/// Agent configuration.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Agent {
    /// Base URL of the collector.
    address: String,
    /// The delivery protocol.
    transport: TransportKind,
    /// Send all metrics of a report in one request.
    batch: bool,
    /// Seconds between two samples.
    poll_interval: u64,
    /// Seconds between two reports.
    report_interval: u64,
    /// Number of concurrent delivery workers.
    rate_limit: usize,
    /// Request timeout in seconds.
    timeout: u64,
}

impl Default for Agent {
    fn default() -> Self {
        Agent {
            address: "http://127.0.0.1:8080".to_owned(),
            transport: TransportKind::Http,
            batch: true,
            poll_interval: 2,
            report_interval: 10,
            rate_limit: 1,
            timeout: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigValues {
    server: Server,
    storage: Storage,
    auth: Auth,
    agent: Agent,
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Adds a scheme to bare `host:port` addresses.
fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Config struct.
#[derive(Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let mut values = ConfigValues::load(&path)?;
        values.agent.address = normalize_address(&values.agent.address);

        Ok(Config { values, path })
    }

    /// Loads the config from the given folder if it contains a config file, otherwise returns
    /// the defaults.
    pub fn from_path_or_default<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        if Self::config_exists(&path) {
            Self::from_path(path)
        } else {
            Ok(Config {
                path: path.as_ref().to_path_buf(),
                ..Default::default()
            })
        }
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let mut values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values.agent.address = normalize_address(&values.agent.address);

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let server = &mut self.values.server;

        if let Some(addr) = overrides.http_addr {
            server.http_addr = addr
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_addr"))?;
        }

        if let Some(addr) = overrides.grpc_addr {
            server.grpc_addr = match addr.as_str() {
                "" => None,
                addr => Some(
                    addr.parse()
                        .map_err(|err| ConfigError::for_field(err, "grpc_addr"))?,
                ),
            };
        }

        if let Some(subnet) = overrides.trusted_subnet {
            server.trusted_subnet = match subnet.as_str() {
                "" => None,
                subnet => Some(
                    subnet
                        .parse()
                        .map_err(|err| ConfigError::for_field(err, "trusted_subnet"))?,
                ),
            };
        }

        let storage = &mut self.values.storage;

        if let Some(path) = overrides.file_path {
            storage.file_path = Some(path).filter(|p| !p.is_empty()).map(PathBuf::from);
        }

        if let Some(interval) = overrides.store_interval {
            storage.store_interval = interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "store_interval"))?;
        }

        if let Some(restore) = overrides.restore {
            storage.restore = parse_bool(&restore).ok_or_else(|| {
                ConfigError::for_field(InvalidValue(format!("not a boolean: {restore}")), "restore")
            })?;
        }

        if let Some(dsn) = overrides.database_dsn {
            storage.database_dsn = Some(dsn).filter(|d| !d.is_empty());
        }

        let auth = &mut self.values.auth;

        if let Some(key) = overrides.key {
            auth.key = Some(key);
        }

        if let Some(path) = overrides.crypto_key {
            auth.crypto_key = Some(path).filter(|p| !p.is_empty()).map(PathBuf::from);
        }

        let agent = &mut self.values.agent;

        if let Some(address) = overrides.address {
            agent.address = normalize_address(&address);
        }

        if let Some(transport) = overrides.transport {
            agent.transport = transport
                .parse()
                .map_err(|err| ConfigError::for_field(err, "transport"))?;
        }

        if let Some(batch) = overrides.batch {
            agent.batch = parse_bool(&batch).ok_or_else(|| {
                ConfigError::for_field(InvalidValue(format!("not a boolean: {batch}")), "batch")
            })?;
        }

        if let Some(interval) = overrides.report_interval {
            agent.report_interval = interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "report_interval"))?;
        }

        if let Some(interval) = overrides.poll_interval {
            agent.poll_interval = interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "poll_interval"))?;
        }

        if let Some(limit) = overrides.rate_limit {
            agent.rate_limit = limit
                .parse()
                .map_err(|err| ConfigError::for_field(err, "rate_limit"))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Rejects combinations of values that cannot work.
    fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.values.agent;

        if agent.poll_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("poll_interval"));
        }

        if agent.report_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("report_interval"));
        }

        Ok(())
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the folder the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps the effective configuration as YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        self.values.to_yaml()
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.values.server.http_addr
    }

    /// Returns the address of the gRPC listener, if enabled.
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.values.server.grpc_addr
    }

    /// Returns the network agents must report from, if restricted.
    pub fn trusted_subnet(&self) -> Option<IpNetwork> {
        self.values.server.trusted_subnet
    }

    /// Returns how long to wait for in-flight requests on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.server.shutdown_timeout)
    }

    /// Returns the path of the snapshot file, if the file backend is configured.
    pub fn file_storage_path(&self) -> Option<&Path> {
        self.values.storage.file_path.as_deref()
    }

    /// Returns the interval between snapshot dumps. Zero means synchronous dumps.
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.values.storage.store_interval)
    }

    /// Returns `true` if the snapshot should be loaded on startup.
    pub fn restore(&self) -> bool {
        self.values.storage.restore
    }

    /// Returns the database connection string, if the relational backend is configured.
    pub fn database_dsn(&self) -> Option<&str> {
        self.values.storage.database_dsn.as_deref()
    }

    /// Returns the maximum size of the database pool.
    pub fn database_max_connections(&self) -> u32 {
        self.values.storage.max_connections.max(1)
    }

    /// Returns the shared signing secret. An empty secret disables signing.
    pub fn signing_key(&self) -> Option<&str> {
        self.values.auth.key.as_deref().filter(|k| !k.is_empty())
    }

    /// Returns the path of the PEM encoded RSA key.
    pub fn crypto_key_path(&self) -> Option<&Path> {
        self.values.auth.crypto_key.as_deref()
    }

    /// Returns the base URL of the collector, always with a scheme.
    pub fn collector_address(&self) -> &str {
        &self.values.agent.address
    }

    /// Returns the delivery protocol of the agent.
    pub fn transport(&self) -> TransportKind {
        self.values.agent.transport
    }

    /// Returns `true` if the agent delivers a whole report in one request.
    pub fn batch(&self) -> bool {
        self.values.agent.batch
    }

    /// Returns the interval between two samples.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.poll_interval)
    }

    /// Returns the interval between two reports.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.report_interval)
    }

    /// Returns the number of concurrent delivery workers, at least one.
    pub fn rate_limit(&self) -> usize {
        self.values.agent.rate_limit.max(1)
    }

    /// Returns the timeout of outgoing requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.values.agent.timeout)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.http_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.grpc_addr(), None);
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert!(config.restore());
        assert_eq!(config.signing_key(), None);
        assert_eq!(config.collector_address(), "http://127.0.0.1:8080");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.rate_limit(), 1);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yml"),
            r###"
server:
  http_addr: 0.0.0.0:9090
  trusted_subnet: 10.0.0.0/8
storage:
  file_path: /tmp/metrics.json
  store_interval: 0
agent:
  address: collector:9090
  transport: grpc
  rate_limit: 4
logging:
  level: debug
"###,
        )
        .unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.http_addr(), "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.trusted_subnet(), Some("10.0.0.0/8".parse().unwrap()));
        assert_eq!(config.file_storage_path(), Some(Path::new("/tmp/metrics.json")));
        assert_eq!(config.store_interval(), Duration::ZERO);
        assert_eq!(config.collector_address(), "http://collector:9090");
        assert_eq!(config.transport(), TransportKind::Grpc);
        assert_eq!(config.rate_limit(), 4);
        assert_eq!(config.logging().level, meter_log::Level::Debug);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);

        let config = Config::from_path_or_default(dir.path()).unwrap();
        assert_eq!(config.path(), dir.path());
    }

    #[test]
    fn test_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yml"), "server: [").unwrap();
        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.to_string().starts_with("could not parse yaml config file (file "));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                http_addr: Some("0.0.0.0:8081".to_owned()),
                store_interval: Some("0".to_owned()),
                restore: Some("false".to_owned()),
                database_dsn: Some("sqlite://metrics.db".to_owned()),
                key: Some("secret".to_owned()),
                address: Some("localhost:8081".to_owned()),
                transport: Some("grpc".to_owned()),
                batch: Some("0".to_owned()),
                rate_limit: Some("3".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.http_addr(), "0.0.0.0:8081".parse().unwrap());
        assert_eq!(config.store_interval(), Duration::ZERO);
        assert!(!config.restore());
        assert_eq!(config.database_dsn(), Some("sqlite://metrics.db"));
        assert_eq!(config.signing_key(), Some("secret"));
        assert_eq!(config.collector_address(), "http://localhost:8081");
        assert_eq!(config.transport(), TransportKind::Grpc);
        assert!(!config.batch());
        assert_eq!(config.rate_limit(), 3);
    }

    #[test]
    fn test_empty_overrides_disable() {
        let mut config = Config::from_json_value(serde_json::json!({
            "auth": {"key": "secret", "crypto_key": "/etc/meter/private.pem"},
            "storage": {"database_dsn": "sqlite://metrics.db"},
        }))
        .unwrap();

        config
            .apply_override(OverridableConfig {
                key: Some(String::new()),
                crypto_key: Some(String::new()),
                database_dsn: Some(String::new()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.signing_key(), None);
        assert_eq!(config.crypto_key_path(), None);
        assert_eq!(config.database_dsn(), None);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                trusted_subnet: Some("10.0.0.0/33".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field trusted_subnet)");
        assert!(error.source().is_some());

        let error = config
            .apply_override(OverridableConfig {
                transport: Some("carrier-pigeon".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field transport)");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                poll_interval: Some("0".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field poll_interval)");
    }

    #[test]
    fn test_yaml_dump() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                grpc_addr: Some("127.0.0.1:3200".to_owned()),
                report_interval: Some("30".to_owned()),
                ..Default::default()
            })
            .unwrap();

        let yaml = config.to_yaml_string().unwrap();
        let values: ConfigValues = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(values.server.grpc_addr, Some("127.0.0.1:3200".parse().unwrap()));
        assert_eq!(values.agent.report_interval, 30);
        assert_eq!(values.storage.store_interval, 300);
    }
}
