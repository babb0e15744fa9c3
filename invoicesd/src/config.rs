use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use config::{Environment, File};

use crate::error::SetupError;
use crate::serde_util;


/// The prefix of the environment variables that override config values.
///
/// Nested fields are separated by a double underscore,
/// for example `INVOICESD__HTLC_MODIFIER__TIMEOUT=10s`.
pub const ENV_PREFIX: &str = "INVOICESD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
	/// Invoices are lost on restart, mostly useful for testing.
	Memory,
	/// An SQLite database in the data directory.
	Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HtlcModifier {
	/// How long to wait for the modifier client to respond to a request.
	#[serde(with = "serde_util::duration")]
	pub timeout: Duration,
	/// When set, HTLCs are canceled when no modifier client is attached.
	pub required: bool,
	/// The number of requests that can be queued towards the client.
	pub queue_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub data_dir: PathBuf,
	pub network: bitcoin::Network,
	pub store: StoreKind,

	/// Number of updates buffered for each subscriber before it is
	/// considered too slow and disconnected.
	pub subscriber_buffer_size: usize,

	/// The interval at which open invoices are checked for expiry.
	#[serde(with = "serde_util::duration")]
	pub invoice_expiry_check_interval: Duration,

	/// Hold invoices are canceled when one of their HTLCs is this number
	/// of blocks away from expiring.
	pub hold_expiry_delta: u32,

	pub htlc_modifier: HtlcModifier,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			data_dir: "./invoicesd".into(),
			network: bitcoin::Network::Regtest,
			store: StoreKind::Sqlite,
			subscriber_buffer_size: 128,
			invoice_expiry_check_interval: Duration::from_secs(10),
			hold_expiry_delta: 12,
			htlc_modifier: HtlcModifier {
				timeout: Duration::from_secs(30),
				required: false,
				queue_size: 256,
			},
		}
	}
}

impl Config {
	fn load_with_custom_env(
		config_file: Option<&Path>,
		#[cfg(test)]
		custom_env: Option<std::collections::HashMap<String, String>>,
	) -> anyhow::Result<Self> {
		let default = config::Config::try_from(&Self::default())
			.context("default config failed to deconstruct")?;

		// We'll add three layers of config:
		// - the defaults defined in Config's Default impl
		// - the config file passed in this function, if any
		// - environment variables (prefixed with `INVOICESD__`)

		let mut builder = config::Config::builder()
			.add_source(default);
		if let Some(file) = config_file {
			if !file.exists() {
				return Err(SetupError::ConfigFileNotFound(file.to_path_buf()).into());
			}
			builder = builder.add_source(File::from(file));
		}

		let env = Environment::with_prefix(ENV_PREFIX)
			.separator("__");
		#[cfg(test)]
		let env = env.source(custom_env);
		builder = builder.add_source(env);

		let cfg = builder.build().context("error building config")?;
		Ok(cfg.try_deserialize().context("error parsing config")?)
	}

	pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
		Self::load_with_custom_env(config_file, #[cfg(test)] None)
	}

	/// Verifies if the specified configuration is valid.
	pub fn validate(&self) -> anyhow::Result<()> {
		if self.htlc_modifier.timeout.is_zero() {
			return invalid_config!("htlc_modifier.timeout must be positive");
		}
		if self.htlc_modifier.queue_size == 0 {
			return invalid_config!("htlc_modifier.queue_size must be at least 1");
		}
		if self.subscriber_buffer_size == 0 {
			return invalid_config!("subscriber_buffer_size must be at least 1");
		}
		if self.invoice_expiry_check_interval.is_zero() {
			return invalid_config!("invoice_expiry_check_interval must be positive");
		}
		Ok(())
	}

	/// The path of the SQLite database.
	pub fn db_path(&self) -> PathBuf {
		self.data_dir.join("invoices.sqlite")
	}

	/// Write the config into the writer.
	pub fn write_into(&self, writer: &mut dyn io::Write) -> anyhow::Result<()> {
		let s = toml::to_string_pretty(self).context("config serialization error")?;
		writer.write_all(s.as_bytes()).context("error writing config to writer")?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::collections::HashMap;
	use std::io::Write;

	use crate::error::setup_error;

	use super::*;

	#[test]
	fn default_config_is_valid() {
		let cfg = Config::load(None).unwrap();
		cfg.validate().expect("default config should be valid");
		assert_eq!(cfg.store, StoreKind::Sqlite);
		assert_eq!(cfg.htlc_modifier.timeout, Duration::from_secs(30));
	}

	#[test]
	fn validate_rejects_zero_values() {
		let mut cfg = Config::default();
		cfg.htlc_modifier.timeout = Duration::ZERO;
		let err = cfg.validate().unwrap_err();
		assert!(matches!(setup_error(&err), Some(SetupError::InvalidConfig(_))));

		let mut cfg = Config::default();
		cfg.subscriber_buffer_size = 0;
		cfg.validate().expect_err("zero buffer");

		let mut cfg = Config::default();
		cfg.htlc_modifier.queue_size = 0;
		cfg.validate().expect_err("zero queue");
	}

	#[test]
	fn config_from_env_vars() {
		let env = [
			("INVOICESD__NETWORK", "signet"),
			("INVOICESD__STORE", "memory"),
			("INVOICESD__HOLD_EXPIRY_DELTA", "42"),
			("INVOICESD__HTLC_MODIFIER__TIMEOUT", "1m 30s"),
			("INVOICESD__HTLC_MODIFIER__REQUIRED", "true"),
		].into_iter().map(|(k, v)| (k.into(), v.into())).collect::<HashMap<String, String>>();

		let cfg = Config::load_with_custom_env(None, Some(env)).unwrap();
		cfg.validate().expect("invalid configuration");

		assert_eq!(cfg.network, bitcoin::Network::Signet);
		assert_eq!(cfg.store, StoreKind::Memory);
		assert_eq!(cfg.hold_expiry_delta, 42);
		assert_eq!(cfg.htlc_modifier.timeout, Duration::from_secs(90));
		assert!(cfg.htlc_modifier.required);
		// untouched values keep their default
		assert_eq!(cfg.subscriber_buffer_size, 128);
	}

	#[test]
	fn config_file_roundtrip() {
		let mut cfg = Config::default();
		cfg.subscriber_buffer_size = 7;
		cfg.invoice_expiry_check_interval = Duration::from_secs(300);

		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		cfg.write_into(&mut file).unwrap();
		file.flush().unwrap();

		let env = HashMap::new();
		let loaded = Config::load_with_custom_env(Some(file.path()), Some(env)).unwrap();
		assert_eq!(loaded.subscriber_buffer_size, 7);
		assert_eq!(loaded.invoice_expiry_check_interval, Duration::from_secs(300));
		assert_eq!(loaded.network, cfg.network);
	}

	#[test]
	fn missing_config_file() {
		let path = Path::new("/nonexistent/invoicesd.toml");
		let err = Config::load(Some(path)).unwrap_err();
		assert_eq!(setup_error(&err), Some(&SetupError::ConfigFileNotFound(path.into())));
	}
}
