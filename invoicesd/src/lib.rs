
#[macro_use] extern crate anyhow;
#[macro_use] extern crate log;
#[macro_use] extern crate serde;
#[macro_use] extern crate invoicesd_log;

#[macro_use]
pub mod error;

pub mod config;
pub mod expiry;
pub mod hub;
pub mod interceptor;
pub mod locks;
pub mod rpc;
pub mod service;
pub mod store;
pub mod system;
pub mod vault;
mod serde_util;

pub use crate::config::Config;
pub use crate::service::{AddInvoiceResult, HtlcArrival, HtlcResolution, InvoiceService};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::secp256k1::SecretKey;

use crate::config::StoreKind;
use crate::error::SetupError;
use crate::expiry::ExpiryWatcher;
use crate::store::{InvoiceStore, MemoryStore, SqliteStore};
use crate::system::BackgroundTasks;


const NODE_KEY_FILE: &str = "node.key";
const VAULT_SEED_FILE: &str = "vault.seed";

/// Read a 32-byte hex secret from the file, creating a random one if the
/// file doesn't exist yet.
fn load_or_create_secret(path: &Path) -> anyhow::Result<[u8; 32]> {
	if path.exists() {
		let hex = fs::read_to_string(path)
			.with_context(|| format!("failed to read {}", path.display()))?;
		let bytes = <[u8; 32]>::from_hex(hex.trim())
			.map_err(|_| SetupError::InvalidSecret(path.to_path_buf()))?;
		return Ok(bytes);
	}

	let bytes = rand::random::<[u8; 32]>();
	fs::write(path, bytes.as_hex().to_string())
		.with_context(|| format!("failed to write {}", path.display()))?;
	info!("Created new secret at {}", path.display());
	Ok(bytes)
}

/// The running daemon: the invoice service and its background workers.
pub struct Daemon {
	config: Config,
	tasks: BackgroundTasks,
	service: Arc<InvoiceService>,
}

impl Daemon {
	/// Open the data directory and set up the invoice service.
	pub fn open(config: Config) -> anyhow::Result<Daemon> {
		config.validate().context("invalid configuration")?;

		let data_dir = &config.data_dir;
		if !data_dir.exists() {
			fs::create_dir_all(data_dir)
				.with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
		}

		let node_key = {
			let bytes = load_or_create_secret(&data_dir.join(NODE_KEY_FILE))?;
			SecretKey::from_slice(&bytes).context("invalid node key")?
		};
		let vault_seed = load_or_create_secret(&data_dir.join(VAULT_SEED_FILE))?;

		let store: Arc<dyn InvoiceStore> = match config.store {
			StoreKind::Memory => {
				warn!("Using in-memory invoice store, invoices will be lost on shutdown");
				Arc::new(MemoryStore::new())
			},
			StoreKind::Sqlite => Arc::new(SqliteStore::open(config.db_path())?),
		};

		let service = InvoiceService::new(&config, store, node_key, vault_seed)
			.context("failed to start invoice service")?;

		Ok(Daemon {
			config,
			tasks: BackgroundTasks::new(),
			service: Arc::new(service),
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn service(&self) -> &Arc<InvoiceService> {
		&self.service
	}

	pub fn tasks(&self) -> &BackgroundTasks {
		&self.tasks
	}

	/// Start the background tasks.
	pub fn start(&self) {
		let watcher = ExpiryWatcher::new(
			self.tasks.shutdown_token(),
			self.service.clone(),
			self.config.invoice_expiry_check_interval,
		);
		self.tasks.spawn("ExpiryWatcher", watcher.run());
		slog!(DaemonStarted, network: self.config.network.to_string(),
			node_pubkey: self.service.node_pubkey().to_string(),
		);
	}
}
