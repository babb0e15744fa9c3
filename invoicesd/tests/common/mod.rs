#![allow(unused)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::secp256k1::SecretKey;

use invoices::{BlockHeight, CircuitKey, InvoiceRequest, PaymentAddr, PaymentHash};
use invoicesd::{Config, HtlcArrival, InvoiceService};
use invoicesd::store::{InvoiceStore, MemoryStore};

pub const NODE_KEY: [u8; 32] = [3; 32];
pub const VAULT_SEED: [u8; 32] = [4; 32];

pub const CURRENT_HEIGHT: BlockHeight = 100;

pub fn config() -> Config {
	let mut cfg = Config::default();
	cfg.subscriber_buffer_size = 64;
	cfg.htlc_modifier.timeout = Duration::from_secs(30);
	cfg
}

pub fn service_with(cfg: &Config, store: Arc<dyn InvoiceStore>) -> Arc<InvoiceService> {
	let key = SecretKey::from_slice(&NODE_KEY).unwrap();
	Arc::new(InvoiceService::new(cfg, store, key, VAULT_SEED).unwrap())
}

pub fn service() -> Arc<InvoiceService> {
	service_with(&config(), Arc::new(MemoryStore::new()))
}

pub fn request(value_msat: u64) -> InvoiceRequest {
	InvoiceRequest {
		memo: "integration".into(),
		value_msat,
		..Default::default()
	}
}

pub fn htlc(
	payment_hash: PaymentHash,
	payment_addr: PaymentAddr,
	htlc_id: u64,
	amt_msat: u64,
) -> HtlcArrival {
	HtlcArrival {
		payment_hash,
		circuit_key: CircuitKey::new(7, htlc_id),
		amt_msat,
		expiry_height: CURRENT_HEIGHT + 400,
		current_height: CURRENT_HEIGHT,
		payment_addr: Some(payment_addr),
		set_id: None,
		custom_records: BTreeMap::new(),
	}
}
