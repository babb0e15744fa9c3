//! Utilities to quickly create invoices and HTLCs in tests.
//!
//! The module is only available if the test-util feature is used.

use std::collections::BTreeMap;

use bitcoin::Network;
use chrono::DateTime;

use crate::{
	CircuitKey, HtlcState, Invoice, InvoiceHtlc, InvoiceRequest, InvoiceTerms, PaymentAddr,
	Preimage,
};
use crate::lightning::derive_preimage;

/// The preimage of all dummy invoices.
pub fn dummy_preimage() -> Preimage {
	Preimage::from([0x11; 32])
}

pub fn dummy_payment_addr() -> PaymentAddr {
	PaymentAddr::from([0x22; 32])
}

/// A hold invoice for `value_msat`, created at unix time 1_700_000_000.
///
/// The payment request is not a valid BOLT-11 string.
pub fn dummy_invoice(value_msat: u64) -> Invoice {
	let req = InvoiceRequest {
		memo: "dummy".into(),
		value_msat,
		..Default::default()
	};
	let hash = dummy_preimage().compute_payment_hash();
	let terms = InvoiceTerms::from_request(req, hash, dummy_payment_addr(), Network::Regtest, true)
		.expect("valid dummy terms");
	let created = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
	Invoice::new(terms, "lnbcrt-dummy".into(), 1, created)
}

/// Like [dummy_invoice], but with a preimage and payment address unique
/// to the given add index.
pub fn dummy_invoice_nb(add_index: u64, value_msat: u64) -> (Invoice, Preimage) {
	let nonce = add_index.to_be_bytes();
	let preimage = derive_preimage(&[0x33; 32], &nonce);
	let payment_addr = PaymentAddr::from(derive_preimage(&[0x44; 32], &nonce).to_byte_array());
	let req = InvoiceRequest {
		memo: format!("dummy {}", add_index),
		value_msat,
		..Default::default()
	};
	let terms = InvoiceTerms::from_request(
		req, preimage.compute_payment_hash(), payment_addr, Network::Regtest, true,
	).expect("valid dummy terms");
	let created = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
	(Invoice::new(terms, "lnbcrt-dummy".into(), add_index, created), preimage)
}

/// An accepted HTLC on channel 1 with the given HTLC id.
pub fn dummy_htlc(htlc_id: u64, amt_msat: u64) -> InvoiceHtlc {
	InvoiceHtlc {
		circuit_key: CircuitKey::new(1, htlc_id),
		amt_msat,
		htlc_amt_msat: amt_msat,
		expiry_height: 1000,
		accept_height: 100,
		accept_time: DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
		resolve_time: None,
		state: HtlcState::Accepted,
		custom_records: BTreeMap::new(),
		set_id: None,
	}
}
