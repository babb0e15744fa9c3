//! Messages exchanged with an HTLC modifier client.

use std::collections::BTreeMap;

use crate::{BlockHeight, CircuitKey, Invoice};


/// Sent to the modifier client for every HTLC paying to a known invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcModifyRequest {
	/// The invoice as it was when the HTLC arrived.
	pub invoice: Invoice,
	pub exit_htlc_circuit_key: CircuitKey,
	pub exit_htlc_amt_msat: u64,
	pub exit_htlc_expiry: BlockHeight,
	pub current_height: BlockHeight,
	pub exit_htlc_wire_custom_records: BTreeMap<u64, Vec<u8>>,
}

/// The modifier client's verdict on a single HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcModifyResponse {
	pub circuit_key: CircuitKey,
	/// Overrides the amount credited to the invoice.
	pub amt_paid_msat: Option<u64>,
	/// Cancel this HTLC and all accepted HTLCs of the invoice.
	pub cancel_set: bool,
}

impl HtlcModifyResponse {
	/// Accept the HTLC with its own amount.
	pub fn accept(circuit_key: CircuitKey) -> HtlcModifyResponse {
		HtlcModifyResponse { circuit_key, amt_paid_msat: None, cancel_set: false }
	}

	pub fn cancel(circuit_key: CircuitKey) -> HtlcModifyResponse {
		HtlcModifyResponse { circuit_key, amt_paid_msat: None, cancel_set: true }
	}

	pub fn with_amount(circuit_key: CircuitKey, amt_paid_msat: u64) -> HtlcModifyResponse {
		HtlcModifyResponse { circuit_key, amt_paid_msat: Some(amt_paid_msat), cancel_set: false }
	}
}
