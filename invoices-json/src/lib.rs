
pub extern crate invoices;

#[macro_use] extern crate serde;

pub mod serde_utils;

use std::collections::BTreeMap;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::PublicKey;
use chrono::{DateTime, Utc};

use invoices::{
	InvoiceError, InvoiceRef, InvoiceRequest, PaymentAddr, PaymentHash, Preimage, SetId,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupModifier {
	#[default]
	Default,
	HtlcSetOnly,
	HtlcSetBlank,
}

impl From<LookupModifier> for invoices::LookupModifier {
	fn from(v: LookupModifier) -> Self {
		match v {
			LookupModifier::Default => invoices::LookupModifier::Default,
			LookupModifier::HtlcSetOnly => invoices::LookupModifier::HtlcSetOnly,
			LookupModifier::HtlcSetBlank => invoices::LookupModifier::HtlcSetBlank,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
	Open,
	Settled,
	Canceled,
	Accepted,
}

impl From<invoices::InvoiceState> for InvoiceState {
	fn from(v: invoices::InvoiceState) -> Self {
		match v {
			invoices::InvoiceState::Open => InvoiceState::Open,
			invoices::InvoiceState::Accepted => InvoiceState::Accepted,
			invoices::InvoiceState::Settled => InvoiceState::Settled,
			invoices::InvoiceState::Canceled => InvoiceState::Canceled,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceHtlcState {
	Accepted,
	Settled,
	Canceled,
}

impl From<invoices::HtlcState> for InvoiceHtlcState {
	fn from(v: invoices::HtlcState) -> Self {
		match v {
			invoices::HtlcState::Accepted => InvoiceHtlcState::Accepted,
			invoices::HtlcState::Settled => InvoiceHtlcState::Settled,
			invoices::HtlcState::Canceled => InvoiceHtlcState::Canceled,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopHint {
	pub node_id: PublicKey,
	#[serde(with = "serde_utils::u64_string")]
	pub chan_id: u64,
	pub fee_base_msat: u32,
	pub fee_proportional_millionths: u32,
	pub cltv_expiry_delta: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHint {
	pub hop_hints: Vec<HopHint>,
}

impl From<&invoices::RouteHint> for RouteHint {
	fn from(v: &invoices::RouteHint) -> Self {
		RouteHint {
			hop_hints: v.hops.iter().map(|h| HopHint {
				node_id: h.node_id,
				chan_id: h.chan_id,
				fee_base_msat: h.fee_base_msat,
				fee_proportional_millionths: h.fee_proportional_millionths,
				cltv_expiry_delta: h.cltv_expiry_delta as u32,
			}).collect(),
		}
	}
}

impl TryFrom<RouteHint> for invoices::RouteHint {
	type Error = InvoiceError;

	fn try_from(v: RouteHint) -> Result<Self, Self::Error> {
		let hops = v.hop_hints.into_iter().map(|h| {
			Ok(invoices::RouteHintHop {
				node_id: h.node_id,
				chan_id: h.chan_id,
				fee_base_msat: h.fee_base_msat,
				fee_proportional_millionths: h.fee_proportional_millionths,
				cltv_expiry_delta: u16::try_from(h.cltv_expiry_delta).map_err(|_| {
					InvoiceError::invalid_request("route hint cltv_expiry_delta too large")
				})?,
			})
		}).collect::<Result<_, InvoiceError>>()?;
		Ok(invoices::RouteHint { hops })
	}
}

/// The invoice parameters shared by [AddInvoiceRequest] and [AddHoldInvoiceRequest].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceParams {
	pub memo: String,
	#[serde(with = "serde_utils::u64_string")]
	pub value: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub value_msat: u64,
	#[serde(with = "serde_utils::hex")]
	pub description_hash: Vec<u8>,
	#[serde(with = "serde_utils::u64_string")]
	pub expiry: u64,
	pub fallback_addr: String,
	#[serde(with = "serde_utils::u64_string")]
	pub cltv_expiry: u64,
	pub route_hints: Vec<RouteHint>,
	pub private: bool,
}

impl TryFrom<InvoiceParams> for InvoiceRequest {
	type Error = InvoiceError;

	fn try_from(v: InvoiceParams) -> Result<Self, Self::Error> {
		let description_hash = match v.description_hash.len() {
			0 => None,
			32 => Some(sha256::Hash::from_slice(&v.description_hash)
				.map_err(InvoiceError::invalid_request)?),
			_ => return Err(InvoiceError::invalid_request("description hash must be 32 bytes")),
		};
		Ok(InvoiceRequest {
			memo: v.memo,
			value: v.value,
			value_msat: v.value_msat,
			description_hash,
			expiry: v.expiry,
			fallback_addr: Some(v.fallback_addr).filter(|a| !a.is_empty()),
			cltv_expiry: u32::try_from(v.cltv_expiry)
				.map_err(|_| InvoiceError::invalid_request("cltv_expiry too large"))?,
			route_hints: v.route_hints.into_iter()
				.map(TryFrom::try_from)
				.collect::<Result<_, _>>()?,
			private: v.private,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHoldInvoiceRequest {
	pub hash: PaymentHash,
	#[serde(flatten)]
	pub params: InvoiceParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHoldInvoiceResp {
	pub payment_request: String,
	#[serde(with = "serde_utils::u64_string")]
	pub add_index: u64,
	pub payment_addr: PaymentAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInvoiceRequest {
	#[serde(flatten)]
	pub params: InvoiceParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInvoiceResp {
	pub r_hash: PaymentHash,
	pub payment_request: String,
	#[serde(with = "serde_utils::u64_string")]
	pub add_index: u64,
	pub payment_addr: PaymentAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleInvoiceMsg {
	pub preimage: Preimage,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettleInvoiceResp {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvoiceMsg {
	pub payment_hash: PaymentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CancelInvoiceResp {}

/// Exactly one of the references must be set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupInvoiceMsg {
	pub payment_hash: Option<PaymentHash>,
	pub payment_addr: Option<PaymentAddr>,
	pub set_id: Option<SetId>,
	pub lookup_modifier: LookupModifier,
}

impl LookupInvoiceMsg {
	pub fn invoice_ref(&self) -> Result<InvoiceRef, InvoiceError> {
		match (self.payment_hash, self.payment_addr, self.set_id) {
			(Some(h), None, None) => Ok(InvoiceRef::PaymentHash(h)),
			(None, Some(a), None) => Ok(InvoiceRef::PaymentAddr(a)),
			(None, None, Some(s)) => Ok(InvoiceRef::SetId(s)),
			(None, None, None) => Err(InvoiceError::InvalidLookup("no invoice reference given")),
			_ => Err(InvoiceError::InvalidLookup("only one invoice reference can be given")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeSingleInvoiceRequest {
	pub r_hash: PaymentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribeInvoicesRequest {
	#[serde(with = "serde_utils::u64_string")]
	pub add_index: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub settle_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitKey {
	#[serde(with = "serde_utils::u64_string")]
	pub chan_id: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub htlc_id: u64,
}

impl From<invoices::CircuitKey> for CircuitKey {
	fn from(v: invoices::CircuitKey) -> Self {
		CircuitKey { chan_id: v.chan_id, htlc_id: v.htlc_id }
	}
}

impl From<CircuitKey> for invoices::CircuitKey {
	fn from(v: CircuitKey) -> Self {
		invoices::CircuitKey::new(v.chan_id, v.htlc_id)
	}
}

fn unix_secs(t: DateTime<Utc>) -> u64 {
	u64::try_from(t.timestamp()).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHtlc {
	#[serde(with = "serde_utils::u64_string")]
	pub chan_id: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub htlc_id: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub amt_msat: u64,
	pub accept_height: u32,
	#[serde(with = "serde_utils::u64_string")]
	pub accept_time: u64,
	/// Zero while unresolved.
	#[serde(with = "serde_utils::u64_string")]
	pub resolve_time: u64,
	pub expiry_height: u32,
	pub state: InvoiceHtlcState,
	#[serde(with = "serde_utils::hex::records")]
	pub custom_records: BTreeMap<u64, Vec<u8>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub set_id: Option<SetId>,
}

impl From<&invoices::InvoiceHtlc> for InvoiceHtlc {
	fn from(v: &invoices::InvoiceHtlc) -> Self {
		InvoiceHtlc {
			chan_id: v.circuit_key.chan_id,
			htlc_id: v.circuit_key.htlc_id,
			amt_msat: v.amt_msat,
			accept_height: v.accept_height,
			accept_time: unix_secs(v.accept_time),
			resolve_time: v.resolve_time.map(unix_secs).unwrap_or(0),
			expiry_height: v.expiry_height,
			state: v.state.into(),
			custom_records: v.custom_records.clone(),
			set_id: v.set_id,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
	pub memo: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub r_preimage: Option<Preimage>,
	pub r_hash: PaymentHash,
	#[serde(with = "serde_utils::u64_string")]
	pub value: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub value_msat: u64,
	pub settled: bool,
	#[serde(with = "serde_utils::u64_string")]
	pub creation_date: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub settle_date: u64,
	pub payment_request: String,
	#[serde(with = "serde_utils::hex")]
	pub description_hash: Vec<u8>,
	#[serde(with = "serde_utils::u64_string")]
	pub expiry: u64,
	pub fallback_addr: String,
	#[serde(with = "serde_utils::u64_string")]
	pub cltv_expiry: u64,
	pub route_hints: Vec<RouteHint>,
	pub private: bool,
	#[serde(with = "serde_utils::u64_string")]
	pub add_index: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub settle_index: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub amt_paid_sat: u64,
	#[serde(with = "serde_utils::u64_string")]
	pub amt_paid_msat: u64,
	pub state: InvoiceState,
	pub htlcs: Vec<InvoiceHtlc>,
	pub payment_addr: PaymentAddr,
	pub is_hold: bool,
}

impl From<&invoices::Invoice> for Invoice {
	fn from(v: &invoices::Invoice) -> Self {
		let terms = v.terms();
		Invoice {
			memo: terms.memo.clone(),
			r_preimage: v.preimage(),
			r_hash: v.payment_hash(),
			value: terms.value_msat / 1000,
			value_msat: terms.value_msat,
			settled: v.state() == invoices::InvoiceState::Settled,
			creation_date: unix_secs(v.creation_date()),
			settle_date: v.settle_date().map(unix_secs).unwrap_or(0),
			payment_request: v.payment_request().to_owned(),
			description_hash: terms.description_hash
				.map(|h| h.to_byte_array().to_vec())
				.unwrap_or_default(),
			expiry: terms.expiry,
			fallback_addr: terms.fallback_addr.clone().unwrap_or_default(),
			cltv_expiry: terms.cltv_expiry as u64,
			route_hints: terms.route_hints.iter().map(RouteHint::from).collect(),
			private: terms.private,
			add_index: v.add_index(),
			settle_index: v.settle_index(),
			amt_paid_sat: v.amt_paid_msat() / 1000,
			amt_paid_msat: v.amt_paid_msat(),
			state: v.state().into(),
			htlcs: v.htlcs().iter().map(InvoiceHtlc::from).collect(),
			payment_addr: v.payment_addr(),
			is_hold: terms.is_hold,
		}
	}
}

impl From<invoices::Invoice> for Invoice {
	fn from(v: invoices::Invoice) -> Self {
		Invoice::from(&v)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtlcModifyRequest {
	pub invoice: Invoice,
	pub exit_htlc_circuit_key: CircuitKey,
	#[serde(with = "serde_utils::u64_string")]
	pub exit_htlc_amt: u64,
	pub exit_htlc_expiry: u32,
	pub current_height: u32,
	#[serde(with = "serde_utils::hex::records")]
	pub exit_htlc_wire_custom_records: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtlcModifyResponse {
	pub circuit_key: CircuitKey,
	#[serde(default, with = "serde_utils::u64_string::opt", skip_serializing_if = "Option::is_none")]
	pub amt_paid: Option<u64>,
	#[serde(default)]
	pub cancel_set: bool,
}

impl From<&invoices::HtlcModifyRequest> for HtlcModifyRequest {
	fn from(v: &invoices::HtlcModifyRequest) -> Self {
		HtlcModifyRequest {
			invoice: Invoice::from(&v.invoice),
			exit_htlc_circuit_key: v.exit_htlc_circuit_key.into(),
			exit_htlc_amt: v.exit_htlc_amt_msat,
			exit_htlc_expiry: v.exit_htlc_expiry,
			current_height: v.current_height,
			exit_htlc_wire_custom_records: v.exit_htlc_wire_custom_records.clone(),
		}
	}
}

impl From<HtlcModifyResponse> for invoices::HtlcModifyResponse {
	fn from(v: HtlcModifyResponse) -> Self {
		invoices::HtlcModifyResponse {
			circuit_key: v.circuit_key.into(),
			amt_paid_msat: v.amt_paid,
			cancel_set: v.cancel_set,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	use invoices::test::{dummy_htlc, dummy_invoice, dummy_preimage};

	#[test]
	fn add_hold_invoice_request() {
		let json = r#"{
			"memo": "coffee",
			"hash": "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925",
			"valueMsat": "21000",
			"expiry": "3600",
			"fallbackAddr": "",
			"routeHints": [],
			"private": true
		}"#;
		let msg = serde_json::from_str::<AddHoldInvoiceRequest>(json).unwrap();
		assert_eq!(msg.hash, Preimage::from([0; 32]).compute_payment_hash());
		let req = InvoiceRequest::try_from(msg.params).unwrap();
		assert_eq!(req.memo, "coffee");
		assert_eq!(req.value, 0);
		assert_eq!(req.value_msat, 21000);
		assert_eq!(req.expiry, 3600);
		assert_eq!(req.fallback_addr, None);
		assert_eq!(req.description_hash, None);
		assert!(req.private);
	}

	#[test]
	fn invalid_description_hash() {
		let params = InvoiceParams { description_hash: vec![1; 31], ..Default::default() };
		assert!(matches!(
			InvoiceRequest::try_from(params),
			Err(InvoiceError::InvalidInvoiceRequest(_)),
		));
	}

	#[test]
	fn lookup_reference() {
		let mut msg = LookupInvoiceMsg::default();
		assert!(matches!(msg.invoice_ref(), Err(InvoiceError::InvalidLookup(_))));

		msg.payment_addr = Some(PaymentAddr::from([1; 32]));
		assert_eq!(msg.invoice_ref().unwrap(), InvoiceRef::PaymentAddr(PaymentAddr::from([1; 32])));

		msg.set_id = Some(SetId::from([2; 32]));
		assert!(matches!(msg.invoice_ref(), Err(InvoiceError::InvalidLookup(_))));

		let json = r#"{"paymentAddr":"0101010101010101010101010101010101010101010101010101010101010101","lookupModifier":"HTLC_SET_BLANK"}"#;
		let msg = serde_json::from_str::<LookupInvoiceMsg>(json).unwrap();
		assert_eq!(msg.lookup_modifier, LookupModifier::HtlcSetBlank);
		assert!(msg.invoice_ref().is_ok());
	}

	#[test]
	fn invoice_wire_format() {
		let mut inv = dummy_invoice(21_000);
		let mut htlc = dummy_htlc(5, 21_000);
		htlc.custom_records.insert(65537, vec![0xca, 0xfe]);
		inv.accept_htlc(htlc).unwrap();
		inv.settle(dummy_preimage(), Utc::now(), || 1).unwrap();

		let json = serde_json::to_value(Invoice::from(&inv)).unwrap();
		assert_eq!(json["state"], "SETTLED");
		assert_eq!(json["settled"], true);
		assert_eq!(json["valueMsat"], "21000");
		assert_eq!(json["value"], "21");
		assert_eq!(json["amtPaidMsat"], "21000");
		assert_eq!(json["settleIndex"], "1");
		assert_eq!(json["rPreimage"], dummy_preimage().to_string());
		assert_eq!(json["htlcs"][0]["htlcId"], "5");
		assert_eq!(json["htlcs"][0]["state"], "SETTLED");
		assert_eq!(json["htlcs"][0]["customRecords"]["65537"], "cafe");

		let back = serde_json::from_value::<Invoice>(json).unwrap();
		assert_eq!(back.htlcs[0].custom_records[&65537], vec![0xca, 0xfe]);
	}

	#[test]
	fn htlc_modify_response() {
		let json = r#"{"circuitKey":{"chanId":"7","htlcId":"1"},"amtPaid":"600"}"#;
		let resp = serde_json::from_str::<HtlcModifyResponse>(json).unwrap();
		assert_eq!(invoices::CircuitKey::from(resp.circuit_key), invoices::CircuitKey::new(7, 1));
		assert_eq!(resp.amt_paid, Some(600));
		assert!(!resp.cancel_set);

		let json = r#"{"circuitKey":{"chanId":7,"htlcId":2},"cancelSet":true}"#;
		let resp = serde_json::from_str::<HtlcModifyResponse>(json).unwrap();
		assert_eq!(resp.amt_paid, None);
		assert!(resp.cancel_set);

		let resp = invoices::HtlcModifyResponse::from(resp);
		assert_eq!(resp, invoices::HtlcModifyResponse::cancel(invoices::CircuitKey::new(7, 2)));
	}
}
