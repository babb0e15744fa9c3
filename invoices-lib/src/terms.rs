//! Validated invoice terms and their BOLT-11 encoding.

use std::str::FromStr;
use std::time::Duration;

use bitcoin::{Address, Network};
use bitcoin::address::AddressData;
use bitcoin::hashes::sha256;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use chrono::{DateTime, Utc};
use lightning_invoice::{Currency, Fallback, InvoiceBuilder, PaymentSecret, RoutingFees};

use crate::{
	InvoiceError, PaymentAddr, PaymentHash, DEFAULT_CLTV_EXPIRY, DEFAULT_INVOICE_EXPIRY_SECS,
	MAX_MEMO_SIZE,
};


/// One hop of a private route towards the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHintHop {
	pub node_id: PublicKey,
	pub chan_id: u64,
	pub fee_base_msat: u32,
	pub fee_proportional_millionths: u32,
	pub cltv_expiry_delta: u16,
}

/// A private route, the hops are ordered from the payer side towards us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHint {
	pub hops: Vec<RouteHintHop>,
}

impl From<&RouteHint> for lightning_invoice::RouteHint {
	fn from(hint: &RouteHint) -> Self {
		lightning_invoice::RouteHint(hint.hops.iter().map(|hop| {
			lightning_invoice::RouteHintHop {
				src_node_id: hop.node_id,
				short_channel_id: hop.chan_id,
				fees: RoutingFees {
					base_msat: hop.fee_base_msat,
					proportional_millionths: hop.fee_proportional_millionths,
				},
				cltv_expiry_delta: hop.cltv_expiry_delta,
				htlc_minimum_msat: None,
				htlc_maximum_msat: None,
			}
		}).collect())
	}
}

/// The parameters a caller provides to create an invoice.
///
/// Zero values for `expiry` and `cltv_expiry` select the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
	pub memo: String,
	/// Amount in satoshis, mutually exclusive with `value_msat`.
	pub value: u64,
	/// Amount in millisatoshis, mutually exclusive with `value`.
	pub value_msat: u64,
	pub description_hash: Option<sha256::Hash>,
	/// Expiry in seconds.
	pub expiry: u64,
	pub fallback_addr: Option<String>,
	pub cltv_expiry: u32,
	pub route_hints: Vec<RouteHint>,
	pub private: bool,
}

/// The immutable terms of an invoice.
///
/// Can only be constructed through [InvoiceTerms::from_request], so every
/// instance has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct InvoiceTerms {
	pub payment_hash: PaymentHash,
	pub payment_addr: PaymentAddr,
	pub value_msat: u64,
	pub memo: String,
	pub description_hash: Option<sha256::Hash>,
	/// Expiry in seconds.
	pub expiry: u64,
	pub cltv_expiry: u32,
	pub fallback_addr: Option<String>,
	pub route_hints: Vec<RouteHint>,
	pub private: bool,
	/// Hold invoices are not settled automatically when accepted.
	pub is_hold: bool,
}

impl InvoiceTerms {
	pub fn from_request(
		req: InvoiceRequest,
		payment_hash: PaymentHash,
		payment_addr: PaymentAddr,
		network: Network,
		is_hold: bool,
	) -> Result<InvoiceTerms, InvoiceError> {
		let value_msat = match (req.value, req.value_msat) {
			(0, 0) => return Err(InvoiceError::invalid_request("invoice amount must be non-zero")),
			(sat, 0) => sat.checked_mul(1000)
				.ok_or_else(|| InvoiceError::invalid_request("invoice amount overflows"))?,
			(0, msat) => msat,
			(_, _) => return Err(InvoiceError::MutuallyExclusiveAmountFields),
		};

		if req.memo.len() > MAX_MEMO_SIZE {
			return Err(InvoiceError::invalid_request(format_args!(
				"memo too large: {} bytes, max {}", req.memo.len(), MAX_MEMO_SIZE,
			)));
		}

		if let Some(ref addr) = req.fallback_addr {
			parse_fallback_addr(addr, network)?;
		}

		for hint in &req.route_hints {
			if hint.hops.is_empty() {
				return Err(InvoiceError::invalid_request("route hint without hops"));
			}
		}

		Ok(InvoiceTerms {
			payment_hash,
			payment_addr,
			value_msat,
			memo: req.memo,
			description_hash: req.description_hash,
			expiry: if req.expiry == 0 { DEFAULT_INVOICE_EXPIRY_SECS } else { req.expiry },
			cltv_expiry: if req.cltv_expiry == 0 { DEFAULT_CLTV_EXPIRY } else { req.cltv_expiry },
			fallback_addr: req.fallback_addr,
			route_hints: req.route_hints,
			private: req.private,
			is_hold,
		})
	}

	/// The moment after which the invoice can no longer be paid.
	pub fn expires_at(&self, creation_date: DateTime<Utc>) -> DateTime<Utc> {
		let expiry = chrono::Duration::seconds(self.expiry.min(i64::MAX as u64) as i64);
		creation_date.checked_add_signed(expiry).unwrap_or(DateTime::<Utc>::MAX_UTC)
	}

	/// Encode these terms as a BOLT-11 payment request signed with `key`.
	///
	/// When a description hash is present it takes precedence over the memo.
	pub fn payment_request(
		&self,
		network: Network,
		creation_date: DateTime<Utc>,
		key: &SecretKey,
	) -> Result<String, InvoiceError> {
		let secp = Secp256k1::signing_only();
		let timestamp = Duration::from_secs(u64::try_from(creation_date.timestamp()).unwrap_or(0));
		let fallback = match self.fallback_addr {
			Some(ref addr) => fallback_for(&parse_fallback_addr(addr, network)?),
			None => None,
		};

		// The builder is typed by whether a description was set, so both
		// branches have to be completed separately.
		macro_rules! finish {
			($builder:expr) => {{
				let mut builder = $builder
					.payment_hash(self.payment_hash.to_sha256_hash())
					.payment_secret(PaymentSecret(self.payment_addr.to_byte_array()))
					.duration_since_epoch(timestamp)
					.min_final_cltv_expiry_delta(self.cltv_expiry as u64)
					.expiry_time(Duration::from_secs(self.expiry))
					.basic_mpp();
				if self.value_msat > 0 {
					builder = builder.amount_milli_satoshis(self.value_msat);
				}
				for hint in &self.route_hints {
					builder = builder.private_route(hint.into());
				}
				if let Some(fallback) = fallback {
					builder = builder.fallback(fallback);
				}
				builder.build_signed(|msg| secp.sign_ecdsa_recoverable(msg, key))
			}};
		}

		let builder = InvoiceBuilder::new(Currency::from(network));
		let invoice = match self.description_hash {
			Some(hash) => finish!(builder.description_hash(hash)),
			None => finish!(builder.description(self.memo.clone())),
		}.map_err(|e| InvoiceError::invalid_request(format_args!("cannot encode invoice: {}", e)))?;

		Ok(invoice.to_string())
	}
}

fn parse_fallback_addr(addr: &str, network: Network) -> Result<Address, InvoiceError> {
	Address::from_str(addr)
		.map_err(|e| InvoiceError::invalid_request(format_args!("invalid fallback address: {}", e)))?
		.require_network(network)
		.map_err(|e| InvoiceError::invalid_request(format_args!("invalid fallback address: {}", e)))
}

fn fallback_for(addr: &Address) -> Option<Fallback> {
	match addr.to_address_data() {
		AddressData::P2pkh { pubkey_hash } => Some(Fallback::PubKeyHash(pubkey_hash)),
		AddressData::P2sh { script_hash } => Some(Fallback::ScriptHash(script_hash)),
		AddressData::Segwit { witness_program } => Some(Fallback::SegWitProgram {
			version: witness_program.version(),
			program: witness_program.program().as_bytes().to_vec(),
		}),
		_ => None,
	}
}

#[cfg(test)]
mod test {
	use super::*;

	use bitcoin::hashes::Hash;
	use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};

	use crate::Preimage;

	const REGTEST_P2WPKH: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

	fn request(value_msat: u64) -> InvoiceRequest {
		InvoiceRequest {
			memo: "coffee".into(),
			value_msat,
			..Default::default()
		}
	}

	fn terms(req: InvoiceRequest) -> Result<InvoiceTerms, InvoiceError> {
		let hash = Preimage::from([3; 32]).compute_payment_hash();
		InvoiceTerms::from_request(req, hash, PaymentAddr::from([4; 32]), Network::Regtest, true)
	}

	#[test]
	fn amount_fields() {
		assert_eq!(terms(request(1000)).unwrap().value_msat, 1000);

		let req = InvoiceRequest { value: 5, ..Default::default() };
		assert_eq!(terms(req).unwrap().value_msat, 5000);

		let req = InvoiceRequest { value: 5, value_msat: 5000, ..Default::default() };
		assert!(matches!(terms(req), Err(InvoiceError::MutuallyExclusiveAmountFields)));

		assert!(matches!(terms(request(0)), Err(InvoiceError::InvalidInvoiceRequest(_))));

		let req = InvoiceRequest { value: u64::MAX, ..Default::default() };
		assert!(matches!(terms(req), Err(InvoiceError::InvalidInvoiceRequest(_))));
	}

	#[test]
	fn defaults_and_limits() {
		let t = terms(request(1000)).unwrap();
		assert_eq!(t.expiry, DEFAULT_INVOICE_EXPIRY_SECS);
		assert_eq!(t.cltv_expiry, DEFAULT_CLTV_EXPIRY);

		let req = InvoiceRequest { expiry: 60, cltv_expiry: 40, ..request(1000) };
		let t = terms(req).unwrap();
		assert_eq!(t.expiry, 60);
		assert_eq!(t.cltv_expiry, 40);

		let req = InvoiceRequest { memo: "x".repeat(MAX_MEMO_SIZE + 1), ..request(1000) };
		assert!(matches!(terms(req), Err(InvoiceError::InvalidInvoiceRequest(_))));

		let req = InvoiceRequest { route_hints: vec![RouteHint { hops: vec![] }], ..request(1000) };
		assert!(matches!(terms(req), Err(InvoiceError::InvalidInvoiceRequest(_))));
	}

	#[test]
	fn fallback_address_network() {
		let req = InvoiceRequest { fallback_addr: Some(REGTEST_P2WPKH.into()), ..request(1000) };
		assert!(terms(req).is_ok());

		let mainnet = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
		let req = InvoiceRequest { fallback_addr: Some(mainnet.into()), ..request(1000) };
		assert!(matches!(terms(req), Err(InvoiceError::InvalidInvoiceRequest(_))));

		let req = InvoiceRequest { fallback_addr: Some("nope".into()), ..request(1000) };
		assert!(matches!(terms(req), Err(InvoiceError::InvalidInvoiceRequest(_))));
	}

	#[test]
	fn encode_payment_request() {
		let key = SecretKey::from_slice(&[0xab; 32]).unwrap();
		let hop = RouteHintHop {
			node_id: PublicKey::from_secret_key(&Secp256k1::new(), &SecretKey::from_slice(&[1; 32]).unwrap()),
			chan_id: 42,
			fee_base_msat: 1,
			fee_proportional_millionths: 10,
			cltv_expiry_delta: 40,
		};
		let req = InvoiceRequest {
			expiry: 3600,
			fallback_addr: Some(REGTEST_P2WPKH.into()),
			route_hints: vec![RouteHint { hops: vec![hop] }],
			..request(21_000)
		};
		let t = terms(req).unwrap();
		let created = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

		let pr = t.payment_request(Network::Regtest, created, &key).unwrap();
		assert!(pr.starts_with("lnbcrt"));

		let invoice = Bolt11Invoice::from_str(&pr).unwrap();
		assert_eq!(PaymentHash::from(*invoice.payment_hash()), t.payment_hash);
		assert_eq!(invoice.payment_secret().0, t.payment_addr.to_byte_array());
		assert_eq!(invoice.amount_milli_satoshis(), Some(21_000));
		assert_eq!(invoice.expiry_time(), Duration::from_secs(3600));
		assert_eq!(invoice.min_final_cltv_expiry_delta(), DEFAULT_CLTV_EXPIRY as u64);
		assert_eq!(invoice.duration_since_epoch(), Duration::from_secs(1_700_000_000));
		assert_eq!(invoice.fallbacks().len(), 1);
		assert_eq!(invoice.route_hints().len(), 1);
		assert_eq!(invoice.route_hints()[0].0[0].short_channel_id, 42);
		assert_eq!(
			invoice.recover_payee_pub_key(),
			PublicKey::from_secret_key(&Secp256k1::new(), &key),
		);
	}

	#[test]
	fn description_hash_takes_precedence() {
		let key = SecretKey::from_slice(&[0xab; 32]).unwrap();
		let desc = sha256::Hash::hash(b"a long description");
		let req = InvoiceRequest { description_hash: Some(desc), ..request(1000) };
		let t = terms(req).unwrap();
		let pr = t.payment_request(Network::Regtest, Utc::now(), &key).unwrap();

		let invoice = Bolt11Invoice::from_str(&pr).unwrap();
		match invoice.description() {
			Bolt11InvoiceDescription::Hash(h) => assert_eq!(h.0, desc),
			Bolt11InvoiceDescription::Direct(_) => panic!("expected hash"),
		}
	}
}
