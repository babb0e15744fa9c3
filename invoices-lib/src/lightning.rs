
use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash, HashEngine};


/// A 32-byte secret preimage used for HTLC-based payments.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Preimage([u8; 32]);
impl_byte_newtype!(Preimage, 32);

impl Preimage {
	/// Generate a new random preimage.
	pub fn random() -> Preimage {
		Preimage(rand::random())
	}

	pub fn compute_payment_hash(&self) -> PaymentHash {
		PaymentHash::from_preimage(*self)
	}
}

/// The hash of a [Preimage], used to identify HTLC-based payments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct PaymentHash([u8; 32]);
impl_byte_newtype!(PaymentHash, 32);

impl From<sha256::Hash> for PaymentHash {
	fn from(hash: sha256::Hash) -> Self {
		PaymentHash(hash.to_byte_array())
	}
}

impl From<Preimage> for PaymentHash {
	fn from(preimage: Preimage) -> Self {
		PaymentHash::from_preimage(preimage)
	}
}

impl PaymentHash {
	pub fn from_preimage(preimage: Preimage) -> PaymentHash {
		sha256::Hash::hash(preimage.as_ref()).into()
	}

	/// Whether the given preimage hashes to this payment hash.
	pub fn matches(&self, preimage: &Preimage) -> bool {
		PaymentHash::from_preimage(*preimage) == *self
	}

	pub fn to_sha256_hash(&self) -> sha256::Hash {
		sha256::Hash::from_byte_array(self.0)
	}
}

/// The payment address, also called payment secret, bound to an invoice.
///
/// Payers have to include it in the onion so that intermediate nodes can't
/// probe the recipient for the invoice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct PaymentAddr([u8; 32]);
impl_byte_newtype!(PaymentAddr, 32);

impl PaymentAddr {
	pub fn random() -> PaymentAddr {
		PaymentAddr(rand::random())
	}
}

/// Identifier grouping the HTLCs of a single multi-part payment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct SetId([u8; 32]);
impl_byte_newtype!(SetId, 32);

/// Derive a preimage from a secret seed and a per-invoice nonce.
///
/// The same seed and nonce always yield the same preimage.
pub fn derive_preimage(seed: &[u8; 32], nonce: &[u8]) -> Preimage {
	let mut engine = sha256::Hash::engine();
	engine.input(b"invoices/preimage");
	engine.input(seed);
	engine.input(nonce);
	Preimage(sha256::Hash::from_engine(engine).to_byte_array())
}

/// Uniquely identifies one HTLC: the incoming channel and the index of
/// the HTLC within that channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircuitKey {
	pub chan_id: u64,
	pub htlc_id: u64,
}

impl CircuitKey {
	pub fn new(chan_id: u64, htlc_id: u64) -> CircuitKey {
		CircuitKey { chan_id, htlc_id }
	}
}

impl fmt::Display for CircuitKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.chan_id, self.htlc_id)
	}
}

impl fmt::Debug for CircuitKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid circuit key: {0}")]
pub struct CircuitKeyParseError(String);

impl FromStr for CircuitKey {
	type Err = CircuitKeyParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || CircuitKeyParseError(s.to_owned());
		let (chan, htlc) = s.split_once(':').ok_or_else(err)?;
		Ok(CircuitKey {
			chan_id: chan.parse().map_err(|_| err())?,
			htlc_id: htlc.parse().map_err(|_| err())?,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn payment_hash_from_preimage() {
		// sha256 of 32 zero bytes
		let preimage = Preimage::from([0u8; 32]);
		let hash = preimage.compute_payment_hash();
		assert_eq!(
			hash.to_string(),
			"66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925",
		);
		assert!(hash.matches(&preimage));
		assert!(!hash.matches(&Preimage::from([1u8; 32])));
	}

	#[test]
	fn byte_newtype_hex() {
		let addr = PaymentAddr::from([0xab; 32]);
		let s = addr.to_string();
		assert_eq!(s.len(), 64);
		assert_eq!(PaymentAddr::from_str(&s).unwrap(), addr);
		assert!(PaymentAddr::from_str("abcd").is_err());
		assert!(PaymentAddr::try_from(&[0u8; 31][..]).is_err());

		let json = serde_json::to_string(&addr).unwrap();
		assert_eq!(json, format!("\"{}\"", s));
	}

	#[test]
	fn circuit_key_string() {
		let key = CircuitKey::new(123, 7);
		assert_eq!(key.to_string(), "123:7");
		assert_eq!("123:7".parse::<CircuitKey>().unwrap(), key);
		assert!("123".parse::<CircuitKey>().is_err());
		assert!("a:7".parse::<CircuitKey>().is_err());
	}

	#[test]
	fn derived_preimages_are_deterministic() {
		let seed = [7u8; 32];
		let a = derive_preimage(&seed, b"one");
		assert_eq!(a, derive_preimage(&seed, b"one"));
		assert_ne!(a, derive_preimage(&seed, b"two"));
		assert_ne!(a, derive_preimage(&[8u8; 32], b"one"));
	}
}
