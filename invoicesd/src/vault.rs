
use std::collections::HashMap;

use parking_lot::RwLock;

use invoices::{InvoiceError, PaymentAddr, PaymentHash, Preimage};
use invoices::lightning::derive_preimage;


/// Keeps the preimages the node knows about.
///
/// Preimages of regular invoices are derived from the vault seed and the
/// invoice's payment address, so they survive restarts without being stored.
/// Preimages handed to us for hold invoices only live in memory.
pub struct PreimageVault {
	seed: [u8; 32],
	preimages: RwLock<HashMap<PaymentHash, Preimage>>,
}

impl PreimageVault {
	pub fn new(seed: [u8; 32]) -> PreimageVault {
		PreimageVault {
			seed,
			preimages: RwLock::new(HashMap::new()),
		}
	}

	/// Store a preimage, it has to hash to `payment_hash`.
	pub fn insert(&self, payment_hash: PaymentHash, preimage: Preimage) -> Result<(), InvoiceError> {
		if !payment_hash.matches(&preimage) {
			return Err(InvoiceError::InvalidPreimage { payment_hash });
		}
		self.preimages.write().insert(payment_hash, preimage);
		Ok(())
	}

	pub fn get(&self, payment_hash: PaymentHash) -> Result<Preimage, InvoiceError> {
		self.preimages.read().get(&payment_hash).copied()
			.ok_or(InvoiceError::PreimageNotFound(payment_hash))
	}

	pub fn contains(&self, payment_hash: PaymentHash) -> bool {
		self.preimages.read().contains_key(&payment_hash)
	}

	/// Derive the preimage for an invoice with the given payment address.
	///
	/// The result is deterministic and not stored, use [PreimageVault::insert]
	/// to make it available through [PreimageVault::get].
	pub fn derive(&self, payment_addr: PaymentAddr) -> Preimage {
		derive_preimage(&self.seed, payment_addr.as_ref())
	}

	/// Like [PreimageVault::get], but falls back to deriving the preimage
	/// from the payment address.
	pub fn get_or_derive(
		&self,
		payment_hash: PaymentHash,
		payment_addr: PaymentAddr,
	) -> Result<Preimage, InvoiceError> {
		match self.get(payment_hash) {
			Ok(p) => Ok(p),
			Err(_) => {
				let preimage = self.derive(payment_addr);
				self.insert(payment_hash, preimage)
					.map_err(|_| InvoiceError::PreimageNotFound(payment_hash))?;
				Ok(preimage)
			},
		}
	}

	pub fn remove(&self, payment_hash: PaymentHash) {
		self.preimages.write().remove(&payment_hash);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn insert_checks_hash() {
		let vault = PreimageVault::new([1; 32]);
		let preimage = Preimage::from([5; 32]);
		let hash = preimage.compute_payment_hash();

		assert!(matches!(vault.get(hash), Err(InvoiceError::PreimageNotFound(h)) if h == hash));
		assert!(matches!(
			vault.insert(hash, Preimage::from([6; 32])),
			Err(InvoiceError::InvalidPreimage { .. }),
		));
		vault.insert(hash, preimage).unwrap();
		assert_eq!(vault.get(hash).unwrap(), preimage);

		vault.remove(hash);
		assert!(!vault.contains(hash));
	}

	#[test]
	fn derived_preimages_survive_restart() {
		let addr = PaymentAddr::from([9; 32]);
		let preimage = PreimageVault::new([1; 32]).derive(addr);
		let hash = preimage.compute_payment_hash();

		let vault = PreimageVault::new([1; 32]);
		assert_eq!(vault.get_or_derive(hash, addr).unwrap(), preimage);
		assert!(vault.contains(hash));

		// a different seed can't produce it
		let other = PreimageVault::new([2; 32]);
		assert!(matches!(
			other.get_or_derive(hash, addr),
			Err(InvoiceError::PreimageNotFound(_)),
		));
	}
}
