
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use invoices::PaymentHash;


/// Serializes all modifications of a single invoice.
///
/// Holds one async mutex per payment hash that is currently in use. The entry
/// is removed again once the last holder or waiter is gone.
#[derive(Default)]
pub struct InvoiceLocks {
	locks: parking_lot::Mutex<HashMap<PaymentHash, Arc<Mutex<()>>>>,
}

impl InvoiceLocks {
	pub fn new() -> InvoiceLocks {
		InvoiceLocks::default()
	}

	/// Wait for exclusive access to the invoice with the given hash.
	pub async fn lock(&self, payment_hash: PaymentHash) -> InvoiceLockGuard<'_> {
		let entry = LockEntry { locks: self, payment_hash };
		let mutex = self.locks.lock().entry(payment_hash).or_default().clone();
		let guard = mutex.lock_owned().await;
		InvoiceLockGuard { _guard: guard, _entry: entry }
	}

	/// The number of invoices that are locked or being waited on.
	pub fn len(&self) -> usize {
		self.locks.lock().len()
	}
}

struct LockEntry<'a> {
	locks: &'a InvoiceLocks,
	payment_hash: PaymentHash,
}

impl<'a> Drop for LockEntry<'a> {
	fn drop(&mut self) {
		let mut locks = self.locks.locks.lock();
		if let Some(mutex) = locks.get(&self.payment_hash) {
			if Arc::strong_count(mutex) == 1 {
				locks.remove(&self.payment_hash);
			}
		}
	}
}

/// Exclusive access to a single invoice, released on drop.
pub struct InvoiceLockGuard<'a> {
	// NB order matters, the mutex guard has to be dropped before the entry
	_guard: OwnedMutexGuard<()>,
	_entry: LockEntry<'a>,
}
