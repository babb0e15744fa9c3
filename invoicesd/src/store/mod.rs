//! Persistent storage of invoices.
//!
//! The [InvoiceStore] trait is all the service needs from a storage backend.
//! Two implementations are provided: [MemoryStore], which forgets everything
//! on restart, and [SqliteStore], which keeps invoices in an SQLite database.
//!
//! Stores don't enforce any state machine rules, they merely keep the latest
//! version of each invoice and the indexes to find it again. All writes for a
//! single invoice are serialized by the service.

mod memory;
mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use invoices::{Invoice, PaymentAddr, PaymentHash, SetId};


/// Storage interface for invoices.
///
/// Inserting an invoice whose payment hash or payment address is already
/// taken fails with [invoices::InvoiceError::DuplicateInvoice] wrapped in the
/// returned error.
pub trait InvoiceStore: Send + Sync + 'static {
	/// Store a new invoice.
	fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<()>;

	/// Replace the stored version of an existing invoice.
	///
	/// Also indexes set ids of any new HTLCs.
	fn update_invoice(&self, invoice: &Invoice) -> anyhow::Result<()>;

	fn get_invoice_by_hash(&self, payment_hash: PaymentHash) -> anyhow::Result<Option<Invoice>>;

	fn get_invoice_by_payment_addr(
		&self,
		payment_addr: PaymentAddr,
	) -> anyhow::Result<Option<Invoice>>;

	fn get_invoice_by_set_id(&self, set_id: SetId) -> anyhow::Result<Option<Invoice>>;

	/// All invoices with an add index strictly above `add_index`, ordered by
	/// add index.
	fn invoices_added_since(&self, add_index: u64) -> anyhow::Result<Vec<Invoice>>;

	/// All settled invoices with a settle index strictly above
	/// `settle_index`, ordered by settle index.
	fn invoices_settled_since(&self, settle_index: u64) -> anyhow::Result<Vec<Invoice>>;

	/// All invoices that are either open or accepted.
	fn pending_invoices(&self) -> anyhow::Result<Vec<Invoice>>;

	/// The highest add index in use, or zero.
	fn last_add_index(&self) -> anyhow::Result<u64>;

	/// The highest settle index in use, or zero.
	fn last_settle_index(&self) -> anyhow::Result<u64>;
}

#[cfg(test)]
pub(crate) mod test {
	use chrono::DateTime;

	use invoices::{InvoiceError, InvoiceState, PaymentAddr, SetId};
	use invoices::test::{dummy_htlc, dummy_invoice_nb};

	use super::*;

	/// Run the same behavioral checks against any store.
	pub fn check_store_behavior(store: &dyn InvoiceStore) {
		let now = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
		assert_eq!(store.last_add_index().unwrap(), 0);
		assert_eq!(store.last_settle_index().unwrap(), 0);

		let (inv1, pre1) = dummy_invoice_nb(1, 1000);
		let (inv2, _) = dummy_invoice_nb(2, 2000);
		let (inv3, pre3) = dummy_invoice_nb(3, 3000);
		store.insert_invoice(&inv1).unwrap();
		store.insert_invoice(&inv2).unwrap();
		store.insert_invoice(&inv3).unwrap();
		assert_eq!(store.last_add_index().unwrap(), 3);

		// duplicates are refused
		let err = store.insert_invoice(&inv1).unwrap_err();
		assert!(matches!(
			err.downcast_ref::<InvoiceError>(),
			Some(InvoiceError::DuplicateInvoice(h)) if *h == inv1.payment_hash(),
		), "unexpected error: {:#}", err);

		assert_eq!(store.get_invoice_by_hash(inv2.payment_hash()).unwrap(), Some(inv2.clone()));
		assert_eq!(
			store.get_invoice_by_payment_addr(inv2.payment_addr()).unwrap(),
			Some(inv2.clone()),
		);
		assert_eq!(store.get_invoice_by_payment_addr(PaymentAddr::from([0; 32])).unwrap(), None);

		let ids = store.invoices_added_since(1).unwrap();
		assert_eq!(ids.iter().map(|i| i.add_index()).collect::<Vec<_>>(), vec![2, 3]);
		assert_eq!(store.pending_invoices().unwrap().len(), 3);

		// settle 3 before 1, with a set id on 1
		let set_id = SetId::from([5; 32]);
		let mut inv3 = inv3;
		inv3.accept_htlc(dummy_htlc(1, 3000)).unwrap();
		inv3.settle(pre3, now, || 1).unwrap();
		store.update_invoice(&inv3).unwrap();

		let mut inv1 = inv1;
		let mut htlc = dummy_htlc(2, 1000);
		htlc.set_id = Some(set_id);
		inv1.accept_htlc(htlc).unwrap();
		store.update_invoice(&inv1).unwrap();
		assert_eq!(store.get_invoice_by_set_id(set_id).unwrap(), Some(inv1.clone()));
		assert_eq!(store.get_invoice_by_set_id(SetId::from([6; 32])).unwrap(), None);

		inv1.settle(pre1, now, || 2).unwrap();
		store.update_invoice(&inv1).unwrap();
		assert_eq!(store.last_settle_index().unwrap(), 2);

		let settled = store.invoices_settled_since(0).unwrap();
		assert_eq!(settled.len(), 2);
		assert_eq!(settled[0].payment_hash(), inv3.payment_hash());
		assert_eq!(settled[1].payment_hash(), inv1.payment_hash());
		assert!(settled.iter().all(|i| i.state() == InvoiceState::Settled));
		assert_eq!(store.invoices_settled_since(1).unwrap().len(), 1);

		let pending = store.pending_invoices().unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].payment_hash(), inv2.payment_hash());
	}
}
