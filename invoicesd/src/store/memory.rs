
use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use invoices::{Invoice, InvoiceError, PaymentAddr, PaymentHash, SetId};

use super::InvoiceStore;


#[derive(Default)]
struct Inner {
	invoices: HashMap<PaymentHash, Invoice>,
	by_payment_addr: HashMap<PaymentAddr, PaymentHash>,
	by_set_id: HashMap<SetId, PaymentHash>,
	by_add_index: BTreeMap<u64, PaymentHash>,
	by_settle_index: BTreeMap<u64, PaymentHash>,
}

impl Inner {
	fn index(&mut self, invoice: &Invoice) {
		let hash = invoice.payment_hash();
		for set_id in invoice.set_ids() {
			self.by_set_id.entry(set_id).or_insert(hash);
		}
		if invoice.settle_index() != 0 {
			self.by_settle_index.insert(invoice.settle_index(), hash);
		}
	}

	fn resolve(&self, hash: Option<&PaymentHash>) -> Option<Invoice> {
		hash.and_then(|h| self.invoices.get(h)).cloned()
	}
}

/// An [InvoiceStore] that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
	inner: RwLock<Inner>,
}

impl MemoryStore {
	pub fn new() -> MemoryStore {
		MemoryStore::default()
	}
}

impl InvoiceStore for MemoryStore {
	fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<()> {
		let mut inner = self.inner.write();
		let hash = invoice.payment_hash();
		if inner.invoices.contains_key(&hash)
			|| inner.by_payment_addr.contains_key(&invoice.payment_addr())
			|| inner.by_add_index.contains_key(&invoice.add_index())
		{
			return Err(InvoiceError::DuplicateInvoice(hash).into());
		}

		inner.by_payment_addr.insert(invoice.payment_addr(), hash);
		inner.by_add_index.insert(invoice.add_index(), hash);
		inner.index(invoice);
		inner.invoices.insert(hash, invoice.clone());
		Ok(())
	}

	fn update_invoice(&self, invoice: &Invoice) -> anyhow::Result<()> {
		let mut inner = self.inner.write();
		let hash = invoice.payment_hash();
		match inner.invoices.get_mut(&hash) {
			Some(stored) => *stored = invoice.clone(),
			None => bail!("can't update unknown invoice {}", hash),
		}
		inner.index(invoice);
		Ok(())
	}

	fn get_invoice_by_hash(&self, payment_hash: PaymentHash) -> anyhow::Result<Option<Invoice>> {
		Ok(self.inner.read().invoices.get(&payment_hash).cloned())
	}

	fn get_invoice_by_payment_addr(
		&self,
		payment_addr: PaymentAddr,
	) -> anyhow::Result<Option<Invoice>> {
		let inner = self.inner.read();
		Ok(inner.resolve(inner.by_payment_addr.get(&payment_addr)))
	}

	fn get_invoice_by_set_id(&self, set_id: SetId) -> anyhow::Result<Option<Invoice>> {
		let inner = self.inner.read();
		Ok(inner.resolve(inner.by_set_id.get(&set_id)))
	}

	fn invoices_added_since(&self, add_index: u64) -> anyhow::Result<Vec<Invoice>> {
		let inner = self.inner.read();
		Ok(inner.by_add_index.range(add_index.saturating_add(1)..)
			.filter_map(|(_, h)| inner.invoices.get(h).cloned())
			.collect())
	}

	fn invoices_settled_since(&self, settle_index: u64) -> anyhow::Result<Vec<Invoice>> {
		let inner = self.inner.read();
		Ok(inner.by_settle_index.range(settle_index.saturating_add(1)..)
			.filter_map(|(_, h)| inner.invoices.get(h).cloned())
			.collect())
	}

	fn pending_invoices(&self) -> anyhow::Result<Vec<Invoice>> {
		let inner = self.inner.read();
		Ok(inner.by_add_index.values()
			.filter_map(|h| inner.invoices.get(h))
			.filter(|i| !i.state().is_final())
			.cloned()
			.collect())
	}

	fn last_add_index(&self) -> anyhow::Result<u64> {
		Ok(self.inner.read().by_add_index.keys().next_back().copied().unwrap_or(0))
	}

	fn last_settle_index(&self) -> anyhow::Result<u64> {
		Ok(self.inner.read().by_settle_index.keys().next_back().copied().unwrap_or(0))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn memory_store() {
		let store = MemoryStore::new();
		crate::store::test::check_store_behavior(&store);
	}

	#[test]
	fn update_unknown_invoice() {
		let store = MemoryStore::new();
		let (inv, _) = invoices::test::dummy_invoice_nb(1, 1000);
		store.update_invoice(&inv).expect_err("invoice was never inserted");
	}
}
