
use invoices::{BlockHeight, PaymentHash};


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceAdded {
	pub payment_hash: PaymentHash,
	pub add_index: u64,
	pub value_msat: u64,
	pub is_hold: bool,
}
impl_slog!(InvoiceAdded, Info, "new invoice added");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceAccepted {
	pub payment_hash: PaymentHash,
	pub accepted_msat: u64,
	pub nb_htlcs: usize,
}
impl_slog!(InvoiceAccepted, Info, "invoice accepted, the htlc set is complete");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettled {
	pub payment_hash: PaymentHash,
	pub settle_index: u64,
	pub amt_paid_msat: u64,
}
impl_slog!(InvoiceSettled, Info, "invoice settled");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceCanceled {
	pub payment_hash: PaymentHash,
	/// Either "user", "expired" or "hold_expiry".
	pub reason: String,
}
impl_slog!(InvoiceCanceled, Info, "invoice canceled");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSetReverted {
	pub payment_hash: PaymentHash,
}
impl_slog!(InvoiceSetReverted, Info, "htlc set canceled by modifier, invoice is open again");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldInvoiceHtlcExpiring {
	pub payment_hash: PaymentHash,
	pub height: BlockHeight,
}
impl_slog!(HoldInvoiceHtlcExpiring, Warn, "canceling hold invoice with htlc close to expiry");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryWatcherRun {
	pub nb_expired: usize,
}
impl_slog!(ExpiryWatcherRun, Trace, "invoice expiry watcher finished a run");
