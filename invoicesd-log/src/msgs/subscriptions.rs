
use invoices::PaymentHash;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberLagging {
	pub subscription_id: u64,
	/// None for subscriptions to all invoices.
	pub payment_hash: Option<PaymentHash>,
	pub buffer_size: usize,
}
impl_slog!(SubscriberLagging, Warn, "disconnecting subscriber that fell behind");
