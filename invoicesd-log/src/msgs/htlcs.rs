
use invoices::{CancelReason, CircuitKey, HtlcState, PaymentHash};


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcAccepted {
	pub payment_hash: PaymentHash,
	pub circuit_key: CircuitKey,
	pub amt_msat: u64,
	pub htlc_amt_msat: u64,
}
impl_slog!(HtlcAccepted, Debug, "accepted htlc");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcRejected {
	pub payment_hash: PaymentHash,
	pub circuit_key: CircuitKey,
	pub reason: CancelReason,
}
impl_slog!(HtlcRejected, Debug, "rejected htlc");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcReplayed {
	pub payment_hash: PaymentHash,
	pub circuit_key: CircuitKey,
	pub state: HtlcState,
}
impl_slog!(HtlcReplayed, Debug, "htlc was already known, replaying its resolution");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierRegistered {
	pub client_id: u64,
}
impl_slog!(HtlcModifierRegistered, Info, "htlc modifier client registered");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierDisconnected {
	pub client_id: u64,
	pub nb_pending: usize,
}
impl_slog!(HtlcModifierDisconnected, Info, "htlc modifier client disconnected");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierTimeout {
	pub circuit_key: CircuitKey,
}
impl_slog!(HtlcModifierTimeout, Warn, "htlc modifier did not respond in time, canceling htlc");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierQueueFull {
	pub circuit_key: CircuitKey,
}
impl_slog!(HtlcModifierQueueFull, Warn, "htlc modifier request queue is full, canceling htlc");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierDuplicateRequest {
	pub circuit_key: CircuitKey,
	pub nb_waiting: usize,
}
impl_slog!(HtlcModifierDuplicateRequest, Debug, "htlc is already with the modifier, waiting for the same response");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcModifierUnknownResponse {
	pub circuit_key: CircuitKey,
}
impl_slog!(HtlcModifierUnknownResponse, Warn, "ignoring htlc modifier response for unknown htlc");
