
use crate::{InvoiceState, PaymentHash};


/// The errors that can occur when operating on invoices.
///
/// Every error surfaces to the caller with its specific kind, there is no
/// catch-all besides [InvoiceError::Storage], which wraps failures of the
/// storage backend.
#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
	#[error("preimage does not match payment hash {payment_hash}")]
	InvalidPreimage {
		payment_hash: PaymentHash,
	},
	#[error("invoice {0} is already settled")]
	AlreadySettled(PaymentHash),
	/// Canceling a canceled invoice is a no-op, so this is only used
	/// internally and never returned by cancel.
	#[error("invoice {0} is already canceled")]
	AlreadyCanceled(PaymentHash),
	#[error("invoice {0} is canceled")]
	InvoiceCanceled(PaymentHash),
	#[error("invoice {0} is still open, no htlcs were accepted")]
	InvoiceStillOpen(PaymentHash),
	#[error("no preimage known for payment hash {0}")]
	PreimageNotFound(PaymentHash),
	#[error("invoice not found: {0}")]
	InvoiceNotFound(String),
	#[error("an invoice with payment hash {0} already exists")]
	DuplicateInvoice(PaymentHash),
	#[error("an htlc modifier is already registered")]
	InterceptorAlreadyRegistered,
	#[error("htlc modifier did not respond in time")]
	InterceptorTimeout,
	#[error("the value and value_msat fields are mutually exclusive")]
	MutuallyExclusiveAmountFields,
	#[error("invalid invoice request: {0}")]
	InvalidInvoiceRequest(String),
	#[error("invalid lookup: {0}")]
	InvalidLookup(&'static str),
	#[error("invalid state transition from {from} to {to}")]
	InvalidTransition {
		from: InvoiceState,
		to: InvoiceState,
	},
	#[error("storage error: {0:#}")]
	Storage(#[from] anyhow::Error),
}

impl InvoiceError {
	pub fn invalid_request(msg: impl std::fmt::Display) -> InvoiceError {
		InvoiceError::InvalidInvoiceRequest(msg.to_string())
	}
}
