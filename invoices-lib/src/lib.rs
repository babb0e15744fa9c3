pub extern crate bitcoin;
pub extern crate lightning_invoice;

#[macro_use] extern crate serde;

#[macro_use] mod util;

pub mod error;
pub mod invoice;
pub mod lightning;
pub mod modifier;
pub mod terms;

#[cfg(any(test, feature = "test-util"))]
pub mod test;

pub use crate::error::InvoiceError;
pub use crate::invoice::{
	CancelReason, HtlcCheck, HtlcState, Invoice, InvoiceHtlc, InvoiceRef, InvoiceState,
	LookupModifier,
};
pub use crate::lightning::{CircuitKey, PaymentAddr, PaymentHash, Preimage, SetId};
pub use crate::modifier::{HtlcModifyRequest, HtlcModifyResponse};
pub use crate::terms::{InvoiceRequest, InvoiceTerms, RouteHint, RouteHintHop};

/// A block height on the chain the node operates on.
pub type BlockHeight = u32;

/// The default time an invoice stays payable, in seconds.
pub const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 86400;

/// The default minimum CLTV delta for the final hop, in blocks.
pub const DEFAULT_CLTV_EXPIRY: u32 = 80;

/// The maximum size of the memo field in bytes, as allowed by BOLT-11.
pub const MAX_MEMO_SIZE: usize = 639;
