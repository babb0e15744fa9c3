//! The invoice record and its state machine.
//!
//! An invoice starts out [InvoiceState::Open]. Once the accepted HTLCs add up
//! to the invoice value it becomes [InvoiceState::Accepted], after which it can
//! be settled with the preimage or canceled. Settled and canceled invoices are
//! final and never change again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::{BlockHeight, CircuitKey, InvoiceError, InvoiceTerms, PaymentAddr, PaymentHash, Preimage, SetId};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
	Open,
	Accepted,
	Settled,
	Canceled,
}

impl InvoiceState {
	pub fn as_str(&self) -> &'static str {
		match self {
			InvoiceState::Open => "open",
			InvoiceState::Accepted => "accepted",
			InvoiceState::Settled => "settled",
			InvoiceState::Canceled => "canceled",
		}
	}

	/// Settled and canceled invoices never change state again.
	pub fn is_final(&self) -> bool {
		match self {
			InvoiceState::Open | InvoiceState::Accepted => false,
			InvoiceState::Settled | InvoiceState::Canceled => true,
		}
	}
}

impl fmt::Display for InvoiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for InvoiceState {
	type Err = InvoiceError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"open" => Ok(InvoiceState::Open),
			"accepted" => Ok(InvoiceState::Accepted),
			"settled" => Ok(InvoiceState::Settled),
			"canceled" => Ok(InvoiceState::Canceled),
			_ => Err(InvoiceError::invalid_request(format_args!("unknown invoice state: {}", s))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcState {
	Accepted,
	Settled,
	Canceled,
}

impl HtlcState {
	pub fn as_str(&self) -> &'static str {
		match self {
			HtlcState::Accepted => "accepted",
			HtlcState::Settled => "settled",
			HtlcState::Canceled => "canceled",
		}
	}
}

impl fmt::Display for HtlcState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Which HTLCs to include when looking up an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupModifier {
	/// All HTLCs.
	#[default]
	Default,
	/// Only the HTLCs of the set that was looked up.
	HtlcSetOnly,
	/// None of the HTLCs.
	HtlcSetBlank,
}

/// The reference used to look up an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceRef {
	PaymentHash(PaymentHash),
	PaymentAddr(PaymentAddr),
	SetId(SetId),
}

impl InvoiceRef {
	/// Check that the modifier can be used with this kind of reference.
	pub fn check_modifier(&self, modifier: LookupModifier) -> Result<(), InvoiceError> {
		match (self, modifier) {
			(_, LookupModifier::Default) => Ok(()),
			(InvoiceRef::SetId(_), LookupModifier::HtlcSetOnly) => Ok(()),
			(_, LookupModifier::HtlcSetOnly) => {
				Err(InvoiceError::InvalidLookup("htlc_set_only requires a set id"))
			},
			(InvoiceRef::PaymentAddr(_), LookupModifier::HtlcSetBlank) => Ok(()),
			(_, LookupModifier::HtlcSetBlank) => {
				Err(InvoiceError::InvalidLookup("htlc_set_blank requires a payment address"))
			},
		}
	}
}

impl fmt::Display for InvoiceRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			InvoiceRef::PaymentHash(h) => write!(f, "payment_hash={}", h),
			InvoiceRef::PaymentAddr(a) => write!(f, "payment_addr={}", a),
			InvoiceRef::SetId(s) => write!(f, "set_id={}", s),
		}
	}
}

/// Why an incoming HTLC was canceled back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
	InvoiceNotFound,
	AlreadySettled,
	InvoiceCanceled,
	/// The invoice was already accepted by another HTLC set.
	InvoiceNotOpen,
	InvoiceExpired,
	ExpiryTooSoon,
	PaymentAddrMismatch,
	InterceptorTimeout,
	InterceptorDisconnected,
	InterceptorQueueFull,
	InterceptorRequired,
	InterceptorCanceledSet,
	/// The HTLC got too close to its expiry while being held.
	HoldExpiry,
}

impl CancelReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			CancelReason::InvoiceNotFound => "invoice_not_found",
			CancelReason::AlreadySettled => "already_settled",
			CancelReason::InvoiceCanceled => "invoice_canceled",
			CancelReason::InvoiceNotOpen => "invoice_not_open",
			CancelReason::InvoiceExpired => "invoice_expired",
			CancelReason::ExpiryTooSoon => "expiry_too_soon",
			CancelReason::PaymentAddrMismatch => "payment_addr_mismatch",
			CancelReason::InterceptorTimeout => "interceptor_timeout",
			CancelReason::InterceptorDisconnected => "interceptor_disconnected",
			CancelReason::InterceptorQueueFull => "interceptor_queue_full",
			CancelReason::InterceptorRequired => "interceptor_required",
			CancelReason::InterceptorCanceledSet => "interceptor_canceled_set",
			CancelReason::HoldExpiry => "hold_expiry",
		}
	}

	/// The reason an HTLC is refused for an invoice in the given state.
	pub fn for_state(state: InvoiceState) -> Option<CancelReason> {
		match state {
			InvoiceState::Open => None,
			InvoiceState::Accepted => Some(CancelReason::InvoiceNotOpen),
			InvoiceState::Settled => Some(CancelReason::AlreadySettled),
			InvoiceState::Canceled => Some(CancelReason::InvoiceCanceled),
		}
	}
}

impl fmt::Display for CancelReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHtlc {
	pub circuit_key: CircuitKey,
	/// The amount credited to the invoice, possibly overridden by the htlc modifier.
	pub amt_msat: u64,
	/// The amount the HTLC actually carries.
	pub htlc_amt_msat: u64,
	pub expiry_height: BlockHeight,
	pub accept_height: BlockHeight,
	pub accept_time: DateTime<Utc>,
	pub resolve_time: Option<DateTime<Utc>>,
	pub state: HtlcState,
	pub custom_records: BTreeMap<u64, Vec<u8>>,
	pub set_id: Option<SetId>,
}

/// The outcome of checking an incoming HTLC against an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtlcCheck {
	/// The HTLC can be considered for acceptance.
	Proceed,
	/// The HTLC is already known, it resolves to its recorded state.
	Replay(HtlcState),
	Reject(CancelReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
	terms: InvoiceTerms,
	payment_request: String,
	add_index: u64,
	creation_date: DateTime<Utc>,
	state: InvoiceState,
	preimage: Option<Preimage>,
	settle_index: u64,
	settle_date: Option<DateTime<Utc>>,
	amt_paid_msat: u64,
	htlcs: Vec<InvoiceHtlc>,
}

impl Invoice {
	pub fn new(
		terms: InvoiceTerms,
		payment_request: String,
		add_index: u64,
		creation_date: DateTime<Utc>,
	) -> Invoice {
		Invoice {
			terms,
			payment_request,
			add_index,
			creation_date,
			state: InvoiceState::Open,
			preimage: None,
			settle_index: 0,
			settle_date: None,
			amt_paid_msat: 0,
			htlcs: Vec::new(),
		}
	}

	pub fn terms(&self) -> &InvoiceTerms {
		&self.terms
	}

	pub fn payment_hash(&self) -> PaymentHash {
		self.terms.payment_hash
	}

	pub fn payment_addr(&self) -> PaymentAddr {
		self.terms.payment_addr
	}

	pub fn payment_request(&self) -> &str {
		&self.payment_request
	}

	pub fn add_index(&self) -> u64 {
		self.add_index
	}

	pub fn creation_date(&self) -> DateTime<Utc> {
		self.creation_date
	}

	pub fn state(&self) -> InvoiceState {
		self.state
	}

	pub fn preimage(&self) -> Option<Preimage> {
		self.preimage
	}

	/// Zero while the invoice is not settled.
	pub fn settle_index(&self) -> u64 {
		self.settle_index
	}

	pub fn settle_date(&self) -> Option<DateTime<Utc>> {
		self.settle_date
	}

	pub fn amt_paid_msat(&self) -> u64 {
		self.amt_paid_msat
	}

	pub fn htlcs(&self) -> &[InvoiceHtlc] {
		&self.htlcs
	}

	pub fn htlc(&self, key: CircuitKey) -> Option<&InvoiceHtlc> {
		self.htlcs.iter().find(|h| h.circuit_key == key)
	}

	/// The distinct set ids of all HTLCs, in order of first appearance.
	pub fn set_ids(&self) -> Vec<SetId> {
		let mut ret = Vec::new();
		for id in self.htlcs.iter().filter_map(|h| h.set_id) {
			if !ret.contains(&id) {
				ret.push(id);
			}
		}
		ret
	}

	/// The sum of the amounts of the currently accepted HTLCs.
	pub fn accepted_amt_msat(&self) -> u64 {
		self.htlcs.iter()
			.filter(|h| h.state == HtlcState::Accepted)
			.map(|h| h.amt_msat)
			.fold(0u64, |acc, a| acc.saturating_add(a))
	}

	pub fn expires_at(&self) -> DateTime<Utc> {
		self.terms.expires_at(self.creation_date)
	}

	/// Only open invoices expire, once HTLCs are accepted we wait for the
	/// preimage or a cancel.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.state == InvoiceState::Open && now >= self.expires_at()
	}

	/// Whether any of the held HTLCs expires at or before `height + delta`.
	pub fn has_htlc_expiring(&self, height: BlockHeight, delta: u32) -> bool {
		let limit = height.saturating_add(delta);
		self.state == InvoiceState::Accepted && self.htlcs.iter()
			.any(|h| h.state == HtlcState::Accepted && h.expiry_height <= limit)
	}

	/// Check whether an HTLC paying to this invoice can be accepted.
	pub fn check_htlc(
		&self,
		circuit_key: CircuitKey,
		payment_addr: Option<PaymentAddr>,
		expiry_height: BlockHeight,
		current_height: BlockHeight,
		now: DateTime<Utc>,
	) -> HtlcCheck {
		if let Some(htlc) = self.htlc(circuit_key) {
			return HtlcCheck::Replay(htlc.state);
		}

		if let Some(reason) = CancelReason::for_state(self.state) {
			return HtlcCheck::Reject(reason);
		}

		if self.is_expired(now) {
			return HtlcCheck::Reject(CancelReason::InvoiceExpired);
		}

		if let Some(addr) = payment_addr {
			if addr != self.terms.payment_addr {
				return HtlcCheck::Reject(CancelReason::PaymentAddrMismatch);
			}
		}

		if (expiry_height as u64) < current_height as u64 + self.terms.cltv_expiry as u64 {
			return HtlcCheck::Reject(CancelReason::ExpiryTooSoon);
		}

		HtlcCheck::Proceed
	}

	/// Add an accepted HTLC to an open invoice.
	///
	/// Returns true if this moved the invoice to [InvoiceState::Accepted].
	pub fn accept_htlc(&mut self, mut htlc: InvoiceHtlc) -> Result<bool, InvoiceError> {
		match self.state {
			InvoiceState::Open => {},
			InvoiceState::Settled => return Err(InvoiceError::AlreadySettled(self.payment_hash())),
			InvoiceState::Canceled => return Err(InvoiceError::AlreadyCanceled(self.payment_hash())),
			InvoiceState::Accepted => return Err(InvoiceError::InvalidTransition {
				from: self.state,
				to: InvoiceState::Accepted,
			}),
		}
		if self.htlc(htlc.circuit_key).is_some() {
			return Ok(false);
		}

		htlc.state = HtlcState::Accepted;
		htlc.resolve_time = None;
		self.htlcs.push(htlc);

		if self.accepted_amt_msat() >= self.terms.value_msat {
			self.state = InvoiceState::Accepted;
			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Record an HTLC that was canceled before it could be accepted.
	///
	/// Final invoices are left untouched, returns whether the HTLC was added.
	pub fn record_canceled_htlc(&mut self, mut htlc: InvoiceHtlc, now: DateTime<Utc>) -> bool {
		if self.state.is_final() || self.htlc(htlc.circuit_key).is_some() {
			return false;
		}
		htlc.state = HtlcState::Canceled;
		htlc.resolve_time = Some(now);
		self.htlcs.push(htlc);
		true
	}

	/// Cancel all accepted HTLCs, moving an accepted invoice back to open.
	///
	/// Returns whether anything changed.
	pub fn cancel_htlc_set(&mut self, now: DateTime<Utc>) -> bool {
		if self.state.is_final() {
			return false;
		}
		let changed = self.resolve_accepted_htlcs(HtlcState::Canceled, now) > 0;
		if self.state == InvoiceState::Accepted {
			self.state = InvoiceState::Open;
			return true;
		}
		changed
	}

	/// Settle the invoice with the preimage.
	///
	/// The settle index is only requested when the invoice actually settles.
	/// Settling a settled invoice is a no-op and returns false.
	pub fn settle(
		&mut self,
		preimage: Preimage,
		now: DateTime<Utc>,
		next_settle_index: impl FnOnce() -> u64,
	) -> Result<bool, InvoiceError> {
		let payment_hash = self.payment_hash();
		if !payment_hash.matches(&preimage) {
			return Err(InvoiceError::InvalidPreimage { payment_hash });
		}

		match self.state {
			InvoiceState::Settled => return Ok(false),
			InvoiceState::Canceled => return Err(InvoiceError::InvoiceCanceled(payment_hash)),
			InvoiceState::Open => return Err(InvoiceError::InvoiceStillOpen(payment_hash)),
			InvoiceState::Accepted => {},
		}

		self.resolve_accepted_htlcs(HtlcState::Settled, now);
		self.amt_paid_msat = self.htlcs.iter()
			.filter(|h| h.state == HtlcState::Settled)
			.map(|h| h.amt_msat)
			.fold(0u64, |acc, a| acc.saturating_add(a));
		self.preimage = Some(preimage);
		self.state = InvoiceState::Settled;
		self.settle_index = next_settle_index();
		self.settle_date = Some(now);
		Ok(true)
	}

	/// Cancel the invoice and all its accepted HTLCs.
	///
	/// Canceling a canceled invoice is a no-op and returns false.
	pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool, InvoiceError> {
		match self.state {
			InvoiceState::Canceled => return Ok(false),
			InvoiceState::Settled => return Err(InvoiceError::AlreadySettled(self.payment_hash())),
			InvoiceState::Open | InvoiceState::Accepted => {},
		}

		self.resolve_accepted_htlcs(HtlcState::Canceled, now);
		self.state = InvoiceState::Canceled;
		Ok(true)
	}

	/// A copy of the invoice with the HTLCs filtered according to the modifier.
	pub fn snapshot(&self, modifier: LookupModifier, set_id: Option<SetId>) -> Invoice {
		let mut ret = self.clone();
		match modifier {
			LookupModifier::Default => {},
			LookupModifier::HtlcSetOnly => ret.htlcs.retain(|h| set_id.is_some() && h.set_id == set_id),
			LookupModifier::HtlcSetBlank => ret.htlcs.clear(),
		}
		ret
	}

	fn resolve_accepted_htlcs(&mut self, state: HtlcState, now: DateTime<Utc>) -> usize {
		let mut count = 0;
		for htlc in self.htlcs.iter_mut().filter(|h| h.state == HtlcState::Accepted) {
			htlc.state = state;
			htlc.resolve_time = Some(now);
			count += 1;
		}
		count
	}
}
