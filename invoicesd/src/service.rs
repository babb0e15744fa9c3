//! The invoice service.
//!
//! [InvoiceService] ties together storage, the preimage vault, subscriptions
//! and the HTLC modifier. It exposes the RPC-shaped operations towards users
//! and [InvoiceService::process_htlc] and [InvoiceService::notify_block_height]
//! towards the node.
//!
//! All modifications of an invoice happen while holding its lock, and every
//! new version of an invoice is published to subscribers before the lock is
//! released. The lock is not held while waiting for the HTLC modifier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::Context;
use bitcoin::Network;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use chrono::{DateTime, Utc};

use invoices::{
	BlockHeight, CancelReason, CircuitKey, HtlcCheck, HtlcModifyRequest, HtlcState, Invoice,
	InvoiceError, InvoiceHtlc, InvoiceRef, InvoiceRequest, InvoiceState, InvoiceTerms,
	LookupModifier, PaymentAddr, PaymentHash, Preimage, SetId,
};

use crate::config::Config;
use crate::hub::{InvoiceSubscription, SubscriptionHub};
use crate::interceptor::{HtlcInterceptor, HtlcModifierClient, InterceptOutcome};
use crate::locks::InvoiceLocks;
use crate::store::InvoiceStore;
use crate::vault::PreimageVault;


/// An HTLC that arrived at the node and pays to one of our invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcArrival {
	pub payment_hash: PaymentHash,
	pub circuit_key: CircuitKey,
	pub amt_msat: u64,
	pub expiry_height: BlockHeight,
	pub current_height: BlockHeight,
	/// From the MPP record in the onion.
	pub payment_addr: Option<PaymentAddr>,
	pub set_id: Option<SetId>,
	pub custom_records: BTreeMap<u64, Vec<u8>>,
}

/// What the node should do with an HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtlcResolution {
	/// Keep the HTLC until the invoice is settled or canceled.
	///
	/// Use [InvoiceService::wait_htlc_resolution] to learn the outcome.
	Held,
	Settled {
		preimage: Preimage,
	},
	Canceled(CancelReason),
}

/// The result of adding an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddInvoiceResult {
	pub payment_hash: PaymentHash,
	pub payment_request: String,
	pub add_index: u64,
	pub payment_addr: PaymentAddr,
}

pub struct InvoiceService {
	network: Network,
	node_key: SecretKey,
	node_pubkey: PublicKey,
	hold_expiry_delta: u32,

	store: Arc<dyn InvoiceStore>,
	vault: PreimageVault,
	hub: SubscriptionHub,
	interceptor: HtlcInterceptor,
	locks: InvoiceLocks,

	last_add_index: AtomicU64,
	last_settle_index: AtomicU64,
	block_height: AtomicU32,
}

fn insert_error(e: anyhow::Error) -> InvoiceError {
	match e.downcast::<InvoiceError>() {
		Ok(e) => e,
		Err(e) => InvoiceError::Storage(e),
	}
}

impl InvoiceService {
	pub fn new(
		cfg: &Config,
		store: Arc<dyn InvoiceStore>,
		node_key: SecretKey,
		vault_seed: [u8; 32],
	) -> anyhow::Result<InvoiceService> {
		let last_add_index = store.last_add_index().context("failed to read last add index")?;
		let last_settle_index = store.last_settle_index()
			.context("failed to read last settle index")?;
		debug!("Starting invoice service at add index {} and settle index {}",
			last_add_index, last_settle_index,
		);

		Ok(InvoiceService {
			network: cfg.network,
			node_pubkey: node_key.public_key(&Secp256k1::signing_only()),
			node_key,
			hold_expiry_delta: cfg.hold_expiry_delta,
			store,
			vault: PreimageVault::new(vault_seed),
			hub: SubscriptionHub::new(cfg.subscriber_buffer_size),
			interceptor: HtlcInterceptor::new(&cfg.htlc_modifier),
			locks: InvoiceLocks::new(),
			last_add_index: AtomicU64::new(last_add_index),
			last_settle_index: AtomicU64::new(last_settle_index),
			block_height: AtomicU32::new(0),
		})
	}

	pub fn network(&self) -> Network {
		self.network
	}

	pub fn node_pubkey(&self) -> PublicKey {
		self.node_pubkey
	}

	/// The last block height reported by the node.
	pub fn block_height(&self) -> BlockHeight {
		self.block_height.load(Ordering::SeqCst)
	}

	fn next_settle_index(&self) -> u64 {
		self.last_settle_index.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn get_invoice(&self, payment_hash: PaymentHash) -> Result<Invoice, InvoiceError> {
		self.store.get_invoice_by_hash(payment_hash)?
			.ok_or_else(|| InvoiceError::InvoiceNotFound(payment_hash.to_string()))
	}

	/// Store and publish a new version of an invoice, the lock must be held.
	fn commit(&self, invoice: &Invoice) -> Result<(), InvoiceError> {
		self.store.update_invoice(invoice)?;
		self.hub.publish(invoice);
		Ok(())
	}

	async fn add_invoice_inner(
		&self,
		payment_hash: PaymentHash,
		payment_addr: PaymentAddr,
		req: InvoiceRequest,
		is_hold: bool,
	) -> Result<AddInvoiceResult, InvoiceError> {
		let terms = InvoiceTerms::from_request(req, payment_hash, payment_addr, self.network, is_hold)?;

		let _lock = self.locks.lock(payment_hash).await;
		if self.store.get_invoice_by_hash(payment_hash)?.is_some() {
			return Err(InvoiceError::DuplicateInvoice(payment_hash));
		}

		let creation_date = Utc::now();
		let payment_request = terms.payment_request(self.network, creation_date, &self.node_key)?;
		let add_index = self.last_add_index.fetch_add(1, Ordering::SeqCst) + 1;
		let invoice = Invoice::new(terms, payment_request, add_index, creation_date);
		self.store.insert_invoice(&invoice).map_err(insert_error)?;

		slog!(InvoiceAdded, payment_hash, add_index, value_msat: invoice.terms().value_msat, is_hold);
		self.hub.publish(&invoice);

		Ok(AddInvoiceResult {
			payment_hash,
			payment_request: invoice.payment_request().to_owned(),
			add_index,
			payment_addr,
		})
	}

	/// Add an invoice for which only the payment hash is known.
	///
	/// Accepted HTLCs are held until [InvoiceService::settle_invoice] is
	/// called with the preimage.
	pub async fn add_hold_invoice(
		&self,
		payment_hash: PaymentHash,
		req: InvoiceRequest,
	) -> Result<AddInvoiceResult, InvoiceError> {
		self.add_invoice_inner(payment_hash, PaymentAddr::random(), req, true).await
	}

	/// Add a regular invoice, the preimage is generated by the vault and the
	/// invoice settles as soon as it is fully paid.
	pub async fn add_invoice(&self, req: InvoiceRequest) -> Result<AddInvoiceResult, InvoiceError> {
		let payment_addr = PaymentAddr::random();
		let preimage = self.vault.derive(payment_addr);
		let payment_hash = preimage.compute_payment_hash();
		let res = self.add_invoice_inner(payment_hash, payment_addr, req, false).await?;
		self.vault.insert(payment_hash, preimage)?;
		Ok(res)
	}

	/// Settle an accepted invoice by revealing its preimage.
	///
	/// Settling an already settled invoice is a no-op.
	pub async fn settle_invoice(&self, preimage: Preimage) -> Result<(), InvoiceError> {
		let payment_hash = preimage.compute_payment_hash();
		let _lock = self.locks.lock(payment_hash).await;
		let mut invoice = self.get_invoice(payment_hash)?;
		self.settle_locked(&mut invoice, preimage)?;
		Ok(())
	}

	fn settle_locked(&self, invoice: &mut Invoice, preimage: Preimage) -> Result<bool, InvoiceError> {
		if !invoice.settle(preimage, Utc::now(), || self.next_settle_index())? {
			trace!("Invoice {} was already settled", invoice.payment_hash());
			return Ok(false);
		}

		self.commit(invoice)?;
		self.vault.insert(invoice.payment_hash(), preimage)?;
		slog!(InvoiceSettled, payment_hash: invoice.payment_hash(),
			settle_index: invoice.settle_index(), amt_paid_msat: invoice.amt_paid_msat(),
		);
		Ok(true)
	}

	/// Cancel an open or accepted invoice, canceling all of its HTLCs.
	///
	/// Canceling a canceled invoice is a no-op.
	pub async fn cancel_invoice(&self, payment_hash: PaymentHash) -> Result<(), InvoiceError> {
		let _lock = self.locks.lock(payment_hash).await;
		let mut invoice = self.get_invoice(payment_hash)?;
		self.cancel_locked(&mut invoice, "user")?;
		Ok(())
	}

	fn cancel_locked(&self, invoice: &mut Invoice, reason: &str) -> Result<bool, InvoiceError> {
		if !invoice.cancel(Utc::now())? {
			return Ok(false);
		}
		self.commit(invoice)?;
		self.vault.remove(invoice.payment_hash());
		slog!(InvoiceCanceled, payment_hash: invoice.payment_hash(), reason: reason.into());
		Ok(true)
	}

	pub async fn lookup_invoice(
		&self,
		invoice_ref: InvoiceRef,
		modifier: LookupModifier,
	) -> Result<Invoice, InvoiceError> {
		invoice_ref.check_modifier(modifier)?;

		let (invoice, set_id) = match invoice_ref {
			InvoiceRef::PaymentHash(h) => (self.store.get_invoice_by_hash(h)?, None),
			InvoiceRef::PaymentAddr(a) => (self.store.get_invoice_by_payment_addr(a)?, None),
			InvoiceRef::SetId(s) => (self.store.get_invoice_by_set_id(s)?, Some(s)),
		};
		let invoice = invoice.ok_or_else(|| InvoiceError::InvoiceNotFound(invoice_ref.to_string()))?;
		Ok(invoice.snapshot(modifier, set_id))
	}

	/// Follow the state of a single invoice.
	///
	/// The first update is the current state, the stream ends after the
	/// invoice is settled or canceled.
	pub async fn subscribe_single_invoice(
		&self,
		payment_hash: PaymentHash,
	) -> Result<InvoiceSubscription, InvoiceError> {
		let _lock = self.locks.lock(payment_hash).await;
		let invoice = self.get_invoice(payment_hash)?;
		Ok(self.hub.subscribe_single(invoice))
	}

	/// Follow all invoices.
	///
	/// A non-zero `add_index` first replays all invoices added after it, a
	/// non-zero `settle_index` all invoices settled after it. Invoices that
	/// change while the replay is read can be delivered twice.
	pub fn subscribe_invoices(
		&self,
		add_index: u64,
		settle_index: u64,
	) -> Result<InvoiceSubscription, InvoiceError> {
		let sub = self.hub.subscribe_all();

		let mut replay = Vec::new();
		if add_index != 0 {
			replay.extend(self.store.invoices_added_since(add_index)?);
		}
		if settle_index != 0 {
			replay.extend(self.store.invoices_settled_since(settle_index)?);
		}
		Ok(sub.with_replay(replay))
	}

	/// Attach the HTLC modifier client.
	pub fn htlc_modifier(&self) -> Result<HtlcModifierClient, InvoiceError> {
		self.interceptor.register()
	}

	fn reject(&self, arrival: &HtlcArrival, reason: CancelReason) -> HtlcResolution {
		slog!(HtlcRejected, payment_hash: arrival.payment_hash,
			circuit_key: arrival.circuit_key, reason,
		);
		HtlcResolution::Canceled(reason)
	}

	fn replay(&self, invoice: &Invoice, key: CircuitKey, state: HtlcState) -> HtlcResolution {
		slog!(HtlcReplayed, payment_hash: invoice.payment_hash(), circuit_key: key, state);
		resolution_for(invoice, state)
	}

	/// Check an incoming HTLC against its invoice.
	///
	/// The HTLC is submitted to the HTLC modifier if one is attached, and
	/// added to the invoice if it is acceptable. Regular invoices settle
	/// immediately once fully paid, HTLCs of hold invoices are held.
	pub async fn process_htlc(&self, arrival: HtlcArrival) -> Result<HtlcResolution, InvoiceError> {
		let payment_hash = arrival.payment_hash;
		let key = arrival.circuit_key;

		let request = {
			let _lock = self.locks.lock(payment_hash).await;
			let invoice = match self.store.get_invoice_by_hash(payment_hash)? {
				Some(i) => i,
				None => return Ok(self.reject(&arrival, CancelReason::InvoiceNotFound)),
			};

			match self.check_htlc(&invoice, &arrival) {
				HtlcCheck::Proceed => {},
				HtlcCheck::Replay(state) => return Ok(self.replay(&invoice, key, state)),
				HtlcCheck::Reject(reason) => return Ok(self.reject(&arrival, reason)),
			}

			HtlcModifyRequest {
				invoice,
				exit_htlc_circuit_key: key,
				exit_htlc_amt_msat: arrival.amt_msat,
				exit_htlc_expiry: arrival.expiry_height,
				current_height: arrival.current_height,
				exit_htlc_wire_custom_records: arrival.custom_records.clone(),
			}
		};

		let outcome = self.interceptor.intercept(request).await;

		// things might have changed while we were waiting
		let _lock = self.locks.lock(payment_hash).await;
		let mut invoice = self.get_invoice(payment_hash)?;
		match self.check_htlc(&invoice, &arrival) {
			HtlcCheck::Proceed => {},
			HtlcCheck::Replay(state) => return Ok(self.replay(&invoice, key, state)),
			HtlcCheck::Reject(reason) => return Ok(self.reject(&arrival, reason)),
		}

		let now = Utc::now();
		let mut htlc = InvoiceHtlc {
			circuit_key: key,
			amt_msat: arrival.amt_msat,
			htlc_amt_msat: arrival.amt_msat,
			expiry_height: arrival.expiry_height,
			accept_height: arrival.current_height,
			accept_time: now,
			resolve_time: None,
			state: HtlcState::Accepted,
			custom_records: arrival.custom_records.clone(),
			set_id: arrival.set_id,
		};

		match outcome {
			InterceptOutcome::NoClient => {},
			InterceptOutcome::Response(resp) if resp.cancel_set => {
				let reverted = invoice.cancel_htlc_set(now);
				invoice.record_canceled_htlc(htlc, now);
				self.commit(&invoice)?;
				if reverted {
					slog!(InvoiceSetReverted, payment_hash);
				}
				return Ok(self.reject(&arrival, CancelReason::InterceptorCanceledSet));
			},
			InterceptOutcome::Response(resp) => {
				if let Some(amt) = resp.amt_paid_msat {
					htlc.amt_msat = amt;
				}
			},
			InterceptOutcome::Canceled(reason) => {
				if invoice.record_canceled_htlc(htlc, now) {
					self.commit(&invoice)?;
				}
				return Ok(self.reject(&arrival, reason));
			},
		}

		let amt_msat = htlc.amt_msat;
		let became_accepted = invoice.accept_htlc(htlc)?;
		self.commit(&invoice)?;
		slog!(HtlcAccepted, payment_hash, circuit_key: key, amt_msat, htlc_amt_msat: arrival.amt_msat);

		if !became_accepted {
			return Ok(HtlcResolution::Held);
		}

		slog!(InvoiceAccepted, payment_hash, accepted_msat: invoice.accepted_amt_msat(),
			nb_htlcs: invoice.htlcs().iter().filter(|h| h.state == HtlcState::Accepted).count(),
		);

		if invoice.terms().is_hold {
			return Ok(HtlcResolution::Held);
		}

		let preimage = self.vault.get_or_derive(payment_hash, invoice.payment_addr())?;
		self.settle_locked(&mut invoice, preimage)?;
		Ok(HtlcResolution::Settled { preimage })
	}

	fn check_htlc(&self, invoice: &Invoice, arrival: &HtlcArrival) -> HtlcCheck {
		invoice.check_htlc(
			arrival.circuit_key,
			arrival.payment_addr,
			arrival.expiry_height,
			arrival.current_height,
			Utc::now(),
		)
	}

	/// Wait until a held HTLC is settled or canceled.
	pub async fn wait_htlc_resolution(
		&self,
		payment_hash: PaymentHash,
		circuit_key: CircuitKey,
	) -> Result<HtlcResolution, InvoiceError> {
		loop {
			let mut sub = self.subscribe_single_invoice(payment_hash).await?;
			while let Some(invoice) = sub.recv().await {
				match invoice.htlc(circuit_key).map(|h| h.state) {
					None => return Err(InvoiceError::invalid_request(format_args!(
						"htlc {} is not part of invoice {}", circuit_key, payment_hash,
					))),
					Some(HtlcState::Accepted) => continue,
					Some(state) => return Ok(resolution_for(&invoice, state)),
				}
			}
			// we fell behind and were disconnected, the new subscription
			// starts with the current state
			debug!("Resubscribing to invoice {} to wait for htlc {}", payment_hash, circuit_key);
		}
	}

	/// Inform the service of a new block.
	///
	/// Accepted invoices with HTLCs getting too close to their expiry are
	/// canceled. Returns the number of canceled invoices.
	pub async fn notify_block_height(&self, height: BlockHeight) -> Result<usize, InvoiceError> {
		self.block_height.fetch_max(height, Ordering::SeqCst);

		let mut nb_canceled = 0;
		for invoice in self.store.pending_invoices()? {
			if !invoice.has_htlc_expiring(height, self.hold_expiry_delta) {
				continue;
			}

			let _lock = self.locks.lock(invoice.payment_hash()).await;
			let mut invoice = self.get_invoice(invoice.payment_hash())?;
			if invoice.has_htlc_expiring(height, self.hold_expiry_delta) {
				slog!(HoldInvoiceHtlcExpiring, payment_hash: invoice.payment_hash(), height);
				if self.cancel_locked(&mut invoice, "hold_expiry")? {
					nb_canceled += 1;
				}
			}
		}
		Ok(nb_canceled)
	}

	/// Cancel all open invoices that expired at `now`.
	pub async fn cancel_expired_invoices(&self, now: DateTime<Utc>) -> Result<usize, InvoiceError> {
		let mut nb_canceled = 0;
		for invoice in self.store.pending_invoices()? {
			if !invoice.is_expired(now) {
				continue;
			}

			let _lock = self.locks.lock(invoice.payment_hash()).await;
			let mut invoice = self.get_invoice(invoice.payment_hash())?;
			if invoice.is_expired(now) && self.cancel_locked(&mut invoice, "expired")? {
				nb_canceled += 1;
			}
		}
		Ok(nb_canceled)
	}
}

/// How a known HTLC in the given state should be resolved.
fn resolution_for(invoice: &Invoice, state: HtlcState) -> HtlcResolution {
	match state {
		HtlcState::Accepted => HtlcResolution::Held,
		HtlcState::Settled => match invoice.preimage() {
			Some(preimage) => HtlcResolution::Settled { preimage },
			None => HtlcResolution::Held,
		},
		HtlcState::Canceled => HtlcResolution::Canceled(match invoice.state() {
			InvoiceState::Canceled => CancelReason::InvoiceCanceled,
			// htlcs of unresolved invoices are only canceled by the modifier
			_ => CancelReason::InterceptorCanceledSet,
		}),
	}
}
