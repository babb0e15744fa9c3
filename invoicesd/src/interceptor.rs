//! Arbitration of incoming HTLCs by an external modifier client.
//!
//! At most one client is attached at a time. For every HTLC paying to a
//! known invoice a [HtlcModifyRequest] is queued towards the client and the
//! HTLC waits for the [HtlcModifyResponse] with the same circuit key. When
//! the client doesn't answer in time or goes away, the HTLC is canceled.
//!
//! An HTLC that arrives again while its circuit key is still pending is not
//! sent to the client a second time, it waits for the same response.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use invoices::{CancelReason, CircuitKey, HtlcModifyRequest, HtlcModifyResponse, InvoiceError};

use crate::config;


/// What happened to an intercepted HTLC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
	/// No client is attached, the HTLC proceeds unmodified.
	NoClient,
	Response(HtlcModifyResponse),
	Canceled(CancelReason),
}

/// A task waiting in [HtlcInterceptor::intercept].
struct Waiter {
	id: u64,
	tx: oneshot::Sender<HtlcModifyResponse>,
}

struct ClientSlot {
	id: u64,
	requests: mpsc::Sender<HtlcModifyRequest>,
	/// The first waiter of each key is the one whose request was queued.
	pending: HashMap<CircuitKey, Vec<Waiter>>,
}

impl ClientSlot {
	/// Remove a single waiter, leaving others on the same key in place.
	fn remove_waiter(&mut self, circuit_key: CircuitKey, waiter_id: u64) {
		if let Some(waiters) = self.pending.get_mut(&circuit_key) {
			waiters.retain(|w| w.id != waiter_id);
			if waiters.is_empty() {
				self.pending.remove(&circuit_key);
			}
		}
	}
}

type Slot = Mutex<Option<ClientSlot>>;

pub struct HtlcInterceptor {
	slot: Arc<Slot>,
	next_client_id: AtomicU64,
	next_waiter_id: AtomicU64,
	timeout: Duration,
	queue_size: usize,
	required: bool,
}

impl HtlcInterceptor {
	pub fn new(cfg: &config::HtlcModifier) -> HtlcInterceptor {
		HtlcInterceptor {
			slot: Arc::new(Mutex::new(None)),
			next_client_id: AtomicU64::new(1),
			next_waiter_id: AtomicU64::new(1),
			timeout: cfg.timeout,
			queue_size: cfg.queue_size.max(1),
			required: cfg.required,
		}
	}

	/// Attach a new modifier client.
	pub fn register(&self) -> Result<HtlcModifierClient, InvoiceError> {
		let mut slot = self.slot.lock();
		if slot.is_some() {
			return Err(InvoiceError::InterceptorAlreadyRegistered);
		}

		let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::channel(self.queue_size);
		*slot = Some(ClientSlot { id, requests: tx, pending: HashMap::new() });
		slog!(HtlcModifierRegistered, client_id: id);

		Ok(HtlcModifierClient {
			id,
			requests: rx,
			slot: Arc::downgrade(&self.slot),
		})
	}

	pub fn is_registered(&self) -> bool {
		self.slot.lock().is_some()
	}

	/// Submit the HTLC to the client and wait for its verdict.
	pub async fn intercept(&self, req: HtlcModifyRequest) -> InterceptOutcome {
		let circuit_key = req.exit_htlc_circuit_key;
		let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();

		let client_id = {
			let mut slot = self.slot.lock();
			let client = match slot.as_mut() {
				Some(c) => c,
				None if self.required => {
					return InterceptOutcome::Canceled(CancelReason::InterceptorRequired);
				},
				None => return InterceptOutcome::NoClient,
			};

			if let Some(waiters) = client.pending.get_mut(&circuit_key) {
				slog!(HtlcModifierDuplicateRequest, circuit_key, nb_waiting: waiters.len());
				waiters.push(Waiter { id: waiter_id, tx });
			} else {
				match client.requests.try_send(req) {
					Ok(()) => {},
					Err(mpsc::error::TrySendError::Full(_)) => {
						slog!(HtlcModifierQueueFull, circuit_key);
						return InterceptOutcome::Canceled(CancelReason::InterceptorQueueFull);
					},
					Err(mpsc::error::TrySendError::Closed(_)) => {
						return InterceptOutcome::Canceled(CancelReason::InterceptorDisconnected);
					},
				}
				client.pending.insert(circuit_key, vec![Waiter { id: waiter_id, tx }]);
			}
			client.id
		};

		match self.wait_response(rx).await {
			Ok(Some(resp)) => InterceptOutcome::Response(resp),
			// the sender is dropped when the client goes away
			Ok(None) => InterceptOutcome::Canceled(CancelReason::InterceptorDisconnected),
			Err(_timeout) => {
				if let Some(client) = self.slot.lock().as_mut() {
					if client.id == client_id {
						client.remove_waiter(circuit_key, waiter_id);
					}
				}
				slog!(HtlcModifierTimeout, circuit_key);
				InterceptOutcome::Canceled(CancelReason::InterceptorTimeout)
			},
		}
	}

	/// Fails with [InvoiceError::InterceptorTimeout], None if the client left.
	async fn wait_response(
		&self,
		rx: oneshot::Receiver<HtlcModifyResponse>,
	) -> Result<Option<HtlcModifyResponse>, InvoiceError> {
		match tokio::time::timeout(self.timeout, rx).await {
			Ok(res) => Ok(res.ok()),
			Err(_) => Err(InvoiceError::InterceptorTimeout),
		}
	}
}

/// The attached modifier client.
///
/// Requests are received with [HtlcModifierClient::recv] or by using the
/// client as a [Stream]. Dropping the client detaches it, all HTLCs still
/// waiting for a response are canceled.
pub struct HtlcModifierClient {
	id: u64,
	requests: mpsc::Receiver<HtlcModifyRequest>,
	slot: Weak<Slot>,
}

impl HtlcModifierClient {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub async fn recv(&mut self) -> Option<HtlcModifyRequest> {
		self.requests.recv().await
	}

	/// Resolve a pending HTLC, including its duplicates.
	///
	/// Returns false if no HTLC with this circuit key is waiting, in which
	/// case the response is ignored.
	pub fn respond(&self, resp: HtlcModifyResponse) -> bool {
		let waiters = self.slot.upgrade().and_then(|slot| {
			let mut guard = slot.lock();
			let client = guard.as_mut().filter(|c| c.id == self.id)?;
			client.pending.remove(&resp.circuit_key)
		});

		match waiters {
			Some(waiters) => {
				let mut delivered = false;
				for waiter in waiters {
					delivered |= waiter.tx.send(resp).is_ok();
				}
				delivered
			},
			None => {
				slog!(HtlcModifierUnknownResponse, circuit_key: resp.circuit_key);
				false
			},
		}
	}
}

impl Stream for HtlcModifierClient {
	type Item = HtlcModifyRequest;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().requests.poll_recv(cx)
	}
}

impl Drop for HtlcModifierClient {
	fn drop(&mut self) {
		let Some(slot) = self.slot.upgrade() else { return };
		let mut slot = slot.lock();
		if slot.as_ref().map(|c| c.id) == Some(self.id) {
			if let Some(client) = slot.take() {
				slog!(HtlcModifierDisconnected, client_id: self.id, nb_pending: client.pending.len());
			}
		}
	}
}

#[cfg(test)]
mod test {
	use std::collections::BTreeMap;

	use futures::FutureExt;

	use invoices::test::dummy_invoice;

	use super::*;

	fn cfg(timeout: Duration, required: bool, queue_size: usize) -> config::HtlcModifier {
		config::HtlcModifier { timeout, required, queue_size }
	}

	fn request(htlc_id: u64) -> HtlcModifyRequest {
		HtlcModifyRequest {
			invoice: dummy_invoice(1000),
			exit_htlc_circuit_key: CircuitKey::new(1, htlc_id),
			exit_htlc_amt_msat: 500,
			exit_htlc_expiry: 1000,
			current_height: 100,
			exit_htlc_wire_custom_records: BTreeMap::new(),
		}
	}

	#[tokio::test]
	async fn without_client() {
		let icpt = HtlcInterceptor::new(&cfg(Duration::from_secs(1), false, 4));
		assert_eq!(icpt.intercept(request(1)).await, InterceptOutcome::NoClient);

		let icpt = HtlcInterceptor::new(&cfg(Duration::from_secs(1), true, 4));
		assert_eq!(
			icpt.intercept(request(1)).await,
			InterceptOutcome::Canceled(CancelReason::InterceptorRequired),
		);
	}

	#[tokio::test]
	async fn single_client_only() {
		let icpt = HtlcInterceptor::new(&cfg(Duration::from_secs(1), false, 4));
		let client = icpt.register().unwrap();
		assert!(matches!(icpt.register(), Err(InvoiceError::InterceptorAlreadyRegistered)));
		drop(client);
		assert!(!icpt.is_registered());
		icpt.register().expect("slot is free again");
	}

	#[tokio::test]
	async fn responses_matched_by_circuit_key() {
		let icpt = Arc::new(HtlcInterceptor::new(&cfg(Duration::from_secs(5), false, 4)));
		let mut client = icpt.register().unwrap();

		let h1 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		let h2 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(2)).await }
		});

		let r1 = client.recv().await.unwrap();
		let r2 = client.recv().await.unwrap();
		let mut keys = vec![r1.exit_htlc_circuit_key, r2.exit_htlc_circuit_key];
		keys.sort();
		assert_eq!(keys, vec![CircuitKey::new(1, 1), CircuitKey::new(1, 2)]);

		// answer in reverse order
		assert!(client.respond(HtlcModifyResponse::cancel(CircuitKey::new(1, 2))));
		assert!(client.respond(HtlcModifyResponse::with_amount(CircuitKey::new(1, 1), 600)));
		assert!(!client.respond(HtlcModifyResponse::accept(CircuitKey::new(9, 9))));

		assert_eq!(
			h1.await.unwrap(),
			InterceptOutcome::Response(HtlcModifyResponse::with_amount(CircuitKey::new(1, 1), 600)),
		);
		assert_eq!(
			h2.await.unwrap(),
			InterceptOutcome::Response(HtlcModifyResponse::cancel(CircuitKey::new(1, 2))),
		);
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_cancels() {
		let icpt = HtlcInterceptor::new(&cfg(Duration::from_secs(30), false, 4));
		let mut client = icpt.register().unwrap();

		let outcome = icpt.intercept(request(1)).await;
		assert_eq!(outcome, InterceptOutcome::Canceled(CancelReason::InterceptorTimeout));

		// a late response is ignored
		let req = client.recv().await.unwrap();
		assert!(!client.respond(HtlcModifyResponse::accept(req.exit_htlc_circuit_key)));
	}

	#[tokio::test(start_paused = true)]
	async fn duplicate_htlc_shares_response() {
		let icpt = Arc::new(HtlcInterceptor::new(&cfg(Duration::from_secs(30), false, 4)));
		let mut client = icpt.register().unwrap();

		let h1 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		let req = client.recv().await.unwrap();
		let h2 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		tokio::time::sleep(Duration::from_millis(10)).await;

		// the client only sees the htlc once
		assert!(client.recv().now_or_never().is_none());
		let accept = HtlcModifyResponse::accept(req.exit_htlc_circuit_key);
		assert!(client.respond(accept));
		assert_eq!(h1.await.unwrap(), InterceptOutcome::Response(accept));
		assert_eq!(h2.await.unwrap(), InterceptOutcome::Response(accept));
		assert!(!client.respond(accept));
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_leaves_duplicate_waiting() {
		let icpt = Arc::new(HtlcInterceptor::new(&cfg(Duration::from_secs(30), false, 4)));
		let mut client = icpt.register().unwrap();

		let h1 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		let req = client.recv().await.unwrap();
		tokio::time::sleep(Duration::from_secs(10)).await;
		let h2 = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		tokio::time::sleep(Duration::from_secs(25)).await;

		assert_eq!(h1.await.unwrap(), InterceptOutcome::Canceled(CancelReason::InterceptorTimeout));
		let accept = HtlcModifyResponse::accept(req.exit_htlc_circuit_key);
		assert!(client.respond(accept));
		assert_eq!(h2.await.unwrap(), InterceptOutcome::Response(accept));
	}

	#[tokio::test]
	async fn disconnect_cancels_pending() {
		let icpt = Arc::new(HtlcInterceptor::new(&cfg(Duration::from_secs(60), false, 4)));
		let mut client = icpt.register().unwrap();

		let h = tokio::spawn({
			let icpt = icpt.clone();
			async move { icpt.intercept(request(1)).await }
		});
		client.recv().await.unwrap();
		drop(client);

		assert_eq!(
			h.await.unwrap(),
			InterceptOutcome::Canceled(CancelReason::InterceptorDisconnected),
		);
	}

	#[tokio::test]
	async fn full_queue_cancels() {
		let icpt = HtlcInterceptor::new(&cfg(Duration::from_secs(60), false, 1));
		let _client = icpt.register().unwrap();

		let first = icpt.intercept(request(1));
		tokio::pin!(first);
		// poll once so the request gets queued
		assert!(futures::poll!(first.as_mut()).is_pending());

		assert_eq!(
			icpt.intercept(request(2)).await,
			InterceptOutcome::Canceled(CancelReason::InterceptorQueueFull),
		);
	}
}
