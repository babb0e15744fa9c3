//! Fan-out of invoice updates to subscribers.
//!
//! Each subscriber gets its own bounded channel. Updates are never dropped
//! silently: a subscriber that doesn't keep up is disconnected, which ends
//! its stream once the buffered updates are consumed.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use invoices::{Invoice, PaymentHash};


struct Subscriber {
	/// None for subscribers to all invoices.
	payment_hash: Option<PaymentHash>,
	tx: mpsc::Sender<Invoice>,
}

#[derive(Default)]
struct HubInner {
	next_id: u64,
	subscribers: HashMap<u64, Subscriber>,
}

pub struct SubscriptionHub {
	inner: Arc<Mutex<HubInner>>,
	buffer_size: usize,
}

impl SubscriptionHub {
	pub fn new(buffer_size: usize) -> SubscriptionHub {
		SubscriptionHub {
			inner: Arc::new(Mutex::new(HubInner::default())),
			buffer_size: buffer_size.max(1),
		}
	}

	fn register(
		&self,
		payment_hash: Option<PaymentHash>,
		replay: VecDeque<Invoice>,
	) -> InvoiceSubscription {
		let (tx, rx) = mpsc::channel(self.buffer_size);
		let mut inner = self.inner.lock();
		inner.next_id += 1;
		let id = inner.next_id;
		inner.subscribers.insert(id, Subscriber { payment_hash, tx });
		InvoiceSubscription {
			id,
			replay,
			rx: Some(rx),
			hub: Arc::downgrade(&self.inner),
		}
	}

	/// Subscribe to the updates of a single invoice.
	///
	/// The caller has to make sure `current` is the latest version of the
	/// invoice and no update is published before this returns. The
	/// subscription yields `current` first and ends after the first
	/// snapshot in a final state.
	pub fn subscribe_single(&self, current: Invoice) -> InvoiceSubscription {
		let mut replay = VecDeque::with_capacity(1);
		let is_final = current.state().is_final();
		let payment_hash = current.payment_hash();
		replay.push_back(current);

		if is_final {
			// nothing will follow, no need to register
			let mut inner = self.inner.lock();
			inner.next_id += 1;
			InvoiceSubscription { id: inner.next_id, replay, rx: None, hub: Weak::new() }
		} else {
			self.register(Some(payment_hash), replay)
		}
	}

	/// Subscribe to all updates published after this call.
	pub fn subscribe_all(&self) -> InvoiceSubscription {
		self.register(None, VecDeque::new())
	}

	/// Publish a new version of an invoice.
	pub fn publish(&self, invoice: &Invoice) {
		let payment_hash = invoice.payment_hash();
		let is_final = invoice.state().is_final();

		let mut inner = self.inner.lock();
		inner.subscribers.retain(|id, sub| {
			if sub.payment_hash.is_some() && sub.payment_hash != Some(payment_hash) {
				return true;
			}

			match sub.tx.try_send(invoice.clone()) {
				Ok(()) => {},
				Err(mpsc::error::TrySendError::Full(_)) => {
					slog!(SubscriberLagging, subscription_id: *id,
						payment_hash: sub.payment_hash, buffer_size: self.buffer_size,
					);
					return false;
				},
				Err(mpsc::error::TrySendError::Closed(_)) => {
					trace!("Subscriber {} went away", id);
					return false;
				},
			}

			// single-invoice streams end with the final state
			!(is_final && sub.payment_hash.is_some())
		});
	}

	/// The number of active subscriptions.
	pub fn nb_subscribers(&self) -> usize {
		self.inner.lock().subscribers.len()
	}
}

/// A stream of invoice updates.
///
/// Dropping the subscription unregisters it from the hub.
pub struct InvoiceSubscription {
	id: u64,
	replay: VecDeque<Invoice>,
	rx: Option<mpsc::Receiver<Invoice>>,
	hub: Weak<Mutex<HubInner>>,
}

impl InvoiceSubscription {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Yield these invoices before any live update.
	pub fn with_replay(mut self, replay: Vec<Invoice>) -> InvoiceSubscription {
		self.replay.extend(replay);
		self
	}

	/// Wait for the next update, returns None when the stream ended.
	pub async fn recv(&mut self) -> Option<Invoice> {
		if let Some(inv) = self.replay.pop_front() {
			return Some(inv);
		}
		match self.rx {
			Some(ref mut rx) => rx.recv().await,
			None => None,
		}
	}

	fn unregister(&self) {
		if let Some(hub) = self.hub.upgrade() {
			hub.lock().subscribers.remove(&self.id);
		}
	}
}

impl Stream for InvoiceSubscription {
	type Item = Invoice;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if let Some(inv) = this.replay.pop_front() {
			return Poll::Ready(Some(inv));
		}
		match this.rx {
			Some(ref mut rx) => rx.poll_recv(cx),
			None => Poll::Ready(None),
		}
	}
}

impl Drop for InvoiceSubscription {
	fn drop(&mut self) {
		self.unregister();
	}
}

#[cfg(test)]
mod test {
	use chrono::DateTime;
	use futures::StreamExt;

	use invoices::InvoiceState;
	use invoices::test::{dummy_htlc, dummy_invoice, dummy_invoice_nb, dummy_preimage};

	use super::*;

	fn now() -> chrono::DateTime<chrono::Utc> {
		DateTime::from_timestamp(1_700_000_100, 0).unwrap()
	}

	#[tokio::test]
	async fn single_subscription_ends_on_final_state() {
		let hub = SubscriptionHub::new(8);
		let mut inv = dummy_invoice(1000);
		let mut sub = hub.subscribe_single(inv.clone());
		assert_eq!(hub.nb_subscribers(), 1);

		// updates of other invoices are not delivered
		hub.publish(&dummy_invoice_nb(5, 1000).0);

		inv.accept_htlc(dummy_htlc(1, 1000)).unwrap();
		hub.publish(&inv);
		inv.settle(dummy_preimage(), now(), || 1).unwrap();
		hub.publish(&inv);
		assert_eq!(hub.nb_subscribers(), 0);

		let states = sub.by_ref().map(|i| i.state()).collect::<Vec<_>>().await;
		assert_eq!(states, vec![InvoiceState::Open, InvoiceState::Accepted, InvoiceState::Settled]);
	}

	#[tokio::test]
	async fn subscribe_to_final_invoice() {
		let hub = SubscriptionHub::new(8);
		let mut inv = dummy_invoice(1000);
		inv.cancel(now()).unwrap();

		let mut sub = hub.subscribe_single(inv);
		assert_eq!(hub.nb_subscribers(), 0);
		assert_eq!(sub.recv().await.unwrap().state(), InvoiceState::Canceled);
		assert!(sub.recv().await.is_none());
	}

	#[tokio::test]
	async fn lagging_subscriber_is_disconnected() {
		let hub = SubscriptionHub::new(2);
		let mut all = hub.subscribe_all();
		let mut fast = hub.subscribe_all();

		for i in 1..=3 {
			hub.publish(&dummy_invoice_nb(i, 1000).0);
			assert_eq!(fast.recv().await.unwrap().add_index(), i);
		}
		assert_eq!(hub.nb_subscribers(), 1);

		// the lagging one still gets what was buffered, then the stream ends
		assert_eq!(all.recv().await.unwrap().add_index(), 1);
		assert_eq!(all.recv().await.unwrap().add_index(), 2);
		assert!(all.recv().await.is_none());
	}

	#[tokio::test]
	async fn replay_comes_first() {
		let hub = SubscriptionHub::new(8);
		let sub = hub.subscribe_all();
		// published while the replay was being fetched
		hub.publish(&dummy_invoice_nb(3, 1000).0);
		let replay = vec![dummy_invoice_nb(1, 1000).0, dummy_invoice_nb(2, 1000).0];
		let mut sub = sub.with_replay(replay);

		for i in 1..=3 {
			assert_eq!(sub.recv().await.unwrap().add_index(), i);
		}

		drop(sub);
		assert_eq!(hub.nb_subscribers(), 0);
	}
}
