//! Handlers for the invoices RPC surface.
//!
//! Each handler takes the JSON message of the call, translates it into the
//! service's types and back. The transport itself lives elsewhere.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use invoices::{InvoiceError, InvoiceRequest};
use invoices_json as json;

use crate::service::InvoiceService;


pub type InvoiceStream = Box<dyn Stream<Item = json::Invoice> + Unpin + Send + 'static>;

pub type HtlcModifyRequestStream = Box<
	dyn Stream<Item = json::HtlcModifyRequest> + Unpin + Send + 'static
>;

#[derive(Clone)]
pub struct InvoicesRpc {
	srv: Arc<InvoiceService>,
}

impl InvoicesRpc {
	pub fn new(srv: Arc<InvoiceService>) -> InvoicesRpc {
		InvoicesRpc { srv }
	}

	pub async fn add_hold_invoice(
		&self,
		req: json::AddHoldInvoiceRequest,
	) -> Result<json::AddHoldInvoiceResp, InvoiceError> {
		let params = InvoiceRequest::try_from(req.params)?;
		let res = self.srv.add_hold_invoice(req.hash, params).await?;
		Ok(json::AddHoldInvoiceResp {
			payment_request: res.payment_request,
			add_index: res.add_index,
			payment_addr: res.payment_addr,
		})
	}

	pub async fn add_invoice(
		&self,
		req: json::AddInvoiceRequest,
	) -> Result<json::AddInvoiceResp, InvoiceError> {
		let params = InvoiceRequest::try_from(req.params)?;
		let res = self.srv.add_invoice(params).await?;
		Ok(json::AddInvoiceResp {
			r_hash: res.payment_hash,
			payment_request: res.payment_request,
			add_index: res.add_index,
			payment_addr: res.payment_addr,
		})
	}

	pub async fn settle_invoice(
		&self,
		req: json::SettleInvoiceMsg,
	) -> Result<json::SettleInvoiceResp, InvoiceError> {
		self.srv.settle_invoice(req.preimage).await?;
		Ok(json::SettleInvoiceResp {})
	}

	pub async fn cancel_invoice(
		&self,
		req: json::CancelInvoiceMsg,
	) -> Result<json::CancelInvoiceResp, InvoiceError> {
		self.srv.cancel_invoice(req.payment_hash).await?;
		Ok(json::CancelInvoiceResp {})
	}

	pub async fn lookup_invoice(
		&self,
		req: json::LookupInvoiceMsg,
	) -> Result<json::Invoice, InvoiceError> {
		let invoice_ref = req.invoice_ref()?;
		let invoice = self.srv.lookup_invoice(invoice_ref, req.lookup_modifier.into()).await?;
		Ok(invoice.into())
	}

	pub async fn subscribe_single_invoice(
		&self,
		req: json::SubscribeSingleInvoiceRequest,
	) -> Result<InvoiceStream, InvoiceError> {
		let sub = self.srv.subscribe_single_invoice(req.r_hash).await?;
		Ok(Box::new(sub.map(json::Invoice::from)))
	}

	pub fn subscribe_invoices(
		&self,
		req: json::SubscribeInvoicesRequest,
	) -> Result<InvoiceStream, InvoiceError> {
		let sub = self.srv.subscribe_invoices(req.add_index, req.settle_index)?;
		Ok(Box::new(sub.map(json::Invoice::from)))
	}

	/// Attach a modifier client that sends its responses on `responses`.
	///
	/// The client is detached when either the response stream ends or the
	/// returned request stream is dropped.
	pub fn htlc_modifier<S>(&self, mut responses: S) -> Result<HtlcModifyRequestStream, InvoiceError>
	where
		S: Stream<Item = json::HtlcModifyResponse> + Unpin + Send + 'static,
	{
		let mut client = self.srv.htlc_modifier()?;
		let (tx, rx) = mpsc::channel(1);

		tokio::spawn(async move {
			loop {
				tokio::select! {
					req = client.recv() => match req {
						Some(req) => {
							if tx.send(json::HtlcModifyRequest::from(&req)).await.is_err() {
								break;
							}
						},
						None => break,
					},
					resp = responses.next() => match resp {
						Some(resp) => {
							client.respond(resp.into());
						},
						None => break,
					},
					_ = tx.closed() => break,
				}
			}
			debug!("HTLC modifier stream of client {} closed", client.id());
		});

		Ok(Box::new(ReceiverStream::new(rx)))
	}
}
