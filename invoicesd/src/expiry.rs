
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::service::InvoiceService;


/// Periodically cancels open invoices that expired.
pub struct ExpiryWatcher {
	shutdown: CancellationToken,
	service: Arc<InvoiceService>,
	interval: Duration,
}

impl ExpiryWatcher {
	pub fn new(shutdown: CancellationToken, service: Arc<InvoiceService>, interval: Duration) -> Self {
		ExpiryWatcher { shutdown, service, interval }
	}

	/// Run until shutdown.
	pub async fn run(self) -> anyhow::Result<()> {
		let mut interval = tokio::time::interval(self.interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					match self.service.cancel_expired_invoices(Utc::now()).await {
						Ok(nb_expired) => slog!(ExpiryWatcherRun, nb_expired),
						// storage hiccups shouldn't take down the daemon
						Err(e) => warn!("Error canceling expired invoices: {:#}", e),
					}
				},
				_ = self.shutdown.cancelled() => {
					info!("Shutdown signal received. Exiting expiry watcher...");
					return Ok(());
				},
			}
		}
	}
}
