//! Background tasks of the daemon and their shutdown.
//!
//! The daemon can't do its job without any of its background tasks, so
//! when one of them returns before shutdown was requested, shutdown is
//! triggered. Shutdown is complete once all tasks have returned.

use std::future::Future;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;


#[derive(Clone)]
pub struct BackgroundTasks {
	shutdown: CancellationToken,
	tracker: TaskTracker,
}

impl BackgroundTasks {
	pub fn new() -> BackgroundTasks {
		BackgroundTasks {
			shutdown: CancellationToken::new(),
			tracker: TaskTracker::new(),
		}
	}

	/// The token tasks should watch to learn about shutdown.
	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	/// Run `task` until it returns.
	pub fn spawn<F>(&self, name: &'static str, task: F)
	where
		F: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		let shutdown = self.shutdown.clone();
		slog!(TaskStarted, name: name.into());
		self.tracker.spawn(async move {
			match task.await {
				Ok(()) if shutdown.is_cancelled() => slog!(TaskStopped, name: name.into()),
				Ok(()) => slog!(TaskFailed, name: name.into(), error: "returned early".into()),
				Err(e) => slog!(TaskFailed, name: name.into(), error: format!("{:#}", e)),
			}
			shutdown.cancel();
		});
	}

	/// The number of tasks that haven't returned yet.
	pub fn nb_running(&self) -> usize {
		self.tracker.len()
	}

	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Resolves once shutdown was requested.
	pub fn shutdown_signal(&self) -> WaitForCancellationFuture<'_> {
		self.shutdown.cancelled()
	}

	/// Request shutdown and wait for all tasks to return.
	///
	/// No new tasks can be spawned afterwards.
	pub async fn shutdown_wait(&self) {
		self.shutdown();
		self.tracker.close();
		self.tracker.wait().await;
	}
}
