
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStarted {
	pub network: String,
	pub node_pubkey: String,
}
impl_slog!(DaemonStarted, Info, "invoicesd started");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonTerminated {}
impl_slog!(DaemonTerminated, Info, "invoicesd terminated: shutdown completed");


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarted {
	pub name: String,
}
impl_slog!(TaskStarted, Trace, "background task started");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStopped {
	pub name: String,
}
impl_slog!(TaskStopped, Trace, "background task stopped");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailed {
	pub name: String,
	pub error: String,
}
impl_slog!(TaskFailed, Error, "background task stopped unexpectedly, shutting down");
