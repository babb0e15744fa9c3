
use std::path::PathBuf;


/// Why the daemon could not be set up.
///
/// These are attached to [anyhow] errors so that callers can tell problems
/// the operator has to fix apart from runtime failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
	#[error("config file not found: {}", .0.display())]
	ConfigFileNotFound(PathBuf),
	#[error("invalid secret in {}: expected 32 bytes of hex", .0.display())]
	InvalidSecret(PathBuf),
}

impl SetupError {
	/// The process exit code to report this error with.
	pub fn exit_code(&self) -> i32 {
		match self {
			// EX_CONFIG
			SetupError::InvalidConfig(_) | SetupError::ConfigFileNotFound(_) => 78,
			// EX_DATAERR
			SetupError::InvalidSecret(_) => 65,
		}
	}
}

/// Return an [anyhow] error tagged with [SetupError::InvalidConfig].
#[macro_export]
macro_rules! invalid_config {
	($($arg:tt)*) => {
		Err($crate::anyhow::Error::from($crate::error::SetupError::InvalidConfig(format!($($arg)*))))
	};
}

/// Find the [SetupError] in the chain of an [anyhow] error.
pub fn setup_error(err: &anyhow::Error) -> Option<&SetupError> {
	err.chain().find_map(|e| e.downcast_ref::<SetupError>())
}

#[cfg(test)]
mod test {
	use anyhow::Context;

	use super::*;

	#[test]
	fn found_behind_context() {
		let err = Result::<(), _>::Err(SetupError::InvalidSecret("/data/node.key".into()))
			.context("failed to open daemon")
			.unwrap_err();
		assert_eq!(setup_error(&err), Some(&SetupError::InvalidSecret("/data/node.key".into())));
		assert_eq!(setup_error(&err).unwrap().exit_code(), 65);

		let err = anyhow::Error::from(std::io::Error::other("disk on fire"));
		assert_eq!(setup_error(&err), None);
	}

	#[test]
	fn display() {
		let err: anyhow::Result<()> = invalid_config!("queue_size must be at least {}", 1);
		let err = err.context("invalid configuration").unwrap_err();
		assert_eq!(format!("{:#}", err),
			"invalid configuration: invalid configuration: queue_size must be at least 1",
		);
		assert_eq!(
			SetupError::ConfigFileNotFound("/etc/invoicesd.toml".into()).to_string(),
			"config file not found: /etc/invoicesd.toml",
		);
	}
}
