#[macro_use] extern crate serde;

#[macro_use]
mod macros;
mod msgs;

pub use crate::msgs::*;

use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};


/// The "target" field used for structured logging.
pub const SLOG_TARGET: &str = "invoicesd-slog";

const SLOG_ID_FIELD: &str = "slog_id";
const SLOG_DATA_FIELD: &str = "slog_data_json";

/// Trait implemented by all our structured log messages.
pub trait LogMsg: Sized + Send + fmt::Debug + Serialize + DeserializeOwned + 'static {
	const LOGID: &'static str;
	const LEVEL: log::Level;
	const MSG: &'static str;
}

/// Log the message as a record on [SLOG_TARGET].
///
/// The message is attached as JSON in the key-value pairs of the record.
/// Use the [slog!] macro instead of calling this directly.
pub fn log<T: LogMsg>(msg: &T, module: &str, file: &str, line: u32) {
	let data = serde_json::to_string(msg).unwrap_or_else(|_| "json serialization error".into());
	let kv = [(SLOG_ID_FIELD, T::LOGID), (SLOG_DATA_FIELD, data.as_str())];
	log::logger().log(&log::Record::builder()
		.args(format_args!("{}", T::MSG))
		.level(T::LEVEL)
		.target(SLOG_TARGET)
		.module_path(Some(module))
		.file(Some(file))
		.line(Some(line))
		.key_values(&kv)
		.build());
}

/// A wrapper around a [log::kv::Source] that implements [serde::Serialize].
pub struct SourceSerializeWrapper<'a>(pub &'a dyn log::kv::Source);

impl<'a> Serialize for SourceSerializeWrapper<'a> {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		use serde::ser::Error;

		struct Visitor<'a, S: Serializer>(&'a mut <S as Serializer>::SerializeMap);
		impl<'a, 'kv, S: Serializer> log::kv::VisitSource<'kv> for Visitor<'a, S> {
			fn visit_pair(
				&mut self, key: log::kv::Key<'kv>, value: log::kv::Value<'kv>,
			) -> Result<(), log::kv::Error> {
				self.0.serialize_entry(&key, &value).map_err(|e| {
					log::kv::Error::boxed(format!("serialize error: {:?}", e))
				})?;
				Ok(())
			}
		}

		let mut m = s.serialize_map(None)?;
		let mut v = Visitor::<S>(&mut m);
		self.0.visit(&mut v).map_err(S::Error::custom)?;
		m.end()
	}
}

/// A wrapper around a [log::Record] that implements [serde::Serialize].
///
/// The output can be parsed back with [ParsedRecord].
pub struct RecordSerializeWrapper<'a>(pub &'a log::Record<'a>);

impl<'a> Serialize for RecordSerializeWrapper<'a> {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		let mut m = s.serialize_map(None)?;
		m.serialize_entry("message", self.0.args())?;
		m.serialize_entry("level", &self.0.level())?;
		m.serialize_entry("target", self.0.target())?;
		if let Some(module) = self.0.module_path() {
			m.serialize_entry("module", module)?;
		}
		if let Some(file) = self.0.file() {
			m.serialize_entry("file", file)?;
		}
		if let Some(line) = self.0.line() {
			m.serialize_entry("line", &line)?;
		}
		let kv = self.0.key_values();
		if let Some(id) = kv.get(SLOG_ID_FIELD.into()) {
			m.serialize_entry(SLOG_ID_FIELD, &id)?;
		}
		if let Some(data) = kv.get(SLOG_DATA_FIELD.into()) {
			m.serialize_entry(SLOG_DATA_FIELD, &data)?;
		}
		m.end()
	}
}

#[derive(Debug)]
pub enum RecordParseError {
	WrongType,
	Json(serde_json::Error),
}

impl fmt::Display for RecordParseError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RecordParseError::WrongType => f.write_str("log record is of a different type"),
			RecordParseError::Json(e) => write!(f, "invalid json: {}", e),
		}
	}
}

impl std::error::Error for RecordParseError {}

pub fn parse_record(record: &str) -> Result<ParsedRecord<'_>, RecordParseError> {
	serde_json::from_str(record).map_err(RecordParseError::Json)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRecord<'a> {
	#[serde(borrow)]
	pub message: Cow<'a, str>,
	pub level: log::Level,
	pub target: Option<&'a str>,
	pub module: Option<&'a str>,
	pub file: Option<&'a str>,
	pub line: Option<u32>,
	pub slog_id: Option<&'a str>,
	pub slog_data_json: Option<String>,
}

impl ParsedRecord<'_> {
	/// Whether this is a structured log message
	pub fn is_slog(&self) -> bool {
		self.slog_id.is_some()
	}

	/// Check whether this log message if of the given structure log type.
	pub fn is<T: LogMsg>(&self) -> bool {
		self.slog_id == Some(T::LOGID)
	}

	/// Try to parse the log message into the given structured log type.
	pub fn try_as<T: LogMsg>(&self) -> Result<T, RecordParseError> {
		if !self.is::<T>() {
			return Err(RecordParseError::WrongType);
		}

		let json = self.slog_data_json.as_deref().unwrap_or("{}");
		serde_json::from_str(json).map_err(RecordParseError::Json)
	}
}
