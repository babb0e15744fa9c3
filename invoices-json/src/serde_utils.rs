use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;


/// Integers as decimal strings, numbers are accepted when deserializing.
pub mod u64_string {
	use super::*;

	pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
		s.collect_str(v)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
		struct U64Visitor;
		impl<'de> Visitor<'de> for U64Visitor {
			type Value = u64;

			fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
				f.write_str("an unsigned integer as string or number")
			}

			fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
				Ok(v)
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
				if v.is_empty() {
					return Ok(0);
				}
				v.parse().map_err(E::custom)
			}
		}

		d.deserialize_any(U64Visitor)
	}

	pub mod opt {
		use super::*;

		pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
			match v {
				Some(v) => s.collect_str(v),
				None => s.serialize_none(),
			}
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
			#[derive(Deserialize)]
			struct Wrap(#[serde(with = "super")] u64);

			let v = <Option<Wrap> as serde::Deserialize>::deserialize(d)?;
			Ok(v.map(|w| w.0))
		}
	}
}

/// Bytes in hexadecimal format.
pub mod hex {
	use super::*;
	use bitcoin::hex::{DisplayHex, FromHex};

	pub fn serialize<S: Serializer>(b: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
		s.collect_str(&b.as_hex())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let hex: String = serde::Deserialize::deserialize(d)?;
		FromHex::from_hex(&hex).map_err(de::Error::custom)
	}

	/// A map of TLV records, keyed by type.
	pub mod records {
		use super::*;
		use std::collections::BTreeMap;

		pub fn serialize<S: Serializer>(
			m: &BTreeMap<u64, Vec<u8>>,
			s: S,
		) -> Result<S::Ok, S::Error> {
			s.collect_map(m.iter().map(|(k, v)| (k.to_string(), v.to_lower_hex_string())))
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			d: D,
		) -> Result<BTreeMap<u64, Vec<u8>>, D::Error> {
			let raw: BTreeMap<String, String> = serde::Deserialize::deserialize(d)?;
			raw.into_iter().map(|(k, v)| {
				let key = k.parse::<u64>().map_err(de::Error::custom)?;
				let value = FromHex::from_hex(&v).map_err(de::Error::custom)?;
				Ok((key, value))
			}).collect()
		}
	}
}
