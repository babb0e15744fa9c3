//! SQLite storage backend.
//!
//! Invoices are stored as JSON blobs next to the columns needed to find them
//! again: payment hash, payment address, add and settle index and state.
//! Set ids of HTLCs are kept in a separate table.

mod migrations;
mod query;


use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::Connection;

use invoices::{Invoice, PaymentAddr, PaymentHash, SetId};

use super::InvoiceStore;

/// An [InvoiceStore] backed by an SQLite database at the given path.
#[derive(Clone)]
pub struct SqliteStore {
	connection_string: PathBuf,
}

impl SqliteStore {
	/// Open the database, creating it and running migrations if needed.
	pub fn open(db_file: impl AsRef<Path>) -> anyhow::Result<SqliteStore> {
		let path = db_file.as_ref().to_path_buf();

		debug!("Opening database at {}", path.display());
		let mut conn = Connection::open(&path)
			.with_context(|| format!("Error connecting to database {}", path.display()))?;

		let migrations = migrations::MigrationContext::new();
		migrations.do_all_migrations(&mut conn)?;

		Ok(SqliteStore { connection_string: path })
	}

	fn connect(&self) -> anyhow::Result<Connection> {
		Connection::open(&self.connection_string)
			.with_context(|| format!("Error connecting to database {}", self.connection_string.display()))
	}
}

impl InvoiceStore for SqliteStore {
	fn insert_invoice(&self, invoice: &Invoice) -> anyhow::Result<()> {
		let mut conn = self.connect()?;
		let tx = conn.transaction()?;
		query::insert_invoice(&tx, invoice)?;
		tx.commit()?;
		Ok(())
	}

	fn update_invoice(&self, invoice: &Invoice) -> anyhow::Result<()> {
		let mut conn = self.connect()?;
		let tx = conn.transaction()?;
		query::update_invoice(&tx, invoice)?;
		tx.commit()?;
		Ok(())
	}

	fn get_invoice_by_hash(&self, payment_hash: PaymentHash) -> anyhow::Result<Option<Invoice>> {
		let conn = self.connect()?;
		query::get_invoice_by_hash(&conn, payment_hash)
	}

	fn get_invoice_by_payment_addr(
		&self,
		payment_addr: PaymentAddr,
	) -> anyhow::Result<Option<Invoice>> {
		let conn = self.connect()?;
		query::get_invoice_by_payment_addr(&conn, payment_addr)
	}

	fn get_invoice_by_set_id(&self, set_id: SetId) -> anyhow::Result<Option<Invoice>> {
		let conn = self.connect()?;
		query::get_invoice_by_set_id(&conn, set_id)
	}

	fn invoices_added_since(&self, add_index: u64) -> anyhow::Result<Vec<Invoice>> {
		let conn = self.connect()?;
		query::invoices_added_since(&conn, add_index)
	}

	fn invoices_settled_since(&self, settle_index: u64) -> anyhow::Result<Vec<Invoice>> {
		let conn = self.connect()?;
		query::invoices_settled_since(&conn, settle_index)
	}

	fn pending_invoices(&self) -> anyhow::Result<Vec<Invoice>> {
		let conn = self.connect()?;
		query::pending_invoices(&conn)
	}

	fn last_add_index(&self) -> anyhow::Result<u64> {
		let conn = self.connect()?;
		query::last_add_index(&conn)
	}

	fn last_settle_index(&self) -> anyhow::Result<u64> {
		let conn = self.connect()?;
		query::last_settle_index(&conn)
	}
}

#[cfg(test)]
pub(crate) mod helpers {
	use std::path::PathBuf;
	use std::str::FromStr;

	use rusqlite::Connection;

	/// Creates an in-memory sqlite connection.
	///
	/// The returned connection keeps the database alive, it is deleted
	/// once all connections are dropped.
	pub fn in_memory_db() -> (PathBuf, Connection) {
		use rand::{distr, Rng};

		// tests share the same cache, so every database needs a unique name
		let filename: String = rand::rng().sample_iter(distr::Alphanumeric)
			.take(16).map(char::from).collect();

		let connection_string = format!("file:{}?mode=memory&cache=shared", filename);
		let pathbuf = PathBuf::from_str(&connection_string).unwrap();

		let conn = Connection::open(pathbuf.clone()).unwrap();
		(pathbuf, conn)
	}
}

#[cfg(test)]
mod test {
	use invoices::test::dummy_invoice_nb;

	use super::*;
	use super::helpers::in_memory_db;

	#[test]
	fn sqlite_store() {
		let (cs, _conn) = in_memory_db();
		let store = SqliteStore::open(cs).unwrap();
		crate::store::test::check_store_behavior(&store);
	}

	#[test]
	fn reopen_keeps_invoices() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("invoices.sqlite");
		let (inv, _) = dummy_invoice_nb(7, 1000);

		let store = SqliteStore::open(&path).unwrap();
		store.insert_invoice(&inv).unwrap();
		drop(store);

		let store = SqliteStore::open(&path).unwrap();
		assert_eq!(store.get_invoice_by_hash(inv.payment_hash()).unwrap(), Some(inv));
		assert_eq!(store.last_add_index().unwrap(), 7);
	}
}
