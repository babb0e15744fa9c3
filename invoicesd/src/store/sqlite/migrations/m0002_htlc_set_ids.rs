use anyhow::Context;

use rusqlite::Transaction;

use super::Migration;

pub struct Migration0002 {}

impl Migration for Migration0002 {

	fn name(&self) -> &str {
		"Index HTLC set ids"
	}

	fn to_version(&self) -> i64 { 2 }

	fn do_migration(&self, conn: &Transaction) -> anyhow::Result<()> {
		let query =
			"CREATE TABLE IF NOT EXISTS invoice_set_id (
				set_id TEXT PRIMARY KEY,
				payment_hash TEXT NOT NULL REFERENCES invoice(payment_hash),
				created_at DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
			);";

		conn.execute(query, ())
			.with_context(|| format!("Failed to execute migration: {}", self.summary()))?;
		Ok(())
	}
}
