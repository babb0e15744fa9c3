use anyhow::Context;

use rusqlite::Transaction;

use super::Migration;

pub struct Migration0001 {}

impl Migration for Migration0001 {

	fn name(&self) -> &str {
		"Create invoice table"
	}

	fn to_version(&self) -> i64 { 1 }

	fn do_migration(&self, conn: &Transaction) -> anyhow::Result<()> {
		let queries = [
			"CREATE TABLE IF NOT EXISTS invoice (
				payment_hash TEXT PRIMARY KEY,
				payment_addr TEXT NOT NULL UNIQUE,
				add_index INTEGER NOT NULL UNIQUE,
				settle_index INTEGER NOT NULL DEFAULT 0,
				state TEXT NOT NULL,
				invoice TEXT NOT NULL,
				created_at DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
				updated_at DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
			);",
			"CREATE INDEX IF NOT EXISTS invoice_settle_index_ix ON invoice (settle_index);",
			"CREATE INDEX IF NOT EXISTS invoice_state_ix ON invoice (state);",
		];

		for query in queries {
			conn.execute(query, ())
				.with_context(|| format!("Failed to execute migration: {}", self.summary()))?;
		}
		Ok(())
	}
}
