mod m0001_initial_version;
mod m0002_htlc_set_ids;

use anyhow::Context;
use rusqlite::{Connection, Transaction};

use m0001_initial_version::Migration0001;
use m0002_htlc_set_ids::Migration0002;

pub struct MigrationContext {}

impl MigrationContext {

	pub fn new() -> Self {
		MigrationContext {}
	}

	/// Bring the database schema up to date.
	pub fn do_all_migrations(&self, conn: &mut Connection) -> anyhow::Result<()> {
		let tx = conn.transaction().context("Failed to start transaction")?;
		self.init_migrations(&tx)?;
		tx.commit().context("Failed to commit transaction")?;

		self.try_migration(conn, &Migration0001{})?;
		self.try_migration(conn, &Migration0002{})?;
		Ok(())
	}

	/// Creates the migrations table if needed and returns the schema version.
	fn init_migrations(&self, conn: &Connection) -> anyhow::Result<i64> {
		self.create_migrations_table_if_not_exists(conn)?;
		match self.get_current_version(conn) {
			Ok(version) => Ok(version),
			Err(_) => {
				// fresh database
				self.update_version(conn, 0)?;
				Ok(0)
			}
		}
	}

	fn try_migration(
		&self,
		conn: &mut Connection,
		migration: &impl Migration,
	) -> anyhow::Result<()> {
		let tx = conn.transaction().context("Failed to init transaction")?;

		let current_version = self.get_current_version(&tx)?;
		let from_version = migration.from_version();

		if current_version == from_version {
			debug!("Performing migration {}", migration.summary());
			migration.do_migration(&tx)?;
			self.update_version(&tx, migration.to_version())?;
		} else if current_version < from_version {
			bail!("Failed to perform migration. Database is at {} for migration {}",
				current_version, migration.summary(),
			);
		} else {
			trace!("Skipping migration {}. Nothing to be done", migration.summary());
		}
		tx.commit().context("Failed to commit transaction")?;
		Ok(())
	}

	fn get_current_version(&self, conn: &Connection) -> anyhow::Result<i64> {
		const ERR_MSG: &str = "Failed to get current schema version from database";

		let query = "SELECT value FROM migrations ORDER BY value DESC LIMIT 1";
		let mut statement = conn.prepare(query).context(ERR_MSG)?;
		let mut rows = statement.query(()).context(ERR_MSG)?;

		let row = rows.next().context(ERR_MSG)?
			.context("the current schema version is not defined in the database")?;
		Ok(row.get(0).context(ERR_MSG)?)
	}

	fn update_version(&self, conn: &Connection, new_version: i64) -> anyhow::Result<i64> {
		const ERR_MSG: &str = "Failed to update schema version";

		let query = "INSERT INTO migrations (value) VALUES (?1)";
		let mut statement = conn.prepare(query).context(ERR_MSG)?;
		statement.execute([new_version]).context(ERR_MSG)?;
		Ok(new_version)
	}

	fn create_migrations_table_if_not_exists(&self, conn: &Connection) -> anyhow::Result<()> {
		let query =
			"CREATE TABLE IF NOT EXISTS migrations (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				created_at DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
				value INTEGER NOT NULL
			)";
		conn.execute(query, ()).context("Failed to create migration table")?;
		Ok(())
	}
}

trait Migration {
	fn name(&self) -> &str;
	fn to_version(&self) -> i64;

	fn from_version(&self) -> i64 {
		self.to_version() - 1
	}

	/// Performs the migration script within the transaction.
	fn do_migration(&self, conn: &Transaction) -> anyhow::Result<()>;

	fn summary(&self) -> String {
		format!("{}->{}:'{}'", self.from_version(), self.to_version(), self.name())
	}
}


#[cfg(test)]
mod test {
	use super::*;

	fn table_exists(conn: &Connection, table_name: &str) -> bool {
		let query = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?";
		let mut statement = conn.prepare(query).unwrap();
		let mut rows = statement.query((table_name,)).unwrap();
		rows.next().unwrap().is_some()
	}

	fn current_version(conn: &Connection) -> i64 {
		MigrationContext::new().get_current_version(conn).unwrap()
	}

	#[test]
	fn set_schema_version() {
		let conn = Connection::open_in_memory().unwrap();
		let migs = MigrationContext::new();

		migs.init_migrations(&conn).unwrap();
		assert_eq!(current_version(&conn), 0);

		migs.update_version(&conn, 1).unwrap();
		assert_eq!(current_version(&conn), 1);
	}

	#[test]
	fn all_migrations() {
		let mut conn = Connection::open_in_memory().unwrap();
		let migs = MigrationContext::new();

		migs.do_all_migrations(&mut conn).unwrap();
		assert_eq!(current_version(&conn), 2);
		assert!(table_exists(&conn, "invoice"));
		assert!(table_exists(&conn, "invoice_set_id"));

		// running them again is a no-op
		migs.do_all_migrations(&mut conn).unwrap();
		assert_eq!(current_version(&conn), 2);
	}

	struct BadMigration {}

	impl Migration for BadMigration {
		fn name(&self) -> &str { "Bad migration" }
		fn to_version(&self) -> i64 { 1 }
		fn do_migration(&self, tx: &Transaction) -> anyhow::Result<()> {
			tx.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, value INTEGER)", ())?;
			tx.execute("NOT VALID SQL", ())?;
			Ok(())
		}
	}

	#[test]
	fn bad_migration_is_rolled_back() {
		let mut conn = Connection::open_in_memory().unwrap();
		let migs = MigrationContext::new();

		migs.init_migrations(&conn).unwrap();
		migs.try_migration(&mut conn, &BadMigration{})
			.expect_err("the bad migration should fail");

		assert_eq!(current_version(&conn), 0);
		assert!(!table_exists(&conn, "test"));
	}
}
