
use anyhow::Context;
use rusqlite::{named_params, Connection, ErrorCode, OptionalExtension, Row, Transaction};

use invoices::{Invoice, InvoiceError, PaymentAddr, PaymentHash, SetId};


fn row_to_invoice(row: &Row<'_>) -> anyhow::Result<Invoice> {
	let json: String = row.get("invoice")?;
	Ok(serde_json::from_str(&json).context("corrupt invoice in database")?)
}

fn query_invoices(
	conn: &Connection,
	query: &str,
	params: &[(&str, &dyn rusqlite::ToSql)],
) -> anyhow::Result<Vec<Invoice>> {
	let mut statement = conn.prepare(query)?;
	let mut rows = statement.query(params)?;

	let mut ret = Vec::new();
	while let Some(row) = rows.next()? {
		ret.push(row_to_invoice(row)?);
	}
	Ok(ret)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
	matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn store_set_ids(tx: &Transaction, invoice: &Invoice) -> anyhow::Result<()> {
	let query =
		"INSERT OR IGNORE INTO invoice_set_id (set_id, payment_hash)
		VALUES (:set_id, :payment_hash)";
	let mut statement = tx.prepare(query)?;
	for set_id in invoice.set_ids() {
		statement.execute(named_params! {
			":set_id": set_id.to_string(),
			":payment_hash": invoice.payment_hash().to_string(),
		})?;
	}
	Ok(())
}

pub fn insert_invoice(tx: &Transaction, invoice: &Invoice) -> anyhow::Result<()> {
	let query =
		"INSERT INTO invoice (payment_hash, payment_addr, add_index, settle_index, state, invoice)
		VALUES (:payment_hash, :payment_addr, :add_index, :settle_index, :state, :invoice)";
	let json = serde_json::to_string(invoice).context("invoice serialization error")?;
	let res = tx.execute(query, named_params! {
		":payment_hash": invoice.payment_hash().to_string(),
		":payment_addr": invoice.payment_addr().to_string(),
		":add_index": invoice.add_index() as i64,
		":settle_index": invoice.settle_index() as i64,
		":state": invoice.state().as_str(),
		":invoice": json,
	});
	match res {
		Ok(_) => {},
		Err(e) if is_constraint_violation(&e) => {
			return Err(InvoiceError::DuplicateInvoice(invoice.payment_hash()).into());
		},
		Err(e) => return Err(e).context("failed to insert invoice"),
	}

	store_set_ids(tx, invoice)?;
	Ok(())
}

pub fn update_invoice(tx: &Transaction, invoice: &Invoice) -> anyhow::Result<()> {
	let query =
		"UPDATE invoice
		SET settle_index = :settle_index, state = :state, invoice = :invoice,
			updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
		WHERE payment_hash = :payment_hash";
	let json = serde_json::to_string(invoice).context("invoice serialization error")?;
	let nb = tx.execute(query, named_params! {
		":payment_hash": invoice.payment_hash().to_string(),
		":settle_index": invoice.settle_index() as i64,
		":state": invoice.state().as_str(),
		":invoice": json,
	})?;
	if nb == 0 {
		bail!("can't update unknown invoice {}", invoice.payment_hash());
	}

	store_set_ids(tx, invoice)?;
	Ok(())
}

pub fn get_invoice_by_hash(
	conn: &Connection,
	payment_hash: PaymentHash,
) -> anyhow::Result<Option<Invoice>> {
	let query = "SELECT invoice FROM invoice WHERE payment_hash = :payment_hash";
	let mut statement = conn.prepare(query)?;
	let json = statement.query_row(named_params! {
		":payment_hash": payment_hash.to_string(),
	}, |row| row.get::<_, String>(0)).optional()?;
	json.map(|j| serde_json::from_str(&j).context("corrupt invoice in database")).transpose()
}

pub fn get_invoice_by_payment_addr(
	conn: &Connection,
	payment_addr: PaymentAddr,
) -> anyhow::Result<Option<Invoice>> {
	let query = "SELECT invoice FROM invoice WHERE payment_addr = :payment_addr";
	let mut invoices = query_invoices(conn, query, named_params! {
		":payment_addr": payment_addr.to_string(),
	})?;
	Ok(invoices.pop())
}

pub fn get_invoice_by_set_id(conn: &Connection, set_id: SetId) -> anyhow::Result<Option<Invoice>> {
	let query =
		"SELECT i.invoice FROM invoice_set_id s
		JOIN invoice i ON i.payment_hash = s.payment_hash
		WHERE s.set_id = :set_id";
	let mut invoices = query_invoices(conn, query, named_params! {
		":set_id": set_id.to_string(),
	})?;
	Ok(invoices.pop())
}

pub fn invoices_added_since(conn: &Connection, add_index: u64) -> anyhow::Result<Vec<Invoice>> {
	let query =
		"SELECT invoice FROM invoice WHERE add_index > :add_index ORDER BY add_index ASC";
	query_invoices(conn, query, named_params! { ":add_index": add_index as i64 })
}

pub fn invoices_settled_since(
	conn: &Connection,
	settle_index: u64,
) -> anyhow::Result<Vec<Invoice>> {
	let query =
		"SELECT invoice FROM invoice
		WHERE state = 'settled' AND settle_index > :settle_index
		ORDER BY settle_index ASC";
	query_invoices(conn, query, named_params! { ":settle_index": settle_index as i64 })
}

pub fn pending_invoices(conn: &Connection) -> anyhow::Result<Vec<Invoice>> {
	let query =
		"SELECT invoice FROM invoice WHERE state IN ('open', 'accepted') ORDER BY add_index ASC";
	query_invoices(conn, query, &[])
}

pub fn last_add_index(conn: &Connection) -> anyhow::Result<u64> {
	let query = "SELECT COALESCE(MAX(add_index), 0) FROM invoice";
	let idx = conn.query_row(query, [], |row| row.get::<_, i64>(0))?;
	Ok(idx as u64)
}

pub fn last_settle_index(conn: &Connection) -> anyhow::Result<u64> {
	let query = "SELECT COALESCE(MAX(settle_index), 0) FROM invoice";
	let idx = conn.query_row(query, [], |row| row.get::<_, i64>(0))?;
	Ok(idx as u64)
}
