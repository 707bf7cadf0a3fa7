//! Connection helper for the database-backed tests.
//!
//! Those tests are `#[ignore]`d; run them with
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;

/// Migrated connection inside a transaction that is never committed.
pub fn connection() -> PgConnection {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for database tests");
    let mut conn = PgConnection::establish(&url).expect("connect to test database");
    conn.run_pending_migrations(crate::MIGRATIONS).expect("apply migrations");
    conn.begin_test_transaction().expect("begin test transaction");
    conn
}
