//! Output database schema definitions

pub const DROP_ACTIVE_USERS: &str = r#"DROP TABLE IF EXISTS "active_users""#;

pub const CREATE_ACTIVE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS "active_users" (
    "date" TEXT,
    "country" TEXT,
    "users" INTEGER
)
"#;

pub const CREATE_INDEX_DATE: &str =
    r#"CREATE INDEX IF NOT EXISTS "active_users-date_idx" ON "active_users" ("date")"#;

pub const INSERT_ACTIVE_USERS: &str =
    "INSERT INTO active_users (date, country, users) VALUES (?, ?, ?)";
