//! SQL migration definitions for the content store.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: obituaries",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Obituary records; drafts and published alike
CREATE TABLE IF NOT EXISTS obituaries (
    id                    TEXT PRIMARY KEY,
    doc_type              TEXT NOT NULL,
    status                TEXT NOT NULL DEFAULT 'draft',
    claim                 TEXT NOT NULL,
    source_name           TEXT NOT NULL,
    source_url            TEXT NOT NULL,
    source_url_normalized TEXT NOT NULL,
    date                  TEXT NOT NULL,
    categories_json       TEXT NOT NULL,
    context_json          TEXT NOT NULL,
    slug                  TEXT NOT NULL UNIQUE,
    discovery_json        TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_obituaries_source_url ON obituaries(source_url_normalized);
CREATE INDEX IF NOT EXISTS idx_obituaries_created_at ON obituaries(created_at);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index drafts by status for editorial listing",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_obituaries_status ON obituaries(status, created_at);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
