//! libSQL-backed content store for obituary records.
//!
//! [`LibsqlStore`] talks either to a remote libSQL service (production, the
//! store outlives any pipeline process) or to a local database file
//! (development and tests). The pipeline only sees the [`ContentStore`]
//! trait: existence checks and create-or-replace writes.

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use tracing::{debug, instrument};

use obituary_shared::{
    ObituaryDraft, ObituaryError, Result, StoreCredentials, normalize_source_url,
};

/// Slugs and normalized source URLs already present in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingKeys {
    pub slugs: HashSet<String>,
    pub urls: HashSet<String>,
}

impl ExistingKeys {
    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty() && self.urls.is_empty()
    }
}

/// What the pipeline needs from the content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;

    /// Which of `slugs` / normalized `urls` already exist, in one query.
    async fn existing_keys(&self, slugs: &[String], urls: &[String]) -> Result<ExistingKeys>;

    /// Idempotently write a draft keyed by `draft.id`. Returns the id.
    async fn create_or_replace(&self, draft: &ObituaryDraft) -> Result<String>;
}

/// A stored record as listed for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObituary {
    pub id: String,
    pub status: String,
    pub claim: String,
    pub source_name: String,
    pub source_url: String,
    pub date: String,
    pub slug: String,
    pub created_at: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct LibsqlStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl LibsqlStore {
    /// Open whichever store the credentials point at.
    pub async fn connect(credentials: &StoreCredentials) -> Result<Self> {
        match credentials {
            StoreCredentials::Remote { url, auth_token } => {
                Self::open_remote(url, auth_token).await
            }
            StoreCredentials::Local { path } => Self::open(path).await,
        }
    }

    /// Open or create a local database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ObituaryError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ObituaryError::Storage(e.to_string()))?;

        Self::from_database(db).await
    }

    /// Connect to a remote libSQL service.
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| ObituaryError::Storage(format!("{url}: {e}")))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| ObituaryError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ObituaryError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Operator queries
    // -----------------------------------------------------------------------

    /// Look up a record by slug.
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<StoredObituary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, claim, source_name, source_url, date, slug, created_at
                 FROM obituaries WHERE slug = ?1",
                params![slug],
            )
            .await
            .map_err(|e| ObituaryError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_stored(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ObituaryError::Storage(e.to_string())),
        }
    }

    /// Most recently created records first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<StoredObituary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, claim, source_name, source_url, date, slug, created_at
                 FROM obituaries ORDER BY created_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| ObituaryError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_stored(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl ContentStore for LibsqlStore {
    async fn ping(&self) -> Result<()> {
        let mut rows = self
            .conn
            .query("SELECT 1", params![])
            .await
            .map_err(|e| ObituaryError::Storage(format!("store unreachable: {e}")))?;
        rows.next()
            .await
            .map_err(|e| ObituaryError::Storage(format!("store unreachable: {e}")))?;
        Ok(())
    }

    #[instrument(skip_all, fields(slugs = slugs.len(), urls = urls.len()))]
    async fn existing_keys(&self, slugs: &[String], urls: &[String]) -> Result<ExistingKeys> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::with_capacity(slugs.len() + urls.len());

        if !slugs.is_empty() {
            clauses.push(format!("slug IN ({})", placeholders(values.len(), slugs.len())));
            values.extend(slugs.iter().map(|s| Value::Text(s.clone())));
        }
        if !urls.is_empty() {
            clauses.push(format!(
                "source_url_normalized IN ({})",
                placeholders(values.len(), urls.len())
            ));
            values.extend(urls.iter().map(|u| Value::Text(u.clone())));
        }
        if clauses.is_empty() {
            return Ok(ExistingKeys::default());
        }

        let sql = format!(
            "SELECT slug, source_url_normalized FROM obituaries WHERE {}",
            clauses.join(" OR ")
        );
        let mut rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .map_err(|e| ObituaryError::Storage(e.to_string()))?;

        let mut existing = ExistingKeys::default();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    existing.slugs.insert(
                        row.get::<String>(0)
                            .map_err(|e| ObituaryError::Storage(e.to_string()))?,
                    );
                    existing.urls.insert(
                        row.get::<String>(1)
                            .map_err(|e| ObituaryError::Storage(e.to_string()))?,
                    );
                }
                Ok(None) => break,
                Err(e) => return Err(ObituaryError::Storage(e.to_string())),
            }
        }

        debug!(
            slugs = existing.slugs.len(),
            urls = existing.urls.len(),
            "existing keys found"
        );
        Ok(existing)
    }

    async fn create_or_replace(&self, draft: &ObituaryDraft) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let categories = serde_json::to_string(&draft.categories)
            .map_err(|e| ObituaryError::Storage(format!("encode categories: {e}")))?;
        let context = serde_json::to_string(&draft.context)
            .map_err(|e| ObituaryError::Storage(format!("encode context: {e}")))?;
        let discovery = serde_json::to_string(&draft.discovery)
            .map_err(|e| ObituaryError::Storage(format!("encode discovery: {e}")))?;
        let normalized_url = normalize_source_url(&draft.source_url);
        let date = draft.date.to_string();

        self.conn
            .execute(
                "INSERT INTO obituaries (id, doc_type, status, claim, source_name, source_url,
                    source_url_normalized, date, categories_json, context_json, slug,
                    discovery_json, created_at, updated_at)
                 VALUES (?1, ?2, 'draft', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                   doc_type = excluded.doc_type,
                   claim = excluded.claim,
                   source_name = excluded.source_name,
                   source_url = excluded.source_url,
                   source_url_normalized = excluded.source_url_normalized,
                   date = excluded.date,
                   categories_json = excluded.categories_json,
                   context_json = excluded.context_json,
                   slug = excluded.slug,
                   discovery_json = excluded.discovery_json,
                   updated_at = excluded.updated_at",
                params![
                    draft.id.as_str(),
                    draft.doc_type.as_str(),
                    draft.claim.as_str(),
                    draft.source_name.as_str(),
                    draft.source_url.as_str(),
                    normalized_url.as_str(),
                    date.as_str(),
                    categories.as_str(),
                    context.as_str(),
                    draft.slug.as_str(),
                    discovery.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| ObituaryError::Storage(format!("{}: {e}", draft.id)))?;

        Ok(draft.id.clone())
    }
}

/// `?n, ?n+1, ...` for `count` positional parameters after `offset` used ones.
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a database row to a [`StoredObituary`].
fn row_to_stored(row: &libsql::Row) -> Result<StoredObituary> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| ObituaryError::Storage(e.to_string()))
    };
    Ok(StoredObituary {
        id: text(0)?,
        status: text(1)?,
        claim: text(2)?,
        source_name: text(3)?,
        source_url: text(4)?,
        date: text(5)?,
        slug: text(6)?,
        created_at: text(7)?,
    })
}
