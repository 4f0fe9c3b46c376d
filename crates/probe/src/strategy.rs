//! Schema probe strategies.
//!
//! Export databases have gone through several schema generations. Rather than
//! one function full of nested `if table exists` branches, every known layout
//! is a [`ProbeStrategy`] and the strategies are consulted in a fixed order:
//!
//! 1. [`DedicatedTables`]: `nomenclature_items` / `counterparties`.
//! 2. [`CatalogItems`]: generic `catalog_items`, classified through the
//!    `catalogs` table or, failing that, the export file name.
//! 3. [`NormalizedData`]: `normalized_data`, filtered by a type column when
//!    one exists.
//!
//! Each record kind is resolved independently by the first strategy that
//! matches it. A kind that no strategy matches is reported as zero; a missing
//! table is not an error.

use crate::filename::{DataType, ExportFileName};
use async_trait::async_trait;
use regex::Regex;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

pub(crate) const NOMENCLATURE_ITEMS: &str = "nomenclature_items";
pub(crate) const COUNTERPARTIES: &str = "counterparties";
pub(crate) const CATALOG_ITEMS: &str = "catalog_items";
pub(crate) const CATALOGS: &str = "catalogs";
pub(crate) const NORMALIZED_DATA: &str = "normalized_data";

/// Candidate discriminator columns of `normalized_data`, in order of preference.
const TYPE_COLUMNS: [&str; 2] = ["data_type", "type"];

// SQLite's LIKE only folds ASCII, so catalog names are matched here instead.
static NOMENCLATURE_CATALOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)номенклатур|nomenclature").unwrap());
static COUNTERPARTY_CATALOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)контрагент|counterpart").unwrap());

/// The set of table names present in one database file.
#[derive(Debug, Default, Clone)]
pub struct Tables(HashSet<String>);
impl Tables {
    pub(crate) async fn load(conn: &mut SqliteConnection) -> sqlx::Result<Self> {
        let names: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&mut *conn)
            .await?;
        Ok(Self(names.into_iter().map(|(name,)| name).collect()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.0.contains(table)
    }
}
impl<S: Into<String>> FromIterator<S> for Tables {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// What a strategy (or the whole cascade) learned about one file.
///
/// `None` means "no opinion": a later strategy may still resolve that kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub nomenclature: Option<u64>,
    pub counterparties: Option<u64>,
}
impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.nomenclature.is_some() && self.counterparties.is_some()
    }

    /// Keep every kind already resolved, filling the gaps from `later`.
    pub fn or(self, later: Resolution) -> Resolution {
        Resolution {
            nomenclature: self.nomenclature.or(later.nomenclature),
            counterparties: self.counterparties.or(later.counterparties),
        }
    }

    fn of(data_type: DataType, count: u64) -> Self {
        match data_type {
            DataType::Nomenclature => Self { nomenclature: Some(count), counterparties: None },
            DataType::Counterparties => Self { nomenclature: None, counterparties: Some(count) },
        }
    }
}

/// Everything a strategy may look at besides the connection itself.
pub struct ProbeContext<'a> {
    pub path: &'a Path,
    pub tables: &'a Tables,
}

/// One known table layout.
#[async_trait]
pub trait ProbeStrategy: Send + Sync {
    /// Used for logging only.
    fn name(&self) -> &'static str;

    async fn probe(&self, conn: &mut SqliteConnection, ctx: &ProbeContext<'_>) -> sqlx::Result<Resolution>;
}

/// The production cascade, in priority order.
pub fn default_strategies() -> Vec<Box<dyn ProbeStrategy>> {
    vec![Box::new(DedicatedTables), Box::new(CatalogItems), Box::new(NormalizedData)]
}

/// Run `strategies` in order until both kinds are resolved.
///
/// A failing strategy is logged and treated as "no opinion" so that one odd
/// table cannot hide counts another layout would have found.
pub(crate) async fn resolve(
    strategies: &[Box<dyn ProbeStrategy>],
    conn: &mut SqliteConnection,
    ctx: &ProbeContext<'_>,
) -> Resolution {
    let mut resolved = Resolution::default();
    for strategy in strategies {
        if resolved.is_complete() {
            break;
        }
        match strategy.probe(conn, ctx).await {
            Ok(found) => resolved = resolved.or(found),
            Err(err) => tracing::warn!(
                strategy = strategy.name(),
                path = %ctx.path.display(),
                error = %err,
                "Probe strategy failed; falling through to the next layout"
            ),
        }
    }
    resolved
}

async fn count_rows(conn: &mut SqliteConnection, sql: &str) -> sqlx::Result<u64> {
    let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&mut *conn).await?;
    // COUNT(*) is never negative.
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Current schema: one table per record kind.
pub struct DedicatedTables;

#[async_trait]
impl ProbeStrategy for DedicatedTables {
    fn name(&self) -> &'static str {
        "dedicated-tables"
    }

    async fn probe(&self, conn: &mut SqliteConnection, ctx: &ProbeContext<'_>) -> sqlx::Result<Resolution> {
        let mut resolution = Resolution::default();
        if ctx.tables.contains(NOMENCLATURE_ITEMS) {
            resolution.nomenclature = Some(count_rows(conn, "SELECT COUNT(*) FROM nomenclature_items").await?);
        }
        if ctx.tables.contains(COUNTERPARTIES) {
            resolution.counterparties = Some(count_rows(conn, "SELECT COUNT(*) FROM counterparties").await?);
        }
        Ok(resolution)
    }
}

/// Raw 1C catalog dump: every catalog's rows share `catalog_items`, and a
/// single export only ever holds one kind.
pub struct CatalogItems;

impl CatalogItems {
    async fn classify_by_catalog(conn: &mut SqliteConnection, ctx: &ProbeContext<'_>) -> Option<DataType> {
        if !ctx.tables.contains(CATALOGS) {
            return None;
        }
        let catalogs = sqlx::query_as::<_, (Option<String>,)>("SELECT name FROM catalogs").fetch_all(&mut *conn).await;
        let names = match catalogs {
            Ok(names) => names,
            Err(err) => {
                tracing::debug!(path = %ctx.path.display(), error = %err, "Unable to read catalog names");
                return None;
            },
        };
        let names: Vec<String> = names.into_iter().filter_map(|(name,)| name).collect();
        // Nomenclature wins when both catalogs are present.
        if names.iter().any(|name| NOMENCLATURE_CATALOG.is_match(name)) {
            Some(DataType::Nomenclature)
        } else if names.iter().any(|name| COUNTERPARTY_CATALOG.is_match(name)) {
            Some(DataType::Counterparties)
        } else {
            None
        }
    }
}

#[async_trait]
impl ProbeStrategy for CatalogItems {
    fn name(&self) -> &'static str {
        "catalog-items"
    }

    async fn probe(&self, conn: &mut SqliteConnection, ctx: &ProbeContext<'_>) -> sqlx::Result<Resolution> {
        if !ctx.tables.contains(CATALOG_ITEMS) {
            return Ok(Resolution::default());
        }
        let data_type = match Self::classify_by_catalog(conn, ctx).await {
            Some(data_type) => data_type,
            None => ExportFileName::from_path(ctx.path).data_type.unwrap_or(DataType::Counterparties),
        };
        let count = count_rows(conn, "SELECT COUNT(*) FROM catalog_items").await?;
        tracing::debug!(path = %ctx.path.display(), ?data_type, count, "Counted catalog items");
        Ok(Resolution::of(data_type, count))
    }
}

/// Output of the normalization pipeline. Only ever speaks for counterparties:
/// rows are filtered by the type column when present, otherwise every row is
/// counted as an upper bound.
pub struct NormalizedData;

#[async_trait]
impl ProbeStrategy for NormalizedData {
    fn name(&self) -> &'static str {
        "normalized-data"
    }

    async fn probe(&self, conn: &mut SqliteConnection, ctx: &ProbeContext<'_>) -> sqlx::Result<Resolution> {
        if !ctx.tables.contains(NORMALIZED_DATA) {
            return Ok(Resolution::default());
        }
        let columns: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('normalized_data')")
            .fetch_all(&mut *conn)
            .await?;
        let type_column = TYPE_COLUMNS.into_iter().find(|candidate| columns.iter().any(|(name,)| name == candidate));
        let count = match type_column {
            Some(column) => {
                // `column` comes from TYPE_COLUMNS, never from the file.
                let sql = format!("SELECT COUNT(*) FROM normalized_data WHERE \"{column}\" = 'counterparty'");
                count_rows(conn, &sql).await?
            },
            None => count_rows(conn, "SELECT COUNT(*) FROM normalized_data").await?,
        };
        Ok(Resolution { nomenclature: None, counterparties: Some(count) })
    }
}
