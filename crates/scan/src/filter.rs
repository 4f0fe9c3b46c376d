//! Filtered, sorted and paginated views over a [`SystemSummary`].

use crate::models::{SystemSummary, UploadSummary};
use std::cmp::Ordering;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    CompletedAt,
    Name,
    Status,
    NomenclatureCount,
    CounterpartyCount,
}
impl SortField {
    /// Unknown names fall back to the default field.
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "completed_at" => Self::CompletedAt,
            "name" => Self::Name,
            "status" => Self::Status,
            "nomenclature_count" => Self::NomenclatureCount,
            "counterparty_count" => Self::CounterpartyCount,
            _ => Self::CreatedAt,
        }
    }

    fn compare(self, a: &UploadSummary, b: &UploadSummary) -> Ordering {
        match self {
            // `None` sorts before any timestamp.
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::CompletedAt => a.completed_at.cmp(&b.completed_at),
            Self::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            Self::Status => a.status.as_str().cmp(b.status.as_str()),
            Self::NomenclatureCount => a.nomenclature_count.cmp(&b.nomenclature_count),
            Self::CounterpartyCount => a.counterparty_count.cmp(&b.counterparty_count),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Query over the per-upload rows of a summary.
///
/// Totals in the filtered summary describe the returned rows only; fleet-level
/// fields (databases, processed/skipped, scan duration) are copied unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryFilter {
    /// Lowercased, deduplicated; empty means any status.
    pub status: Vec<String>,
    pub created_after: Option<OffsetDateTime>,
    pub created_before: Option<OffsetDateTime>,
    /// Case-insensitive substring of the upload name or UUID.
    pub search: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SummaryFilter {
    /// Build a filter from URL query pairs.
    ///
    /// Returns `None` when none of the recognised parameters are present, so
    /// an unfiltered request keeps the scan's listing order. Invalid values are
    /// ignored rather than rejected.
    pub fn from_query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Option<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        let mut recognised = false;
        let mut page = None;
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref() {
                // Accepts both `status=a,b` and repeated `status=` parameters.
                "status" => {
                    for status in value.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
                        if !filter.status.contains(&status) {
                            filter.status.push(status);
                        }
                    }
                },
                "search" => filter.search = Some(value.to_string()).filter(|s| !s.is_empty()),
                "created_after" => filter.created_after = OffsetDateTime::parse(value, &Rfc3339).ok(),
                "created_before" => filter.created_before = OffsetDateTime::parse(value, &Rfc3339).ok(),
                "sort_by" => filter.sort_by = SortField::parse(value),
                "order" => {
                    filter.order = match value.to_lowercase().as_str() {
                        "asc" => SortOrder::Asc,
                        _ => SortOrder::Desc,
                    }
                },
                "limit" => filter.limit = value.parse().ok().filter(|limit| (1..=MAX_LIMIT).contains(limit)),
                "page" => page = value.parse::<usize>().ok().filter(|page| *page >= 1),
                _ => continue,
            }
            recognised = true;
        }
        if let (Some(page), Some(limit)) = (page, filter.limit) {
            filter.offset = (page - 1).saturating_mul(limit);
        }
        recognised.then_some(filter)
    }

    fn matches(&self, detail: &UploadSummary) -> bool {
        if !self.status.is_empty() && !self.status.iter().any(|s| s.eq_ignore_ascii_case(detail.status.as_str())) {
            return false;
        }
        // Rows without a creation time can't satisfy a time window.
        if let Some(after) = self.created_after
            && detail.created_at.is_none_or(|created| created < after)
        {
            return false;
        }
        if let Some(before) = self.created_before
            && detail.created_at.is_none_or(|created| created > before)
        {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !detail.name.to_lowercase().contains(&needle) && !detail.upload_uuid.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }

    /// Derive the filtered view. `summary` itself is left untouched.
    pub fn apply(&self, summary: &SystemSummary) -> SystemSummary {
        let mut rows: Vec<UploadSummary> = summary.upload_details.iter().filter(|d| self.matches(d)).cloned().collect();
        rows.sort_by(|a, b| {
            let ordering = self.sort_by.compare(a, b);
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        if let Some(limit) = self.limit {
            rows = rows.into_iter().skip(self.offset).take(limit).collect();
        }

        let mut filtered = SystemSummary {
            upload_details: rows,
            ..summary.clone()
        };
        filtered.tally_statuses();
        filtered.tally_entities();
        filtered
    }
}
