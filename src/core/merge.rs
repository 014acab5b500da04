use crate::domain::dataset::Dataset;
use crate::domain::model::{normalize_sku, CatalogRow, ColumnMap, Field, ReconciledSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Placeholder cells for listings seeded from the market report alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPlaceholders {
    #[serde(default)]
    pub floor: String,
    #[serde(default)]
    pub link: String,
}

struct SideColumns {
    sku: usize,
    mapped: Vec<(Field, usize)>,
}

/// Resolves the mapped columns of one side, warning about (and skipping) the ones
/// that are absent. `None` when the SKU column itself is missing.
fn resolve_columns(data: &Dataset, columns: &ColumnMap, side: &str) -> Option<SideColumns> {
    let Some(sku) = data.column_index(&columns.sku) else {
        if !data.headers.is_empty() {
            tracing::error!(
                "{} dataset has no SKU column '{}', its rows are ignored",
                side,
                columns.sku
            );
        }
        return None;
    };

    let mut mapped = Vec::new();
    let mut missing = Vec::new();
    for field in Field::ALL.into_iter().filter(|f| *f != Field::Sku) {
        let name = columns.column(field);
        match data.column_index(name) {
            Some(idx) => mapped.push((field, idx)),
            None => missing.push(name),
        }
    }
    if !missing.is_empty() {
        tracing::warn!("{} dataset lacks columns {:?}, skipping them", side, missing);
    }

    Some(SideColumns { sku, mapped })
}

/// Keeps the first row for each SKU and logs the ones dropped.
fn dedupe_by_sku(rows: Vec<CatalogRow>, stage: &str) -> Vec<CatalogRow> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(row.sku.clone()) {
            kept.push(row);
        } else {
            duplicates.push(row.sku);
        }
    }
    warn_duplicates(stage, &duplicates);
    kept
}

fn warn_duplicates(stage: &str, duplicates: &[String]) {
    if !duplicates.is_empty() {
        tracing::warn!(
            "{}: dropped {} duplicate SKU row(s), first occurrence kept: {:?}",
            stage,
            duplicates.len(),
            duplicates.iter().take(10).collect::<Vec<_>>()
        );
    }
}

fn own_rows(own: &Dataset, columns: &ColumnMap) -> Vec<CatalogRow> {
    let Some(resolved) = resolve_columns(own, columns, "Own-listing") else {
        return Vec::new();
    };

    let mapped_indices: HashSet<usize> = resolved
        .mapped
        .iter()
        .map(|(_, idx)| *idx)
        .chain(std::iter::once(resolved.sku))
        .collect();

    let mut rows = Vec::with_capacity(own.len());
    let mut blank_skus = 0;
    for row_idx in 0..own.len() {
        let sku = normalize_sku(own.cell(row_idx, resolved.sku));
        if sku.is_empty() {
            blank_skus += 1;
            continue;
        }

        let mut row = CatalogRow {
            sku,
            ..Default::default()
        };
        for (field, col) in &resolved.mapped {
            row.set(*field, own.cell(row_idx, *col).to_string());
        }
        for (col, header) in own.headers.iter().enumerate() {
            if !mapped_indices.contains(&col) {
                row.extra
                    .insert(header.clone(), own.cell(row_idx, col).to_string());
            }
        }
        rows.push(row);
    }
    if blank_skus > 0 {
        tracing::debug!("Skipped {} own-listing row(s) with a blank SKU", blank_skus);
    }

    dedupe_by_sku(rows, "Own listing")
}

/// Full outer join of the own listing and the market report on normalized SKU.
///
/// Own rows keep their order; market-only SKUs are appended in report order.
/// For every mapped column the report carries, a non-empty market value
/// overwrites the own value.
pub fn merge(own: &Dataset, market: &Dataset, columns: &ColumnMap) -> ReconciledSet {
    let mut rows = own_rows(own, columns);
    let mut index: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.sku.clone(), i))
        .collect();

    if let Some(resolved) = resolve_columns(market, columns, "Market report") {
        let mut seen_in_market = HashSet::new();
        let mut market_duplicates = Vec::new();
        for row_idx in 0..market.len() {
            let sku = normalize_sku(market.cell(row_idx, resolved.sku));
            if sku.is_empty() {
                continue;
            }
            if !seen_in_market.insert(sku.clone()) {
                market_duplicates.push(sku);
                continue;
            }

            let position = match index.get(&sku) {
                Some(&pos) => pos,
                None => {
                    rows.push(CatalogRow {
                        sku: sku.clone(),
                        ..Default::default()
                    });
                    index.insert(sku, rows.len() - 1);
                    rows.len() - 1
                }
            };

            let target = &mut rows[position];
            for (field, col) in &resolved.mapped {
                let value = market.cell(row_idx, *col);
                if !value.trim().is_empty() {
                    target.set(*field, value.to_string());
                }
            }
        }
        warn_duplicates("Market report", &market_duplicates);
    }

    let rows = dedupe_by_sku(rows, "Merged set");

    let mut headers = own.headers.clone();
    for name in columns.columns() {
        if !headers.contains(&name) {
            headers.push(name);
        }
    }

    ReconciledSet { headers, rows }
}

/// Narrows the raw report to the columns worth merging and drops rows without a
/// market reference price. Absent columns only produce a warning; without the
/// reference column no rows are dropped.
pub fn prepare_market_report(report: &Dataset, keep: &[String], columns: &ColumnMap) -> Dataset {
    let (mut prepared, missing) = report.select_columns(keep);
    if !missing.is_empty() {
        tracing::warn!("Market report lacks columns {:?}", missing);
    }

    match prepared.column_index(&columns.mp_on_market) {
        Some(col) => {
            let before = prepared.len();
            prepared.rows.retain(|row| {
                row.get(col)
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false)
            });
            let dropped = before - prepared.len();
            if dropped > 0 {
                tracing::debug!(
                    "Dropped {} report row(s) without '{}'",
                    dropped,
                    columns.mp_on_market
                );
            }
        }
        None => tracing::warn!(
            "Market report has no '{}' column, keeping rows without a reference price",
            columns.mp_on_market
        ),
    }

    prepared
}

pub fn to_dataset(set: &ReconciledSet, columns: &ColumnMap) -> Dataset {
    let mut dataset = Dataset::new(set.headers.clone());
    for row in &set.rows {
        dataset.push_row(
            set.headers
                .iter()
                .map(|header| row.cell(header, columns))
                .collect(),
        );
    }
    dataset
}

/// Builds an initial listing from the market report alone, used when the
/// tenant's own sheet is still empty.
pub fn seed_listing(report: &Dataset, columns: &ColumnMap, placeholders: &SeedPlaceholders) -> Dataset {
    let mut seeded = merge(&Dataset::default(), report, columns);
    seeded.headers = columns.columns();
    for row in seeded.rows.iter_mut() {
        if row.link.trim().is_empty() {
            row.link = placeholders.link.clone();
        }
        if row.floor_price.trim().is_empty() {
            row.floor_price = placeholders.floor.clone();
        }
    }
    to_dataset(&seeded, columns)
}
