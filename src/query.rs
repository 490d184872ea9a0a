use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{BdnsId, FlattenedRow};

/// Inclusive date window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_active(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Conjunction of independent predicates; an unset field filters
/// nothing. Application order cannot change the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    pub ids: Vec<BdnsId>,
    pub description: Option<String>,
    pub reception: DateRange,
    pub application_start: DateRange,
    pub application_end: DateRange,
    pub organo_nivel1: Option<String>,
    pub organo_nivel2: Option<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub regions: Vec<String>,
    pub sector: Option<String>,
    pub abierto: Option<bool>,
    pub years: Vec<i32>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Filters::default()
    }
}

pub fn apply(rows: &[FlattenedRow], filters: &Filters) -> Vec<FlattenedRow> {
    rows.iter()
        .filter(|row| matches(row, filters))
        .cloned()
        .collect()
}

pub fn matches(row: &FlattenedRow, filters: &Filters) -> bool {
    matches_ids(row, &filters.ids)
        && matches_description(row, filters.description.as_deref())
        && matches_date(Some(row.fecha_recepcion), &filters.reception)
        && matches_date(row.fecha_inicio_solicitud, &filters.application_start)
        && matches_date(row.fecha_fin_solicitud, &filters.application_end)
        && matches_institution(row.organo_nivel1.as_deref(), filters.organo_nivel1.as_deref())
        && matches_institution(row.organo_nivel2.as_deref(), filters.organo_nivel2.as_deref())
        && matches_budget(row, filters.budget_min, filters.budget_max)
        && matches_region(row, &filters.regions)
        && matches_sector(row, filters.sector.as_deref())
        && matches_status(row, filters.abierto)
        && matches_years(row, &filters.years)
}

fn matches_ids(row: &FlattenedRow, ids: &[BdnsId]) -> bool {
    ids.is_empty() || ids.contains(&row.bdns_id())
}

fn matches_description(row: &FlattenedRow, needle: Option<&str>) -> bool {
    let Some(needle) = needle else { return true };
    row.descripcion
        .as_deref()
        .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase()))
}

fn matches_date(value: Option<NaiveDate>, range: &DateRange) -> bool {
    if !range.is_active() {
        return true;
    }
    value.is_some_and(|date| range.contains(date))
}

fn matches_institution(value: Option<&str>, needle: Option<&str>) -> bool {
    let Some(needle) = needle else { return true };
    value.is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase()))
}

fn matches_budget(row: &FlattenedRow, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    row.presupuesto_total.is_some_and(|budget| {
        min.is_none_or(|min| budget >= min) && max.is_none_or(|max| budget <= max)
    })
}

fn matches_region(row: &FlattenedRow, regions: &[String]) -> bool {
    regions.is_empty()
        || row
            .region
            .as_deref()
            .is_some_and(|region| regions.iter().any(|wanted| wanted == region))
}

/// Substring match on the sector description, or exact match on the
/// sector code.
fn matches_sector(row: &FlattenedRow, needle: Option<&str>) -> bool {
    let Some(needle) = needle else { return true };
    let by_description = row
        .sector
        .as_deref()
        .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase()));
    let by_code = row.sector_codigo.as_deref() == Some(needle);
    by_description || by_code
}

fn matches_status(row: &FlattenedRow, wanted: Option<bool>) -> bool {
    let Some(wanted) = wanted else { return true };
    row.abierto == Some(wanted)
}

fn matches_years(row: &FlattenedRow, years: &[i32]) -> bool {
    years.is_empty() || years.contains(&row.year)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub rows: usize,
    pub unique_ids: usize,
    pub total_budget: f64,
    pub mean_budget: Option<f64>,
}

/// Aggregates over exactly the rows given; nothing is cached between
/// calls. Budget sum and mean ignore rows with no budget, as the source
/// data leaves the field blank rather than zero.
pub fn summarize(rows: &[FlattenedRow]) -> Summary {
    let unique_ids = rows
        .iter()
        .map(|row| row.codigo_bdns)
        .collect::<HashSet<_>>()
        .len();
    let budgets: Vec<f64> = rows.iter().filter_map(|row| row.presupuesto_total).collect();
    let total_budget: f64 = budgets.iter().sum();
    let mean_budget = if budgets.is_empty() {
        None
    } else {
        Some(total_budget / budgets.len() as f64)
    };
    Summary {
        rows: rows.len(),
        unique_ids,
        total_budget,
        mean_budget,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub rows: usize,
    pub unique_ids: usize,
    pub total_budget: f64,
    pub mean_budget: Option<f64>,
    pub open: usize,
    pub closed: usize,
}

pub fn summarize_by_year(rows: &[FlattenedRow]) -> Vec<YearSummary> {
    let mut by_year: BTreeMap<i32, Vec<FlattenedRow>> = BTreeMap::new();
    for row in rows {
        by_year.entry(row.year).or_default().push(row.clone());
    }
    by_year
        .into_iter()
        .map(|(year, rows)| {
            let summary = summarize(&rows);
            YearSummary {
                year,
                rows: summary.rows,
                unique_ids: summary.unique_ids,
                total_budget: summary.total_budget,
                mean_budget: summary.mean_budget,
                open: rows.iter().filter(|row| row.abierto == Some(true)).count(),
                closed: rows.iter().filter(|row| row.abierto == Some(false)).count(),
            }
        })
        .collect()
}

/// Sorted distinct values of one optional column, for filter options.
pub fn distinct_values<F>(rows: &[FlattenedRow], get: F) -> Vec<String>
where
    F: Fn(&FlattenedRow) -> Option<&str>,
{
    let mut values: Vec<String> = rows
        .iter()
        .filter_map(|row| get(row).map(str::to_string))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    values.sort();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_date;
    use crate::flatten::flatten;

    fn row(codigo: u64, budget: Option<f64>, abierto: Option<bool>) -> FlattenedRow {
        let record = serde_json::from_str(&format!(
            r#"{{"codigoBDNS": {codigo}, "fechaRecepcion": "2024-05-01"}}"#
        ))
        .unwrap();
        let mut row = flatten(&record).unwrap().remove(0);
        row.presupuesto_total = budget;
        row.abierto = abierto;
        row
    }

    #[test]
    fn empty_filters_are_identity() {
        let rows = vec![row(1, None, None), row(2, Some(10.0), Some(true))];
        assert_eq!(apply(&rows, &Filters::default()), rows);
    }

    #[test]
    fn budget_range_lower_bound_only() {
        let rows = vec![
            row(1, Some(50_000.0), None),
            row(2, Some(150_000.0), None),
            row(3, Some(999_999.0), None),
        ];
        let filters = Filters {
            budget_min: Some(100_000.0),
            ..Filters::default()
        };
        let subset = apply(&rows, &filters);
        let codes: Vec<u64> = subset.iter().map(|r| r.codigo_bdns).collect();
        assert_eq!(codes, vec![2, 3]);
    }

    #[test]
    fn budget_filter_excludes_rows_without_budget() {
        let rows = vec![row(1, None, None), row(2, Some(5.0), None)];
        let filters = Filters {
            budget_max: Some(10.0),
            ..Filters::default()
        };
        assert_eq!(apply(&rows, &filters).len(), 1);
    }

    #[test]
    fn description_search_is_case_insensitive() {
        let mut a = row(1, None, None);
        a.descripcion = Some("Ayudas a la EDUCACIÓN infantil".to_string());
        let mut b = row(2, None, None);
        b.descripcion = Some("Fomento del deporte".to_string());
        let filters = Filters {
            description: Some("educación".to_string()),
            ..Filters::default()
        };
        let subset = apply(&[a, b], &filters);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].codigo_bdns, 1);
    }

    #[test]
    fn sector_matches_by_description_or_code() {
        let mut a = row(1, None, None);
        a.sector = Some("Educación".to_string());
        a.sector_codigo = Some("32".to_string());
        let by_text = Filters {
            sector: Some("educa".to_string()),
            ..Filters::default()
        };
        let by_code = Filters {
            sector: Some("32".to_string()),
            ..Filters::default()
        };
        assert_eq!(apply(std::slice::from_ref(&a), &by_text).len(), 1);
        assert_eq!(apply(std::slice::from_ref(&a), &by_code).len(), 1);
    }

    #[test]
    fn status_filter() {
        let rows = vec![row(1, None, Some(true)), row(2, None, Some(false)), row(3, None, None)];
        let open = Filters {
            abierto: Some(true),
            ..Filters::default()
        };
        assert_eq!(apply(&rows, &open).len(), 1);
    }

    #[test]
    fn reception_range_is_inclusive() {
        let rows = vec![row(1, None, None)];
        let inside = Filters {
            reception: DateRange {
                from: parse_date("2024-05-01"),
                to: parse_date("2024-05-01"),
            },
            ..Filters::default()
        };
        let outside = Filters {
            reception: DateRange {
                from: parse_date("2024-05-02"),
                to: None,
            },
            ..Filters::default()
        };
        assert_eq!(apply(&rows, &inside).len(), 1);
        assert!(apply(&rows, &outside).is_empty());
    }

    #[test]
    fn filter_application_commutes() {
        let rows = vec![
            row(1, Some(50.0), Some(true)),
            row(2, Some(500.0), Some(true)),
            row(3, Some(500.0), Some(false)),
            row(4, None, Some(true)),
        ];
        let budget = Filters {
            budget_min: Some(100.0),
            ..Filters::default()
        };
        let status = Filters {
            abierto: Some(true),
            ..Filters::default()
        };
        let ab = apply(&apply(&rows, &budget), &status);
        let ba = apply(&apply(&rows, &status), &budget);
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].codigo_bdns, 2);
    }

    #[test]
    fn summary_recomputes_from_subset() {
        let rows = vec![
            row(1, Some(100.0), None),
            row(1, Some(100.0), None),
            row(2, None, None),
        ];
        let summary = summarize(&rows);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.unique_ids, 2);
        assert_eq!(summary.total_budget, 200.0);
        assert_eq!(summary.mean_budget, Some(100.0));

        let empty = summarize(&[]);
        assert_eq!(empty.rows, 0);
        assert_eq!(empty.mean_budget, None);
    }

    #[test]
    fn distinct_values_are_sorted_and_unique() {
        let mut a = row(1, None, None);
        a.region = Some("MADRID".to_string());
        let mut b = row(2, None, None);
        b.region = Some("ANDALUCIA".to_string());
        let mut c = row(3, None, None);
        c.region = Some("MADRID".to_string());
        let values = distinct_values(&[a, b, c], |row| row.region.as_deref());
        assert_eq!(values, vec!["ANDALUCIA", "MADRID"]);
    }
}
