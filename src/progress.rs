use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::HarvestError;
use crate::scraper::resume_cursor;
use crate::store::PartitionStore;

#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub year: i32,
    pub rows: usize,
    pub unique_ids: usize,
    pub min_id: u64,
    pub max_id: u64,
}

/// A maximal run of identifiers missing between the lowest and highest
/// identifier seen, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub from: u64,
    pub to: u64,
}

impl Gap {
    /// Number of identifiers missing in this run.
    pub fn missing(&self) -> u64 {
        self.to - self.from + 1
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub partitions: Vec<PartitionStats>,
    pub total_rows: usize,
    pub unique_ids: usize,
    pub min_id: Option<u64>,
    pub max_id: Option<u64>,
    pub resume_from: Option<u64>,
    pub gaps: Vec<Gap>,
}

/// Inspect every partition: per-year stats, the overall identifier
/// range, the resume cursor, and the gaps in the scanned sequence.
pub fn report(store: &PartitionStore) -> Result<ProgressReport, HarvestError> {
    let mut partitions = Vec::new();
    let mut all_ids: BTreeSet<u64> = BTreeSet::new();
    let mut total_rows = 0usize;

    for year in store.list_years()? {
        let rows = store.load(Some(&[year]))?;
        let ids: BTreeSet<u64> = rows.iter().map(|row| row.codigo_bdns).collect();
        // list_years only reports existing files, so the partition has
        // at least one row.
        let (min_id, max_id) = match (ids.first(), ids.last()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => continue,
        };
        partitions.push(PartitionStats {
            year,
            rows: rows.len(),
            unique_ids: ids.len(),
            min_id,
            max_id,
        });
        total_rows += rows.len();
        all_ids.extend(ids);
    }

    let sorted: Vec<u64> = all_ids.iter().copied().collect();
    Ok(ProgressReport {
        partitions,
        total_rows,
        unique_ids: sorted.len(),
        min_id: sorted.first().copied(),
        max_id: sorted.last().copied(),
        resume_from: resume_cursor(all_ids.iter().map(|&id| crate::domain::BdnsId::new(id)))
            .map(|id| id.value()),
        gaps: find_gaps(&sorted),
    })
}

/// Gaps in a sorted, duplicate-free identifier sequence.
pub fn find_gaps(sorted_ids: &[u64]) -> Vec<Gap> {
    sorted_ids
        .windows(2)
        .filter(|pair| pair[1] > pair[0] + 1)
        .map(|pair| Gap {
            from: pair[0] + 1,
            to: pair[1] - 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_between_runs() {
        let gaps = find_gaps(&[100, 101, 105, 107]);
        assert_eq!(
            gaps,
            vec![Gap { from: 102, to: 104 }, Gap { from: 106, to: 106 }]
        );
        assert_eq!(gaps[0].missing(), 3);
        assert_eq!(gaps[1].missing(), 1);
    }

    #[test]
    fn consecutive_sequence_has_no_gaps() {
        assert!(find_gaps(&[5, 6, 7, 8]).is_empty());
        assert!(find_gaps(&[42]).is_empty());
        assert!(find_gaps(&[]).is_empty());
    }
}
