use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_count: usize,
    pub duplicate_count: usize,
    /// Percentage in `[0, 100]`.
    pub duplicate_rate: f64,
}

impl DuplicateReport {
    fn clean(total_count: usize) -> Self {
        Self {
            total_count,
            duplicate_count: 0,
            duplicate_rate: 0.0,
        }
    }
}

/// Counts source vectors that have at least one target vector within
/// `tolerance` on every component. Direction matters: `compare(a, b)` and
/// `compare(b, a)` generally differ.
///
/// Empty or ragged input is reported as zero duplicates.
pub fn compare(source: &[Vec<f64>], target: &[Vec<f64>], tolerance: f64) -> DuplicateReport {
    let total_count = source.len();
    let Some(dim) = source.first().map(Vec::len) else {
        return DuplicateReport::clean(total_count);
    };
    if target.is_empty()
        || source.iter().any(|v| v.len() != dim)
        || target.iter().any(|v| v.len() != dim)
    {
        return DuplicateReport::clean(total_count);
    }

    let duplicate_count = source
        .iter()
        .filter(|s| target.iter().any(|t| is_close(s, t, tolerance)))
        .count();

    DuplicateReport {
        total_count,
        duplicate_count,
        duplicate_rate: duplicate_count as f64 / total_count as f64 * 100.0,
    }
}

fn is_close(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    // NaN fails the comparison and is therefore never close.
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}
