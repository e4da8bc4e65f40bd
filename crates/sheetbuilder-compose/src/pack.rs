//! Pure packing algorithm: greedy grouping of source pages onto fixed-width,
//! variable-height sheets. Contains no PDF I/O so it can be exhaustively unit
//! tested against the quantified invariants of spec.md §8.

use sheetbuilder_core::{Error, Result};

use crate::constants::EPSILON;

/// One page's placement on a sheet, in point-space, top-left origin flipped
/// to PDF's bottom-left-origin `currentY` convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page_index: usize,
    pub x_offset: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One output sheet: its canvas height and the placements packed onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub canvas_height: f32,
    pub placements: Vec<Placement>,
}

/// Counts how many consecutive pages starting at `start` fit within
/// `max_height + EPSILON`. Returns `Err` if even the single page at `start`
/// does not fit (spec.md §8: "a page that alone exceeds `MAX_SHEET_HEIGHT_PT
/// + EPSILON` fails composition").
fn greedy_group_len(dims: &[(f32, f32)], start: usize, max_height: f32) -> Result<usize> {
    let mut running = 0.0f32;
    let mut count = 0usize;
    while start + count < dims.len() {
        let (_, height) = dims[start + count];
        if running + height > max_height + EPSILON {
            break;
        }
        running += height;
        count += 1;
    }
    if count == 0 {
        return Err(Error::processing(format!(
            "page {} exceeds maximum sheet height alone ({:.2}pt > {:.2}pt)",
            start,
            dims[start].1,
            max_height + EPSILON
        )));
    }
    Ok(count)
}

/// Simulates packing the first `k = min(10, ceil(n / 10))` sheets to choose a
/// uniform canvas height for every sheet in the document (spec.md §4.D step
/// 3). Every emitted sheet — including a short final one — shares this
/// height so downstream print equipment sees a uniform sheet stream.
pub fn compute_standard_sheet_height(dims: &[(f32, f32)], max_height: f32) -> Result<f32> {
    if dims.is_empty() {
        return Ok(max_height);
    }

    let n = dims.len();
    let k = 10usize.min(n.div_ceil(10));

    let mut totals = Vec::with_capacity(k);
    let mut idx = 0;
    while idx < n && totals.len() < k {
        let len = greedy_group_len(dims, idx, max_height)?;
        let total: f32 = dims[idx..idx + len].iter().map(|(_, h)| h).sum();
        totals.push(total);
        idx += len;
    }

    if totals.is_empty() {
        return Ok(max_height);
    }

    let half = max_height * 0.5;
    if totals[0] >= half {
        return Ok(totals[0]);
    }
    Ok(totals.iter().copied().find(|&t| t >= half).unwrap_or(totals[0]))
}

/// Packs every page in `dims` onto sheets of uniform `canvas_height`,
/// centering each page horizontally and stacking top-to-bottom.
///
/// For every emitted sheet, `Σ page.height <= MAX_SHEET_HEIGHT_PT + EPSILON`
/// and every placement satisfies `x_offset + width <= SHEET_WIDTH_PT` and
/// `currentY >= 0` — the Open Question in spec.md §9 about a page run that
/// overflows `canvas_height` is resolved here by asserting `currentY >= 0`
/// (crash early) rather than silently clipping; see DESIGN.md.
pub fn pack_sheets(
    dims: &[(f32, f32)],
    sheet_width: f32,
    canvas_height: f32,
    max_height: f32,
) -> Result<Vec<Sheet>> {
    let mut sheets = Vec::new();
    let mut idx = 0;
    while idx < dims.len() {
        let len = greedy_group_len(dims, idx, max_height)?;
        let group = &dims[idx..idx + len];

        let mut current_y = canvas_height;
        let mut placements = Vec::with_capacity(len);
        for (offset, &(width, height)) in group.iter().enumerate() {
            current_y -= height;
            if current_y < -EPSILON {
                return Err(Error::processing(format!(
                    "sheet overflow: page {} would be placed at negative currentY ({:.2})",
                    idx + offset,
                    current_y
                )));
            }
            let x_offset = (sheet_width - width) / 2.0;
            placements.push(Placement {
                page_index: idx + offset,
                x_offset,
                y: current_y.max(0.0),
                width,
                height,
            });
        }

        sheets.push(Sheet {
            canvas_height,
            placements,
        });
        idx += len;
    }
    Ok(sheets)
}

/// Caches `(cos θ, sin θ)` per rotation angle so repeated placements at the
/// same angle avoid redundant trigonometric calls.
#[derive(Debug, Default)]
pub struct RotationCache {
    entries: std::collections::HashMap<u16, (f32, f32)>,
}

impl RotationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(cos θ, sin θ)` for `degrees`, computing and caching it on
    /// first use.
    pub fn get_or_compute(&mut self, degrees: u16) -> (f32, f32) {
        *self.entries.entry(degrees).or_insert_with(|| {
            let radians = (degrees as f32).to_radians();
            (radians.cos(), radians.sin())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAX_SHEET_HEIGHT_PT, SHEET_WIDTH_PT};

    #[test]
    fn single_page_yields_one_sheet() {
        let dims = vec![(500.0, 700.0)];
        let standard = compute_standard_sheet_height(&dims, MAX_SHEET_HEIGHT_PT).unwrap();
        let sheets = pack_sheets(&dims, SHEET_WIDTH_PT, standard, MAX_SHEET_HEIGHT_PT).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].placements.len(), 1);
    }

    #[test]
    fn pages_at_exactly_epsilon_boundary_are_accepted() {
        let height = MAX_SHEET_HEIGHT_PT + EPSILON - 0.001;
        let dims = vec![(400.0, height); 3];
        let sheets = pack_sheets(&dims, SHEET_WIDTH_PT, MAX_SHEET_HEIGHT_PT, MAX_SHEET_HEIGHT_PT).unwrap();
        assert_eq!(sheets.len(), 3);
        for sheet in &sheets {
            assert_eq!(sheet.placements.len(), 1);
        }
    }

    #[test]
    fn page_exceeding_max_height_fails() {
        let dims = vec![(400.0, MAX_SHEET_HEIGHT_PT + 10.0)];
        let err = compute_standard_sheet_height(&dims, MAX_SHEET_HEIGHT_PT).unwrap_err();
        assert_eq!(err.kind(), sheetbuilder_core::ErrorKind::Processing);
    }

    #[test]
    fn every_sheet_sum_is_within_bound() {
        let dims: Vec<(f32, f32)> = (0..37).map(|i| (400.0, 200.0 + (i % 5) as f32 * 10.0)).collect();
        let standard = compute_standard_sheet_height(&dims, MAX_SHEET_HEIGHT_PT).unwrap();
        let sheets = pack_sheets(&dims, SHEET_WIDTH_PT, standard, MAX_SHEET_HEIGHT_PT).unwrap();

        let total_pages: usize = sheets.iter().map(|s| s.placements.len()).sum();
        assert_eq!(total_pages, dims.len());

        for sheet in &sheets {
            let sum: f32 = sheet.placements.iter().map(|p| p.height).sum();
            assert!(sum <= MAX_SHEET_HEIGHT_PT + EPSILON);
            assert_eq!(sheet.canvas_height, standard);
            for p in &sheet.placements {
                assert!(p.x_offset + p.width <= SHEET_WIDTH_PT + EPSILON);
                assert!(p.y >= 0.0);
            }
        }
    }

    #[test]
    fn rotation_cache_is_stable_across_lookups() {
        let mut cache = RotationCache::new();
        let first = cache.get_or_compute(180);
        let second = cache.get_or_compute(180);
        assert_eq!(first, second);
        assert!((first.0 - (-1.0)).abs() < 0.001);
        assert!(first.1.abs() < 0.001);
    }
}
