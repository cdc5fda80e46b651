//! Region clustering over a coarse density grid.
//!
//! The heat-map is split into fixed square cells, cells with enough flagged
//! pixels become active, and 8-connected active cells are grouped by BFS into
//! grid-aligned boxes. Working on cells keeps the cost proportional to the
//! number of cells rather than the number of pixels.

use crate::imaging::{PixelImage, CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Tunable clustering constants. The defaults are empirical and kept for
/// compatibility with stored results; none of them has a physical derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    /// Grid cell edge in pixels.
    pub cell_size: u32,
    /// A cell is active when its flagged-pixel count exceeds this.
    pub min_cell_pixels: u32,
    /// Boxes must exceed this extent in both dimensions to be reported.
    pub min_box_extent: u32,
    /// Density above this is at least Medium.
    pub medium_density: f64,
    /// Density above this is Major.
    pub major_density: f64,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            cell_size: 20,
            min_cell_pixels: 5,
            min_box_extent: 10,
            medium_density: 0.05,
            major_density: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    Major,
}

impl Severity {
    pub fn from_density(density: f64, params: &RegionParams) -> Self {
        if density > params.major_density {
            Severity::Major
        } else if density > params.medium_density {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// `"{x}-{y}"` of the top-left corner; unique within one analysis.
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub density: f64,
    pub severity: Severity,
    pub pixel_count: u64,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub major: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::Major => self.major += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::Major => self.major,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.major
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionAnalysis {
    /// Grid scan order, not sorted by significance.
    pub boxes: Vec<Region>,
    pub counts: SeverityCounts,
    pub dimensions: Dimensions,
}

impl RegionAnalysis {
    /// Summed box area over image area; may exceed 1 when edge boxes overhang.
    pub fn area_ratio(&self) -> f64 {
        let image_area = self.dimensions.width as f64 * self.dimensions.height as f64;
        if image_area == 0.0 {
            return 0.0;
        }
        let covered: u64 = self.boxes.iter().map(Region::area).sum();
        covered as f64 / image_area
    }
}

/// Heat-map convention for a flagged pixel: strongly red.
fn is_flagged(px: &[u8]) -> bool {
    px[0] > 150 && px[1] < 100 && px[2] < 100
}

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Cluster the flagged pixels of a rendered heat-map into severity-ranked boxes.
pub fn analyze_regions(heatmap: &PixelImage, params: &RegionParams) -> RegionAnalysis {
    let (width, height) = heatmap.dimensions();
    let cell = params.cell_size.max(1);
    let cols = width.div_ceil(cell) as usize;
    let rows = height.div_ceil(cell) as usize;

    let mut cell_counts = vec![0u64; rows * cols];
    for (i, px) in heatmap.as_raw().chunks_exact(CHANNELS).enumerate() {
        if is_flagged(px) {
            let x = (i % width as usize) / cell as usize;
            let y = (i / width as usize) / cell as usize;
            cell_counts[y * cols + x] += 1;
        }
    }

    let active: Vec<bool> = cell_counts
        .iter()
        .map(|&n| n > params.min_cell_pixels as u64)
        .collect();
    let mut visited = vec![false; rows * cols];
    let mut queue = VecDeque::<usize>::new();
    let mut boxes = Vec::new();
    let mut counts = SeverityCounts::default();

    for start in 0..rows * cols {
        if visited[start] || !active[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let (mut min_row, mut max_row) = (rows, 0usize);
        let (mut min_col, mut max_col) = (cols, 0usize);
        let mut pixel_count = 0u64;

        while let Some(idx) = queue.pop_front() {
            let row = idx / cols;
            let col = idx % cols;
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            pixel_count += cell_counts[idx];

            for (dr, dc) in NEIGHBOURS {
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
                    continue;
                }
                let n = r as usize * cols + c as usize;
                if active[n] && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        let x = min_col as u32 * cell;
        let y = min_row as u32 * cell;
        let box_w = (max_col - min_col + 1) as u32 * cell;
        let box_h = (max_row - min_row + 1) as u32 * cell;
        if box_w <= params.min_box_extent || box_h <= params.min_box_extent {
            continue;
        }

        let density = pixel_count as f64 / (box_w as f64 * box_h as f64);
        let severity = Severity::from_density(density, params);
        counts.record(severity);
        boxes.push(Region {
            id: format!("{}-{}", x, y),
            x,
            y,
            width: box_w,
            height: box_h,
            density,
            severity,
            pixel_count,
        });
    }

    tracing::debug!(
        rows,
        cols,
        regions = boxes.len(),
        major = counts.major,
        "region analysis complete"
    );

    RegionAnalysis {
        boxes,
        counts,
        dimensions: Dimensions { width, height },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREY: [u8; 4] = [230, 230, 230, 255];

    fn heatmap<F: Fn(u32, u32) -> bool>(w: u32, h: u32, flagged: F) -> PixelImage {
        PixelImage::from_fn(w, h, |x, y| if flagged(x, y) { RED } else { GREY }).unwrap()
    }

    #[test]
    fn clean_map_has_no_regions() {
        let analysis = analyze_regions(&heatmap(100, 60, |_, _| false), &RegionParams::default());
        assert!(analysis.boxes.is_empty());
        assert_eq!(analysis.counts.total(), 0);
        assert_eq!(analysis.dimensions, Dimensions { width: 100, height: 60 });
    }

    #[test]
    fn fully_flagged_map_is_one_major_region() {
        let analysis = analyze_regions(&heatmap(100, 100, |_, _| true), &RegionParams::default());
        assert_eq!(analysis.boxes.len(), 1);
        let region = &analysis.boxes[0];
        assert_eq!((region.x, region.y, region.width, region.height), (0, 0, 100, 100));
        assert_eq!(region.id, "0-0");
        assert_eq!(region.pixel_count, 10_000);
        assert_eq!(region.density, 1.0);
        assert_eq!(region.severity, Severity::Major);
        assert_eq!(analysis.counts.major, 1);
    }

    #[test]
    fn cell_needs_more_than_five_pixels() {
        // Exactly five flagged pixels in the first cell: inactive.
        let five = heatmap(40, 40, |x, y| y == 0 && x < 5);
        assert!(analyze_regions(&five, &RegionParams::default()).boxes.is_empty());

        let six = heatmap(40, 40, |x, y| y == 0 && x < 6);
        let analysis = analyze_regions(&six, &RegionParams::default());
        assert_eq!(analysis.boxes.len(), 1);
        assert_eq!(analysis.boxes[0].severity, Severity::Low);
        assert_eq!(analysis.boxes[0].density, 6.0 / 400.0);
    }

    #[test]
    fn diagonal_cells_join_one_component() {
        // Fill cell (0,0) and cell (1,1): 8-connectivity merges them into a 40x40 box.
        let map = heatmap(60, 60, |x, y| (x < 20 && y < 20) || ((20..40).contains(&x) && (20..40).contains(&y)));
        let analysis = analyze_regions(&map, &RegionParams::default());
        assert_eq!(analysis.boxes.len(), 1);
        let region = &analysis.boxes[0];
        assert_eq!((region.width, region.height), (40, 40));
        assert_eq!(region.density, 0.5);
        assert_eq!(region.severity, Severity::Major);
    }

    #[test]
    fn separated_clusters_stay_in_scan_order() {
        let map = heatmap(100, 100, |x, y| (x >= 80 && y < 20) || (x < 20 && y >= 60));
        let analysis = analyze_regions(&map, &RegionParams::default());
        let ids: Vec<&str> = analysis.boxes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["80-0", "0-60"]);
    }

    #[test]
    fn partial_edge_cells_still_count() {
        // 45x45 image: the last row/column of cells is 5 pixels wide.
        let map = heatmap(45, 45, |x, y| x >= 40 && y >= 40);
        let analysis = analyze_regions(&map, &RegionParams::default());
        assert_eq!(analysis.boxes.len(), 1);
        let region = &analysis.boxes[0];
        assert_eq!((region.x, region.y, region.width, region.height), (40, 40, 20, 20));
        assert_eq!(region.pixel_count, 25);
        // Density counts the overhang: 25 over the full 20x20 box.
        assert_eq!(region.density, 25.0 / 400.0);
        assert_eq!(region.severity, Severity::Medium);
    }

    #[test]
    fn medium_band() {
        // 40 of 400 pixels: density 0.1.
        let map = heatmap(20, 20, |x, y| y < 2 && x < 20);
        let analysis = analyze_regions(&map, &RegionParams::default());
        assert_eq!(analysis.boxes[0].severity, Severity::Medium);
        assert_eq!(analysis.counts.medium, 1);
    }

    #[test]
    fn small_boxes_are_dropped_as_noise() {
        let params = RegionParams {
            cell_size: 8,
            ..RegionParams::default()
        };
        let map = heatmap(40, 40, |x, y| x < 8 && y < 8);
        assert!(analyze_regions(&map, &params).boxes.is_empty());
    }

    #[test]
    fn yellow_and_grey_are_not_flagged() {
        assert!(!is_flagged(&[255, 255, 0, 255]));
        assert!(!is_flagged(&[230, 230, 230, 255]));
        assert!(is_flagged(&[151, 99, 99, 255]));
        assert!(!is_flagged(&[150, 0, 0, 255]));
    }

    #[test]
    fn severity_cutoffs_are_exclusive() {
        let p = RegionParams::default();
        assert_eq!(Severity::from_density(0.05, &p), Severity::Low);
        assert_eq!(Severity::from_density(0.0501, &p), Severity::Medium);
        assert_eq!(Severity::from_density(0.3, &p), Severity::Medium);
        assert_eq!(Severity::from_density(0.31, &p), Severity::Major);
    }

    fn random_map() -> impl Strategy<Value = (u32, u32, Vec<bool>)> {
        (1u32..90, 1u32..90).prop_flat_map(|(w, h)| {
            (
                Just(w),
                Just(h),
                proptest::collection::vec(any::<bool>(), (w * h) as usize),
            )
        })
    }

    proptest! {
        #[test]
        fn regions_are_dense_bounded_and_reportable((w, h, mask) in random_map()) {
            let map = heatmap(w, h, |x, y| mask[(y * w + x) as usize]);
            let analysis = analyze_regions(&map, &RegionParams::default());
            prop_assert_eq!(analysis.counts.total(), analysis.boxes.len());
            for region in &analysis.boxes {
                prop_assert!(region.density >= 0.0 && region.density <= 1.0);
                prop_assert!(region.width > 10 && region.height > 10);
                prop_assert_eq!(region.x % 20, 0);
                prop_assert_eq!(region.y % 20, 0);
                prop_assert_eq!(region.severity, Severity::from_density(region.density, &RegionParams::default()));
            }
        }

        #[test]
        fn severity_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let p = RegionParams::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Severity::from_density(lo, &p) <= Severity::from_density(hi, &p));
        }

        #[test]
        fn analysis_is_deterministic((w, h, mask) in random_map()) {
            let map = heatmap(w, h, |x, y| mask[(y * w + x) as usize]);
            let params = RegionParams::default();
            prop_assert_eq!(analyze_regions(&map, &params), analyze_regions(&map, &params));
        }
    }
}
