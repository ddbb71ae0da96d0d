//! Measurement aggregation engine: phase collectors, offset/extrapolation
//! coefficients, diametrically-opposite pairing, and max/avg/min reduction.
//!
//! Grounded on spec.md §4.5 directly; phase structs follow spec.md §9's
//! "explicit per-phase context struct constructed on phase entry" guidance,
//! replacing the original's ad hoc attribute stash.

pub mod window;

use window::SensorWindow;

/// Append-only sequence of filtered batch outputs for one phase's
/// measured quantity.
#[derive(Debug, Default, Clone)]
pub struct AveragedSeries {
    values: Vec<f32>,
}

impl AveragedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f32) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    pub max: f32,
    pub avg: f32,
    pub min: f32,
}

fn extrapolate(values: &[f32], e: f32) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| mean + e * (v - mean)).collect()
}

fn reduce(values: &[f32]) -> Option<Reduction> {
    if values.is_empty() {
        return None;
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let avg = values.iter().sum::<f32>() / values.len() as f32;
    Some(Reduction { max, avg, min })
}

/// Pairs index `i` with `i + N/2` (N = slice length, floor-divided) and
/// returns `r_i + r_{i+N/2} + offset` for each pair. A full rotation of the
/// workpiece puts opposite angular positions at these indices.
pub fn pair_diameters(values: &[f32], offset: f32) -> Vec<f32> {
    let half = values.len() / 2;
    (0..half).map(|i| values[i] + values[i + half] + offset).collect()
}

/// Thickness-style reduction: extrapolate the raw series toward its mean by
/// `e`, then reduce directly to `{max, avg, min}`.
pub fn reduce_thickness(series: &AveragedSeries, e: f32) -> Option<Reduction> {
    let extrapolated = extrapolate(series.values(), e);
    reduce(&extrapolated)
}

/// Diameter-style reduction: extrapolate the radius series by `e`, pair
/// opposite indices into diameters with `offset`, then reduce.
pub fn reduce_diameter(series: &AveragedSeries, e: f32, offset: f32) -> Option<Reduction> {
    let extrapolated = extrapolate(series.values(), e);
    let diameters = pair_diameters(&extrapolated, offset);
    reduce(&diameters)
}

/// CMD=10 / CMD=14: upper and lower wall thickness share this shape, only
/// differing in which offset register feeds them.
pub struct WallPhase {
    window_s1: SensorWindow,
    window_s2: SensorWindow,
    thickness: AveragedSeries,
    d12: f32,
    offset: f32,
}

impl WallPhase {
    pub fn new(d12: f32, offset: f32) -> Self {
        Self {
            window_s1: SensorWindow::new(),
            window_s2: SensorWindow::new(),
            thickness: AveragedSeries::new(),
            d12,
            offset,
        }
    }

    /// Advances both windows only when this sample has both sensors valid,
    /// keeping the two windows aligned batch-for-batch (a partial sample,
    /// e.g. one sensor out of range, is discarded for this phase entirely
    /// rather than desynchronizing s1's and s2's batch boundaries).
    pub fn accept(&mut self, s1: Option<f32>, s2: Option<f32>) {
        let (Some(s1), Some(s2)) = (s1, s2) else {
            return;
        };
        let b1 = self.window_s1.push(s1);
        let b2 = self.window_s2.push(s2);
        if let (Some(b1), Some(b2)) = (b1, b2) {
            self.thickness.push(self.d12 - b1 - b2 + self.offset);
        }
    }

    pub fn calculate(&self, e: f32) -> Option<Reduction> {
        reduce_thickness(&self.thickness, e)
    }
}

/// CMD=12: flange composite. Tracks body radius, flange radius, and bottom
/// thickness from sensors 1, 3, 4 in a single session.
pub struct FlangeCompositePhase {
    window_s1: SensorWindow,
    window_s3: SensorWindow,
    window_s4: SensorWindow,
    body_r: AveragedSeries,
    flange_r: AveragedSeries,
    bottom: AveragedSeries,
    d1c: f32,
    d3c_flange: f32,
    d4s: f32,
    bottom_offset: f32,
}

impl FlangeCompositePhase {
    pub fn new(d1c: f32, d3c_flange: f32, d4s: f32, bottom_offset: f32) -> Self {
        Self {
            window_s1: SensorWindow::new(),
            window_s3: SensorWindow::new(),
            window_s4: SensorWindow::new(),
            body_r: AveragedSeries::new(),
            flange_r: AveragedSeries::new(),
            bottom: AveragedSeries::new(),
            d1c,
            d3c_flange,
            d4s,
            bottom_offset,
        }
    }

    /// Body radius, flange radius, and bottom thickness each derive from a
    /// single sensor, so each window advances independently of the other
    /// two's validity this tick.
    pub fn accept(&mut self, s1: Option<f32>, s3: Option<f32>, s4: Option<f32>) {
        if let Some(b1) = s1.and_then(|v| self.window_s1.push(v)) {
            self.body_r.push(self.d1c - b1);
        }
        if let Some(b3) = s3.and_then(|v| self.window_s3.push(v)) {
            self.flange_r.push(self.d3c_flange - b3);
        }
        if let Some(b4) = s4.and_then(|v| self.window_s4.push(v)) {
            self.bottom.push(self.d4s - b4 + self.bottom_offset);
        }
    }

    pub fn calculate_body_diameter(&self, e: f32, offset: f32) -> Option<Reduction> {
        reduce_diameter(&self.body_r, e, offset)
    }

    pub fn calculate_flange_diameter(&self, e: f32, offset: f32) -> Option<Reduction> {
        reduce_diameter(&self.flange_r, e, offset)
    }

    pub fn calculate_bottom(&self, e: f32) -> Option<Reduction> {
        reduce_thickness(&self.bottom, e)
    }
}

/// CMD=20: separate flange session — flange radius and bottom, without body.
pub struct SeparateFlangePhase {
    window_s3: SensorWindow,
    window_s4: SensorWindow,
    flange_r: AveragedSeries,
    bottom: AveragedSeries,
    d3c_flange: f32,
    d4s: f32,
    bottom_offset: f32,
}

impl SeparateFlangePhase {
    pub fn new(d3c_flange: f32, d4s: f32, bottom_offset: f32) -> Self {
        Self {
            window_s3: SensorWindow::new(),
            window_s4: SensorWindow::new(),
            flange_r: AveragedSeries::new(),
            bottom: AveragedSeries::new(),
            d3c_flange,
            d4s,
            bottom_offset,
        }
    }

    pub fn accept(&mut self, s3: Option<f32>, s4: Option<f32>) {
        if let Some(b3) = s3.and_then(|v| self.window_s3.push(v)) {
            self.flange_r.push(self.d3c_flange - b3);
        }
        if let Some(b4) = s4.and_then(|v| self.window_s4.push(v)) {
            self.bottom.push(self.d4s - b4 + self.bottom_offset);
        }
    }

    pub fn calculate_flange_diameter(&self, e: f32, offset: f32) -> Option<Reduction> {
        reduce_diameter(&self.flange_r, e, offset)
    }

    pub fn calculate_bottom(&self, e: f32) -> Option<Reduction> {
        reduce_thickness(&self.bottom, e)
    }
}

/// CMD=30 / CMD=40: single-sensor radius session shared by separate-body and
/// body-2 phases.
pub struct RadiusPhase {
    window_s3: SensorWindow,
    radius: AveragedSeries,
    d3c: f32,
}

impl RadiusPhase {
    pub fn new(d3c: f32) -> Self {
        Self {
            window_s3: SensorWindow::new(),
            radius: AveragedSeries::new(),
            d3c,
        }
    }

    pub fn accept(&mut self, s3: Option<f32>) {
        if let Some(b3) = s3.and_then(|v| self.window_s3.push(v)) {
            self.radius.push(self.d3c - b3);
        }
    }

    pub fn calculate_diameter(&self, e: f32, offset: f32) -> Option<Reduction> {
        reduce_diameter(&self.radius, e, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(series: &mut AveragedSeries, values: &[f32]) {
        for v in values {
            series.push(*v);
        }
    }

    #[test]
    fn diameter_pairing_matches_scenario() {
        let mut series = AveragedSeries::new();
        fill(&mut series, &[50.0, 50.0, 50.0, 50.0]);
        let reduction = reduce_diameter(&series, 1.0, 0.0).unwrap();
        assert_eq!(reduction.max, 100.0);
        assert_eq!(reduction.avg, 100.0);
        assert_eq!(reduction.min, 100.0);
    }

    #[test]
    fn odd_length_series_pairs_with_floor_half() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let paired = pair_diameters(&values, 0.0);
        // N=5, half=2: pairs (0,2),(1,3) -> 2 diameters
        assert_eq!(paired.len(), 2);
        assert_eq!(paired[0], 1.0 + 3.0);
        assert_eq!(paired[1], 2.0 + 4.0);
    }

    #[test]
    fn upper_wall_phase_matches_scenario() {
        let mut phase = WallPhase::new(22.0, 0.0);
        for _ in 0..10 {
            phase.accept(Some(8.0), Some(9.0));
        }
        let r = phase.calculate(1.0).unwrap();
        assert!((r.max - 5.0).abs() < 1e-4);
        assert!((r.avg - 5.0).abs() < 1e-4);
        assert!((r.min - 5.0).abs() < 1e-4);
    }

    #[test]
    fn wall_phase_discards_ticks_with_one_sensor_missing() {
        let mut phase = WallPhase::new(22.0, 0.0);
        for _ in 0..9 {
            phase.accept(Some(8.0), Some(9.0));
        }
        // Tenth tick has no s2 reading: neither window should drain.
        phase.accept(Some(8.0), None);
        assert!(phase.calculate(1.0).is_none());
        phase.accept(Some(8.0), Some(9.0));
        assert!(phase.calculate(1.0).is_some());
    }

    #[test]
    fn extrapolation_identity_when_e_is_one() {
        let mut series = AveragedSeries::new();
        fill(&mut series, &[1.0, 2.0, 3.0]);
        let extrapolated = extrapolate(series.values(), 1.0);
        assert_eq!(extrapolated, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn extrapolation_collapses_to_mean_when_e_is_zero() {
        let mut series = AveragedSeries::new();
        fill(&mut series, &[1.0, 2.0, 3.0]);
        let extrapolated = extrapolate(series.values(), 0.0);
        assert_eq!(extrapolated, vec![2.0, 2.0, 2.0]);
    }
}
