//! Calibration Engine: per-command collectors and closed-form constants,
//! per spec.md §4.4.

use std::collections::VecDeque;

use crate::error::{EngineError, EngineResult};

fn mean(values: &[f32]) -> EngineResult<f32> {
    if values.is_empty() {
        return Err(EngineError::EmptyBuffer);
    }
    Ok(values.iter().sum::<f32>() / values.len() as f32)
}

fn require_positive_reference(value: f32) -> EngineResult<()> {
    if value <= 0.0 {
        return Err(EngineError::Precondition("reference must be > 0"));
    }
    Ok(())
}

/// CMD=100: wall calibration. `d12 = s1 + s2 + ref`, `d13 = s1 - s3`.
#[derive(Default)]
pub struct WallCalibration {
    ref_thickness: f32,
    s1: Vec<f32>,
    s2: Vec<f32>,
    s3: Vec<f32>,
}

impl WallCalibration {
    pub fn new(ref_thickness: f32) -> Self {
        Self {
            ref_thickness,
            ..Default::default()
        }
    }

    /// All three sensors feed one joint computation, so a tick missing any
    /// of them is discarded entirely rather than letting the three vectors
    /// drift out of alignment.
    pub fn accept(&mut self, s1: Option<f32>, s2: Option<f32>, s3: Option<f32>) {
        let (Some(s1), Some(s2), Some(s3)) = (s1, s2, s3) else {
            return;
        };
        self.s1.push(s1);
        self.s2.push(s2);
        self.s3.push(s3);
    }

    pub fn finish(&self) -> EngineResult<(f32, f32)> {
        require_positive_reference(self.ref_thickness)?;
        let s1 = mean(&self.s1)?;
        let s2 = mean(&self.s2)?;
        let s3 = mean(&self.s3)?;
        let d12 = s1 + s2 + self.ref_thickness;
        let d13 = s1 - s3;
        Ok((d12, d13))
    }
}

/// CMD=101: bottom calibration. `d4s = s4 + ref`.
#[derive(Default)]
pub struct BottomCalibration {
    ref_bottom: f32,
    s4: Vec<f32>,
}

impl BottomCalibration {
    pub fn new(ref_bottom: f32) -> Self {
        Self {
            ref_bottom,
            ..Default::default()
        }
    }

    pub fn accept(&mut self, s4: Option<f32>) {
        if let Some(s4) = s4 {
            self.s4.push(s4);
        }
    }

    pub fn finish(&self) -> EngineResult<f32> {
        require_positive_reference(self.ref_bottom)?;
        Ok(mean(&self.s4)? + self.ref_bottom)
    }
}

/// Shared shape for CMD=102/105/107/108: `result = ref/2 + s3_avg` (CMD=102
/// uses s1 instead of s3; see `FlangeAxisCalibration`).
#[derive(Default)]
pub struct HalfDiameterCalibration {
    ref_diameter: f32,
    samples: Vec<f32>,
}

impl HalfDiameterCalibration {
    pub fn new(ref_diameter: f32) -> Self {
        Self {
            ref_diameter,
            ..Default::default()
        }
    }

    pub fn accept(&mut self, value: Option<f32>) {
        if let Some(value) = value {
            self.samples.push(value);
        }
    }

    pub fn finish(&self) -> EngineResult<f32> {
        require_positive_reference(self.ref_diameter)?;
        Ok(self.ref_diameter / 2.0 + mean(&self.samples)?)
    }
}

/// CMD=102: flange/axis calibration, `d1c = ref/2 + s1_avg`.
pub type FlangeAxisCalibration = HalfDiameterCalibration;
/// CMD=105: flange diameter reference, `d3c_flange = ref/2 + s3_avg`.
pub type FlangeDiameterCalibration = HalfDiameterCalibration;
/// CMD=107: body-separate diameter reference, `d3c_body = ref/2 + s3_avg`.
pub type BodySeparateDiameterCalibration = HalfDiameterCalibration;
/// CMD=108: body-2 diameter reference, `d3c_body2 = ref/2 + s3_avg`.
pub type Body2DiameterCalibration = HalfDiameterCalibration;

const HEIGHT_READINESS_WINDOW: usize = 5;

/// CMD=103: height calibration. `dp = steps / pulses_per_mm + ref`.
///
/// Readiness precondition (see DESIGN.md): the last 5 observed s1 samples
/// must all be non-zero before the phase may finish.
#[derive(Default)]
pub struct HeightCalibration {
    ref_height: f32,
    recent_s1: VecDeque<f32>,
}

impl HeightCalibration {
    pub fn new(ref_height: f32) -> Self {
        Self {
            ref_height,
            recent_s1: VecDeque::with_capacity(HEIGHT_READINESS_WINDOW),
        }
    }

    /// Only valid (non-zero, in-range) readings advance the readiness
    /// window; a missing reading simply does not count toward it.
    pub fn accept(&mut self, s1: Option<f32>) {
        let Some(s1) = s1 else {
            return;
        };
        if self.recent_s1.len() == HEIGHT_READINESS_WINDOW {
            self.recent_s1.pop_front();
        }
        self.recent_s1.push_back(s1);
    }

    pub fn is_ready(&self) -> bool {
        self.recent_s1.len() == HEIGHT_READINESS_WINDOW && self.recent_s1.iter().all(|v| *v != 0.0)
    }

    pub fn finish(&self, steps: u32, pulses_per_mm: u16) -> EngineResult<f32> {
        require_positive_reference(self.ref_height)?;
        if !self.is_ready() {
            return Err(EngineError::Precondition(
                "fewer than 5 non-zero s1 readings in the last 5 samples",
            ));
        }
        if pulses_per_mm == 0 {
            return Err(EngineError::Arithmetic("pulses_per_mm is zero"));
        }
        Ok(steps as f32 / pulses_per_mm as f32 + self.ref_height)
    }
}

/// CMD=106: sensor-3 discrete measurement window. Unlike the other
/// calibration commands, this one acts immediately on phase entry (there is
/// no sample accumulation) — see `crate::sensor::protocol::mm_to_raw` for
/// the value encoding and DESIGN.md for how the write reaches the sensor
/// thread.
pub struct SensorWindowCalibration {
    pub start_mm: f32,
    pub end_mm: f32,
}

impl SensorWindowCalibration {
    pub fn new(start_mm: f32, end_mm: f32) -> Self {
        Self { start_mm, end_mm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_calibration_matches_scenario() {
        let mut cal = WallCalibration::new(5.0);
        for _ in 0..40 {
            cal.accept(Some(8.0), Some(9.0), Some(2.0));
        }
        let (d12, d13) = cal.finish().unwrap();
        assert!((d12 - 22.0).abs() < 1e-4);
        assert!((d13 - 6.0).abs() < 1e-4);
    }

    #[test]
    fn wall_calibration_rejects_non_positive_reference() {
        let cal = WallCalibration::new(0.0);
        assert!(matches!(cal.finish(), Err(EngineError::Precondition(_))));
    }

    #[test]
    fn flange_axis_calibration_matches_scenario() {
        let mut cal = FlangeAxisCalibration::new(100.0);
        for _ in 0..10 {
            cal.accept(Some(10.0));
        }
        let d1c = cal.finish().unwrap();
        assert!((d1c - 60.0).abs() < 1e-4);
    }

    #[test]
    fn height_calibration_requires_five_non_zero_readings() {
        let mut cal = HeightCalibration::new(1.0);
        cal.accept(Some(10.0));
        cal.accept(Some(10.0));
        cal.accept(None); // missing reading: does not count toward readiness
        cal.accept(Some(10.0));
        cal.accept(Some(10.0));
        assert!(!cal.is_ready());
        assert!(matches!(
            cal.finish(1000, 10),
            Err(EngineError::Precondition(_))
        ));

        let mut cal = HeightCalibration::new(1.0);
        for _ in 0..5 {
            cal.accept(Some(10.0));
        }
        assert!(cal.is_ready());
        assert!((cal.finish(1000, 10).unwrap() - 101.0).abs() < 1e-4);
    }

    #[test]
    fn height_calibration_rejects_zero_pulses_per_mm() {
        let mut cal = HeightCalibration::new(1.0);
        for _ in 0..5 {
            cal.accept(Some(10.0));
        }
        assert!(matches!(
            cal.finish(1000, 0),
            Err(EngineError::Arithmetic(_))
        ));
    }

    #[test]
    fn empty_buffer_is_a_precondition_failure() {
        let cal = BottomCalibration::new(5.0);
        assert!(matches!(cal.finish(), Err(EngineError::EmptyBuffer)));
    }
}
