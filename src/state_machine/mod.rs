//! Command-driven state machine: owns the active calibration/measurement
//! phase, advances the status register, and watches for shift changes and
//! error-reset requests, per spec.md §4.7.
//!
//! Phases are explicit per-command context structs constructed on entry and
//! dropped on exit (spec.md §9), replacing the attribute-stash pattern the
//! original control software used.

use log::{info, warn};

use crate::calibration::{
    BodySeparateDiameterCalibration, BottomCalibration, Body2DiameterCalibration,
    FlangeAxisCalibration, FlangeDiameterCalibration, HeightCalibration,
    SensorWindowCalibration, WallCalibration,
};
use crate::measurement::{
    FlangeCompositePhase, RadiusPhase, SeparateFlangePhase, WallPhase,
};
use crate::quality;
use crate::registers::{map::holding, map::input, map::status, Bank, RegisterStore};
use crate::sensor::driver::{DriverCommand, DriverRequest, Sample};

/// Snapshot handed to an injected sink on shift change (spec.md §9's
/// "shift-report rendering as a plug-in" guidance). A plain value; no
/// rendering dependency lives in this crate.
#[derive(Debug, Clone, Copy)]
pub struct ShiftCounters {
    pub total: u16,
    pub good: u16,
    pub cond_good: u16,
    pub bad: u16,
}

#[derive(Debug, Clone)]
pub struct ShiftSnapshot {
    pub shift: u16,
    pub counters: ShiftCounters,
    pub cond_bad_tallies: [u16; 9],
    pub bad_tallies: [u16; 14],
}

enum CalibrationPhase {
    Wall(WallCalibration),
    Bottom(BottomCalibration),
    FlangeAxis(FlangeAxisCalibration),
    Height(HeightCalibration),
    FlangeDiameter(FlangeDiameterCalibration),
    BodySeparateDiameter(BodySeparateDiameterCalibration),
    Body2Diameter(Body2DiameterCalibration),
    SensorWindow(SensorWindowCalibration),
    Diagnostic,
}

enum MeasurementPhase {
    UpperWall(WallPhase),
    LowerWall(WallPhase),
    FlangeComposite(FlangeCompositePhase),
    SeparateFlange(SeparateFlangePhase),
    SeparateBody(RadiusPhase),
    Body2(RadiusPhase),
}

enum Phase {
    Idle,
    Calibration(CalibrationPhase),
    Measurement(MeasurementPhase),
}

pub struct StateMachine {
    current_cmd: u16,
    phase: Phase,
    last_shift: Option<u16>,
    /// Set once CMD=40 finishes a calculate step within the current cycle;
    /// cleared on the `CMD=0` observed after CMD=16 completes. See
    /// DESIGN.md's "Body-2 quality requirement flag lifetime" resolution.
    body2_quality_required: bool,
    /// True from the first accumulate command of a measurement cycle
    /// (CMD=10) until CMD=16 completes; `CMD → 0` while this is set is an
    /// abort.
    cycle_in_progress: bool,
    /// Set when CMD=16 completes; the next `CMD=0` clears
    /// `body2_quality_required` instead of leaving it set for the following
    /// cycle. See DESIGN.md's flag-lifetime resolution.
    quality_ran: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_cmd: 0,
            phase: Phase::Idle,
            last_shift: None,
            body2_quality_required: false,
            cycle_in_progress: false,
            quality_ran: false,
        }
    }

    /// Per-tick housekeeping: error-reset, shift-change detection, and
    /// command-register transition handling. Call once per main-loop
    /// iteration, before `accept_sample`.
    pub fn poll(
        &mut self,
        store: &RegisterStore,
        driver_tx: &std::sync::mpsc::SyncSender<DriverRequest>,
    ) -> Option<ShiftSnapshot> {
        if store.get_word(Bank::Holding, holding::ERROR_RESET) == 1 {
            store.set_i16(Bank::Input, input::STATUS, status::IDLE);
            store.set_word(Bank::Holding, holding::ERROR_RESET, 0);
            info!("status register cleared by error-reset");
        }

        let snapshot = self.check_shift_change(store);

        let cmd = store.get_word(Bank::Holding, holding::COMMAND);
        if cmd != self.current_cmd {
            self.handle_command_change(store, cmd, driver_tx);
            self.current_cmd = cmd;
        }

        snapshot
    }

    fn check_shift_change(&mut self, store: &RegisterStore) -> Option<ShiftSnapshot> {
        let shift = store.get_word(Bank::Holding, holding::SHIFT);
        match self.last_shift {
            None => {
                // Initial observation synchronizes without clearing.
                self.last_shift = Some(shift);
                None
            }
            Some(prev) if prev != shift => {
                let snapshot = self.snapshot_and_clear_shift(store, prev);
                self.last_shift = Some(shift);
                info!("shift change {prev} -> {shift}, counters and tallies cleared");
                Some(snapshot)
            }
            _ => None,
        }
    }

    fn snapshot_and_clear_shift(&self, store: &RegisterStore, shift: u16) -> ShiftSnapshot {
        let counters = ShiftCounters {
            total: store.get_word(Bank::Input, input::SHIFT_COUNTERS),
            good: store.get_word(Bank::Input, input::SHIFT_COUNTERS + 1),
            cond_good: store.get_word(Bank::Input, input::SHIFT_COUNTERS + 2),
            bad: store.get_word(Bank::Input, input::SHIFT_COUNTERS + 3),
        };
        let mut cond_bad_tallies = [0u16; 9];
        for (i, slot) in cond_bad_tallies.iter_mut().enumerate() {
            *slot = store.get_word(Bank::Input, input::COND_BAD_HEIGHT + i as u16);
        }
        let mut bad_tallies = [0u16; 14];
        for (i, slot) in bad_tallies.iter_mut().enumerate() {
            *slot = store.get_word(Bank::Input, input::BAD_HEIGHT_LESS + i as u16);
        }

        for i in 0..4 {
            store.set_word(Bank::Input, input::SHIFT_COUNTERS + i, 0);
        }
        for i in 0..9 {
            store.set_word(Bank::Input, input::COND_BAD_HEIGHT + i, 0);
        }
        for i in 0..14 {
            store.set_word(Bank::Input, input::BAD_HEIGHT_LESS + i, 0);
        }

        ShiftSnapshot {
            shift,
            counters,
            cond_bad_tallies,
            bad_tallies,
        }
    }

    fn handle_command_change(
        &mut self,
        store: &RegisterStore,
        new_cmd: u16,
        driver_tx: &std::sync::mpsc::SyncSender<DriverRequest>,
    ) {
        let old_cmd = self.current_cmd;

        // Finalize commands read the phase built by their matching
        // accumulate command instead of starting a fresh one; they are not
        // treated as "stopping the prior phase".
        if let Some(()) = self.try_finalize(store, old_cmd, new_cmd) {
            if new_cmd == 0 {
                self.phase = Phase::Idle;
            }
            return;
        }

        // Abort: command dropped to 0 mid-cycle, before CMD=16 ran.
        if new_cmd == 0 && self.cycle_in_progress {
            warn!("cycle aborted: command reset to 0 before quality evaluation (was {old_cmd})");
            store.set_i16(Bank::Input, input::STATUS, status::PRECONDITION_FAILED);
            self.cycle_in_progress = false;
            self.phase = Phase::Idle;
            return;
        }

        // Calibration command terminating back to 0: run the closed-form
        // computation before dropping the phase.
        if old_cmd >= 100 && old_cmd <= 108 && new_cmd == 0 {
            self.finish_calibration(store, old_cmd);
            self.phase = Phase::Idle;
            return;
        }

        self.phase = Phase::Idle;

        match new_cmd {
            0 => {
                store.set_i16(Bank::Input, input::STATUS, status::IDLE);
                if self.quality_ran {
                    self.body2_quality_required = false;
                    self.quality_ran = false;
                }
            }
            10 => self.enter_upper_wall(store),
            12 => self.enter_flange_composite(store),
            14 => self.enter_lower_wall(store),
            20 => self.enter_separate_flange(store),
            30 => self.enter_separate_body(store),
            40 => self.enter_body2(store),
            16 => self.run_quality(store),
            100 => self.enter_wall_calibration(store),
            101 => self.enter_bottom_calibration(store),
            102 => self.enter_flange_axis_calibration(store),
            103 => self.enter_height_calibration(store),
            104 => {
                self.phase = Phase::Calibration(CalibrationPhase::Diagnostic);
                store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_DIAGNOSTIC);
            }
            105 => self.enter_flange_diameter_calibration(store),
            106 => self.enter_sensor_window_calibration(store, driver_tx),
            107 => self.enter_body_separate_diameter_calibration(store),
            108 => self.enter_body2_diameter_calibration(store),
            _ => {
                warn!("unrecognized command {new_cmd} written to 40001, ignoring");
            }
        }
    }

    /// Handles a "calculate" command (11/13/15/21/31/41) or CMD=16, which
    /// operate on the phase the preceding accumulate command built rather
    /// than starting a new one. Returns `Some(())` if `new_cmd` was such a
    /// command (whether or not a matching phase was active).
    fn try_finalize(&mut self, store: &RegisterStore, old_cmd: u16, new_cmd: u16) -> Option<()> {
        match (old_cmd, new_cmd) {
            (10, 11) => {
                self.finish_wall_phase(store, input::UPPER_WALL_TRIPLE, status::UPPER_WALL_DONE);
                Some(())
            }
            (14, 15) => {
                self.finish_wall_phase(store, input::LOWER_WALL_TRIPLE, status::LOWER_WALL_DONE);
                Some(())
            }
            (12, 13) => {
                self.finish_flange_composite(store);
                Some(())
            }
            (20, 21) => {
                self.finish_separate_flange(store);
                Some(())
            }
            (30, 31) => {
                self.finish_separate_body(store);
                Some(())
            }
            (40, 41) => {
                self.finish_body2(store);
                Some(())
            }
            _ => None,
        }
    }

    fn finish_wall_phase(&mut self, store: &RegisterStore, triple_addr: u16, done_status: i16) {
        let e = match done_status {
            status::UPPER_WALL_DONE => store.get_f32(Bank::Holding, holding::EXTRAPOLATION_UPPER_WALL),
            _ => store.get_f32(Bank::Holding, holding::EXTRAPOLATION_LOWER_WALL),
        };
        let reduction = match &self.phase {
            Phase::Measurement(MeasurementPhase::UpperWall(p))
            | Phase::Measurement(MeasurementPhase::LowerWall(p)) => p.calculate(e),
            _ => None,
        };
        self.write_reduction_or_fail(store, reduction, triple_addr, done_status);
    }

    fn finish_flange_composite(&mut self, store: &RegisterStore) {
        let e_body = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_BODY_DIAMETER);
        let off_body = store.get_f32(Bank::Holding, holding::OFFSET_BODY_DIAMETER);
        let e_flange = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_FLANGE_DIAMETER);
        let off_flange = store.get_f32(Bank::Holding, holding::OFFSET_FLANGE_DIAMETER);
        let e_bottom = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_BOTTOM);

        let (body, flange, bottom) = match &self.phase {
            Phase::Measurement(MeasurementPhase::FlangeComposite(p)) => (
                p.calculate_body_diameter(e_body, off_body),
                p.calculate_flange_diameter(e_flange, off_flange),
                p.calculate_bottom(e_bottom),
            ),
            _ => (None, None, None),
        };

        if body.is_none() || flange.is_none() || bottom.is_none() {
            self.fail_phase(store, "flange composite phase had no samples on at least one sensor");
            return;
        }
        write_triple(store, input::BODY_DIAMETER_TRIPLE, body.unwrap());
        write_triple(store, input::FLANGE_DIAMETER_TRIPLE, flange.unwrap());
        write_triple(store, input::BOTTOM_TRIPLE, bottom.unwrap());
        store.set_i16(Bank::Input, input::STATUS, status::FLANGE_COMPOSITE_DONE);
    }

    fn finish_separate_flange(&mut self, store: &RegisterStore) {
        let e_flange = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_FLANGE_DIAMETER);
        let off_flange = store.get_f32(Bank::Holding, holding::OFFSET_FLANGE_DIAMETER);
        let e_bottom = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_BOTTOM);

        let (flange, bottom) = match &self.phase {
            Phase::Measurement(MeasurementPhase::SeparateFlange(p)) => (
                p.calculate_flange_diameter(e_flange, off_flange),
                p.calculate_bottom(e_bottom),
            ),
            _ => (None, None),
        };
        if flange.is_none() || bottom.is_none() {
            self.fail_phase(store, "separate flange phase had no samples");
            return;
        }
        write_triple(store, input::FLANGE_DIAMETER_TRIPLE, flange.unwrap());
        write_triple(store, input::BOTTOM_TRIPLE, bottom.unwrap());
        store.set_i16(Bank::Input, input::STATUS, status::SEPARATE_FLANGE_DONE);
    }

    fn finish_separate_body(&mut self, store: &RegisterStore) {
        let e = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_BODY_DIAMETER);
        let off = store.get_f32(Bank::Holding, holding::OFFSET_BODY_DIAMETER);
        let reduction = match &self.phase {
            Phase::Measurement(MeasurementPhase::SeparateBody(p)) => p.calculate_diameter(e, off),
            _ => None,
        };
        self.write_reduction_or_fail(store, reduction, input::BODY_DIAMETER_TRIPLE, status::SEPARATE_BODY_DONE);
    }

    fn finish_body2(&mut self, store: &RegisterStore) {
        let e = store.get_f32(Bank::Holding, holding::EXTRAPOLATION_BODY2_DIAMETER);
        let off = store.get_f32(Bank::Holding, holding::OFFSET_BODY2_DIAMETER);
        let reduction = match &self.phase {
            Phase::Measurement(MeasurementPhase::Body2(p)) => p.calculate_diameter(e, off),
            _ => None,
        };
        if reduction.is_none() {
            self.fail_phase(store, "body-2 phase had no samples");
            return;
        }
        write_triple(store, input::BODY2_DIAMETER_TRIPLE, reduction.unwrap());
        store.set_i16(Bank::Input, input::STATUS, status::BODY2_DONE);
        // This cycle now requires body-2 in the quality evaluation; see
        // DESIGN.md's flag-lifetime resolution.
        self.body2_quality_required = true;
    }

    fn write_reduction_or_fail(
        &mut self,
        store: &RegisterStore,
        reduction: Option<crate::measurement::Reduction>,
        triple_addr: u16,
        done_status: i16,
    ) {
        match reduction {
            Some(r) => {
                write_triple(store, triple_addr, r);
                store.set_i16(Bank::Input, input::STATUS, done_status);
            }
            None => self.fail_phase(store, "measurement phase had no samples"),
        }
    }

    fn fail_phase(&mut self, store: &RegisterStore, reason: &str) {
        warn!("{reason}, status set to -1");
        store.set_i16(Bank::Input, input::STATUS, status::PRECONDITION_FAILED);
        self.cycle_in_progress = false;
    }

    fn enter_upper_wall(&mut self, store: &RegisterStore) {
        let d12 = store.get_f32(Bank::Holding, holding::D12);
        let offset = store.get_f32(Bank::Holding, holding::OFFSET_UPPER_WALL);
        self.phase = Phase::Measurement(MeasurementPhase::UpperWall(WallPhase::new(d12, offset)));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::UPPER_WALL);
    }

    fn enter_lower_wall(&mut self, store: &RegisterStore) {
        let d12 = store.get_f32(Bank::Holding, holding::D12);
        let offset = store.get_f32(Bank::Holding, holding::OFFSET_LOWER_WALL);
        self.phase = Phase::Measurement(MeasurementPhase::LowerWall(WallPhase::new(d12, offset)));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::LOWER_WALL);
    }

    fn enter_flange_composite(&mut self, store: &RegisterStore) {
        let d1c = store.get_f32(Bank::Holding, holding::D1C);
        let d3c_flange = store.get_f32(Bank::Holding, holding::RESULT_FLANGE_AXIS_DIST);
        let d4s = store.get_f32(Bank::Holding, holding::D4S);
        let bottom_offset = store.get_f32(Bank::Holding, holding::OFFSET_BOTTOM);
        self.phase = Phase::Measurement(MeasurementPhase::FlangeComposite(
            FlangeCompositePhase::new(d1c, d3c_flange, d4s, bottom_offset),
        ));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::FLANGE_COMPOSITE);
    }

    fn enter_separate_flange(&mut self, store: &RegisterStore) {
        let d3c_flange = store.get_f32(Bank::Holding, holding::RESULT_FLANGE_AXIS_DIST);
        let d4s = store.get_f32(Bank::Holding, holding::D4S);
        let bottom_offset = store.get_f32(Bank::Holding, holding::OFFSET_BOTTOM);
        self.phase = Phase::Measurement(MeasurementPhase::SeparateFlange(
            SeparateFlangePhase::new(d3c_flange, d4s, bottom_offset),
        ));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::SEPARATE_FLANGE);
    }

    fn enter_separate_body(&mut self, store: &RegisterStore) {
        let d3c = store.get_f32(Bank::Holding, holding::RESULT_BODY_SEPARATE);
        self.phase = Phase::Measurement(MeasurementPhase::SeparateBody(RadiusPhase::new(d3c)));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::SEPARATE_BODY);
    }

    fn enter_body2(&mut self, store: &RegisterStore) {
        let d3c = store.get_f32(Bank::Holding, holding::RESULT_BODY2);
        self.phase = Phase::Measurement(MeasurementPhase::Body2(RadiusPhase::new(d3c)));
        self.cycle_in_progress = true;
        store.set_i16(Bank::Input, input::STATUS, status::BODY2);
    }

    fn run_quality(&mut self, store: &RegisterStore) {
        let verdict = quality::evaluate_cycle(store, self.body2_quality_required);
        info!("quality evaluation complete: {verdict:?}");
        store.set_i16(Bank::Input, input::STATUS, status::QUALITY);
        self.cycle_in_progress = false;
        self.quality_ran = true;
        self.phase = Phase::Idle;
    }

    fn enter_wall_calibration(&mut self, store: &RegisterStore) {
        let ref_thickness = store.get_f32(Bank::Holding, holding::REF_WALL);
        self.phase = Phase::Calibration(CalibrationPhase::Wall(WallCalibration::new(ref_thickness)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_WALL);
    }

    fn enter_bottom_calibration(&mut self, store: &RegisterStore) {
        let ref_bottom = store.get_f32(Bank::Holding, holding::REF_BOTTOM);
        self.phase = Phase::Calibration(CalibrationPhase::Bottom(BottomCalibration::new(ref_bottom)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_BOTTOM);
    }

    fn enter_flange_axis_calibration(&mut self, store: &RegisterStore) {
        let ref_diameter = store.get_f32(Bank::Holding, holding::REF_BODY_DIAMETER);
        self.phase = Phase::Calibration(CalibrationPhase::FlangeAxis(FlangeAxisCalibration::new(ref_diameter)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_BODY_DIAMETER);
    }

    fn enter_height_calibration(&mut self, store: &RegisterStore) {
        let ref_height = store.get_f32(Bank::Holding, holding::REF_HEIGHT);
        self.phase = Phase::Calibration(CalibrationPhase::Height(HeightCalibration::new(ref_height)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_HEIGHT);
    }

    fn enter_flange_diameter_calibration(&mut self, store: &RegisterStore) {
        let reference = store.get_f32(Bank::Holding, holding::REF_DIAMETER_FLANGE);
        self.phase = Phase::Calibration(CalibrationPhase::FlangeDiameter(FlangeDiameterCalibration::new(reference)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_FLANGE_AXIS);
    }

    fn enter_body_separate_diameter_calibration(&mut self, store: &RegisterStore) {
        let reference = store.get_f32(Bank::Holding, holding::REF_DIAMETER_BODY_SEPARATE);
        self.phase = Phase::Calibration(CalibrationPhase::BodySeparateDiameter(
            BodySeparateDiameterCalibration::new(reference),
        ));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_BODY_SEPARATE);
    }

    fn enter_body2_diameter_calibration(&mut self, store: &RegisterStore) {
        let reference = store.get_f32(Bank::Holding, holding::REF_BODY2);
        self.phase = Phase::Calibration(CalibrationPhase::Body2Diameter(Body2DiameterCalibration::new(reference)));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_BODY2);
    }

    /// CMD=106 acts immediately: unlike the other calibration commands it
    /// does not accumulate samples, so the parameter write is dispatched to
    /// the sensor thread on entry rather than on exit. See DESIGN.md's
    /// CMD=106 serial-port ownership resolution.
    fn enter_sensor_window_calibration(
        &mut self,
        store: &RegisterStore,
        driver_tx: &std::sync::mpsc::SyncSender<DriverRequest>,
    ) {
        let start_mm = store.get_f32(Bank::Holding, holding::SENSOR_WINDOW_START);
        let end_mm = store.get_f32(Bank::Holding, holding::SENSOR_WINDOW_END);
        let window = SensorWindowCalibration::new(start_mm, end_mm);
        self.phase = Phase::Calibration(CalibrationPhase::SensorWindow(window));
        store.set_i16(Bank::Input, input::STATUS, status::CALIBRATION_SENSOR_WINDOW);

        let start_raw = crate::sensor::protocol::mm_to_raw(start_mm);
        let end_raw = crate::sensor::protocol::mm_to_raw(end_mm);
        const SENSOR3_ADDR: u8 = 3;
        const WINDOW_START_CODE: u16 = 0x0C;
        const WINDOW_END_CODE: u16 = 0x0E;
        for (code, value) in [(WINDOW_START_CODE, start_raw), (WINDOW_END_CODE, end_raw)] {
            let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
            let request = DriverRequest {
                command: DriverCommand::WriteParameter {
                    addr: SENSOR3_ADDR,
                    code,
                    value,
                },
                reply: reply_tx,
            };
            if driver_tx.send(request).is_err() {
                warn!("sensor driver command channel closed, could not write CMD=106 parameter");
                return;
            }
            match reply_rx.recv_timeout(std::time::Duration::from_millis(500)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("CMD=106 parameter write failed: {e}"),
                Err(_) => warn!("CMD=106 parameter write timed out"),
            }
        }
        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        let request = DriverRequest {
            command: DriverCommand::CommitFlash { addr: SENSOR3_ADDR },
            reply: reply_tx,
        };
        if driver_tx.send(request).is_ok() {
            let _ = reply_rx.recv_timeout(std::time::Duration::from_millis(500));
        }
    }

    fn finish_calibration(&mut self, store: &RegisterStore, cmd: u16) {
        let outcome = match (&self.phase, cmd) {
            (Phase::Calibration(CalibrationPhase::Wall(c)), 100) => {
                c.finish().map(|(d12, d13)| {
                    store.set_f32(Bank::Holding, holding::D12, d12);
                    store.set_f32(Bank::Holding, holding::D13, d13);
                })
            }
            (Phase::Calibration(CalibrationPhase::Bottom(c)), 101) => {
                c.finish().map(|d4s| store.set_f32(Bank::Holding, holding::D4S, d4s))
            }
            (Phase::Calibration(CalibrationPhase::FlangeAxis(c)), 102) => {
                c.finish().map(|d1c| store.set_f32(Bank::Holding, holding::D1C, d1c))
            }
            (Phase::Calibration(CalibrationPhase::Height(c)), 103) => {
                let steps = store.get_u32(Bank::Holding, holding::STEP_COUNT);
                let pulses = store.get_word(Bank::Holding, holding::PULSES_PER_MM);
                c.finish(steps, pulses).map(|dp| {
                    store.set_f32(Bank::Holding, holding::DISTANCE_TO_REF_PLANE, dp);
                    store.set_i16(Bank::Input, input::STATUS, status::HEIGHT_CALIBRATION_COMPLETE);
                })
            }
            (Phase::Calibration(CalibrationPhase::FlangeDiameter(c)), 105) => {
                c.finish().map(|d3c| store.set_f32(Bank::Holding, holding::RESULT_FLANGE_AXIS_DIST, d3c))
            }
            (Phase::Calibration(CalibrationPhase::BodySeparateDiameter(c)), 107) => {
                c.finish().map(|d3c| store.set_f32(Bank::Holding, holding::RESULT_BODY_SEPARATE, d3c))
            }
            (Phase::Calibration(CalibrationPhase::Body2Diameter(c)), 108) => {
                c.finish().map(|d3c| store.set_f32(Bank::Holding, holding::RESULT_BODY2, d3c))
            }
            (Phase::Calibration(CalibrationPhase::SensorWindow(_)), 106) => Ok(()),
            (Phase::Calibration(CalibrationPhase::Diagnostic), 104) => Ok(()),
            _ => Ok(()),
        };

        match outcome {
            Ok(()) => {
                if cmd != 103 {
                    store.set_i16(Bank::Input, input::STATUS, status::IDLE);
                }
            }
            Err(e) => {
                warn!("calibration CMD={cmd} failed: {e}");
                self.zero_calibration_targets(store, cmd);
                store.set_i16(Bank::Input, input::STATUS, status::PRECONDITION_FAILED);
            }
        }
    }

    fn zero_calibration_targets(&self, store: &RegisterStore, cmd: u16) {
        let addr = match cmd {
            100 => Some(holding::D12), // also clears D13 below
            101 => Some(holding::D4S),
            102 => Some(holding::D1C),
            103 => Some(holding::DISTANCE_TO_REF_PLANE),
            105 => Some(holding::RESULT_FLANGE_AXIS_DIST),
            107 => Some(holding::RESULT_BODY_SEPARATE),
            108 => Some(holding::RESULT_BODY2),
            _ => None,
        };
        if let Some(addr) = addr {
            store.set_f32(Bank::Holding, addr, 0.0);
            if cmd == 100 {
                store.set_f32(Bank::Holding, holding::D13, 0.0);
            }
        }
    }

    /// Feeds one drained sample to the active phase. No-op outside an
    /// active measurement/calibration phase.
    pub fn accept_sample(&mut self, store: &RegisterStore, sample: Sample) {
        match &mut self.phase {
            Phase::Measurement(MeasurementPhase::UpperWall(p)) => p.accept(sample.s1, sample.s2),
            Phase::Measurement(MeasurementPhase::LowerWall(p)) => p.accept(sample.s1, sample.s2),
            Phase::Measurement(MeasurementPhase::FlangeComposite(p)) => {
                p.accept(sample.s1, sample.s3, sample.s4)
            }
            Phase::Measurement(MeasurementPhase::SeparateFlange(p)) => p.accept(sample.s3, sample.s4),
            Phase::Measurement(MeasurementPhase::SeparateBody(p)) => p.accept(sample.s3),
            Phase::Measurement(MeasurementPhase::Body2(p)) => p.accept(sample.s3),
            Phase::Calibration(CalibrationPhase::Wall(c)) => c.accept(sample.s1, sample.s2, sample.s3),
            Phase::Calibration(CalibrationPhase::Bottom(c)) => c.accept(sample.s4),
            Phase::Calibration(CalibrationPhase::FlangeAxis(c)) => c.accept(sample.s1),
            Phase::Calibration(CalibrationPhase::Height(c)) => {
                c.accept(sample.s1);
                if c.is_ready() {
                    store.set_i16(Bank::Input, input::STATUS, status::HEIGHT_CALIBRATION_COMPLETE);
                }
            }
            Phase::Calibration(CalibrationPhase::FlangeDiameter(c)) => c.accept(sample.s3),
            Phase::Calibration(CalibrationPhase::BodySeparateDiameter(c)) => c.accept(sample.s3),
            Phase::Calibration(CalibrationPhase::Body2Diameter(c)) => c.accept(sample.s3),
            Phase::Calibration(CalibrationPhase::SensorWindow(_))
            | Phase::Calibration(CalibrationPhase::Diagnostic)
            | Phase::Idle => {}
        }

        // Live quad-read mirror, independent of the active phase: whenever
        // CMD=200 is requested the HMI expects raw values regardless of
        // what the main engine is doing with them. A missing reading mirrors
        // as 0.0, the same sentinel the sensor itself uses for "no target".
        if self.current_cmd == 200 {
            store.set_f32(Bank::Input, input::LIVE_SENSORS, sample.s1.unwrap_or(0.0));
            store.set_f32(Bank::Input, input::LIVE_SENSORS + 2, sample.s2.unwrap_or(0.0));
            store.set_f32(Bank::Input, input::LIVE_SENSORS + 4, sample.s3.unwrap_or(0.0));
            store.set_f32(Bank::Input, input::LIVE_SENSORS + 6, sample.s4.unwrap_or(0.0));
        }
    }
}

fn write_triple(store: &RegisterStore, addr: u16, r: crate::measurement::Reduction) {
    store.set_f32(Bank::Input, addr, r.max);
    store.set_f32(Bank::Input, addr + 2, r.avg);
    store.set_f32(Bank::Input, addr + 4, r.min);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    fn channel() -> std::sync::mpsc::SyncSender<DriverRequest> {
        let (tx, _rx) = sync_channel(4);
        tx
    }

    #[test]
    fn wall_calibration_cycle_writes_results() {
        let store = RegisterStore::new();
        let mut sm = StateMachine::new();
        let tx = channel();

        store.set_f32(Bank::Holding, holding::REF_WALL, 5.0);
        sm.poll(&store, &tx);

        store.set_word(Bank::Holding, holding::COMMAND, 100);
        sm.poll(&store, &tx);
        for _ in 0..40 {
            sm.accept_sample(
                &store,
                Sample {
                    s1: Some(8.0),
                    s2: Some(9.0),
                    s3: Some(2.0),
                    s4: None,
                    at: std::time::Instant::now(),
                },
            );
        }
        store.set_word(Bank::Holding, holding::COMMAND, 0);
        sm.poll(&store, &tx);

        assert!((store.get_f32(Bank::Holding, holding::D12) - 22.0).abs() < 1e-3);
        assert!((store.get_f32(Bank::Holding, holding::D13) - 6.0).abs() < 1e-3);
        assert_eq!(store.get_i16(Bank::Input, input::STATUS), status::IDLE);
    }

    #[test]
    fn abort_mid_cycle_sets_error_status_without_incrementing_product_number() {
        let store = RegisterStore::new();
        let mut sm = StateMachine::new();
        let tx = channel();

        let product_before = store.get_word(Bank::Holding, holding::PRODUCT_NUMBER);

        store.set_word(Bank::Holding, holding::COMMAND, 10);
        sm.poll(&store, &tx);
        for _ in 0..50 {
            sm.accept_sample(
                &store,
                Sample {
                    s1: Some(8.0),
                    s2: Some(9.0),
                    s3: None,
                    s4: None,
                    at: std::time::Instant::now(),
                },
            );
        }
        store.set_word(Bank::Holding, holding::COMMAND, 0);
        sm.poll(&store, &tx);

        assert_eq!(store.get_i16(Bank::Input, input::STATUS), status::PRECONDITION_FAILED);
        assert_eq!(store.get_word(Bank::Holding, holding::PRODUCT_NUMBER), product_before);
    }

    #[test]
    fn shift_change_clears_counters_after_first_observation() {
        let store = RegisterStore::new();
        let mut sm = StateMachine::new();
        let tx = channel();

        store.set_word(Bank::Input, input::SHIFT_COUNTERS, 10);
        store.set_word(Bank::Input, input::SHIFT_COUNTERS + 1, 7);

        // first poll observes shift 0, synchronizing only
        assert!(sm.poll(&store, &tx).is_none());
        assert_eq!(store.get_word(Bank::Input, input::SHIFT_COUNTERS), 10);

        store.set_word(Bank::Holding, holding::SHIFT, 1);
        let snapshot = sm.poll(&store, &tx).expect("shift change should emit a snapshot");
        assert_eq!(snapshot.shift, 0);
        assert_eq!(snapshot.counters.total, 10);
        assert_eq!(store.get_word(Bank::Input, input::SHIFT_COUNTERS), 0);
    }

    #[test]
    fn body2_quality_required_resets_after_cmd_zero_following_quality() {
        let store = RegisterStore::new();
        let mut sm = StateMachine::new();
        let tx = channel();

        // Run CMD=40 -> 41 to set body2_quality_required, then CMD=16
        // quality evaluation, then CMD=0.
        store.set_word(Bank::Holding, holding::COMMAND, 40);
        sm.poll(&store, &tx);
        // 20 samples -> two completed 10-sample batches, enough for the
        // diameter pairing (N=2, half=1) to produce a result.
        for _ in 0..20 {
            sm.accept_sample(
                &store,
                Sample {
                    s1: None,
                    s2: None,
                    s3: Some(10.0),
                    s4: None,
                    at: std::time::Instant::now(),
                },
            );
        }
        store.set_word(Bank::Holding, holding::COMMAND, 41);
        sm.poll(&store, &tx);
        assert!(sm.body2_quality_required);

        store.set_word(Bank::Holding, holding::COMMAND, 16);
        sm.poll(&store, &tx);
        assert!(sm.body2_quality_required, "flag survives through its own CMD=16 evaluation");

        store.set_word(Bank::Holding, holding::COMMAND, 0);
        sm.poll(&store, &tx);
        assert!(!sm.body2_quality_required, "flag must clear on CMD=0 after CMD=16");
    }

    #[test]
    fn error_reset_clears_status_register() {
        let store = RegisterStore::new();
        let mut sm = StateMachine::new();
        let tx = channel();

        store.set_i16(Bank::Input, input::STATUS, status::PRECONDITION_FAILED);
        store.set_word(Bank::Holding, holding::ERROR_RESET, 1);
        sm.poll(&store, &tx);

        assert_eq!(store.get_i16(Bank::Input, input::STATUS), status::IDLE);
        assert_eq!(store.get_word(Bank::Holding, holding::ERROR_RESET), 0);
    }
}
