//! Named offsets into the holding/input word banks.
//!
//! Offsets are zero-based from the bank's first Modbus address (40001 for
//! holding, 30001 for input) so they can index directly into `RegisterStore`.
//! See DESIGN.md for the handful of slots whose exact placement is not given
//! verbatim by the register map and had to be derived from the formulas that
//! consume them.

pub const HOLDING_LEN: usize = 600;
pub const INPUT_LEN: usize = 300;

pub mod holding {
    pub const COMMAND: u16 = 0; // 40001
    pub const REF_WALL: u16 = 1; // 40002-3
    pub const REF_BOTTOM: u16 = 3; // 40004-5
    pub const REF_BODY_DIAMETER: u16 = 5; // 40006-7, CMD 102
    pub const REF_HEIGHT: u16 = 7; // 40008-9, CMD 103
    pub const D12: u16 = 9; // 40010-11
    pub const D13: u16 = 11; // 40012-13
    pub const D4S: u16 = 13; // 40014-15
    pub const D1C: u16 = 15; // 40016-17
    pub const ERROR_RESET: u16 = 23; // 40024
    pub const REF_DIAMETER_FLANGE: u16 = 29; // 40030-31, CMD 105
    pub const RESULT_FLANGE_AXIS_DIST: u16 = 31; // 40032-33
    pub const REF_DIAMETER_BODY_SEPARATE: u16 = 33; // 40034-35, CMD 107
    pub const REF_BODY2: u16 = 35; // 40036-37, CMD 108
    pub const RESULT_BODY_SEPARATE: u16 = 37; // 40038-39
    pub const RESULT_BODY2: u16 = 39; // 40040-41
    pub const CHECK_MODE: u16 = 48; // 40049
    pub const ALLOWED_COND_BAD_COUNT: u16 = 49; // 40050
    pub const ALLOWED_BAD_COUNT: u16 = 50; // 40051
    pub const STEP_COUNT: u16 = 51; // 40052-53, u32
    pub const PULSES_PER_MM: u16 = 53; // 40054
    pub const DISTANCE_TO_REF_PLANE: u16 = 54; // 40055-56, CMD 103 result
    pub const MEASURED_HEIGHT_PLC: u16 = 56; // 40057-58
    pub const MEASURED_FLANGE_THICKNESS_PLC: u16 = 58; // 40059-60
    pub const SHIFT: u16 = 99; // 40100
    pub const PRODUCT_NUMBER: u16 = 100; // 40101

    // 40346-40351: body-2 thresholds {base, cond_bad_error, bad_error}
    pub const THRESHOLD_BODY2_BASE: u16 = 345;
    pub const THRESHOLD_BODY2_COND_BAD: u16 = 347;
    pub const THRESHOLD_BODY2_BAD: u16 = 349;

    // 40352-40393: seven-parameter thresholds, {base, cond_bad_error, bad_error}
    // each, in this fixed order (grounded in original_source's monitoring
    // table comments, see DESIGN.md).
    pub const THRESHOLD_UPPER_WALL: u16 = 351; // 352-357
    pub const THRESHOLD_LOWER_WALL: u16 = 357; // 358-363
    pub const THRESHOLD_BOTTOM: u16 = 363; // 364-369
    pub const THRESHOLD_FLANGE_THICKNESS: u16 = 369; // 370-375
    pub const THRESHOLD_HEIGHT: u16 = 375; // 376-381
    pub const THRESHOLD_BODY_DIAMETER: u16 = 381; // 382-387
    pub const THRESHOLD_FLANGE_DIAMETER: u16 = 387; // 388-393

    pub const POSITIVE_BAD_BOTTOM: u16 = 399; // 40400-01
    pub const POSITIVE_BAD_LOWER_WALL: u16 = 401; // 40402-03

    pub const SENSOR_WINDOW_START: u16 = 403; // 40404-05, CMD=106
    pub const SENSOR_WINDOW_END: u16 = 405; // 40406-07, CMD=106

    // 40500-523: offset & extrapolation coefficients, 12 floats, see
    // DESIGN.md for the derivation of slots not given explicitly by the spec.
    pub const OFFSET_UPPER_WALL: u16 = 499; // 500-501
    pub const OFFSET_LOWER_WALL: u16 = 501; // 502-503
    pub const OFFSET_BODY_DIAMETER: u16 = 503; // 504-505
    pub const OFFSET_FLANGE_DIAMETER: u16 = 505; // 506-507
    pub const OFFSET_BOTTOM: u16 = 507; // 508-509
    pub const EXTRAPOLATION_UPPER_WALL: u16 = 509; // 510-511
    pub const EXTRAPOLATION_LOWER_WALL: u16 = 511; // 512-513
    pub const EXTRAPOLATION_BOTTOM: u16 = 513; // 514-515
    pub const EXTRAPOLATION_BODY_DIAMETER: u16 = 515; // 516-517
    pub const EXTRAPOLATION_FLANGE_DIAMETER: u16 = 517; // 518-519
    pub const OFFSET_BODY2_DIAMETER: u16 = 519; // 520-521
    pub const EXTRAPOLATION_BODY2_DIAMETER: u16 = 521; // 522-523
}

pub mod input {
    pub const LIVE_SENSORS: u16 = 0; // 30001-08, f32x4 (s1,s2,s3,s4)
    pub const STATUS: u16 = 8; // 30009

    // 30016-33: upper-wall / lower-wall / bottom {max,avg,min}
    pub const UPPER_WALL_TRIPLE: u16 = 15;
    pub const LOWER_WALL_TRIPLE: u16 = 21;
    pub const BOTTOM_TRIPLE: u16 = 27;

    pub const HEIGHT_TRIPLE: u16 = 39; // 30040-45, unused (CMD=9 not implemented)

    pub const BODY_DIAMETER_TRIPLE: u16 = 45; // 30046-51
    pub const FLANGE_DIAMETER_TRIPLE: u16 = 51; // 30052-57

    pub const SENSOR_CONNECTION_OK: u16 = 57; // 30058
    pub const BODY2_DIAMETER_TRIPLE: u16 = 58; // 30059-64

    pub const SHIFT_COUNTERS: u16 = 100; // 30101-104: total,good,cond_good,bad

    // 30201-209: conditionally-bad tally, in the exact order given by the
    // register map (lower_wall and bottom are already direction-split here).
    pub const COND_BAD_HEIGHT: u16 = 200;
    pub const COND_BAD_UPPER_WALL: u16 = 201;
    pub const COND_BAD_FLANGE_THICKNESS: u16 = 202;
    pub const COND_BAD_LOWER_WALL_GREATER: u16 = 203;
    pub const COND_BAD_LOWER_WALL_LESS: u16 = 204;
    pub const COND_BAD_BOTTOM_LESS: u16 = 205;
    pub const COND_BAD_BOTTOM_GREATER: u16 = 206;
    pub const COND_BAD_FLANGE_DIAMETER: u16 = 207;
    pub const COND_BAD_BODY_DIAMETER: u16 = 208;

    // 30210-223: bad tally, all seven parameters split (less, greater).
    pub const BAD_HEIGHT_LESS: u16 = 209;
    pub const BAD_HEIGHT_GREATER: u16 = 210;
    pub const BAD_UPPER_WALL_LESS: u16 = 211;
    pub const BAD_UPPER_WALL_GREATER: u16 = 212;
    pub const BAD_FLANGE_THICKNESS_LESS: u16 = 213;
    pub const BAD_FLANGE_THICKNESS_GREATER: u16 = 214;
    pub const BAD_LOWER_WALL_LESS: u16 = 215;
    pub const BAD_LOWER_WALL_GREATER: u16 = 216;
    pub const BAD_BOTTOM_LESS: u16 = 217;
    pub const BAD_BOTTOM_GREATER: u16 = 218;
    pub const BAD_FLANGE_DIAMETER_LESS: u16 = 219;
    pub const BAD_FLANGE_DIAMETER_GREATER: u16 = 220;
    pub const BAD_BODY_DIAMETER_LESS: u16 = 221;
    pub const BAD_BODY_DIAMETER_GREATER: u16 = 222;
}

/// Status codes written to `input::STATUS` (30009).
pub mod status {
    pub const PRECONDITION_FAILED: i16 = -1;
    pub const IDLE: i16 = 0;

    pub const UPPER_WALL: i16 = 10;
    pub const UPPER_WALL_DONE: i16 = 11;
    pub const FLANGE_COMPOSITE: i16 = 12;
    pub const FLANGE_COMPOSITE_DONE: i16 = 13;
    pub const LOWER_WALL: i16 = 14;
    pub const LOWER_WALL_DONE: i16 = 15;
    pub const QUALITY: i16 = 16;

    pub const SEPARATE_FLANGE: i16 = 20;
    pub const SEPARATE_FLANGE_DONE: i16 = 21;

    pub const SEPARATE_BODY: i16 = 30;
    pub const SEPARATE_BODY_DONE: i16 = 31;

    pub const BODY2: i16 = 40;
    pub const BODY2_DONE: i16 = 41;

    pub const CALIBRATION_WALL: i16 = 100;
    pub const CALIBRATION_BOTTOM: i16 = 101;
    pub const CALIBRATION_BODY_DIAMETER: i16 = 102;
    pub const CALIBRATION_HEIGHT: i16 = 103;
    pub const CALIBRATION_DIAGNOSTIC: i16 = 104;
    pub const CALIBRATION_FLANGE_AXIS: i16 = 105;
    pub const CALIBRATION_SENSOR_WINDOW: i16 = 106;
    pub const CALIBRATION_BODY_SEPARATE: i16 = 107;
    pub const CALIBRATION_BODY2: i16 = 108;

    pub const CALC_GATE_WALL: i16 = 110;
    pub const CALC_GATE_FLANGE: i16 = 112;
    pub const CALC_GATE_BOTTOM: i16 = 114;
    pub const CALC_GATE_QUALITY: i16 = 116;

    pub const ERROR_ACK_REQUIRED_LO: i16 = 90;
    pub const ERROR_ACK_REQUIRED_HI: i16 = 91;

    pub const HEIGHT_CALIBRATION_COMPLETE: i16 = 931;

    pub const LIVE_QUAD: i16 = 200;
}
