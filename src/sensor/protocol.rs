//! RIFTEK RF602 RS-485 wire protocol.
//!
//! Byte sequences and the raw-to-millimeter conversion are grounded on
//! `original_source/main.py`'s `HighSpeedRiftekSensor`
//! (`send_broadcast_latch_command_fast`, `request_measurement_fast`,
//! `convert_to_mm`).

/// Zero point of the sensor's working range, in millimeters.
pub const BASE_DISTANCE_MM: f32 = 20.0;
/// Full working range of the sensor, in millimeters.
pub const SENSOR_RANGE_MM: f32 = 25.0;
/// Full-scale raw reading (14-bit).
pub const RAW_FULL_SCALE: u16 = 16384;

/// Broadcast command that latches a measurement on every sensor on the bus
/// simultaneously.
pub const BROADCAST_LATCH: [u8; 2] = [0x00, 0x85];

/// Per-sensor command to read back the value latched by `BROADCAST_LATCH`.
pub fn read_latched(addr: u8) -> [u8; 2] {
    [addr, 0x86]
}

/// Starts continuous streaming mode on one sensor.
pub fn stream_start(addr: u8) -> [u8; 2] {
    [addr, 0x87]
}

/// Stops continuous streaming mode on one sensor.
pub fn stream_stop(addr: u8) -> [u8; 2] {
    [addr, 0x88]
}

/// Writes a sensor parameter (e.g. measurement-window start/end) to RAM.
///
/// `code` and `value` are each split into low/high bytes with the high
/// bit set on every data byte, matching the sensor's framing convention
/// for distinguishing data bytes from command bytes.
pub fn write_parameter(addr: u8, code: u16, value: u16) -> [u8; 6] {
    let code_lo = (code & 0x00FF) as u8 | 0x80;
    let code_hi = ((code >> 8) & 0x00FF) as u8 | 0x80;
    let val_lo = (value & 0x00FF) as u8 | 0x80;
    let val_hi = ((value >> 8) & 0x00FF) as u8 | 0x80;
    [addr, 0x83, code_lo, code_hi, val_lo, val_hi]
}

/// Commits RAM parameters to the sensor's flash memory.
pub fn commit_to_flash(addr: u8) -> [u8; 4] {
    [addr, 0x84, 0x8A, 0x8A]
}

/// Decodes a 4-byte reply frame into the sensor's raw 14-bit reading.
///
/// Each reply byte only carries 4 significant bits in its low nibble
/// (the high nibble is a framing marker); two bytes are reassembled into
/// each output byte, per the original driver's nibble layout.
pub fn decode_frame(frame: [u8; 4]) -> u16 {
    let byte0 = (frame[0] & 0x0F) | ((frame[1] & 0x0F) << 4);
    let byte1 = (frame[2] & 0x0F) | ((frame[3] & 0x0F) << 4);
    (byte0 as u16) | ((byte1 as u16) << 8)
}

/// `decode_frame`, but first validates that every reply byte has its high
/// bit set (the sensor's marker for a data byte). Returns `None` on a
/// malformed frame instead of silently decoding garbage.
pub fn decode_frame_checked(frame: [u8; 4]) -> Option<u16> {
    if frame.iter().any(|b| b & 0x80 == 0) {
        return None;
    }
    Some(decode_frame(frame))
}

/// A sensor value is valid iff present and within the sensor's physical
/// range; `raw_to_mm`'s `0.0` ("no target") and anything else outside
/// `[20.0, 50.0]` are not valid for aggregation, per spec.md §3.
pub fn is_valid_mm(mm: f32) -> bool {
    (BASE_DISTANCE_MM..=BASE_DISTANCE_MM + SENSOR_RANGE_MM).contains(&mm)
}

/// Converts a raw 14-bit reading to millimeters. `0` means "no target in
/// range" and is passed through as `0.0` rather than the base distance.
pub fn raw_to_mm(raw: u16) -> f32 {
    if raw == 0 {
        0.0
    } else {
        BASE_DISTANCE_MM + raw as f32 * SENSOR_RANGE_MM / RAW_FULL_SCALE as f32
    }
}

/// Inverse of `raw_to_mm`, used to encode CMD=106 measurement-window bounds
/// for `write_parameter`. Clamped to the sensor's representable range.
pub fn mm_to_raw(mm: f32) -> u16 {
    let raw = (RAW_FULL_SCALE as f32 / SENSOR_RANGE_MM) * (mm - BASE_DISTANCE_MM);
    raw.round().clamp(0.0, (RAW_FULL_SCALE - 1) as f32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_raw_is_zero_mm() {
        assert_eq!(raw_to_mm(0), 0.0);
    }

    #[test]
    fn mid_scale_raw_is_mid_range_mm() {
        let mm = raw_to_mm(8192);
        assert!((mm - 32.5).abs() < 0.01);
    }

    #[test]
    fn mm_round_trip_is_close() {
        for mm in [20.5_f32, 25.0, 32.5, 44.9] {
            let raw = mm_to_raw(mm);
            let back = raw_to_mm(raw);
            assert!((back - mm).abs() < 0.01, "{mm} -> {raw} -> {back}");
        }
    }

    #[test]
    fn decode_frame_reassembles_nibbles() {
        // byte0 = 0x0A | (0x0B << 4) = 0xBA, byte1 = 0x03 | (0x02 << 4) = 0x23
        let raw = decode_frame([0x8A, 0x9B, 0x83, 0x92]);
        assert_eq!(raw, 0xBA | (0x23 << 8));
    }

    #[test]
    fn decode_frame_checked_rejects_missing_high_bit() {
        assert!(decode_frame_checked([0x8A, 0x9B, 0x83, 0x92]).is_some());
        assert!(decode_frame_checked([0x0A, 0x9B, 0x83, 0x92]).is_none());
    }

    #[test]
    fn validity_excludes_no_target_and_out_of_range() {
        assert!(!is_valid_mm(0.0));
        assert!(is_valid_mm(20.0));
        assert!(is_valid_mm(45.0));
        assert!(!is_valid_mm(19.9));
        assert!(!is_valid_mm(51.0));
    }

    #[test]
    fn write_parameter_sets_high_bit_on_every_data_byte() {
        let frame = write_parameter(2, 0x0105, 0x00FF);
        assert_eq!(frame[0], 2);
        assert_eq!(frame[1], 0x83);
        assert!(frame[2..].iter().all(|b| b & 0x80 != 0));
        assert_eq!(frame[2], 0x05 | 0x80);
        assert_eq!(frame[3], 0x01 | 0x80);
        assert_eq!(frame[4], 0xFF | 0x80);
        assert_eq!(frame[5], 0x00 | 0x80);
    }
}
