//! Shared register store: the single point of contact between the sensor
//! driver, the engines, the persistence poll, and the Modbus server.
//!
//! Grounded on the teacher's `modbus/modbus_server.rs`, which keeps its
//! register map in an `Arc<Mutex<HashMap<u16, u16>>>`. This crate needs
//! fixed, densely-addressed banks (the register map runs past 40500) so the
//! `HashMap` becomes a plain `Vec<u16>`, but the single-mutex-per-bank shape
//! is unchanged.

pub mod float_codec;
pub mod map;

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Holding,
    Input,
}

pub struct RegisterStore {
    holding: Mutex<Vec<u16>>,
    input: Mutex<Vec<u16>>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self {
            holding: Mutex::new(vec![0u16; map::HOLDING_LEN]),
            input: Mutex::new(vec![0u16; map::INPUT_LEN]),
        }
    }

    fn bank(&self, bank: Bank) -> &Mutex<Vec<u16>> {
        match bank {
            Bank::Holding => &self.holding,
            Bank::Input => &self.input,
        }
    }

    pub fn get_word(&self, bank: Bank, addr: u16) -> u16 {
        let guard = self.bank(bank).lock().expect("register lock poisoned");
        guard.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn set_word(&self, bank: Bank, addr: u16, value: u16) {
        let mut guard = self.bank(bank).lock().expect("register lock poisoned");
        if let Some(slot) = guard.get_mut(addr as usize) {
            *slot = value;
        }
    }

    pub fn get_words(&self, bank: Bank, addr: u16, count: u16) -> Vec<u16> {
        let guard = self.bank(bank).lock().expect("register lock poisoned");
        (0..count)
            .map(|i| guard.get((addr + i) as usize).copied().unwrap_or(0))
            .collect()
    }

    pub fn set_words(&self, bank: Bank, addr: u16, values: &[u16]) {
        let mut guard = self.bank(bank).lock().expect("register lock poisoned");
        for (i, v) in values.iter().enumerate() {
            if let Some(slot) = guard.get_mut(addr as usize + i) {
                *slot = *v;
            }
        }
    }

    pub fn get_i16(&self, bank: Bank, addr: u16) -> i16 {
        self.get_word(bank, addr) as i16
    }

    pub fn set_i16(&self, bank: Bank, addr: u16, value: i16) {
        self.set_word(bank, addr, value as u16);
    }

    pub fn get_u32(&self, bank: Bank, addr: u16) -> u32 {
        let high = self.get_word(bank, addr);
        let low = self.get_word(bank, addr + 1);
        float_codec::decode_u32(high, low)
    }

    pub fn set_u32(&self, bank: Bank, addr: u16, value: u32) {
        let (high, low) = float_codec::encode_u32(value);
        // Written as two separate locked operations: the store does not
        // guarantee dword writes are atomic with respect to concurrent
        // readers, matching the hardware/PLC register semantics this core
        // is standing in for.
        self.set_word(bank, addr, high);
        self.set_word(bank, addr + 1, low);
    }

    /// Reads a float pair. A reader racing a writer may observe a torn
    /// value (new high word, stale low word or vice versa) for one poll
    /// cycle; callers that need a stable value should re-read if the result
    /// looks implausible for their domain (e.g. outside a sane mm range).
    pub fn get_f32(&self, bank: Bank, addr: u16) -> f32 {
        let high = self.get_word(bank, addr);
        let low = self.get_word(bank, addr + 1);
        float_codec::decode_f32(high, low)
    }

    pub fn set_f32(&self, bank: Bank, addr: u16, value: f32) {
        let (high, low) = float_codec::encode_f32(value);
        self.set_word(bank, addr, high);
        self.set_word(bank, addr + 1, low);
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}
