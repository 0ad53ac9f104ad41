// MIT License - Copyright (c) 2026 Peter Wright

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Alarm arm state parsed from the vendor's protom status code.
    ///
    /// The cloud reports the panel state as a short code whose characters
    /// name the armed perimeters: `T` total, `Q` night, `P` day, `E`
    /// external/perimeter. `D` (or `0`) means everything is disarmed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AlarmStatusFlags: u8 {
        /// P - Internal day mode armed
        const INTERNAL_DAY   = 0x01;
        /// Q - Internal night mode armed
        const INTERNAL_NIGHT = 0x02;
        /// T - Internal total armed
        const INTERNAL_TOTAL = 0x04;
        /// E - External/perimeter armed
        const EXTERNAL       = 0x08;
    }
}

const ALARM_FLAG_CHARS: [(char, AlarmStatusFlags); 4] = [
    ('P', AlarmStatusFlags::INTERNAL_DAY),
    ('Q', AlarmStatusFlags::INTERNAL_NIGHT),
    ('T', AlarmStatusFlags::INTERNAL_TOTAL),
    ('E', AlarmStatusFlags::EXTERNAL),
];

impl AlarmStatusFlags {
    /// Parse a protom status code (e.g. "T", "PE", "D") into flags.
    pub fn from_protom(code: &str) -> Self {
        let mut flags = Self::empty();
        for (ch, flag) in &ALARM_FLAG_CHARS {
            if code.contains(*ch) {
                flags |= *flag;
            }
        }
        flags
    }
}

/// Immutable alarm state snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmStatus {
    pub flags: AlarmStatusFlags,
    /// The raw vendor status message.
    pub message: String,
    pub response_date: Option<String>,
}

impl AlarmStatus {
    pub fn disarmed() -> Self {
        Self {
            flags: AlarmStatusFlags::empty(),
            message: String::new(),
            response_date: None,
        }
    }

    pub fn from_protom(message: &str, response_date: Option<String>) -> Self {
        Self {
            flags: AlarmStatusFlags::from_protom(message),
            message: message.to_string(),
            response_date,
        }
    }

    pub fn is_disarmed(&self) -> bool {
        self.flags.is_empty()
    }
    pub fn internal_day(&self) -> bool {
        self.flags.contains(AlarmStatusFlags::INTERNAL_DAY)
    }
    pub fn internal_night(&self) -> bool {
        self.flags.contains(AlarmStatusFlags::INTERNAL_NIGHT)
    }
    pub fn internal_total(&self) -> bool {
        self.flags.contains(AlarmStatusFlags::INTERNAL_TOTAL)
    }
    pub fn external(&self) -> bool {
        self.flags.contains(AlarmStatusFlags::EXTERNAL)
    }
}

/// Outcome of an arm command. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Outcome of a disarm command. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisarmResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
