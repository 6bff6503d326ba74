//! Digital I/O identifiers

use std::fmt;

/// Kind of digital output addressed by a `DigitalOutput` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OutputKind {
    Relay = 1,
    Led = 2,
    DisplayBacklight = 3,
    Buzzer = 4,
}

impl From<OutputKind> for u32 {
    fn from(kind: OutputKind) -> u32 {
        kind as u32
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relay => "Relay",
            Self::Led => "Led",
            Self::DisplayBacklight => "Backlight",
            Self::Buzzer => "Buzzer",
        };
        f.write_str(name)
    }
}
