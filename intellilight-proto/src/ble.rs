//! BLE bulb GATT constants and command payloads
//!
//! The bulb exposes one vendor service with a single writable characteristic.
//! Every command is four bytes: an opcode followed by red, green and blue.

/// 16-bit UUID of the bulb's control service
pub const SERVICE_UUID: u16 = 0xFFB0;

/// 16-bit UUID of the colour characteristic inside [`SERVICE_UUID`]
pub const CHARACTERISTIC_UUID: u16 = 0xFFB2;

/// Opcode prefixing every colour write
pub const OPCODE_COLOUR: u8 = 0xD0;

/// Length of every bulb command
pub const COMMAND_LEN: usize = 4;

/// A command understood by the bulb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbCommand {
    Colour { r: u8, g: u8, b: u8 },
    Off,
}

impl BulbCommand {
    pub fn to_bytes(&self) -> [u8; COMMAND_LEN] {
        match *self {
            BulbCommand::Colour { r, g, b } => [OPCODE_COLOUR, r, g, b],
            BulbCommand::Off => [OPCODE_COLOUR, 0, 0, 0],
        }
    }

    /// Parse a characteristic value read back from the bulb
    ///
    /// Returns `None` for values that are not a colour command.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [OPCODE_COLOUR, 0, 0, 0, ..] => Some(BulbCommand::Off),
            [OPCODE_COLOUR, r, g, b, ..] => Some(BulbCommand::Colour { r: *r, g: *g, b: *b }),
            _ => None,
        }
    }
}
