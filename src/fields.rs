//! Field registry and value-to-label tables for the KitProg protocol.
//!
//! Each field is described by a declarative record giving its width,
//! optional bitmask, display base and label table. Decoders refer to
//! fields by [`FieldId`] and use [`FieldSpec::extract`] and
//! [`FieldSpec::label`] to turn payload bytes into annotated values.

use num_enum::{IntoPrimitive, FromPrimitive};
use serde::Serialize;

use crate::util::vec_map::VecMap;

/// A table mapping raw values to display labels.
pub type Labels = &'static [(u32, &'static str)];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash,
         IntoPrimitive, FromPrimitive, Serialize)]
#[repr(u8)]
pub enum FieldId {
    CommandType = 0,
    Command,
    Mode,
    Protocol,
    AcquireOptions,
    DeviceType,
    AcquireMode,
    AcquireAttempts,
    Status,
    InterruptControl,
    InterruptDirection,
    InterruptStart,
    InterruptRestart,
    InterruptStop,
    InterruptRestartHw,
    InterruptConfigure,
    InterruptCommand,
    SwdOut,
    SwdIn,
    #[default]
    Unknown,
}

/// How a numeric field value is displayed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Base {
    Hex,
    Dec,
    /// Not numeric; the field holds raw bytes.
    None,
}

#[derive(Copy, Clone, Debug)]
pub struct FieldSpec {
    pub id: FieldId,
    pub name: &'static str,
    pub abbrev: &'static str,
    /// Width on the wire, in bytes. Zero for variable-length byte fields.
    pub width: usize,
    pub base: Base,
    pub labels: Option<Labels>,
    pub mask: Option<u32>,
}

impl FieldSpec {
    /// Read this field's value from its bytes, applying the mask and
    /// shifting the result down to bit zero.
    pub fn extract(&self, bytes: &[u8]) -> u32 {
        let raw = bytes
            .iter()
            .take(self.width)
            .fold(0u32, |acc, &byte| acc << 8 | byte as u32);
        match self.mask {
            Some(mask) => (raw & mask) >> mask.trailing_zeros(),
            None => raw,
        }
    }

    pub fn label(&self, value: u32) -> Option<&'static str> {
        self.labels?
            .iter()
            .find(|(key, _)| *key == value)
            .map(|(_, label)| *label)
    }
}

pub const COMMAND_TYPES: Labels = &[
    (0x01, "Read"),
    (0x02, "Write"),
];

pub const COMMANDS: Labels = &[
    (0x07, "Program"),
];

pub const MODES: Labels = &[
    (0x01, "Poll KitProg Status"),
    (0x04, "Reset Target"),
    (0x40, "Set KitProg Protocol"),
    (0x41, "Synchronize Transfer"),
    (0x42, "Acquire SWD Target"),
    (0x43, "Reset SWD Bus"),
];

pub const PROTOCOLS: Labels = &[
    (0x00, "JTAG"),
    (0x01, "SWD"),
];

// PSoC 5 identification is unconfirmed.
pub const DEVICE_TYPES: Labels = &[
    (0x00, "PSoC 4"),
    (0x03, "PSoC 5 (?)"),
];

pub const ACQUIRE_MODES: Labels = &[
    (0x00, "Reset"),
    (0x01, "Power Cycle"),
];

pub const STATUSES: Labels = &[
    (0x00, "NOK/NACK"),
    (0x01, "OK/ACK"),
];

pub const INTERRUPT_DIRECTIONS: Labels = &[
    (0x00, "Write"),
    (0x01, "Read"),
];

pub const BIT_FLAGS: Labels = &[
    (0x00, "Not set"),
    (0x01, "Set"),
];

pub const INTERRUPT_COMMANDS: Labels = &[
    (0x80, "Get Power Setting"),
    (0x81, "Get KitProg Version"),
    (0x82, "Reset KitProg"),
    (0x8F, "Configure Interface"),
    (0xA0, "Enter Bootloader"),
];

const fn uint(id: FieldId,
              name: &'static str,
              abbrev: &'static str,
              base: Base,
              labels: Option<Labels>,
              mask: Option<u32>)
    -> FieldSpec
{
    FieldSpec { id, name, abbrev, width: 1, base, labels, mask }
}

const fn bytes(id: FieldId, name: &'static str, abbrev: &'static str)
    -> FieldSpec
{
    FieldSpec {
        id, name, abbrev,
        width: 0,
        base: Base::None,
        labels: None,
        mask: None,
    }
}

static FIELD_RECORDS: [FieldSpec; 20] = {
    use FieldId::*;
    use Base::{Hex, Dec};
    [
        uint(CommandType, "Command Type", "kitprog.command_type",
             Hex, Some(COMMAND_TYPES), None),
        uint(Command, "Command", "kitprog.command",
             Hex, Some(COMMANDS), None),
        uint(Mode, "Mode", "kitprog.mode",
             Hex, Some(MODES), None),
        uint(Protocol, "Protocol", "kitprog.protocol",
             Hex, Some(PROTOCOLS), None),
        uint(AcquireOptions, "Acquire Options", "kitprog.acquire",
             Hex, None, None),
        uint(DeviceType, "Device Type", "kitprog.acquire.device_type",
             Hex, Some(DEVICE_TYPES), Some(0x0F)),
        uint(AcquireMode, "Acquire Mode", "kitprog.acquire.mode",
             Hex, Some(ACQUIRE_MODES), Some(0xF0)),
        uint(AcquireAttempts, "Maximum Attempts", "kitprog.acquire.attempts",
             Dec, None, None),
        uint(Status, "Status", "kitprog.status",
             Hex, Some(STATUSES), None),
        uint(InterruptControl, "Control", "kitprog.int.control",
             Hex, None, None),
        uint(InterruptDirection, "Direction", "kitprog.int.direction",
             Hex, Some(INTERRUPT_DIRECTIONS), Some(0x01)),
        uint(InterruptStart, "Start", "kitprog.int.start",
             Hex, Some(BIT_FLAGS), Some(0x02)),
        uint(InterruptRestart, "Restart", "kitprog.int.restart",
             Hex, Some(BIT_FLAGS), Some(0x04)),
        uint(InterruptStop, "Stop", "kitprog.int.stop",
             Hex, Some(BIT_FLAGS), Some(0x08)),
        uint(InterruptRestartHw, "Restart HW", "kitprog.int.restart_hw",
             Hex, Some(BIT_FLAGS), Some(0x10)),
        uint(InterruptConfigure, "Configure", "kitprog.int.configure",
             Hex, Some(BIT_FLAGS), Some(0x20)),
        uint(InterruptCommand, "Command", "kitprog.int.command",
             Hex, Some(INTERRUPT_COMMANDS), None),
        bytes(SwdOut, "SWD Out", "kitprog.swd_out"),
        bytes(SwdIn, "SWD In", "kitprog.swd_in"),
        bytes(Unknown, "Unknown", "kitprog.unknown"),
    ]
};

/// The immutable registry of all KitProg fields.
///
/// Built once and passed by reference to the decoders.
#[derive(Clone)]
pub struct Protocol {
    fields: VecMap<FieldId, FieldSpec>,
}

impl Protocol {
    pub fn new() -> Self {
        let mut fields = VecMap::with_capacity(FIELD_RECORDS.len() as u8);
        for record in &FIELD_RECORDS {
            fields.set(record.id, *record);
        }
        Protocol { fields }
    }

    pub fn field(&self, id: FieldId) -> &FieldSpec {
        &self.fields[id]
    }

    pub fn fields(&self) -> impl Iterator<Item=&FieldSpec> {
        (&self.fields).into_iter()
    }

    /// Look up a field by its filter abbreviation.
    pub fn by_abbrev(&self, abbrev: &str) -> Option<&FieldSpec> {
        self.fields().find(|spec| spec.abbrev == abbrev)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}
