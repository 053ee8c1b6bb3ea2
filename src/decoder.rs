//! Decoders for each KitProg message kind, and the dissector that
//! dispatches transfers to them.

use std::ops::Range;

use log::trace;
use num_enum::FromPrimitive;

use crate::fields::{FieldId, Protocol};
use crate::options::{DissectorOptions, LeftoverPolicy};
use crate::transfer::{MessageKind, TransferDescriptor, classify};
use crate::tree::{DecodedField, Dissection, Severity};

/// Sub-commands of the Program control command, as found in byte 2.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
enum ProgramMode {
    PollStatus          = 0x01,
    ResetTarget         = 0x04,
    SetProtocol         = 0x40,
    SynchronizeTransfer = 0x41,
    AcquireSwdTarget    = 0x42,
    ResetSwdBus         = 0x43,
    #[default]
    Other               = 0xFF,
}

/// Sub-fields of the interrupt control byte, in bit order.
const INTERRUPT_CONTROL_BITS: [FieldId; 6] = [
    FieldId::InterruptDirection,
    FieldId::InterruptStart,
    FieldId::InterruptRestart,
    FieldId::InterruptStop,
    FieldId::InterruptRestartHw,
    FieldId::InterruptConfigure,
];

/// Fields decoded from one message, and how far into the payload they reach.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub fields: Vec<DecodedField>,
    pub consumed: usize,
}

impl Decoded {
    fn new(fields: Vec<DecodedField>) -> Self {
        let consumed = fields
            .iter()
            .map(|field| field.range.end)
            .max()
            .unwrap_or(0);
        Decoded { fields, consumed }
    }
}

/// Emits fields from a payload, skipping any whose bytes are missing.
struct FieldReader<'a> {
    protocol: &'a Protocol,
    payload: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(protocol: &'a Protocol, payload: &'a [u8]) -> Self {
        FieldReader { protocol, payload }
    }

    fn uint(&self, id: FieldId, offset: usize) -> Option<DecodedField> {
        let spec = self.protocol.field(id);
        let range = offset..(offset + spec.width);
        let bytes = self.payload.get(range.clone())?;
        Some(DecodedField::uint(spec, spec.extract(bytes), range))
    }

    fn bytes(&self, id: FieldId, range: Range<usize>) -> Option<DecodedField> {
        let spec = self.protocol.field(id);
        match self.payload.get(range.clone()) {
            Some(bytes) if !bytes.is_empty() =>
                Some(DecodedField::bytes(spec, bytes, range)),
            _ => None,
        }
    }
}

pub fn decode_control_command(protocol: &Protocol, payload: &[u8]) -> Decoded {
    let reader = FieldReader::new(protocol, payload);
    let mut fields: Vec<DecodedField> = [
        (FieldId::CommandType, 0),
        (FieldId::Command, 1),
        (FieldId::Mode, 2),
    ]
        .into_iter()
        .filter_map(|(id, offset)| reader.uint(id, offset))
        .collect();

    let mode = payload.get(2).map(|&byte| ProgramMode::from(byte));
    match mode {
        Some(ProgramMode::SetProtocol) => {
            fields.extend(reader.uint(FieldId::Protocol, 3));
        },
        Some(ProgramMode::AcquireSwdTarget) => {
            // Device type and acquire mode share byte 3.
            let options = reader
                .uint(FieldId::AcquireOptions, 3)
                .map(|options| options.with_children(
                    [FieldId::DeviceType, FieldId::AcquireMode]
                        .into_iter()
                        .filter_map(|id| reader.uint(id, 3))
                        .collect()));
            fields.extend(options);
            fields.extend(reader.uint(FieldId::AcquireAttempts, 4));
        },
        Some(ProgramMode::PollStatus |
             ProgramMode::ResetTarget |
             ProgramMode::SynchronizeTransfer |
             ProgramMode::ResetSwdBus |
             ProgramMode::Other) | None => {},
    }
    Decoded::new(fields)
}

pub fn decode_control_response(protocol: &Protocol, payload: &[u8]) -> Decoded {
    let reader = FieldReader::new(protocol, payload);
    Decoded::new(reader.uint(FieldId::Status, 0).into_iter().collect())
}

pub fn decode_interrupt_command(protocol: &Protocol, payload: &[u8]) -> Decoded {
    let reader = FieldReader::new(protocol, payload);
    let mut fields = Vec::new();
    let control = reader
        .uint(FieldId::InterruptControl, 0)
        .map(|control| control.with_children(
            INTERRUPT_CONTROL_BITS
                .into_iter()
                .filter_map(|id| reader.uint(id, 0))
                .collect()));
    fields.extend(control);
    // Byte 1 is reserved.
    fields.extend(reader.uint(FieldId::InterruptCommand, 2));
    Decoded::new(fields)
}

/// Interrupt responses have no known layout.
pub fn decode_interrupt_response(_protocol: &Protocol, _payload: &[u8])
    -> Decoded
{
    Decoded::default()
}

pub fn decode_bulk_out(protocol: &Protocol, payload: &[u8]) -> Decoded {
    let reader = FieldReader::new(protocol, payload);
    Decoded::new(reader.bytes(FieldId::SwdOut, 0..payload.len())
        .into_iter()
        .collect())
}

pub fn decode_bulk_in(protocol: &Protocol, payload: &[u8]) -> Decoded {
    let reader = FieldReader::new(protocol, payload);
    Decoded::new(reader.bytes(FieldId::SwdIn, 0..payload.len())
        .into_iter()
        .collect())
}

/// Run the decoder for a message kind.
pub fn decode(protocol: &Protocol, kind: MessageKind, payload: &[u8])
    -> Decoded
{
    use MessageKind::*;
    match kind {
        ControlCommand => decode_control_command(protocol, payload),
        ControlResponse => decode_control_response(protocol, payload),
        InterruptCommand => decode_interrupt_command(protocol, payload),
        InterruptResponse => decode_interrupt_response(protocol, payload),
        BulkOut => decode_bulk_out(protocol, payload),
        BulkIn => decode_bulk_in(protocol, payload),
        Unhandled => Decoded::default(),
    }
}

/// Mark any bytes after `consumed` as unknown, with a warning.
pub fn annotate_leftover(protocol: &Protocol,
                         dissection: &mut Dissection,
                         payload: &[u8],
                         consumed: usize)
{
    let reader = FieldReader::new(protocol, payload);
    if let Some(unknown) = reader.bytes(FieldId::Unknown, consumed..payload.len()) {
        dissection.fields.push(
            unknown.with_advisory(Severity::Warning, "Leftover data"));
    }
}

/// Dissects individual transfers using a fixed set of options.
pub struct Dissector {
    protocol: Protocol,
    options: DissectorOptions,
}

impl Dissector {
    pub fn new(options: DissectorOptions) -> Self {
        Dissector {
            protocol: Protocol::new(),
            options,
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn options(&self) -> &DissectorOptions {
        &self.options
    }

    /// Decode one transfer, or return `None` if it is not a KitProg message.
    pub fn dissect(&self, transfer: &TransferDescriptor) -> Option<Dissection> {
        let kind = classify(transfer);
        let Some(group) = kind.group() else {
            trace!("Declining {:?} transfer on endpoint {} {}",
                   transfer.kind, transfer.endpoint, transfer.direction);
            return None;
        };
        let payload = transfer.payload();
        let decoded = decode(&self.protocol, kind, payload);
        trace!("Decoded {kind:?} with {} fields from {} of {} bytes",
               decoded.fields.len(), decoded.consumed, payload.len());
        let mut dissection = Dissection::new(group, decoded.fields);
        if self.options.leftover == LeftoverPolicy::Annotate {
            annotate_leftover(
                &self.protocol, &mut dissection, payload, decoded.consumed);
        }
        Some(dissection)
    }
}

impl Default for Dissector {
    fn default() -> Self {
        Self::new(DissectorOptions::default())
    }
}
