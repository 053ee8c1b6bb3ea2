//! Transfer descriptors and the classifier that picks a message decoder.

use std::borrow::Cow;

use serde::Serialize;

use crate::tree::Group;
use crate::usb::{Direction, EndpointNum, TransferType, UrbType};

/// The transfer kinds that KitProg traffic can arrive on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TransferKind {
    Control,
    Bulk,
    Interrupt,
}

impl TransferKind {
    pub fn from_transfer_type(transfer_type: TransferType) -> Option<Self> {
        match transfer_type {
            TransferType::Control => Some(TransferKind::Control),
            TransferType::Bulk => Some(TransferKind::Bulk),
            TransferType::Interrupt => Some(TransferKind::Interrupt),
            TransferType::Isochronous | TransferType::Unknown => None,
        }
    }
}

/// One captured USB transfer, as handed to the dissector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferDescriptor<'p> {
    pub kind: TransferKind,
    pub endpoint: EndpointNum,
    pub direction: Direction,
    pub payload: Cow<'p, [u8]>,
    pub declared_length: u32,
}

impl<'p> TransferDescriptor<'p> {
    pub fn new(kind: TransferKind,
               endpoint: u8,
               direction: Direction,
               payload: &'p [u8])
        -> Self
    {
        TransferDescriptor {
            kind,
            endpoint: EndpointNum(endpoint),
            direction,
            payload: Cow::Borrowed(payload),
            declared_length: payload.len() as u32,
        }
    }

    /// Build a descriptor from raw URB attributes.
    ///
    /// Returns `None` for transfer types that cannot carry KitProg
    /// messages, and for URB tags other than submission and completion.
    pub fn from_urb(transfer_type: TransferType,
                    endpoint: EndpointNum,
                    urb_type: UrbType,
                    payload: Cow<'p, [u8]>,
                    declared_length: u32)
        -> Option<Self>
    {
        let kind = TransferKind::from_transfer_type(transfer_type)?;
        let direction = urb_type.direction()?;
        Some(TransferDescriptor {
            kind,
            endpoint,
            direction,
            payload,
            declared_length,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Which message decoder applies to a transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    ControlCommand,
    ControlResponse,
    InterruptCommand,
    InterruptResponse,
    BulkOut,
    BulkIn,
    Unhandled,
}

impl MessageKind {
    /// The output tree group for this message, if it is decoded at all.
    pub fn group(&self) -> Option<Group> {
        use MessageKind::*;
        match self {
            ControlCommand | ControlResponse => Some(Group::Control),
            InterruptCommand | InterruptResponse => Some(Group::Interrupt),
            BulkOut | BulkIn => Some(Group::Bulk),
            Unhandled => None,
        }
    }
}

pub fn classify(transfer: &TransferDescriptor) -> MessageKind {
    use Direction::*;
    use MessageKind::*;
    use TransferKind::*;
    match (transfer.kind, transfer.endpoint.0, transfer.direction) {
        (Interrupt, 4, Out) => InterruptCommand,
        (Interrupt, 3, In)  => InterruptResponse,
        (Control,   0, Out) => ControlCommand,
        (Control,   0, In)  => ControlResponse,
        (Bulk,      2, Out) => BulkOut,
        (Bulk,      1, In)  => BulkIn,
        _ => Unhandled,
    }
}
