#[macro_use]
extern crate bitfield;

pub mod decoder;
pub mod devices;
pub mod fields;
pub mod options;
pub mod pcap;
pub mod session;
pub mod transfer;
pub mod tree;
pub mod usb;
pub mod util;

pub use decoder::Dissector;
pub use fields::{FieldId, Protocol};
pub use options::{DeviceFilter, DissectorOptions, LeftoverPolicy};
pub use session::{DissectedTransfer, Session};
pub use transfer::{MessageKind, TransferDescriptor, TransferKind, classify};
pub use tree::{DecodedField, Dissection, Group};
pub use usb::{Direction, KITPROG_DEVICE_ID, UsbDeviceId};
