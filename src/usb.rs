//! USB types shared by the capture source, device tracker and decoders.

use std::mem::size_of;

use bytemuck_derive::{Pod, Zeroable};
use bytemuck::pod_read_unaligned;
use num_enum::{IntoPrimitive, FromPrimitive};
use derive_more::{From, Into, Display};
use serde::{Serialize, Deserialize};
use usb_ids::FromId;

/// Identifier under which the KitProg dissector registers, combining
/// vendor 0x04B4 in the high half and product 0xF139 in the low half.
pub const KITPROG_DEVICE_ID: u32 = 0x04B4_F139;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct BusNum(pub u16);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct DeviceAddr(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct StringId(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default,
         Pod, Zeroable, From, Into, Display, Serialize)]
#[repr(transparent)]
pub struct EndpointNum(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct EndpointAddr(pub u8);

impl EndpointAddr {
    pub fn number(&self) -> EndpointNum {
        EndpointNum(self.0 & 0x7F)
    }

    pub fn direction(&self) -> Direction {
        if self.0 & 0x80 == 0 {
            Direction::Out
        } else {
            Direction::In
        }
    }
}

/// Direction of a transfer relative to the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive,
         Serialize)]
#[repr(u8)]
pub enum Direction {
    /// Host to device.
    #[default]
    Out = 0,
    /// Device to host.
    In = 1,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", match self {
            Direction::In  => "IN",
            Direction::Out => "OUT"})
    }
}

/// Transfer type codes, as used by usbmon.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransferType {
    Isochronous = 0,
    Interrupt   = 1,
    Control     = 2,
    Bulk        = 3,
    #[default]
    Unknown     = 0xFF,
}

/// Event tag of a USB request block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum UrbType {
    /// 'S': submitted by the host.
    Submit   = 0x53,
    /// 'C': completed by the device.
    Complete = 0x43,
    /// 'E': submission error.
    Error    = 0x45,
    #[default]
    Unknown  = 0x00,
}

impl UrbType {
    /// Direction implied by the event tag. Only submissions and
    /// completions carry a direction; anything else is declined.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            UrbType::Submit => Some(Direction::Out),
            UrbType::Complete => Some(Direction::In),
            UrbType::Error | UrbType::Unknown => None,
        }
    }
}

/// A USB vendor and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbDeviceId {
    pub vendor: u16,
    pub product: u16,
}

impl UsbDeviceId {
    pub const KITPROG: UsbDeviceId = UsbDeviceId::from_u32(KITPROG_DEVICE_ID);

    pub const fn new(vendor: u16, product: u16) -> Self {
        UsbDeviceId { vendor, product }
    }

    pub const fn from_u32(id: u32) -> Self {
        UsbDeviceId {
            vendor: (id >> 16) as u16,
            product: id as u16,
        }
    }

    pub const fn as_u32(&self) -> u32 {
        (self.vendor as u32) << 16 | self.product as u32
    }

    pub fn vendor_name(&self) -> Option<&'static str> {
        usb_ids::Vendor::from_id(self.vendor).map(|v| v.name())
    }

    pub fn product_name(&self) -> Option<&'static str> {
        usb_ids::Device::from_vid_pid(self.vendor, self.product)
            .map(|d| d.name())
    }
}

impl std::fmt::Display for UsbDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)?;
        match (self.vendor_name(), self.product_name()) {
            (Some(vendor), Some(product)) => write!(f, " ({vendor} {product})"),
            (Some(vendor), None) => write!(f, " ({vendor})"),
            (None, _) => Ok(()),
        }
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    #[default]
    Reserved = 3,
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    #[default]
    Reserved = 4,
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default)]
    pub struct RequestTypeFields(u8);
    pub u8, into Recipient, recipient, _: 4, 0;
    pub u8, into RequestType, request_type, _: 6, 5;
    pub u8, into Direction, direction, _: 7, 7;
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
    #[default]
    Unknown = 13,
}

/// The eight bytes of a control transfer's SETUP stage.
#[derive(Copy, Clone, Debug)]
pub struct SetupFields {
    pub type_fields: RequestTypeFields,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupFields {
    pub fn from_bytes(setup: &[u8; 8]) -> Self {
        SetupFields {
            type_fields: RequestTypeFields(setup[0]),
            request: setup[1],
            value: u16::from_le_bytes([setup[2], setup[3]]),
            index: u16::from_le_bytes([setup[4], setup[5]]),
            length: u16::from_le_bytes([setup[6], setup[7]]),
        }
    }

    /// Whether this is a standard request defined by the USB specification,
    /// rather than a class or vendor request.
    pub fn is_standard(&self) -> bool {
        self.type_fields.request_type() == RequestType::Standard
    }

    /// The new address, if this is a standard SET_ADDRESS request.
    pub fn set_address(&self) -> Option<DeviceAddr> {
        (self.is_standard() &&
         StandardRequest::from(self.request) == StandardRequest::SetAddress)
            .then_some(DeviceAddr(self.value as u8))
    }

    /// Whether this is a standard request for the device descriptor.
    pub fn is_get_device_descriptor(&self) -> bool {
        self.type_fields.direction() == Direction::In &&
        self.is_standard() &&
        self.type_fields.recipient() == Recipient::Device &&
        StandardRequest::from(self.request) == StandardRequest::GetDescriptor &&
        DescriptorType::from((self.value >> 8) as u8) == DescriptorType::Device
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    #[default]
    Unknown = 9
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BCDVersion {
    pub minor: u8,
    pub major: u8,
}

impl std::fmt::Display for BCDVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:X}.{:02X}", self.major, self.minor)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: BCDVersion,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: BCDVersion,
    pub manufacturer_str_id: StringId,
    pub product_str_id: StringId,
    pub serial_str_id: StringId,
    pub num_configurations: u8
}

impl DeviceDescriptor {
    /// Parse a device descriptor, if enough bytes of one are present.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..size_of::<DeviceDescriptor>())?;
        let descriptor = pod_read_unaligned::<DeviceDescriptor>(bytes);
        if DescriptorType::from(descriptor.descriptor_type) ==
            DescriptorType::Device
        {
            Some(descriptor)
        } else {
            None
        }
    }

    pub fn device_id(&self) -> UsbDeviceId {
        UsbDeviceId::new(
            u16::from_le(self.vendor_id),
            u16::from_le(self.product_id))
    }
}
