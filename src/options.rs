//! Options controlling how transfers are selected and annotated.

use serde::{Serialize, Deserialize};

use crate::usb::{BusNum, DeviceAddr, UsbDeviceId};

/// What to do with payload bytes beyond a message's known layout.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeftoverPolicy {
    /// Leave them unannotated.
    #[default]
    Ignore,
    /// Add an "unknown" field with a warning.
    Annotate,
}

/// Which devices in a capture are dissected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceFilter {
    /// Every device.
    Any,
    /// One device, by bus number and address.
    Address { bus: u16, device: u8 },
    /// Devices whose device descriptor reported this ID.
    Identified(UsbDeviceId),
}

impl Default for DeviceFilter {
    fn default() -> Self {
        DeviceFilter::Identified(UsbDeviceId::KITPROG)
    }
}

impl DeviceFilter {
    /// Whether a device passes this filter, given its identity if known.
    pub fn accepts(&self,
                   bus: BusNum,
                   device: DeviceAddr,
                   identity: Option<UsbDeviceId>)
        -> bool
    {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::Address { bus: want_bus, device: want_device } =>
                bus.0 == *want_bus && device.0 == *want_device,
            DeviceFilter::Identified(id) => identity == Some(*id),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DissectorOptions {
    pub leftover: LeftoverPolicy,
    pub device_filter: DeviceFilter,
}
