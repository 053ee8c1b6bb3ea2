//! Identifying devices in a capture from their device descriptors.

use std::collections::HashMap;

use log::debug;

use crate::pcap::CapturedTransfer;
use crate::usb::{
    BusNum,
    DeviceAddr,
    DeviceDescriptor,
    EndpointNum,
    TransferType,
    UrbType,
    UsbDeviceId,
};

type Address = (BusNum, DeviceAddr);

/// A standard request awaiting completion.
struct PendingRequest {
    address: Address,
    device_descriptor: bool,
}

/// Learns the vendor and product ID of each device address by watching
/// GET_DESCRIPTOR(Device) requests and their completions.
///
/// Every standard request on the default pipe is followed from submission
/// to completion, so that both halves can be kept away from the dissector.
#[derive(Default)]
pub struct DeviceTracker {
    pending: HashMap<u64, PendingRequest>,
    identified: HashMap<Address, DeviceDescriptor>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update device state from one event.
    ///
    /// Returns whether the event is part of a standard request.
    pub fn observe(&mut self, transfer: &CapturedTransfer) -> bool {
        let header = &transfer.header;
        if header.transfer_type() != TransferType::Control ||
            header.endpoint().number() != EndpointNum(0)
        {
            return false;
        }
        let address = (transfer.bus(), transfer.device());
        let urb_id = transfer.urb_id();
        match header.urb_type() {
            UrbType::Submit => {
                let Some(setup) = header.setup() else {
                    return false;
                };
                if !setup.is_standard() {
                    return false;
                }
                // The default pipe runs one request at a time, so anything
                // still pending for this address was never completed.
                self.pending.retain(|_, pending| pending.address != address);
                let device_descriptor = setup.is_get_device_descriptor();
                if device_descriptor &&
                    self.identified.remove(&address).is_some()
                {
                    debug!("Device {}.{} is being enumerated again",
                           address.0, address.1);
                }
                if let Some(new_address) = setup.set_address() {
                    self.identified.remove(&(address.0, new_address));
                }
                self.pending.insert(urb_id, PendingRequest {
                    address,
                    device_descriptor,
                });
                true
            },
            UrbType::Complete => {
                let Some(pending) = self.pending.remove(&urb_id) else {
                    return false;
                };
                if pending.address != address {
                    return false;
                }
                if pending.device_descriptor {
                    if let Some(descriptor) =
                        DeviceDescriptor::from_bytes(&transfer.data)
                    {
                        debug!("Device {}.{} is {}",
                               address.0, address.1, descriptor.device_id());
                        self.identified.insert(address, descriptor);
                    }
                }
                true
            },
            UrbType::Error => self.pending.remove(&urb_id).is_some(),
            UrbType::Unknown => false,
        }
    }

    pub fn descriptor(&self, bus: BusNum, device: DeviceAddr)
        -> Option<&DeviceDescriptor>
    {
        self.identified.get(&(bus, device))
    }

    pub fn device_id(&self, bus: BusNum, device: DeviceAddr)
        -> Option<UsbDeviceId>
    {
        self.descriptor(bus, device).map(DeviceDescriptor::device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcap::UsbmonHeader;

    const DESCRIPTOR: [u8; 18] = [
        0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40,
        0xb4, 0x04, 0x39, 0xf1, 0x00, 0x02, 0x01, 0x02,
        0x80, 0x01];

    const GET_DEVICE_DESCRIPTOR: [u8; 8] =
        [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];

    fn event(urb_id: u64, urb_type: u8, device: u8, data: &[u8])
        -> CapturedTransfer
    {
        request(urb_id, urb_type, device, GET_DEVICE_DESCRIPTOR, data)
    }

    fn request(urb_id: u64, urb_type: u8, device: u8, setup: [u8; 8],
               data: &[u8])
        -> CapturedTransfer
    {
        let mut header = UsbmonHeader {
            urb_id,
            urb_type,
            transfer_type: 2,
            endpoint_address: 0x80,
            device_address: device,
            bus_id: 3,
            setup_flag: b'-',
            data_length: data.len() as u32,
            urb_length: data.len() as u32,
            .. UsbmonHeader::default()
        };
        if urb_type == b'S' {
            header.setup_flag = 0;
            header.setup = setup;
        }
        CapturedTransfer {
            timestamp_ns: 0,
            header,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_identify_device() {
        let mut tracker = DeviceTracker::new();
        assert!(tracker.observe(&event(1, b'S', 5, &[])));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);
        assert!(tracker.observe(&event(1, b'C', 5, &DESCRIPTOR)));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)),
                   Some(UsbDeviceId::KITPROG));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(6)), None);
        assert_eq!(tracker.device_id(BusNum(2), DeviceAddr(5)), None);
    }

    #[test]
    fn test_ignore_unmatched_completions() {
        let mut tracker = DeviceTracker::new();

        // Completion without a matching request.
        tracker.observe(&event(7, b'C', 5, &DESCRIPTOR));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);

        // Short read of the first eight bytes only.
        tracker.observe(&event(8, b'S', 5, &[]));
        tracker.observe(&event(8, b'C', 5, &DESCRIPTOR[..8]));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);

        // Request errored out.
        tracker.observe(&event(9, b'S', 5, &[]));
        tracker.observe(&event(9, b'E', 5, &[]));
        tracker.observe(&event(9, b'C', 5, &DESCRIPTOR));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);
    }

    #[test]
    fn test_standard_requests_followed() {
        let mut tracker = DeviceTracker::new();
        let get_string = [0x80, 0x06, 0x02, 0x03, 0x09, 0x04, 0xFF, 0x00];
        let set_configuration =
            [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        let vendor = [0x40, 0x02, 0x07, 0x40, 0x01, 0x00, 0x00, 0x00];

        assert!(tracker.observe(&request(1, b'S', 5, get_string, &[])));
        assert!(tracker.observe(&request(1, b'C', 5, get_string, b"K\0P\0")));
        assert!(tracker.observe(&request(2, b'S', 5, set_configuration, &[])));
        assert!(tracker.observe(&request(2, b'C', 5, set_configuration, &[])));

        // Vendor requests and their completions belong to the dissector.
        assert!(!tracker.observe(&request(3, b'S', 5, vendor, &[])));
        assert!(!tracker.observe(&request(3, b'C', 5, vendor, &[0x01])));
    }

    #[test]
    fn test_abandoned_requests_dropped() {
        let mut tracker = DeviceTracker::new();
        for urb_id in 0..100 {
            tracker.observe(&event(urb_id, b'S', 5, &[]));
        }
        tracker.observe(&event(100, b'S', 6, &[]));
        assert_eq!(tracker.pending.len(), 2);

        // Only the latest request for an address can still complete.
        assert!(!tracker.observe(&event(50, b'C', 5, &DESCRIPTOR)));
        assert!(tracker.observe(&event(99, b'C', 5, &DESCRIPTOR)));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)),
                   Some(UsbDeviceId::KITPROG));
    }

    #[test]
    fn test_address_reuse() {
        let mut tracker = DeviceTracker::new();
        tracker.observe(&event(1, b'S', 5, &[]));
        tracker.observe(&event(1, b'C', 5, &DESCRIPTOR));
        assert!(tracker.device_id(BusNum(3), DeviceAddr(5)).is_some());

        // A new device at the same address is enumerated.
        tracker.observe(&event(2, b'S', 5, &[]));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);
        tracker.observe(&event(2, b'E', 5, &[]));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);

        tracker.observe(&event(3, b'S', 5, &[]));
        tracker.observe(&event(3, b'C', 5, &DESCRIPTOR));
        assert!(tracker.device_id(BusNum(3), DeviceAddr(5)).is_some());

        // Another device is given address 5.
        let set_address = [0x00, 0x05, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00];
        tracker.observe(&request(4, b'S', 0, set_address, &[]));
        assert_eq!(tracker.device_id(BusNum(3), DeviceAddr(5)), None);
    }
}
