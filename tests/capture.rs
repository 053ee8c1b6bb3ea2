use std::borrow::Cow;
use std::io::Cursor;

use bytemuck::bytes_of;
use pcap_file::{
    pcap::{PcapHeader, PcapWriter, RawPcapPacket},
    DataLink,
    TsResolution,
};

use kitprog_dissect::pcap::UsbmonHeader;
use kitprog_dissect::{
    DeviceFilter,
    DissectedTransfer,
    DissectorOptions,
    FieldId,
    Group,
    LeftoverPolicy,
    Session,
    UsbDeviceId,
};

const GET_DEVICE_DESCRIPTOR: [u8; 8] =
    [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];

fn device_descriptor(vendor: u16, product: u16) -> Vec<u8> {
    let mut descriptor = vec![
        0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40];
    descriptor.extend(vendor.to_le_bytes());
    descriptor.extend(product.to_le_bytes());
    descriptor.extend([0x00, 0x02, 0x01, 0x02, 0x80, 0x01]);
    descriptor
}

/// One usbmon event to write into a test capture.
struct Event {
    urb_id: u64,
    urb_type: u8,
    transfer_type: u8,
    endpoint: u8,
    device: u8,
    setup: Option<[u8; 8]>,
    data: Vec<u8>,
}

impl Event {
    fn new(urb_id: u64, urb_type: u8, transfer_type: u8, endpoint: u8,
           device: u8, data: &[u8])
        -> Self
    {
        Event {
            urb_id,
            urb_type,
            transfer_type,
            endpoint,
            device,
            setup: None,
            data: data.to_vec(),
        }
    }

    fn control_submit(urb_id: u64, device: u8, setup: [u8; 8]) -> Self {
        let endpoint = setup[0] & 0x80;
        Event {
            setup: Some(setup),
            .. Event::new(urb_id, b'S', 2, endpoint, device, &[])
        }
    }

    fn record(&self, header_len: usize) -> Vec<u8> {
        let header = UsbmonHeader {
            urb_id: self.urb_id,
            urb_type: self.urb_type,
            transfer_type: self.transfer_type,
            endpoint_address: self.endpoint,
            device_address: self.device,
            bus_id: 1,
            setup_flag: if self.setup.is_some() { 0 } else { b'-' },
            data_flag: 0,
            urb_length: self.data.len() as u32,
            data_length: self.data.len() as u32,
            setup: self.setup.unwrap_or_default(),
            .. UsbmonHeader::default()
        };
        let mut record = bytes_of(&header).to_vec();
        record.resize(header_len, 0);
        record.extend(&self.data);
        record
    }
}

fn capture(datalink: DataLink, events: &[Event]) -> Vec<u8> {
    let header_len = match datalink {
        DataLink::USB_LINUX_MMAPPED => 64,
        _ => 48,
    };
    let records = events
        .iter()
        .map(|event| event.record(header_len))
        .collect();
    capture_records(datalink, records)
}

fn capture_records(datalink: DataLink, records: Vec<Vec<u8>>) -> Vec<u8> {
    let header = PcapHeader {
        datalink,
        ts_resolution: TsResolution::MicroSecond,
        .. PcapHeader::default()
    };
    let mut writer = PcapWriter::with_header(Vec::new(), header)
        .expect("Failed to write pcap header");
    for (i, data) in records.into_iter().enumerate() {
        let packet = RawPcapPacket {
            ts_sec: 1_700_000_000,
            ts_frac: 100 * i as u32,
            incl_len: data.len() as u32,
            orig_len: data.len() as u32,
            data: Cow::from(data),
        };
        writer.write_raw_packet(&packet)
            .expect("Failed to write packet");
    }
    writer.into_writer()
}

fn kitprog_session() -> Vec<Event> {
    vec![
        // Enumeration of the KitProg at address 5.
        Event::control_submit(1, 5, GET_DEVICE_DESCRIPTOR),
        Event::new(1, b'C', 2, 0x80, 5, &device_descriptor(0x04b4, 0xf139)),
        // Enumeration of another device at address 6.
        Event::control_submit(2, 6, GET_DEVICE_DESCRIPTOR),
        Event::new(2, b'C', 2, 0x80, 6, &device_descriptor(0x1d50, 0x615b)),
        // Acquire SWD target, and its status.
        Event::control_submit(
            3, 5, [0x40, 0x02, 0x07, 0x42, 0x13, 0x05, 0x00, 0x00]),
        Event::new(3, b'C', 2, 0x80, 5, &[0x01]),
        // Traffic from the other device on KitProg endpoints.
        Event::new(4, b'S', 3, 0x02, 6, &[0xDE, 0xAD]),
        // Get KitProg version.
        Event::new(5, b'S', 1, 0x04, 5, &[0x23, 0x00, 0x81]),
        Event::new(6, b'C', 1, 0x83, 5, &[0x01, 0x02]),
        // SWD data.
        Event::new(7, b'S', 3, 0x02, 5, &[0x00, 0x00, 0x00, 0x00]),
        Event::new(8, b'C', 3, 0x81, 5, &[0xA5, 0x5A]),
        // Unhandled endpoint.
        Event::new(9, b'C', 3, 0x85, 5, &[0x00]),
    ]
}

fn dissect_all(bytes: Vec<u8>, options: DissectorOptions)
    -> Vec<DissectedTransfer>
{
    Session::open(Cursor::new(bytes), options)
        .expect("Failed to open capture")
        .collect::<Result<Vec<_>, _>>()
        .expect("Failed to read capture")
}

#[test]
fn test_dissect_identified_kitprog() {
    let bytes = capture(DataLink::USB_LINUX, &kitprog_session());
    let transfers = dissect_all(bytes, DissectorOptions::default());

    let urbs: Vec<(u64, Group)> = transfers
        .iter()
        .map(|transfer| (transfer.urb_id, transfer.dissection.group))
        .collect();
    assert_eq!(urbs, vec![
        (3, Group::Control),
        (3, Group::Control),
        (5, Group::Interrupt),
        (6, Group::Interrupt),
        (7, Group::Bulk),
        (8, Group::Bulk),
    ]);
    assert!(transfers.iter().all(|transfer| transfer.device == 5));
    assert!(transfers.iter().all(|transfer| transfer.bus == 1));

    let acquire = &transfers[0].dissection;
    assert_eq!(acquire.fields.len(), 5);
    assert_eq!(acquire.to_string(), "\
KitProg Control
    Command Type: Write (0x02)
    Command: Program (0x07)
    Mode: Acquire SWD Target (0x42)
    Acquire Options: 0x13
        .... 0011 = Device Type: PSoC 5 (?) (3)
        0001 .... = Acquire Mode: Power Cycle (1)
    Maximum Attempts: 5");

    let status = &transfers[1].dissection;
    assert_eq!(status.field(FieldId::Status).unwrap().label,
               Some("OK/ACK"));

    let interrupt = &transfers[2].dissection;
    assert_eq!(interrupt.fields.len(), 2);
    assert_eq!(interrupt.field(FieldId::InterruptCommand).unwrap().label,
               Some("Get KitProg Version"));

    assert!(transfers[3].dissection.fields.is_empty());

    let swd_in = transfers[5].dissection.field(FieldId::SwdIn).unwrap();
    assert_eq!(swd_in.bytes_value(), Some(&[0xA5, 0x5A][..]));
    assert!(transfers.iter().all(|transfer| !transfer.truncated));
    assert!(transfers[0].timestamp_ns < transfers[5].timestamp_ns);
}

#[test]
fn test_filter_by_address() {
    let bytes = capture(DataLink::USB_LINUX, &kitprog_session());
    let options = DissectorOptions {
        device_filter: DeviceFilter::Address { bus: 1, device: 6 },
        .. DissectorOptions::default()
    };
    let transfers = dissect_all(bytes, options);
    let urbs: Vec<u64> = transfers
        .iter()
        .map(|transfer| transfer.urb_id)
        .collect();
    assert_eq!(urbs, vec![4]);
}

#[test]
fn test_filter_by_other_identity() {
    let bytes = capture(DataLink::USB_LINUX, &kitprog_session());
    let options = DissectorOptions {
        device_filter: DeviceFilter::Identified(
            UsbDeviceId::new(0x1d50, 0x615b)),
        .. DissectorOptions::default()
    };
    let transfers = dissect_all(bytes, options);
    let urbs: Vec<u64> = transfers
        .iter()
        .map(|transfer| transfer.urb_id)
        .collect();
    assert_eq!(urbs, vec![4]);
}

#[test]
fn test_unidentified_device_ignored() {
    // No enumeration in the capture, so nothing is known to be a KitProg.
    let events: Vec<Event> = kitprog_session().into_iter().skip(4).collect();
    let bytes = capture(DataLink::USB_LINUX, &events);
    assert!(dissect_all(bytes.clone(), DissectorOptions::default())
        .is_empty());

    let options = DissectorOptions {
        device_filter: DeviceFilter::Any,
        .. DissectorOptions::default()
    };
    assert_eq!(dissect_all(bytes, options).len(), 7);
}

#[test]
fn test_standard_requests_not_dissected() {
    let get_string = [0x80, 0x06, 0x02, 0x03, 0x09, 0x04, 0xFF, 0x00];
    let set_configuration = [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    let events = vec![
        Event::control_submit(1, 5, GET_DEVICE_DESCRIPTOR),
        Event::new(1, b'C', 2, 0x80, 5, &device_descriptor(0x04b4, 0xf139)),
        Event::control_submit(2, 5, get_string),
        Event::new(2, b'C', 2, 0x80, 5, &[0x06, 0x03, 0x4B, 0x00, 0x50, 0x00]),
        Event::control_submit(3, 5, set_configuration),
        Event::new(3, b'C', 2, 0x00, 5, &[]),
        // Set protocol to SWD.
        Event::control_submit(
            4, 5, [0x40, 0x02, 0x07, 0x40, 0x01, 0x00, 0x00, 0x00]),
        Event::new(4, b'C', 2, 0x80, 5, &[0x01]),
    ];
    for options in [
        DissectorOptions::default(),
        DissectorOptions {
            device_filter: DeviceFilter::Any,
            .. DissectorOptions::default()
        },
    ] {
        let bytes = capture(DataLink::USB_LINUX, &events);
        let transfers = dissect_all(bytes, options);
        let urbs: Vec<u64> = transfers
            .iter()
            .map(|transfer| transfer.urb_id)
            .collect();
        assert_eq!(urbs, vec![4, 4]);
        assert_eq!(transfers[0].dissection.field(FieldId::Protocol)
                       .unwrap().label,
                   Some("SWD"));
    }
}

#[test]
fn test_mmapped_capture() {
    let bytes = capture(DataLink::USB_LINUX_MMAPPED, &kitprog_session());
    let transfers = dissect_all(bytes, DissectorOptions::default());
    assert_eq!(transfers.len(), 6);
    assert_eq!(transfers[0].dissection.fields.len(), 5);
}

#[test]
fn test_leftover_annotation() {
    let events = vec![
        Event::control_submit(1, 5, GET_DEVICE_DESCRIPTOR),
        Event::new(1, b'C', 2, 0x80, 5, &device_descriptor(0x04b4, 0xf139)),
        Event::new(2, b'S', 1, 0x04, 5, &[0x02, 0x00, 0x80, 0xEE]),
    ];
    let bytes = capture(DataLink::USB_LINUX, &events);
    let options = DissectorOptions {
        leftover: LeftoverPolicy::Annotate,
        .. DissectorOptions::default()
    };
    let transfers = dissect_all(bytes, options);
    let interrupt = &transfers.last().unwrap().dissection;
    let unknown = interrupt.field(FieldId::Unknown).unwrap();
    assert_eq!(unknown.range, 3..4);
    assert_eq!(interrupt.advisories().count(), 1);
}

#[test]
fn test_unsupported_link_type() {
    let header = PcapHeader {
        datalink: DataLink::ETHERNET,
        .. PcapHeader::default()
    };
    let writer = PcapWriter::with_header(Vec::new(), header)
        .expect("Failed to write pcap header");
    let bytes = writer.into_writer();
    let error = Session::open(Cursor::new(bytes), DissectorOptions::default())
        .err()
        .expect("Opened a non-usbmon capture");
    assert!(error.to_string().contains("Unsupported link type"));
}

#[test]
fn test_short_record_is_error() {
    let bytes = capture_records(DataLink::USB_LINUX, vec![vec![0; 20]]);
    let mut session =
        Session::open(Cursor::new(bytes), DissectorOptions::default())
            .expect("Failed to open capture");
    assert!(session.next().unwrap().is_err());
}

#[test]
fn test_json_export() {
    let bytes = capture(DataLink::USB_LINUX, &kitprog_session());
    let transfers = dissect_all(bytes, DissectorOptions::default());
    let json = serde_json::to_value(&transfers[2]).unwrap();
    assert_eq!(json["urb_id"], 5);
    assert_eq!(json["dissection"]["group"], "Interrupt");
    let control = &json["dissection"]["fields"][0];
    assert_eq!(control["abbrev"], "kitprog.int.control");
    assert_eq!(control["children"].as_array().unwrap().len(), 6);
    assert_eq!(control["children"][5]["label"], "Set");
}
