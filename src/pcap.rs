//! Code for loading Linux usbmon captures from pcap files.

use std::borrow::Cow;
use std::io::{BufReader, Read};
use std::mem::size_of;

use anyhow::{Context, Error, bail};
use bytemuck_derive::{Pod, Zeroable};
use bytemuck::pod_read_unaligned;
use log::{debug, warn};
use pcap_file::{
    pcap::{PcapReader, PcapHeader},
    DataLink,
    TsResolution,
};

use crate::transfer::TransferDescriptor;
use crate::usb::{
    BusNum,
    DeviceAddr,
    EndpointAddr,
    SetupFields,
    TransferType,
    UrbType,
};

/// The usbmon packet header, as captured with link type `USB_LINUX`.
///
/// The `USB_LINUX_MMAPPED` link type extends this with 16 further bytes
/// of isochronous and interval information, which are not used here.
/// Multi-byte fields are in the byte order of the capturing host, which
/// is assumed to be little-endian.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct UsbmonHeader {
    pub urb_id: u64,
    pub urb_type: u8,
    pub transfer_type: u8,
    pub endpoint_address: u8,
    pub device_address: u8,
    pub bus_id: u16,
    pub setup_flag: u8,
    pub data_flag: u8,
    pub ts_sec: i64,
    pub ts_usec: i32,
    pub status: i32,
    pub urb_length: u32,
    pub data_length: u32,
    pub setup: [u8; 8],
}

const MMAPPED_HEADER_LEN: usize = 64;

impl UsbmonHeader {
    pub fn urb_type(&self) -> UrbType {
        UrbType::from(self.urb_type)
    }

    pub fn transfer_type(&self) -> TransferType {
        TransferType::from(self.transfer_type)
    }

    pub fn endpoint(&self) -> EndpointAddr {
        EndpointAddr(self.endpoint_address)
    }

    /// The setup packet, if this header carries one.
    pub fn setup(&self) -> Option<SetupFields> {
        // A zero flag marks the setup bytes as valid.
        (self.transfer_type() == TransferType::Control &&
         self.urb_type() == UrbType::Submit &&
         self.setup_flag == 0)
            .then(|| SetupFields::from_bytes(&self.setup))
    }
}

/// One usbmon event read from a capture.
#[derive(Clone, Debug)]
pub struct CapturedTransfer {
    pub timestamp_ns: u64,
    pub header: UsbmonHeader,
    /// Captured data following the header.
    pub data: Vec<u8>,
}

impl CapturedTransfer {
    pub fn bus(&self) -> BusNum {
        BusNum(u16::from_le(self.header.bus_id))
    }

    pub fn device(&self) -> DeviceAddr {
        DeviceAddr(self.header.device_address)
    }

    pub fn urb_id(&self) -> u64 {
        u64::from_le(self.header.urb_id)
    }

    /// Whether data was present but not captured in full.
    pub fn is_truncated(&self) -> bool {
        // A zero flag marks data as present.
        self.header.data_flag == 0 &&
            (self.data.len() as u64) <
                u32::from_le(self.header.urb_length) as u64
    }

    /// The transfer as seen by the dissector.
    ///
    /// For control submissions, the payload starts with the setup packet
    /// from its request byte onwards, followed by any OUT data. Standard
    /// requests are not KitProg messages and give `None`.
    pub fn descriptor(&self) -> Option<TransferDescriptor<'_>> {
        let payload = match self.header.setup() {
            Some(setup) if setup.is_standard() => return None,
            Some(_) => Cow::Owned(
                self.header.setup[1..]
                    .iter()
                    .chain(self.data.iter())
                    .copied()
                    .collect()),
            None => Cow::Borrowed(self.data.as_slice()),
        };
        TransferDescriptor::from_urb(
            self.header.transfer_type(),
            self.header.endpoint().number(),
            self.header.urb_type(),
            payload,
            u32::from_le(self.header.urb_length))
    }
}

pub struct Loader<Source: Read> {
    pcap: PcapReader<BufReader<Source>>,
    pub bytes_read: u64,
    header_len: usize,
    frac_ns: u64,
    start_time: Option<u64>,
}

impl<Source> Loader<Source> where Source: Read {
    pub fn open(source: Source)
        -> Result<Loader<Source>, Error>
    {
        let reader = BufReader::new(source);
        let pcap = PcapReader::new(reader)
            .context("Failed to read pcap header")?;
        let header = pcap.header();
        let header_len = match header.datalink {
            DataLink::USB_LINUX => size_of::<UsbmonHeader>(),
            DataLink::USB_LINUX_MMAPPED => MMAPPED_HEADER_LEN,
            other => bail!(
                "Unsupported link type {other:?}, expected a usbmon capture"),
        };
        debug!("Opened usbmon capture with link type {:?}", header.datalink);
        let bytes_read = size_of::<PcapHeader>() as u64;
        let frac_ns = match header.ts_resolution {
            TsResolution::MicroSecond => 1_000,
            TsResolution::NanoSecond => 1,
        };
        let start_time = None;
        Ok(Loader{pcap, bytes_read, header_len, frac_ns, start_time})
    }

    pub fn next(&mut self) -> Option<Result<CapturedTransfer, Error>> {
        match self.pcap.next_raw_packet() {
            None => None,
            Some(Err(e)) => Some(Err(Error::from(e))),
            Some(Ok(packet)) => {
                let raw_timestamp =
                    packet.ts_sec as u64 * 1_000_000_000 +
                    packet.ts_frac as u64 * self.frac_ns;
                let timestamp_ns = if let Some(start) = self.start_time {
                    raw_timestamp.saturating_sub(start)
                } else {
                    self.start_time = Some(raw_timestamp);
                    0
                };
                let size = 16 + packet.data.len();
                self.bytes_read += size as u64;
                Some(parse_record(self.header_len, &packet.data, timestamp_ns))
            }
        }
    }
}

fn parse_record(header_len: usize, bytes: &[u8], timestamp_ns: u64)
    -> Result<CapturedTransfer, Error>
{
    if bytes.len() < header_len {
        warn!("Skipping usbmon record of {} bytes", bytes.len());
        bail!("Record of {} bytes is shorter than the {} byte usbmon header",
              bytes.len(), header_len);
    }
    let header = pod_read_unaligned::<UsbmonHeader>(
        &bytes[..size_of::<UsbmonHeader>()]);
    let available = &bytes[header_len..];
    let data_length = u32::from_le(header.data_length) as usize;
    let data = &available[..data_length.min(available.len())];
    let transfer = CapturedTransfer {
        timestamp_ns,
        header,
        data: data.to_vec(),
    };
    if transfer.is_truncated() {
        debug!("URB {:x} captured {} of {} bytes",
               transfer.urb_id(), data.len(),
               u32::from_le(header.urb_length));
    }
    Ok(transfer)
}
