//! Dissecting every KitProg transfer in a usbmon capture.

use std::io::Read;

use anyhow::Error;
use log::{debug, info};
use serde::Serialize;

use crate::decoder::Dissector;
use crate::devices::DeviceTracker;
use crate::options::DissectorOptions;
use crate::pcap::{CapturedTransfer, Loader};
use crate::tree::Dissection;

/// A captured transfer along with its dissection.
#[derive(Clone, Debug, Serialize)]
pub struct DissectedTransfer {
    pub timestamp_ns: u64,
    pub bus: u16,
    pub device: u8,
    pub urb_id: u64,
    pub truncated: bool,
    pub dissection: Dissection,
    #[serde(skip)]
    pub captured: CapturedTransfer,
}

pub struct Session<Source: Read> {
    loader: Loader<Source>,
    tracker: DeviceTracker,
    dissector: Dissector,
    transfers_seen: u64,
    transfers_dissected: u64,
}

impl<Source> Session<Source> where Source: Read {
    pub fn open(source: Source, options: DissectorOptions)
        -> Result<Self, Error>
    {
        let loader = Loader::open(source)?;
        Ok(Session {
            loader,
            tracker: DeviceTracker::new(),
            dissector: Dissector::new(options),
            transfers_seen: 0,
            transfers_dissected: 0,
        })
    }

    fn dissect(&self, captured: &CapturedTransfer) -> Option<Dissection> {
        let (bus, device) = (captured.bus(), captured.device());
        let identity = self.tracker.device_id(bus, device);
        if !self.dissector.options().device_filter
            .accepts(bus, device, identity)
        {
            return None;
        }
        let transfer = captured.descriptor()?;
        self.dissector.dissect(&transfer)
    }
}

impl<Source> Iterator for Session<Source> where Source: Read {
    type Item = Result<DissectedTransfer, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let captured = match self.loader.next() {
                None => {
                    info!("Dissected {} of {} usbmon events from {} bytes",
                          self.transfers_dissected, self.transfers_seen,
                          self.loader.bytes_read);
                    return None;
                },
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(captured)) => captured,
            };
            self.transfers_seen += 1;
            if self.tracker.observe(&captured) {
                // Standard requests are USB framework traffic.
                continue;
            }
            if let Some(dissection) = self.dissect(&captured) {
                self.transfers_dissected += 1;
                debug!("URB {:x} on {}.{}: KitProg {}",
                       captured.urb_id(), captured.bus(), captured.device(),
                       dissection.group.name());
                return Some(Ok(DissectedTransfer {
                    timestamp_ns: captured.timestamp_ns,
                    bus: captured.bus().0,
                    device: captured.device().0,
                    urb_id: captured.urb_id(),
                    truncated: captured.is_truncated(),
                    dissection,
                    captured,
                }));
            }
        }
    }
}
