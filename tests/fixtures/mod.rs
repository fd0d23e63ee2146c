//! Test fixtures for integration tests
//!
//! Synthetic usbmon records and pcap captures, so tests do not depend on
//! capture files being present on disk.

#![allow(dead_code)]

use usbrevue::{CaptureMeta, CaptureWriter};

/// GET_DESCRIPTOR(DEVICE), 64 bytes
pub const GET_DEVICE_DESCRIPTOR: [u8; 8] = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00];

/// SET_CONFIGURATION(1)
pub const SET_CONFIGURATION: [u8; 8] = [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Builder for a single usbmon record
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    header: [u8; 64],
    payload: Vec<u8>,
}

impl RecordBuilder {
    /// A control submission on bus 7, device 3, endpoint 0 IN, without setup
    pub fn new() -> Self {
        let mut header = [0u8; 64];
        header[0..8].copy_from_slice(&0xffff_8800_ef98_ef00u64.to_le_bytes());
        header[8] = b'S';
        header[9] = 2;
        header[10] = 0x80;
        header[11] = 3;
        header[12..14].copy_from_slice(&7u16.to_le_bytes());
        header[14] = b'-';
        header[15] = b'<';
        header[16..24].copy_from_slice(&1_309_208_916i64.to_le_bytes());
        header[24..28].copy_from_slice(&397_516i32.to_le_bytes());
        header[28..32].copy_from_slice(&(-115i32).to_le_bytes());
        header[32..36].copy_from_slice(&40u32.to_le_bytes());
        header[56..60].copy_from_slice(&0x200u32.to_le_bytes());
        Self {
            header,
            payload: Vec::new(),
        }
    }

    pub fn event(mut self, event: u8) -> Self {
        self.header[8] = event;
        self
    }

    pub fn xfer_type(mut self, xfer_type: u8) -> Self {
        self.header[9] = xfer_type;
        self
    }

    pub fn epnum(mut self, epnum: u8) -> Self {
        self.header[10] = epnum;
        self
    }

    pub fn ts(mut self, sec: i64, usec: i32) -> Self {
        self.header[16..24].copy_from_slice(&sec.to_le_bytes());
        self.header[24..28].copy_from_slice(&usec.to_le_bytes());
        self
    }

    /// Marks the setup bytes present and stores them
    pub fn setup(mut self, setup: [u8; 8]) -> Self {
        self.header[14] = 0x00;
        self.header[40..48].copy_from_slice(&setup);
        self
    }

    /// Stores the isochronous union members
    pub fn iso(mut self, error_count: i32, numdesc: i32, interval: i32, start_frame: i32) -> Self {
        self.header[40..44].copy_from_slice(&error_count.to_le_bytes());
        self.header[44..48].copy_from_slice(&numdesc.to_le_bytes());
        self.header[48..52].copy_from_slice(&interval.to_le_bytes());
        self.header[52..56].copy_from_slice(&start_frame.to_le_bytes());
        self
    }

    /// Sets the payload and a matching len_cap
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self.header[15] = 0x00;
        self.header[36..40].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = self.header.to_vec();
        data.extend_from_slice(&self.payload);
        data
    }
}

/// Wraps records into a little-endian pcap capture
pub fn capture(records: &[Vec<u8>]) -> Vec<u8> {
    let mut writer = CaptureWriter::new(Vec::new()).expect("write header");
    for (i, record) in records.iter().enumerate() {
        let meta = CaptureMeta {
            ts_sec: 1_309_208_916,
            ts_usec: i as u32,
            wire_length: record.len() as u32,
            captured_length: record.len() as u32,
        };
        writer.dump(&meta, record).expect("write record");
    }
    writer.into_inner().expect("flush")
}

/// A short enumeration sequence: descriptor request and its completion,
/// SET_CONFIGURATION, then bulk and interrupt traffic
pub fn enumeration_capture() -> Vec<u8> {
    capture(&[
        RecordBuilder::new().setup(GET_DEVICE_DESCRIPTOR).build(),
        RecordBuilder::new()
            .event(b'C')
            .payload(&[0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40])
            .build(),
        RecordBuilder::new()
            .epnum(0x00)
            .setup(SET_CONFIGURATION)
            .build(),
        RecordBuilder::new()
            .xfer_type(3)
            .epnum(0x02)
            .payload(&[0x55, 0x53, 0x42, 0x43])
            .build(),
        RecordBuilder::new()
            .event(b'C')
            .xfer_type(1)
            .epnum(0x81)
            .iso(0, 0, 8, 0)
            .payload(&[0x00, 0x04])
            .build(),
    ])
}
