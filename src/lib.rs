//! Decoding and re-encoding of Linux usbmon packet records.
//!
//! This library reads the binary records captured from the kernel's USB bus
//! monitor, exposes every header field for reading and writing, and writes
//! edited records back out byte-for-byte.
//!
//! # Features
//!
//! - Lazy, cached field decoding over the captured buffer
//! - Write-back encoding with range validation
//! - Overlapping interpretations of the setup/isochronous union
//! - Bit-level access to the control setup packet, propagated into its packet
//! - Structural diff between packets
//! - libpcap capture reading (memory mapped) and writing
//! - Export to Polars DataFrames
//!
//! # Example
//!
//! ```no_run
//! use usbrevue::{Direction, UsbRevue};
//!
//! let mut packets = UsbRevue::from_file("capture.pcap")?;
//! for packet in &mut packets {
//!     if let Some(mut setup) = packet.setup_mut() {
//!         setup.set_direction(Direction::HostToDevice)?;
//!     }
//! }
//! println!("{}", packets[0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Header layout
//!
//! | Offset | Field | Codec |
//! |--------|-------|-------|
//! | 0 | `urb` | `u64` |
//! | 8 | `event_type` | `u8` |
//! | 9 | `xfer_type` | `u8` |
//! | 10 | `epnum` | `u8` |
//! | 11 | `devnum` | `u8` |
//! | 12 | `busnum` | `u16` |
//! | 14 | `flag_setup` | `u8` |
//! | 15 | `flag_data` | `u8` |
//! | 16 | `ts_sec` | `i64` |
//! | 24 | `ts_usec` | `i32` |
//! | 28 | `status` | `i32` |
//! | 32 | `length` | `u32` |
//! | 36 | `len_cap` | `u32` |
//! | 40 | `setup` | `[u8; 8]` |
//! | 40 | `error_count` | `i32` (isochronous) |
//! | 44 | `numdesc` | `i32` (isochronous) |
//! | 48 | `interval` | `i32` (isochronous, interrupt) |
//! | 52 | `start_frame` | `i32` (isochronous) |
//! | 56 | `xfer_flags` | `u32` |
//! | 60 | `ndesc` | `u32` |
//! | 64 | `data` | remaining bytes |

pub mod builders;
pub mod capture;
pub mod converter;
pub mod enums;
pub mod error;
pub mod packet;
pub mod record;
pub mod setup;
pub mod types;

pub use capture::{CaptureFile, CaptureReader, CaptureWriter};
pub use converter::{payload_stats, PacketConverter};
pub use enums::{Direction, EventType, Recipient, RequestKind, StandardRequest, TransferType};
pub use error::{Result, UsbRevueError};
pub use packet::{CaptureMeta, SetupMut, UsbField, UsbPacket};
pub use polars::prelude::DataFrame;
pub use setup::{SetupField, SetupFieldName};
pub use types::{PrimitiveCodec, Value};

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Main entry point for loading and saving usbmon captures.
pub struct UsbRevue;

impl UsbRevue {
    /// Decodes every usbmon packet in a pcap capture held in memory.
    ///
    /// Units that are not usbmon records are skipped.
    pub fn from_bytes(data: &[u8]) -> Result<Vec<UsbPacket>> {
        Ok(CaptureReader::new(data).packets()?.collect())
    }

    /// Decodes every usbmon packet in a pcap capture file, using memory mapping.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Vec<UsbPacket>> {
        let file = CaptureFile::open(path)?;
        let packets = file.reader().packets()?.collect();
        Ok(packets)
    }

    /// Writes packets, as currently encoded, to a new pcap capture file.
    pub fn to_file<'p, P, I>(path: P, packets: I) -> Result<usize>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = &'p UsbPacket>,
    {
        let file = File::create(path)?;
        let mut writer = CaptureWriter::new(BufWriter::new(file))?;
        for packet in packets {
            writer.write_packet(packet)?;
        }
        let count = writer.count();
        writer.into_inner()?;
        Ok(count)
    }

    /// Rewrites a capture file record by record, applying `edit` to every
    /// usbmon packet. Units that are not usbmon packets are copied unchanged,
    /// and the output keeps the input's link type.
    ///
    /// Returns the number of records written.
    pub fn rewrite_file<P, Q, F, E>(
        input: P,
        output: Q,
        mut edit: F,
    ) -> std::result::Result<usize, E>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        F: FnMut(&mut UsbPacket) -> std::result::Result<(), E>,
        E: From<UsbRevueError>,
    {
        let source = CaptureFile::open(input)?;
        let reader = source.reader();
        let header = reader.header()?;

        let file = File::create(output).map_err(UsbRevueError::from)?;
        let mut writer = CaptureWriter::with_link_type(BufWriter::new(file), header.link_type)?;
        for (index, record) in reader.records()?.enumerate() {
            match record.to_packet() {
                Ok(mut packet) => {
                    edit(&mut packet)?;
                    writer.write_packet(&packet)?;
                }
                Err(err) => {
                    tracing::warn!(index, %err, "copying capture unit unchanged");
                    writer.dump(&record.meta, record.data)?;
                }
            }
        }

        let count = writer.count();
        writer.into_inner()?;
        Ok(count)
    }

    /// Builds a DataFrame with one row per packet of a pcap capture file.
    pub fn to_dataframe<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let packets = Self::from_file(path)?;
        PacketConverter::from_packets(&packets)
    }
}
