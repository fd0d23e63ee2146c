//! libpcap capture files holding usbmon records.
//!
//! This module reads and writes the classic libpcap container:
//! - Global header validation (byte order, timestamp resolution, link type)
//! - Record iteration, yielding capture metadata and the captured bytes
//! - Conversion of records into [`UsbPacket`]s
//! - Writing re-encoded packets back out
//!
//! Only the pcap framing honors the file's byte order. The usbmon records it
//! carries are decoded as little-endian regardless.

use crate::error::{Result, UsbRevueError};
use crate::packet::{CaptureMeta, UsbPacket};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

/// `LINKTYPE_USB_LINUX`: usbmon records with the 48-byte header.
pub const LINKTYPE_USB_LINUX: u32 = 189;
/// `LINKTYPE_USB_LINUX_MMAPPED`: usbmon records with the 64-byte header.
pub const LINKTYPE_USB_LINUX_MMAPPED: u32 = 220;

/// Snapshot length written by [`CaptureWriter`].
pub const DEFAULT_SNAPLEN: u32 = 262_144;

/// Decoded pcap global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub big_endian: bool,
    pub nanosecond: bool,
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    pub link_type: u32,
}

/// One captured unit.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRecord<'a> {
    pub meta: CaptureMeta,
    pub data: &'a [u8],
}

impl CaptureRecord<'_> {
    /// Copies the captured bytes into a validated packet.
    pub fn to_packet(&self) -> Result<UsbPacket> {
        UsbPacket::new(self.meta, self.data.to_vec())
    }
}

/// libpcap reader over a byte slice.
pub struct CaptureReader<'a> {
    data: &'a [u8],
}

impl<'a> CaptureReader<'a> {
    /// Creates a new CaptureReader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Returns true if the data starts with a pcap header for a usbmon link type.
    pub fn is_valid(&self) -> bool {
        self.header().is_ok()
    }

    /// Parses the global header.
    pub fn header(&self) -> Result<CaptureHeader> {
        if self.data.len() < GLOBAL_HEADER_LEN {
            return Err(UsbRevueError::InvalidFormat(format!(
                "{} bytes is too short for a pcap header",
                self.data.len()
            )));
        }

        let (big_endian, nanosecond) = match LittleEndian::read_u32(&self.data[0..4]) {
            MAGIC_MICROS => (false, false),
            MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == MAGIC_MICROS => (true, false),
            m if m.swap_bytes() == MAGIC_NANOS => (true, true),
            m => {
                return Err(UsbRevueError::InvalidFormat(format!(
                    "unrecognized pcap magic 0x{:08x}",
                    m
                )))
            }
        };

        let header = CaptureHeader {
            big_endian,
            nanosecond,
            version_major: read_u16(&self.data[4..6], big_endian),
            version_minor: read_u16(&self.data[6..8], big_endian),
            snaplen: read_u32(&self.data[16..20], big_endian),
            link_type: read_u32(&self.data[20..24], big_endian),
        };

        if header.link_type != LINKTYPE_USB_LINUX && header.link_type != LINKTYPE_USB_LINUX_MMAPPED
        {
            return Err(UsbRevueError::InvalidFormat(format!(
                "link type {} is not a usbmon capture",
                header.link_type
            )));
        }

        Ok(header)
    }

    /// Returns an iterator over all records in the capture.
    pub fn records(&self) -> Result<CaptureIterator<'a>> {
        let header = self.header()?;
        Ok(CaptureIterator {
            data: self.data,
            pos: GLOBAL_HEADER_LEN,
            header,
        })
    }

    /// Returns an iterator over every record that is a usbmon packet.
    ///
    /// Records that fail validation are skipped with a warning.
    pub fn packets(&self) -> Result<impl Iterator<Item = UsbPacket> + 'a> {
        Ok(self
            .records()?
            .enumerate()
            .filter_map(|(index, record)| match record.to_packet() {
                Ok(packet) => Some(packet),
                Err(err) => {
                    tracing::warn!(index, %err, "skipping capture unit");
                    None
                }
            }))
    }
}

/// Iterator over pcap records. Ends at the first truncated record.
pub struct CaptureIterator<'a> {
    data: &'a [u8],
    pos: usize,
    header: CaptureHeader,
}

impl CaptureIterator<'_> {
    /// Header of the capture being iterated.
    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }
}

impl<'a> Iterator for CaptureIterator<'a> {
    type Item = CaptureRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < self.pos + RECORD_HEADER_LEN {
            return None;
        }

        let be = self.header.big_endian;
        let fields = &self.data[self.pos..self.pos + RECORD_HEADER_LEN];
        let ts_sec = read_u32(&fields[0..4], be);
        let ts_frac = read_u32(&fields[4..8], be);
        let incl_len = read_u32(&fields[8..12], be) as usize;
        let orig_len = read_u32(&fields[12..16], be);

        let start = self.pos + RECORD_HEADER_LEN;
        if self.data.len() < start + incl_len {
            return None;
        }

        let meta = CaptureMeta {
            ts_sec,
            ts_usec: if self.header.nanosecond {
                ts_frac / 1000
            } else {
                ts_frac
            },
            wire_length: orig_len,
            captured_length: incl_len as u32,
        };

        self.pos = start + incl_len;

        Some(CaptureRecord {
            meta,
            data: &self.data[start..start + incl_len],
        })
    }
}

fn read_u16(data: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        BigEndian::read_u16(data)
    } else {
        LittleEndian::read_u16(data)
    }
}

fn read_u32(data: &[u8], big_endian: bool) -> u32 {
    if big_endian {
        BigEndian::read_u32(data)
    } else {
        LittleEndian::read_u32(data)
    }
}

/// A capture file mapped into memory.
pub struct CaptureFile {
    mmap: Mmap,
}

impl CaptureFile {
    /// Maps `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// A reader borrowing the mapped bytes.
    pub fn reader(&self) -> CaptureReader<'_> {
        CaptureReader::new(&self.mmap)
    }
}

/// Writes usbmon records as a little-endian, microsecond pcap stream.
pub struct CaptureWriter<W: Write> {
    inner: W,
    snaplen: u32,
    count: usize,
}

impl<W: Write> CaptureWriter<W> {
    /// Writes a global header for the 64-byte usbmon link type.
    pub fn new(inner: W) -> Result<Self> {
        Self::with_link_type(inner, LINKTYPE_USB_LINUX_MMAPPED)
    }

    pub fn with_link_type(mut inner: W, link_type: u32) -> Result<Self> {
        inner.write_u32::<LittleEndian>(MAGIC_MICROS)?;
        inner.write_u16::<LittleEndian>(2)?;
        inner.write_u16::<LittleEndian>(4)?;
        inner.write_i32::<LittleEndian>(0)?; // thiszone
        inner.write_u32::<LittleEndian>(0)?; // sigfigs
        inner.write_u32::<LittleEndian>(DEFAULT_SNAPLEN)?;
        inner.write_u32::<LittleEndian>(link_type)?;

        Ok(Self {
            inner,
            snaplen: DEFAULT_SNAPLEN,
            count: 0,
        })
    }

    /// Appends one record. Bytes beyond the snapshot length are cut off.
    pub fn dump(&mut self, meta: &CaptureMeta, bytes: &[u8]) -> Result<()> {
        let captured = bytes.len().min(self.snaplen as usize);
        let wire_length = meta.wire_length.max(bytes.len() as u32);

        self.inner.write_u32::<LittleEndian>(meta.ts_sec)?;
        self.inner.write_u32::<LittleEndian>(meta.ts_usec)?;
        self.inner.write_u32::<LittleEndian>(captured as u32)?;
        self.inner.write_u32::<LittleEndian>(wire_length)?;
        self.inner.write_all(&bytes[..captured])?;

        self.count += 1;
        Ok(())
    }

    /// Appends a packet's current encoding.
    pub fn write_packet(&mut self, packet: &UsbPacket) -> Result<()> {
        self.dump(packet.meta(), packet.encode())
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
