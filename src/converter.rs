//! Conversion from usbmon packets to Polars DataFrames.
//!
//! One row per packet. Header fields keep their wire order, the setup bytes
//! are null unless the packet carries a setup stage, `interval` and
//! `start_frame` are null for transfer types that do not define them, and the
//! payload is summarized as `datalen` plus a hex `data` column.

use crate::builders::{ColumnType, DataFrameBuilder};
use crate::capture::CaptureReader;
use crate::error::Result;
use crate::packet::{usb_table, UsbField, UsbPacket};
use crate::record::FieldName;
use crate::types::Value;
use polars::prelude::*;

/// Converts usbmon packets to a Polars DataFrame.
pub struct PacketConverter;

impl PacketConverter {
    /// Column names and types, in output order.
    pub fn columns() -> Vec<(String, ColumnType)> {
        let table = usb_table();
        let mut columns: Vec<(String, ColumnType)> = UsbField::HEADER
            .iter()
            .filter_map(|&field| {
                table
                    .get(field)
                    .map(|d| (field.as_str().to_string(), ColumnType::for_codec(d.codec)))
            })
            .collect();

        columns.push(("datalen".to_string(), ColumnType::UInt64));
        columns.push((UsbField::Data.as_str().to_string(), ColumnType::Hex));
        columns
    }

    /// Builds a DataFrame from already decoded packets.
    pub fn from_packets<'p, I>(packets: I) -> Result<DataFrame>
    where
        I: IntoIterator<Item = &'p UsbPacket>,
    {
        let packets = packets.into_iter();
        let mut builder = DataFrameBuilder::new(Self::columns(), packets.size_hint().0);

        for packet in packets {
            builder.push_row(Self::row(packet));
        }

        builder.build()
    }

    /// Reads every usbmon packet in a pcap capture and builds a DataFrame.
    pub fn from_bytes(data: &[u8]) -> Result<DataFrame> {
        let packets: Vec<UsbPacket> = CaptureReader::new(data).packets()?.collect();
        Self::from_packets(&packets)
    }

    fn row(packet: &UsbPacket) -> Vec<Option<Value>> {
        let mut values: Vec<Option<Value>> = UsbField::HEADER
            .iter()
            .map(|&field| match field {
                UsbField::Setup if !packet.is_setup_packet() => None,
                UsbField::Interval => packet.try_interval().map(|v| Value::Signed(v.into())),
                UsbField::StartFrame => packet.try_start_frame().map(|v| Value::Signed(v.into())),
                _ => packet.get(field).ok(),
            })
            .collect();

        values.push(Some(Value::Unsigned(packet.datalen() as u64)));
        values.push(Some(Value::from(packet.payload())));
        values
    }
}

/// Range of values observed at one payload offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteStats {
    pub offset: usize,
    pub min: u8,
    pub max: u8,
    /// Number of packets whose payload reaches this offset.
    pub count: usize,
}

/// Per-offset minimum and maximum payload byte over all packets.
pub fn payload_stats<'p, I>(packets: I) -> Vec<ByteStats>
where
    I: IntoIterator<Item = &'p UsbPacket>,
{
    let mut stats: Vec<ByteStats> = Vec::new();

    for packet in packets {
        for (offset, &byte) in packet.payload().iter().enumerate() {
            match stats.get_mut(offset) {
                Some(entry) => {
                    entry.min = entry.min.min(byte);
                    entry.max = entry.max.max(byte);
                    entry.count += 1;
                }
                None => stats.push(ByteStats {
                    offset,
                    min: byte,
                    max: byte,
                    count: 1,
                }),
            }
        }
    }

    stats
}

/// Tabulates [`payload_stats`] output as `offset`, `min`, `max` and `count` columns.
pub fn payload_stats_frame(stats: &[ByteStats]) -> Result<DataFrame> {
    let offset: Vec<u64> = stats.iter().map(|s| s.offset as u64).collect();
    let min: Vec<u32> = stats.iter().map(|s| s.min as u32).collect();
    let max: Vec<u32> = stats.iter().map(|s| s.max as u32).collect();
    let count: Vec<u64> = stats.iter().map(|s| s.count as u64).collect();

    Ok(DataFrame::new(vec![
        Series::new("offset".into(), offset).into(),
        Series::new("min".into(), min).into(),
        Series::new("max".into(), max).into(),
        Series::new("count".into(), count).into(),
    ])?)
}
