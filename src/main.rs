use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use usbrevue::converter::{payload_stats, payload_stats_frame};
use usbrevue::record::FieldName;
use usbrevue::{PacketConverter, SetupFieldName, UsbPacket, UsbRevue};

/// Inspect and rewrite usbmon packet captures
#[derive(Parser)]
#[command(name = "usbrevue")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every packet field by field
    Dump {
        /// Input pcap file path
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Only print packets that carry a setup stage
        #[arg(short, long)]
        setup_only: bool,

        /// Print only the first N packets
        #[arg(short = 'n', long)]
        head: Option<usize>,

        /// Also print the decoded setup fields
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show packet counts by transfer and event type
    Info {
        /// Input pcap file path
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Show the fields that differ between two packets of a capture
    Diff {
        /// Input pcap file path
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Index of the first packet
        first: usize,

        /// Index of the second packet
        second: usize,
    },

    /// Export the capture as a table
    Export {
        /// Input pcap file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Output format (auto-detected from extension if not specified)
        #[arg(short, long, value_enum)]
        format: Option<ExportFormat>,

        /// Compression for Parquet files
        #[arg(long, value_enum, default_value = "snappy")]
        compression: Compression,
    },

    /// Show the minimum and maximum payload byte at every offset
    Stats {
        /// Input pcap file path
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Assign field values in every packet and write a new capture
    Rewrite {
        /// Input pcap file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output pcap file path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Assignment in the form field=value (repeatable). Setup fields
        /// (bmRequestType, bRequest, wValue, wIndex, wLength) only apply to
        /// packets with a setup stage.
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        assignments: Vec<String>,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum ExportFormat {
    Csv,
    Parquet,
}

#[derive(Debug, Clone, ValueEnum)]
enum Compression {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

fn to_parquet_compression(c: Compression) -> ParquetCompression {
    match c {
        Compression::Uncompressed => ParquetCompression::Uncompressed,
        Compression::Snappy => ParquetCompression::Snappy,
        Compression::Gzip => ParquetCompression::Gzip(None),
        Compression::Lz4 => ParquetCompression::Lz4Raw,
        Compression::Zstd => ParquetCompression::Zstd(None),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dump {
            input,
            setup_only,
            head,
            verbose,
        } => dump_command(&input, setup_only, head, verbose)?,

        Commands::Info { input } => info_command(&input)?,

        Commands::Diff {
            input,
            first,
            second,
        } => diff_command(&input, first, second)?,

        Commands::Export {
            input,
            output,
            format,
            compression,
        } => export_command(&input, &output, format, compression)?,

        Commands::Stats { input } => stats_command(&input)?,

        Commands::Rewrite {
            input,
            output,
            assignments,
        } => rewrite_command(&input, &output, &assignments)?,
    }

    Ok(())
}

fn load(input: &Path) -> Result<Vec<UsbPacket>> {
    UsbRevue::from_file(input)
        .with_context(|| format!("Failed to read capture file: {}", input.display()))
}

fn dump_command(input: &Path, setup_only: bool, head: Option<usize>, verbose: bool) -> Result<()> {
    let packets = load(input)?;

    let selected = packets
        .iter()
        .enumerate()
        .filter(|(_, p)| !setup_only || p.is_setup_packet())
        .take(head.unwrap_or(usize::MAX));

    for (index, packet) in selected {
        println!("# packet {} ({})", index, packet.meta());
        println!("{}", packet);
        if verbose {
            if let Some(setup) = packet.setup() {
                println!("{}", setup);
            }
        }
        println!();
    }

    Ok(())
}

fn info_command(input: &Path) -> Result<()> {
    println!("Analyzing {}...\n", input.display());

    let file_size = std::fs::metadata(input)?.len();
    let packets = load(input)?;

    let mut by_transfer: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_event: BTreeMap<String, usize> = BTreeMap::new();
    let mut setup_packets = 0;
    let mut payload_bytes = 0;

    for packet in &packets {
        let transfer = packet
            .transfer()
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("unknown ({})", packet.xfer_type()));
        *by_transfer.entry(transfer).or_default() += 1;

        let event = packet
            .event()
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("unknown (0x{:02x})", packet.event_type()));
        *by_event.entry(event).or_default() += 1;

        if packet.is_setup_packet() {
            setup_packets += 1;
        }
        payload_bytes += packet.datalen();
    }

    println!("File Information:");
    println!("  Path:           {}", input.display());
    println!("  Size:           {} bytes", file_size);
    println!("\nPacket Information:");
    println!("  Packets:        {}", packets.len());
    println!("  Setup packets:  {}", setup_packets);
    println!("  Payload bytes:  {}", payload_bytes);

    if let (Some(first), Some(last)) = (packets.first(), packets.last()) {
        let start = first.ts_sec() as f64 + first.ts_usec() as f64 / 1_000_000.0;
        let end = last.ts_sec() as f64 + last.ts_usec() as f64 / 1_000_000.0;
        println!("  Time range:     {:.6}s", end - start);
    }

    println!("\nTransfer types:");
    for (name, count) in &by_transfer {
        println!("  {:15} {}", name, count);
    }

    println!("\nEvent types:");
    for (name, count) in &by_event {
        println!("  {:15} {}", name, count);
    }

    Ok(())
}

fn diff_command(input: &Path, first: usize, second: usize) -> Result<()> {
    let packets = load(input)?;

    let a = packets
        .get(first)
        .with_context(|| {
            format!(
                "Packet index {} out of range ({} packets)",
                first,
                packets.len()
            )
        })?;
    let b = packets
        .get(second)
        .with_context(|| {
            format!(
                "Packet index {} out of range ({} packets)",
                second,
                packets.len()
            )
        })?;

    let diff = a.diff(b);
    if diff.is_empty() {
        println!("Packets {} and {} are identical", first, second);
        return Ok(());
    }

    for (field, mine, theirs) in diff {
        println!("{:12} {} -> {}", field.as_str(), mine, theirs);
    }

    Ok(())
}

fn export_command(
    input: &Path,
    output: &Path,
    format: Option<ExportFormat>,
    compression: Compression,
) -> Result<()> {
    println!("Exporting {} to {}...", input.display(), output.display());

    let out_format = if let Some(f) = format {
        f
    } else {
        match output.extension().and_then(|s| s.to_str()) {
            Some("csv") => ExportFormat::Csv,
            Some("parquet") => ExportFormat::Parquet,
            _ => anyhow::bail!(
                "Cannot determine output format from extension. Use --format to specify."
            ),
        }
    };

    let parse_start = Instant::now();
    let packets = load(input)?;
    let mut df = PacketConverter::from_packets(&packets)
        .with_context(|| format!("Failed to convert capture: {}", input.display()))?;
    let parse_duration = parse_start.elapsed();

    println!(
        "Loaded {} packets ({:.3}s)",
        df.height(),
        parse_duration.as_secs_f64()
    );

    match out_format {
        ExportFormat::Csv => {
            let mut file = std::fs::File::create(output)?;
            CsvWriter::new(&mut file).finish(&mut df)?;
            println!("Successfully exported to CSV: {}", output.display());
        }
        ExportFormat::Parquet => {
            let file = std::fs::File::create(output)?;
            ParquetWriter::new(file)
                .with_compression(to_parquet_compression(compression))
                .finish(&mut df)?;
            println!("Successfully exported to Parquet: {}", output.display());
        }
    }

    Ok(())
}

fn stats_command(input: &Path) -> Result<()> {
    let packets = load(input)?;
    let stats = payload_stats(&packets);

    if stats.is_empty() {
        println!("No payload bytes in {}", input.display());
        return Ok(());
    }

    let df = payload_stats_frame(&stats)?;
    println!("{}", df);

    Ok(())
}

enum Assignment {
    Packet(String, String),
    Setup(SetupFieldName, String),
}

fn parse_assignment(text: &str) -> Result<Assignment> {
    let (name, value) = text
        .split_once('=')
        .with_context(|| format!("Invalid assignment '{}'. Expected 'field=value'", text))?;
    let (name, value) = (name.trim(), value.trim().to_string());

    if let Ok(field) = name.parse::<SetupFieldName>() {
        return Ok(Assignment::Setup(field, value));
    }
    name.parse::<usbrevue::UsbField>()
        .with_context(|| format!("Unknown field '{}'", name))?;
    Ok(Assignment::Packet(name.to_string(), value))
}

fn apply_assignment(packet: &mut UsbPacket, assignment: &Assignment) -> Result<()> {
    match assignment {
        Assignment::Packet(name, value) => packet.set_from_str(name, value)?,
        Assignment::Setup(field, text) => {
            let Some(mut setup) = packet.setup_mut() else {
                return Ok(());
            };
            let codec = usbrevue::setup::setup_table()
                .get(*field)
                .map(|d| d.codec)
                .with_context(|| format!("Unknown setup field '{:?}'", field))?;
            let value = codec
                .parse_value(text)
                .with_context(|| format!("Invalid value '{}'", text))?;
            setup.set(*field, value)?;
        }
    }
    Ok(())
}

fn rewrite_command(input: &Path, output: &Path, assignments: &[String]) -> Result<()> {
    let assignments = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<Result<Vec<_>>>()?;

    let mut index = 0;
    let count = UsbRevue::rewrite_file(input, output, |packet| -> Result<()> {
        for assignment in &assignments {
            apply_assignment(packet, assignment)
                .with_context(|| format!("Failed to rewrite packet {}", index))?;
        }
        index += 1;
        Ok(())
    })
    .with_context(|| {
        format!(
            "Failed to rewrite {} into {}",
            input.display(),
            output.display()
        )
    })?;
    println!("Wrote {} records to {}", count, output.display());

    Ok(())
}
