use std::{
    borrow::Cow,
    fs::File,
    io::{BufRead, BufReader, Read},
    num::IntErrorKind,
    path::Path,
    sync::OnceLock,
};

use log::trace;
use regex::{Captures, Regex};

use crate::error::TraceError;

/// Longest trace line accepted, excluding the line terminator.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

static READ_PATTERN: OnceLock<Regex> = OnceLock::new();
static WRITE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// A read observed on one BAR region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// 1-based line number in the source trace.
    pub sequence_index: usize,
    pub region: u32,
    pub address: u32, // offset within the region
    pub size: u32,    // in Bytes
    pub value: u32,
}

impl Operation {
    pub fn word_address(&self) -> u32 {
        self.address & !3
    }

    pub fn byte_offset(&self) -> u32 {
        self.address & 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceRecord {
    Read(Operation),
    Write { address: u32, value: u32, size: u32 },
}

#[derive(Debug, Clone)]
pub struct TraceFile {
    pub name: String,
    pub operations: Vec<Operation>,
    /// Write records recognized in the trace. They are never replayed.
    pub writes_ignored: usize,
    pub lines: usize,
}

impl TraceFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TraceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_reader(name, BufReader::new(file))
    }

    pub fn from_reader(
        name: impl Into<String>,
        mut reader: impl BufRead,
    ) -> Result<Self, TraceError> {
        let mut operations = Vec::new();
        let mut writes_ignored = 0;
        let mut buf = Vec::new();
        let mut line_number = 0;
        loop {
            buf.clear();
            // Room for the longest legal line plus a CRLF terminator.
            let read = reader
                .by_ref()
                .take(MAX_LINE_LEN as u64 + 2)
                .read_until(b'\n', &mut buf)
                .map_err(|source| TraceError::Read {
                    line: line_number + 1,
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_number += 1;

            let content = strip_terminator(&buf);
            if content.len() > MAX_LINE_LEN {
                return Err(TraceError::LineTooLong {
                    line: line_number,
                    limit: MAX_LINE_LEN,
                });
            }

            let line: Cow<'_, str> = String::from_utf8_lossy(content);
            let Some(record) = parse_record(&line, line_number) else {
                continue;
            };
            match record {
                TraceRecord::Read(op) => {
                    trace!(
                        "line {line_number}: read bar{} {}b 0x{:x} = 0x{:x}",
                        op.region,
                        op.size,
                        op.address,
                        op.value
                    );
                    operations.push(op);
                }
                TraceRecord::Write { address, value, size } => {
                    trace!(
                        "line {line_number}: write {size}b 0x{address:x} = 0x{value:x}, not replayed"
                    );
                    writes_ignored += 1;
                }
            }
        }
        Ok(Self {
            name: name.into(),
            operations,
            writes_ignored,
            lines: line_number,
        })
    }
}

fn strip_terminator(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

// Digit and space classes stay ASCII: a stray Unicode digit must not turn a
// noisy line into a record.
fn parse_record(line: &str, sequence_index: usize) -> Option<TraceRecord> {
    let read_pattern = READ_PATTERN.get_or_init(|| {
        Regex::new(
            r"vfio_region_read(?-u:\s)*\(.*?:region([0-9]+)\+0x([0-9a-fA-F]+),(?-u:\s)*([0-9]+)(?-u:\s)*\)(?-u:\s)*=(?-u:\s)*0x([0-9a-fA-F]+)",
        )
        .unwrap()
    });
    if let Some(caps) = read_pattern.captures(line) {
        return Some(TraceRecord::Read(Operation {
            sequence_index,
            region: lenient_u32(field(&caps, 1), 10),
            address: lenient_u32(field(&caps, 2), 16),
            size: lenient_u32(field(&caps, 3), 10),
            value: lenient_value(field(&caps, 4)),
        }));
    }

    let write_pattern = WRITE_PATTERN.get_or_init(|| {
        Regex::new(
            r"vfio_region_write(?-u:\s)*\((?-u:\s)*.*?\+0x([0-9a-fA-F]+),(?-u:\s)*0x([0-9a-fA-F]+),(?-u:\s)*([0-9]+)(?-u:\s)*\)",
        )
        .unwrap()
    });
    write_pattern.captures(line).map(|caps| TraceRecord::Write {
        address: lenient_u32(field(&caps, 1), 16),
        value: lenient_value(field(&caps, 2)),
        size: lenient_u32(field(&caps, 3), 10),
    })
}

fn field<'a>(caps: &Captures<'a>, idx: usize) -> &'a str {
    caps.get(idx).map_or("", |m| m.as_str())
}

// Trace capture tools emit noisy lines. An overflowing field saturates so the
// read keeps its own region and word; anything else unparsable reads as zero.
fn lenient_u32(digits: &str, radix: u32) -> u32 {
    match u32::from_str_radix(digits, radix) {
        Ok(v) => v,
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => u32::MAX,
        Err(_) => 0,
    }
}

// Values keep the low word of a 64-bit parse.
fn lenient_value(digits: &str) -> u32 {
    match u64::from_str_radix(digits, 16) {
        Ok(v) => v as u32,
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => u32::MAX,
        Err(_) => 0,
    }
}
