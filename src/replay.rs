use std::collections::BTreeMap;

use log::warn;

use crate::{error::GenerateError, trace::Operation};

/// Highest word address the generated dispatcher can select.
pub const DISPATCH_WINDOW: u32 = 0xFFFF;

/// What to do with reads whose size is neither 1 nor 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    /// Record an all-zero entry, matching what older traces were replayed with.
    #[default]
    ZeroFill,
    Reject,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub module_prefix: String,
    pub size_policy: SizePolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            module_prefix: "pcileech_impl_bar_controller".to_string(),
            size_policy: SizePolicy::ZeroFill,
        }
    }
}

impl GeneratorConfig {
    pub fn module_name(&self, region: u32) -> String {
        format!("{}{region}", self.module_prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub value: u32,
    /// Provenance of the entry, embedded as a comment next to the table literal.
    pub annotation: String,
}

/// The ordered responses recorded for one word, served cyclically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordTable {
    address: u32,
    entries: Vec<ReplayEntry>,
}

impl WordTable {
    fn new(address: u32) -> Self {
        Self {
            address,
            entries: Vec::new(),
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter value after which the replay wraps back to entry 0.
    pub fn last_index(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    pub fn counter_width(&self) -> u32 {
        counter_width(self.entries.len())
    }
}

/// All word tables of one BAR region, keyed by word-aligned address.
#[derive(Debug, Clone)]
pub struct RegionReplay {
    region: u32,
    words: BTreeMap<u32, WordTable>,
}

impl RegionReplay {
    pub fn build(
        region: u32,
        operations: &[Operation],
        policy: SizePolicy,
    ) -> Result<Self, GenerateError> {
        let mut words: BTreeMap<u32, WordTable> = BTreeMap::new();
        for op in operations {
            let value = merge_entry(op, policy)?;
            let word_address = op.word_address();
            words
                .entry(word_address)
                .or_insert_with(|| WordTable::new(word_address))
                .entries
                .push(ReplayEntry {
                    value,
                    annotation: annotate(op),
                });
        }

        for address in words.keys().filter(|&&addr| addr > DISPATCH_WINDOW) {
            warn!(
                "bar{region}: word 0x{address:x} lies outside the 16-bit dispatch window \
                 and can never be served"
            );
        }

        Ok(Self { region, words })
    }

    pub fn region(&self) -> u32 {
        self.region
    }

    pub fn words(&self) -> impl Iterator<Item = &WordTable> {
        self.words.values()
    }

    pub fn word(&self, address: u32) -> Option<&WordTable> {
        self.words.get(&address)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Position a read's value within its containing 32-bit word.
///
/// `None` for access sizes the replay tables cannot represent.
pub fn lane_value(op: &Operation) -> Option<u32> {
    match op.size {
        4 => Some(op.value),
        1 => Some(op.value.wrapping_shl(8 * op.byte_offset())),
        _ => None,
    }
}

pub fn merge_entry(op: &Operation, policy: SizePolicy) -> Result<u32, GenerateError> {
    match lane_value(op) {
        Some(value) => Ok(value),
        None => match policy {
            SizePolicy::ZeroFill => {
                warn!(
                    "trace line {}: {}-byte read at 0x{:x} is not replayable, using 0",
                    op.sequence_index, op.size, op.address
                );
                Ok(0)
            }
            SizePolicy::Reject => Err(GenerateError::UnsupportedAccessSize {
                line: op.sequence_index,
                size: op.size,
            }),
        },
    }
}

/// Smallest counter width `w >= 1` such that `2^w >= entries`.
pub fn counter_width(entries: usize) -> u32 {
    entries.max(2).next_power_of_two().trailing_zeros()
}

fn annotate(op: &Operation) -> String {
    format!(
        "// bar{} {}b read from 0x{:04x} = 0x{:x}",
        op.region, op.size, op.address, op.value
    )
}

#[cfg(test)]
impl WordTable {
    pub fn values(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(sequence_index: usize, address: u32, size: u32, value: u32) -> Operation {
        Operation {
            sequence_index,
            region: 0,
            address,
            size,
            value,
        }
    }

    #[test]
    fn counter_width_is_minimal() {
        let widths: Vec<u32> = [1, 2, 3, 4, 5, 8, 9]
            .into_iter()
            .map(counter_width)
            .collect();
        assert_eq!(widths, vec![1, 1, 2, 2, 3, 3, 4]);
    }

    #[test]
    fn byte_reads_shift_into_their_lane() {
        let entry = merge_entry(&op(1, 0x1002, 1, 0xab), SizePolicy::ZeroFill).unwrap();
        assert_eq!(entry, 0x00ab_0000);
        let entry = merge_entry(&op(1, 0x1003, 1, 0xff), SizePolicy::ZeroFill).unwrap();
        assert_eq!(entry, 0xff00_0000);
    }

    #[test]
    fn entries_keep_trace_order_per_word() {
        let ops = [
            op(1, 0x10, 4, 3),
            op(2, 0x20, 4, 9),
            op(3, 0x10, 4, 1),
            op(4, 0x11, 1, 0x5),
            op(5, 0x10, 4, 3),
        ];
        let replay = RegionReplay::build(0, &ops, SizePolicy::ZeroFill).unwrap();
        assert_eq!(replay.word_count(), 2);
        let word = replay.word(0x10).unwrap();
        assert_eq!(word.values(), vec![3, 1, 0x500, 3]);
        assert_eq!(word.counter_width(), 2);
        assert_eq!(word.last_index(), 3);
        assert_eq!(
            word.entries()[2].annotation,
            "// bar0 1b read from 0x0011 = 0x5"
        );
        let addresses: Vec<u32> = replay.words().map(WordTable::address).collect();
        assert_eq!(addresses, vec![0x10, 0x20]);
    }

    #[test]
    fn unsupported_sizes_follow_the_policy() {
        let ops = [op(7, 0x8, 2, 0xbeef)];
        let replay = RegionReplay::build(0, &ops, SizePolicy::ZeroFill).unwrap();
        assert_eq!(replay.word(0x8).unwrap().values(), vec![0]);

        let err = RegionReplay::build(0, &ops, SizePolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::UnsupportedAccessSize { line: 7, size: 2 }
        ));
    }

    #[test]
    fn module_names_carry_the_region_index() {
        let config = GeneratorConfig::default();
        assert_eq!(config.module_name(3), "pcileech_impl_bar_controller3");
    }
}
