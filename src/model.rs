use std::collections::BTreeMap;

use crate::{
    replay::{DISPATCH_WINDOW, RegionReplay, lane_value},
    trace::Operation,
};

/// Word offset a raw read request selects once the base register is applied.
///
/// Mirrors the generated dispatcher: the request address is reassembled from
/// its four bytes most significant first, the base register has bit 2 cleared,
/// and the difference is cut down to the low 16 bits.
pub fn translate(req_addr: u32, base_address_register: u32) -> u32 {
    let reassembled = u32::from_be_bytes(req_addr.to_be_bytes());
    reassembled.wrapping_sub(base_address_register & !0x4) & DISPATCH_WINDOW
}

#[derive(Debug, Clone, Default)]
pub struct ReplayStats {
    pub reads: u64,
    pub hits: u64,
    pub misses: u64,
}

impl ReplayStats {
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.hits as f64 / self.reads as f64
        }
    }
}

/// A served value that differed from the one recorded in the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub sequence_index: usize,
    pub word_address: u32,
    pub expected: u32,
    pub served: u32,
}

/// Software model of one generated BAR controller.
///
/// Counters start at zero, the same state the module's reset block loads.
pub struct ReplayModel<'a> {
    replay: &'a RegionReplay,
    counters: BTreeMap<u32, usize>,
    stats: ReplayStats,
}

impl<'a> ReplayModel<'a> {
    pub fn new(replay: &'a RegionReplay) -> Self {
        Self {
            replay,
            counters: BTreeMap::new(),
            stats: ReplayStats::default(),
        }
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    pub fn read(&mut self, req_addr: u32, base_address_register: u32) -> u32 {
        self.stats.reads += 1;
        let offset = translate(req_addr, base_address_register);
        let Some(word) = self.replay.word(offset).filter(|word| !word.is_empty()) else {
            self.stats.misses += 1;
            return 0;
        };
        self.stats.hits += 1;
        let counter = self.counters.entry(offset).or_insert(0);
        let value = word.entries()[*counter].value;
        *counter = if *counter == word.last_index() {
            0
        } else {
            *counter + 1
        };
        value
    }

    /// Re-issue every recorded read and report the ones served differently.
    ///
    /// Words outside the 16-bit dispatch window are skipped since the
    /// hardware can never reach them.
    pub fn replay_operations(
        &mut self,
        operations: &[Operation],
        base_address_register: u32,
    ) -> Vec<Mismatch> {
        let base = base_address_register & !0x4;
        let mut mismatches = Vec::new();
        for op in operations {
            let word_address = op.word_address();
            if word_address > DISPATCH_WINDOW {
                continue;
            }
            let expected = lane_value(op).unwrap_or(0);
            let served = self.read(base.wrapping_add(word_address), base_address_register);
            if served != expected {
                mismatches.push(Mismatch {
                    sequence_index: op.sequence_index,
                    word_address,
                    expected,
                    served,
                });
            }
        }
        mismatches
    }
}
