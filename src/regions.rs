use std::{collections::BTreeMap, fmt};

use log::{debug, info};

use crate::{
    error::GenerateError,
    model::{Mismatch, ReplayModel},
    replay::{GeneratorConfig, RegionReplay},
    trace::Operation,
    verilog::render_module,
};

pub struct RegionModule {
    pub module_name: String,
    pub operations: Vec<Operation>,
    pub replay: RegionReplay,
    pub text: String,
}

impl RegionModule {
    pub fn region(&self) -> u32 {
        self.replay.region()
    }

    /// Drive the recorded reads through a model of the generated module.
    ///
    /// The trace is replayed twice without a reset so the second pass checks
    /// that every counter wrapped back to its first entry.
    pub fn verify(&self, base_address_register: u32) -> Vec<Mismatch> {
        let mut model = ReplayModel::new(&self.replay);
        let mut mismatches = model.replay_operations(&self.operations, base_address_register);
        mismatches.extend(model.replay_operations(&self.operations, base_address_register));
        debug!(
            "{}: {} reads, {:.2}% hit rate in replay model",
            self.module_name,
            model.stats().reads,
            model.stats().hit_rate() * 100.0
        );
        mismatches
    }
}

pub struct GeneratedDesign {
    pub modules: Vec<RegionModule>,
}

impl GeneratedDesign {
    /// All modules as one artifact, each followed by a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for module in &self.modules {
            out.push_str(&module.text);
            out.push_str("\n\n");
        }
        out
    }
}

impl fmt::Display for GeneratedDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.modules {
            writeln!(
                f,
                "  bar{:<3} {:<40} ops {:>8} words {:>6}",
                module.region(),
                module.module_name,
                module.operations.len(),
                module.replay.word_count()
            )?;
        }
        Ok(())
    }
}

/// Split operations per BAR, keeping trace order inside each region.
pub fn group_by_region(operations: &[Operation]) -> BTreeMap<u32, Vec<Operation>> {
    let mut regions: BTreeMap<u32, Vec<Operation>> = BTreeMap::new();
    for op in operations {
        regions.entry(op.region).or_default().push(*op);
    }
    regions
}

pub fn generate_design(
    operations: &[Operation],
    config: &GeneratorConfig,
) -> Result<GeneratedDesign, GenerateError> {
    let regions = group_by_region(operations);
    info!("detected {} bars", regions.len());

    let mut modules = Vec::with_capacity(regions.len());
    for (region, ops) in regions {
        info!("found {} ops on bar{region}", ops.len());
        let module_name = config.module_name(region);
        let replay = RegionReplay::build(region, &ops, config.size_policy)?;
        let text = render_module(&module_name, &replay)?;
        debug!("{module_name}: {} words", replay.word_count());
        modules.push(RegionModule {
            module_name,
            operations: ops,
            replay,
            text,
        });
    }
    Ok(GeneratedDesign { modules })
}
