//! Synthetic source files for demos and tests.

use std::path::Path;

use rollstitch_core::data::SyntheticSpec;

use crate::pipeline::PipelineError;
use crate::report::{SynthReport, REPORT_SCHEMA_VERSION};
use crate::sink::BarWriter;

pub fn run_synth(spec: &SyntheticSpec, output: &Path) -> Result<SynthReport, PipelineError> {
    let contracts: Vec<String> = spec.contract_codes().iter().map(|c| c.to_string()).collect();
    tracing::info!(
        product = %spec.product,
        contracts = ?contracts,
        seed = spec.seed,
        "generating synthetic bars"
    );
    let mut writer = BarWriter::create(output)?;
    for bar in spec.generate() {
        writer.write(&bar)?;
    }
    let bars_written = writer.finish()?;
    tracing::info!(output = %output.display(), bars = bars_written, "synthetic source written");

    Ok(SynthReport {
        schema_version: REPORT_SCHEMA_VERSION,
        output: output.to_path_buf(),
        spec: spec.clone(),
        contracts,
        bars_written,
    })
}
