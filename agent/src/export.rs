use anyhow::{Context, Result};
use clap::Args;
use common::StorageParameters;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

#[derive(Args, Debug)]
pub struct Parameters {
    /// File to write the newline-delimited JSON export to
    #[arg(short, long, value_name = "FILE", env = "OUTPUT", default_value = "./export.ndjson")]
    output: PathBuf,
    #[command(flatten)]
    storage: StorageParameters,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let repositories = common::storage::connect(&args.storage).await?;
    let file = File::create(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    let written = common::export::export(repositories.backend().as_ref(), &mut out).await?;
    out.flush()?;
    log::info!("Exported {written} entities to {}", args.output.display());
    Ok(())
}
