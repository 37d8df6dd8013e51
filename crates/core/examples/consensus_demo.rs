//! Batch consensus over a file of windows
//!
//! Input: one read per line, windows separated by blank lines. Without an
//! input file a synthetic set of windows is generated.
//!
//! Run with: cargo run -p cudapoa-core --example consensus_demo -- windows.txt
//!
//! Configuration comes from `CUDAPOA_CONFIG` (TOML file) or `CUDAPOA_*`
//! environment variables.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cudapoa_core::{Batch, BatchConfig, ConsensusKernel, PoaError};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cudapoa_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("CUDAPOA_CONFIG") {
        Ok(path) => BatchConfig::from_file(Path::new(&path))
            .with_context(|| format!("loading {}", path))?,
        Err(_) => BatchConfig::from_env(),
    };

    let windows = match std::env::args().nth(1) {
        Some(path) => read_windows(Path::new(&path))?,
        None => synthetic_windows(250, 12),
    };
    tracing::info!("Processing {} windows", windows.len());

    let kernel = build_kernel(&config)?;
    let mut batch = Batch::new(config)?;
    println!("{}\n", batch.layout().summary());

    let mut consensus = Vec::with_capacity(windows.len());
    for window in &windows {
        match pack_window(&mut batch, window) {
            Ok(()) => {}
            Err(PoaError::CapacityExceeded { .. }) => {
                flush(&mut batch, kernel.as_ref(), &mut consensus)?;
                pack_window(&mut batch, window)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    flush(&mut batch, kernel.as_ref(), &mut consensus)?;

    for (index, sequence) in consensus.iter().enumerate() {
        println!(">window_{}\n{}", index, sequence);
    }
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn build_kernel(_config: &BatchConfig) -> Result<Box<dyn ConsensusKernel>> {
    Ok(Box::new(cudapoa_core::LinearPathKernel::new()))
}

#[cfg(feature = "cuda")]
fn build_kernel(config: &BatchConfig) -> Result<Box<dyn ConsensusKernel>> {
    let device = cudapoa_core::GpuDevice::new(config.device_id)?;
    Ok(Box::new(cudapoa_core::PtxKernel::load(&device, &config.kernel)?))
}

/// Open a window and append its reads, skipping reads the batch rejects
fn pack_window(batch: &mut Batch, reads: &[Vec<u8>]) -> cudapoa_core::Result<()> {
    batch.add_window()?;
    for read in reads {
        match batch.add_sequence(read) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                tracing::warn!(batch_id = %batch.batch_id(), "Skipping read: {}", e)
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn flush(batch: &mut Batch, kernel: &dyn ConsensusKernel, out: &mut Vec<String>) -> Result<()> {
    batch.generate_poa(kernel)?;
    out.extend_from_slice(batch.get_consensus()?);
    batch.reset()?;
    Ok(())
}

fn read_windows(path: &Path) -> Result<Vec<Vec<Vec<u8>>>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let mut windows = Vec::new();
    let mut current = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.as_bytes().to_vec());
        }
    }
    if !current.is_empty() {
        windows.push(current);
    }
    Ok(windows)
}

/// Reads are a shared backbone with varying truncation and a mismatching tail
fn synthetic_windows(count: usize, reads: usize) -> Vec<Vec<Vec<u8>>> {
    const BASES: &[u8] = b"ACGT";
    (0..count)
        .map(|w| {
            let backbone: Vec<u8> = (0..200 + w % 50).map(|i| BASES[(i * 7 + w) % 4]).collect();
            (0..reads)
                .map(|r| {
                    let mut read = backbone[..backbone.len() - r % 5].to_vec();
                    if r % 3 == 2 {
                        if let Some(last) = read.last_mut() {
                            *last = b'N';
                        }
                    }
                    read
                })
                .collect()
        })
        .collect()
}
