//! Photo job worker
//!
//! Runs background removal, plate blurring and enhancement jobs read as JSON
//! envelopes, using the ONNX Runtime or Tract backends.

#[cfg(feature = "cli")]
use photo_ai_worker::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
