use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

/// Installs a stderr subscriber when `verbose` is set. Quiet otherwise.
/// A subscriber the host already installed is left in place.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let installed = fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .with_level(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("verbose logging enabled");
    }
    Ok(())
}
