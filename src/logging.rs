// 📝 Logging - tracing fmt subscriber, only when asked for

use anyhow::Result;
use tracing_subscriber::fmt;

/// Install the fmt subscriber when `verbose`; per-stage events are at DEBUG
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    Ok(())
}
