use crate::build::BuildSystem;
use crate::measure::measure;

const BYTES_PER_GB: u64 = 1_000_000_000;

/// Collect garbage when the build store has less than `min_free_gb` free.
///
/// Returns whether a collection ran. Failures are logged and otherwise ignored.
pub fn collect_if_low<B: BuildSystem + ?Sized>(build: &B, min_free_gb: u64) -> bool {
    if min_free_gb == 0 {
        return false;
    }
    let free = match build.free_space() {
        Ok(free) => free,
        Err(err) => {
            tracing::warn!(
                target: "depcrawl.sdist",
                store = %build.store_root().display(),
                error = %err,
                "failed to query free space"
            );
            return false;
        }
    };
    if free >= min_free_gb.saturating_mul(BYTES_PER_GB) {
        return false;
    }

    tracing::info!(
        target: "depcrawl.sdist",
        free_gb = free as f64 / BYTES_PER_GB as f64,
        min_free_gb,
        "free space below floor"
    );
    measure("collecting garbage", || match build.collect_garbage() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(target: "depcrawl.sdist", error = %err, "garbage collection failed");
            false
        }
    })
}
