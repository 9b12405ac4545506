use std::time::Instant;

/// Run one driver stage, logging its duration.
pub fn measure<T>(stage: &'static str, f: impl FnOnce() -> T) -> T {
    tracing::debug!(target: "depcrawl.stage", stage, "starting");
    let start = Instant::now();
    let result = f();
    tracing::info!(
        target: "depcrawl.stage",
        stage,
        elapsed_secs = start.elapsed().as_secs_f64(),
        "finished"
    );
    result
}
