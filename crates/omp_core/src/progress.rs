/// Progress reporting for ingestion runs. The orchestrator calls it from
/// its single result-collection loop; frontends implement it to show
/// status.
pub trait Progress {
    /// Called once with the number of ids in the run.
    fn begin(&mut self, _total: usize) {}

    /// One id finished, with its outcome code (0 stored, 1 skipped, 2 error).
    fn item_done(&mut self, _id: i64, _outcome: u8) {}

    /// Called at the end, timed out or not.
    fn finish(&mut self) {}
}

/// A no-op progress sink.
pub struct NullProgress;
impl Progress for NullProgress {}
