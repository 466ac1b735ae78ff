/// Receives the completion percentage of a running job.
///
/// Reported values never exceed 99. The caller marks a job finished once it
/// returns successfully.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8);
}

impl ProgressReporter for () {
    fn report(&self, _percent: u8) {}
}

/// Collects every reported value, handy to inspect progress after a job.
#[derive(Debug, Default)]
pub struct RecordedProgress(std::sync::Mutex<Vec<u8>>);

impl RecordedProgress {
    #[must_use]
    pub fn values(&self) -> Vec<u8> {
        self.0.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordedProgress {
    fn report(&self, percent: u8) {
        if let Ok(mut values) = self.0.lock() {
            values.push(percent);
        }
    }
}

/// Integer percentage of `done` out of `total`, capped at 99 while work remains to be published.
#[must_use]
pub fn running_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(done) * 100 / u128::from(total);
    u8::try_from(pct.min(99)).unwrap_or(99)
}
