use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use whispr::{Cell, ReadCell};

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A cell holding the current wall-clock milliseconds, refreshed by a
/// background task.
///
/// This is an explicit lifecycle resource: the timer starts in
/// [`TimeCell::start`] and stops on [`TimeCell::stop`] or drop. Nothing
/// starts lazily on first read.
pub struct TimeCell {
    cell: Cell<u64>,
    task: JoinHandle<()>,
}

impl TimeCell {
    /// Must be called within a tokio runtime.
    pub fn start(period: Duration) -> Self {
        let cell = Cell::new(now_ms());
        let task = tokio::spawn({
            let cell = cell.clone();
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(
                    tokio::time::MissedTickBehavior::Skip,
                );
                loop {
                    interval.tick().await;
                    cell.set(now_ms());
                }
            }
        });
        Self { cell, task }
    }

    pub fn cell(&self) -> ReadCell<u64> {
        self.cell.read_only()
    }

    pub fn now(&self) -> u64 {
        self.cell.get()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TimeCell {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_cell_follows_the_clock() {
        let clock = TimeCell::start(Duration::from_millis(20));
        let first = clock.now();
        assert!(first > 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(clock.now() > first);
        clock.stop();
    }
}
