//! # Frame ticker
//!
//! The display-refresh-driven callback that paces per-frame updates while a
//! stroke is in progress. It starts on stroke-begin and stops on stroke-end;
//! while stopped, [`FrameTicker::tick`] simply never resolves, so a select loop
//! pays nothing for it. This is the system's only recurring timer.

pub struct FrameTicker {
    period: std::time::Duration,
    interval: Option<tokio::time::Interval>,
}
impl FrameTicker {
    #[must_use]
    pub fn new(refresh_hz: u32) -> Self {
        let refresh_hz = refresh_hz.max(1);
        Self {
            period: std::time::Duration::from_secs(1) / refresh_hz,
            interval: None,
        }
    }
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }
    /// Begin ticking. Idempotent - a running ticker keeps its cadence.
    pub fn start(&mut self) {
        if self.interval.is_none() {
            let mut interval = tokio::time::interval(self.period);
            // A stalled frame should not be followed by a burst of catch-up frames.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            self.interval = Some(interval);
        }
    }
    /// Stop ticking promptly; no further ticks resolve until restarted.
    pub fn stop(&mut self) {
        self.interval = None;
    }
    /// Resolves at the next frame boundary, or never while stopped.
    pub async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_only_while_running() {
        let mut ticker = FrameTicker::new(60);
        assert!(!ticker.is_running());

        // Stopped: tick never resolves.
        let never = tokio::time::timeout(std::time::Duration::from_millis(100), ticker.tick());
        assert!(never.await.is_err());

        ticker.start();
        assert!(ticker.is_running());
        // First tick is immediate, the next arrives a period later.
        ticker.tick().await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(100), ticker.tick());
        assert!(second.await.is_ok());

        ticker.stop();
        assert!(!ticker.is_running());
        let stopped = tokio::time::timeout(std::time::Duration::from_millis(100), ticker.tick());
        assert!(stopped.await.is_err());
    }
}
