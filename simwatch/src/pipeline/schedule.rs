/// Host frame bookkeeping for the consumer step. The step reports how many
/// frames to wait; the schedule only counts.
#[derive(Debug, Default, Clone)]
pub struct FrameSchedule {
    frame: u64,
    running: bool,
    next_step: Option<u64>,
}

impl FrameSchedule {
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the loop, stepping on the current frame.
    pub fn start(&mut self) {
        self.running = true;
        self.next_step = Some(self.frame);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.next_step = None;
    }

    /// Advances one host frame.
    pub fn advance(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    pub fn due(&self) -> bool {
        self.running && self.next_step.is_some_and(|next| next <= self.frame)
    }

    pub fn every(&self, period: u64) -> bool {
        self.running && period > 0 && self.frame % period == 0
    }

    pub fn rearm(&mut self, frames: u64) {
        self.next_step = Some(self.frame + frames.max(1));
    }

    /// True when the loop should be running but has not stepped for more
    /// than `patience` frames past its schedule.
    pub fn stalled(&self, patience: u64) -> bool {
        if !self.running {
            return false;
        }
        match self.next_step {
            None => true,
            Some(next) => self.frame > next.saturating_add(patience),
        }
    }

    /// Simulates a lost re-arm.
    #[cfg(test)]
    pub(crate) fn drop_rearm(&mut self) {
        self.next_step = None;
    }
}
