pub const COUNTDOWN_START: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPhase {
    Idle,
    CountingDown,
    Repairing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    Hold,
    Dispatch(String),
}

/// Tick-driven repair countdown. One tick per second from the owning loop;
/// no timers of its own, so every transition is observable in tests.
///
/// `pending` (the Repairing phase) is a mutex over repair dispatch: it is
/// set when the countdown expires and released only by `repair_landed` or
/// `clear_error`, so one error occurrence yields at most one request.
#[derive(Debug)]
pub struct RepairLoop {
    phase: RepairPhase,
    countdown_start: u32,
    countdown_remaining: u32,
    last_error: Option<String>,
}

impl RepairLoop {
    pub fn new(countdown_start: u32) -> Self {
        Self {
            phase: RepairPhase::Idle,
            countdown_start: countdown_start.max(1),
            countdown_remaining: 0,
            last_error: None,
        }
    }

    pub fn phase(&self) -> RepairPhase {
        self.phase
    }

    pub fn pending(&self) -> bool {
        self.phase == RepairPhase::Repairing
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A new error starts (or restarts, if the message changed) the
    /// countdown. Ignored while a repair is in flight.
    pub fn observe_error(&mut self, message: &str) {
        match self.phase {
            RepairPhase::Repairing => {}
            RepairPhase::CountingDown if self.last_error.as_deref() == Some(message) => {}
            RepairPhase::Idle | RepairPhase::CountingDown => {
                self.phase = RepairPhase::CountingDown;
                self.countdown_remaining = self.countdown_start;
                self.last_error = Some(message.to_string());
            }
        }
    }

    /// The error cleared independently: cancel any countdown, release the
    /// in-flight flag, forget the message.
    pub fn clear_error(&mut self) {
        self.phase = RepairPhase::Idle;
        self.countdown_remaining = 0;
        self.last_error = None;
    }

    pub fn tick(&mut self) -> RepairAction {
        if self.phase != RepairPhase::CountingDown {
            return RepairAction::Hold;
        }

        if self.countdown_remaining > 0 {
            self.countdown_remaining -= 1;
        }
        if self.countdown_remaining == 0 {
            self.phase = RepairPhase::Repairing;
            return RepairAction::Dispatch(self.last_error.clone().unwrap_or_default());
        }
        RepairAction::Hold
    }

    /// The repair reply has been routed through the normal pipeline; release
    /// the mutex. The next observation decides whether the cycle restarts.
    pub fn repair_landed(&mut self) {
        if self.phase == RepairPhase::Repairing {
            self.phase = RepairPhase::Idle;
            self.countdown_remaining = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{COUNTDOWN_START, RepairAction, RepairLoop, RepairPhase};

    #[test]
    fn dispatches_exactly_once_after_full_countdown() {
        let mut repair = RepairLoop::new(COUNTDOWN_START);
        repair.observe_error("boom");

        let mut dispatched = Vec::new();
        for _ in 0..COUNTDOWN_START {
            if let RepairAction::Dispatch(msg) = repair.tick() {
                dispatched.push(msg);
            }
        }
        assert_eq!(dispatched, vec!["boom".to_string()]);

        // Further ticks while in flight do nothing.
        assert_eq!(repair.tick(), RepairAction::Hold);
        assert!(repair.pending());
    }

    #[test]
    fn clearing_mid_countdown_cancels_dispatch() {
        let mut repair = RepairLoop::new(5);
        repair.observe_error("boom");
        repair.tick();
        repair.tick();
        repair.tick();
        repair.clear_error();

        assert_eq!(repair.phase(), RepairPhase::Idle);
        for _ in 0..10 {
            assert_eq!(repair.tick(), RepairAction::Hold);
        }
    }

    #[test]
    fn second_error_while_pending_does_not_enqueue() {
        let mut repair = RepairLoop::new(1);
        repair.observe_error("first");
        assert!(matches!(repair.tick(), RepairAction::Dispatch(_)));

        repair.observe_error("second");
        assert!(repair.pending());
        assert_eq!(repair.tick(), RepairAction::Hold);
        assert_eq!(repair.last_error(), Some("first"));
    }

    #[test]
    fn repeated_observation_does_not_restart_countdown() {
        let mut repair = RepairLoop::new(3);
        repair.observe_error("boom");
        repair.tick();
        repair.observe_error("boom");
        assert_eq!(repair.countdown_remaining(), 2);
    }

    #[test]
    fn changed_message_restarts_countdown() {
        let mut repair = RepairLoop::new(3);
        repair.observe_error("first");
        repair.tick();
        repair.observe_error("second");
        assert_eq!(repair.countdown_remaining(), 3);
        assert_eq!(repair.last_error(), Some("second"));
    }

    #[test]
    fn landed_repair_allows_fresh_cycle() {
        let mut repair = RepairLoop::new(2);
        repair.observe_error("boom");
        repair.tick();
        assert!(matches!(repair.tick(), RepairAction::Dispatch(_)));

        repair.repair_landed();
        assert!(!repair.pending());

        repair.observe_error("boom");
        assert_eq!(repair.phase(), RepairPhase::CountingDown);
        assert_eq!(repair.countdown_remaining(), 2);
    }

    #[test]
    fn success_clears_state_entirely() {
        let mut repair = RepairLoop::new(1);
        repair.observe_error("boom");
        repair.tick();
        repair.clear_error();

        assert_eq!(repair.phase(), RepairPhase::Idle);
        assert_eq!(repair.last_error(), None);
        assert_eq!(repair.countdown_remaining(), 0);
    }

    #[test]
    fn zero_start_is_clamped_to_one_tick() {
        let mut repair = RepairLoop::new(0);
        repair.observe_error("boom");
        assert!(matches!(repair.tick(), RepairAction::Dispatch(_)));
    }
}
