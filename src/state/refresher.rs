use crate::state::messages::{PollKind, UiEvent};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};

pub const GAMES_INTERVAL: Duration = Duration::from_secs(15);
pub const LIVE_OVERLAY_INTERVAL: Duration = Duration::from_secs(5);
pub const SCHEDULE_INTERVAL: Duration = Duration::from_secs(30);

/// What the main loop lets the refresher do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollControl {
    pub paused: bool,
    /// The selected round is confirmed finished; game polling stops.
    pub round_finished: bool,
}

impl PollControl {
    pub fn allows(&self, kind: PollKind) -> bool {
        if self.paused {
            return false;
        }
        match kind {
            PollKind::Games | PollKind::LiveOverlay => !self.round_finished,
            PollKind::Schedule => true,
        }
    }
}

/// Periodic poll ticks. Startup loading is triggered separately, so the
/// immediate first tick of every interval is skipped.
pub struct PeriodicRefresher {
    ui_events: mpsc::Sender<UiEvent>,
    control: watch::Receiver<PollControl>,
}

impl PeriodicRefresher {
    pub fn new(ui_events: mpsc::Sender<UiEvent>, control: watch::Receiver<PollControl>) -> Self {
        Self { ui_events, control }
    }

    pub async fn run(self) {
        let mut games = interval(GAMES_INTERVAL);
        let mut overlay = interval(LIVE_OVERLAY_INTERVAL);
        let mut schedule = interval(SCHEDULE_INTERVAL);
        for timer in [&mut games, &mut overlay, &mut schedule] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
        }

        loop {
            let kind = tokio::select! {
                biased;
                _ = games.tick() => PollKind::Games,
                _ = overlay.tick() => PollKind::LiveOverlay,
                _ = schedule.tick() => PollKind::Schedule,
            };
            if !self.control.borrow().allows(kind) {
                continue;
            }
            if self.ui_events.send(UiEvent::PollTick(kind)).await.is_err() {
                break;
            }
        }
    }
}
