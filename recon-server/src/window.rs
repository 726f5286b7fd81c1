use chrono::{DateTime, NaiveTime, Utc};

/// The trading-hours gate.
///
/// While closed, tenant schedulers shut down and new connections are
/// refused; clients reconnect once the window reopens. An `open == close`
/// window never opens, which the tests lean on.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    always_open: bool,
    open: NaiveTime,
    close: NaiveTime,
}

impl TradingWindow {
    pub fn always_open() -> Self {
        Self {
            always_open: true,
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
        }
    }

    pub fn between(open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            always_open: false,
            open,
            close,
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if self.always_open {
            return true;
        }
        let t = now.time();
        if self.open <= self.close {
            self.open <= t && t < self.close
        } else {
            // Overnight session, e.g. 22:00-04:00.
            t >= self.open || t < self.close
        }
    }
}
