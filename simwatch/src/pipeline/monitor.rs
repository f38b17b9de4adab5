use super::presenter::{Presenter, RenderInfo, View};
use super::queue::DataItem;
use crate::data::{classify, Sample, Shaped, ThrottleTable};
use crate::error::PresentError;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Identity of one opened monitor view. Reopening the same output yields a
/// new id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitorId(String);

impl MonitorId {
    pub fn new(node_id: &str, output: &str, opened_ms: i64) -> MonitorId {
        MonitorId(format!("{}_{}_{}", node_id, output, opened_ms))
    }

    /// Disambiguates two monitors opened on the same output within the same
    /// millisecond.
    pub fn with_suffix(&self, n: u32) -> MonitorId {
        MonitorId(format!("{}_{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorStatus {
    Connected,
    Disconnected,
    Subscribed,
    Unsubscribed,
    Receiving,
    /// A fault surfaced to the view, e.g. a failed render.
    Error(String),
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Connected => f.write_str("connected"),
            MonitorStatus::Disconnected => f.write_str("disconnected"),
            MonitorStatus::Subscribed => f.write_str("subscribed"),
            MonitorStatus::Unsubscribed => f.write_str("unsubscribed"),
            MonitorStatus::Receiving => f.write_str("receiving"),
            MonitorStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit close of the view.
    User,
    /// The render target disappeared out-of-band. It is not released again.
    TargetGone,
    /// Global teardown.
    Teardown,
}

/// Per-view state. Only touched from the render context.
pub struct Monitor<T> {
    pub id: MonitorId,
    pub node_id: String,
    pub output: String,
    /// Resolved server output name, `<server_node>.<port>`.
    pub server_name: String,
    pub status: MonitorStatus,
    pub last_render: Option<Instant>,
    pub min_interval: Duration,
    /// Most recent sample that arrived before the monitor was due.
    pub pending: Option<DataItem>,
    pub updates: u64,
    pub history: VecDeque<f32>,
    history_len: usize,
    pub(crate) target: T,
}

impl<T> Monitor<T> {
    pub(crate) fn new(
        id: MonitorId,
        node_id: &str,
        output: &str,
        server_name: String,
        min_interval: Duration,
        history_len: usize,
        target: T,
    ) -> Monitor<T> {
        Monitor {
            id,
            node_id: node_id.to_string(),
            output: output.to_string(),
            server_name,
            status: MonitorStatus::Disconnected,
            last_render: None,
            min_interval,
            pending: None,
            updates: 0,
            history: VecDeque::with_capacity(history_len.min(1024)),
            history_len,
            target,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_render {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    fn push_history(&mut self, value: f32) {
        if self.history_len == 0 {
            return;
        }
        while self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(value);
    }

    /// Renders `sample` into the monitor's target and updates the throttle
    /// state. Image-shaped payloads retune `min_interval` from their size.
    pub(crate) fn render<P>(
        &mut self,
        presenter: &mut P,
        sample: &Sample,
        throttle: &ThrottleTable,
        now: Instant,
    ) -> Result<(), PresentError>
    where
        P: Presenter<Target = T>,
    {
        let shaped = classify(sample);
        match &shaped {
            Shaped::Scalar(value) => {
                self.push_history(*value);
                presenter.render(
                    &self.target,
                    View::Scalar {
                        latest: *value,
                        history: &self.history,
                    },
                )?;
            }
            Shaped::Vector(values) => presenter.render(&self.target, View::Vector(values))?,
            Shaped::Image(image) => {
                presenter.render(&self.target, View::Image(image))?;
                self.min_interval = throttle.interval_for(sample.len());
            }
        }

        self.last_render = Some(now);
        self.updates += 1;
        if self.status != MonitorStatus::Receiving {
            self.status = MonitorStatus::Receiving;
            presenter.set_status(&self.target, &self.status);
        }
        presenter.set_info(
            &self.target,
            &RenderInfo {
                sample: sample.info(),
                updated: chrono::Local::now(),
                updates: self.updates,
            },
        );
        Ok(())
    }
}
