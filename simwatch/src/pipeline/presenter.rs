//! Presentation collaborator
//!
//! The pipeline never draws anything itself. It hands classified samples and
//! status/metadata updates to a `Presenter`, which owns the visual side of
//! each monitor's render target.

use super::monitor::{MonitorId, MonitorStatus};
use crate::data::{Image, SampleInfo};
use crate::error::PresentError;
use std::collections::VecDeque;

/// A sample, ready for display.
#[derive(Debug, Clone, Copy)]
pub enum View<'a> {
    /// Latest scalar value along with the monitor's running trace.
    Scalar {
        latest: f32,
        history: &'a VecDeque<f32>,
    },
    Vector(&'a [f32]),
    Image(&'a Image),
}

/// Metadata shown next to a monitor after each render.
#[derive(Debug, Clone)]
pub struct RenderInfo {
    pub sample: SampleInfo,
    pub updated: chrono::DateTime<chrono::Local>,
    pub updates: u64,
}

pub trait Presenter {
    /// Handle to a caller-owned render target.
    type Target;

    fn open_target(&mut self, id: &MonitorId, title: &str) -> Result<Self::Target, PresentError>;

    /// False once the target was closed by means other than
    /// `release_target`.
    fn target_exists(&self, target: &Self::Target) -> bool;

    fn render(&mut self, target: &Self::Target, view: View<'_>) -> Result<(), PresentError>;

    fn set_status(&mut self, target: &Self::Target, status: &MonitorStatus);

    fn set_info(&mut self, target: &Self::Target, info: &RenderInfo);

    fn release_target(&mut self, target: Self::Target);
}
