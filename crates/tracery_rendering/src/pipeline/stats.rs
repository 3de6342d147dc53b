//! Frame statistics.

use std::time::Duration;

use super::frame::{FrameReport, TraceOutcome};

/// Running totals over every ticked frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Frames ticked.
    pub frames: u64,
    /// Frames that rebuilt and bound the structure.
    pub traced_frames: u64,
    /// Frames that kept the previous binding.
    pub paused_frames: u64,
    /// Frames whose tracing was skipped after an error.
    pub skipped_frames: u64,
    /// Draw calls of the last frame.
    pub draw_calls: u32,
    /// Instances in the last successful build.
    pub instances_traced: u32,
    /// Last frame time in microseconds.
    pub frame_time_us: u32,
    /// Worst frame time in microseconds.
    pub worst_frame_time_us: u32,
}

impl FrameStats {
    /// Folds one frame into the totals.
    pub fn record(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.draw_calls = report.draw_calls;
        self.frame_time_us = report.frame_time_us;
        self.worst_frame_time_us = self.worst_frame_time_us.max(report.frame_time_us);

        match &report.trace {
            TraceOutcome::Traced(build) => {
                self.traced_frames += 1;
                self.instances_traced = build.instance_count();
            }
            TraceOutcome::Paused => self.paused_frames += 1,
            TraceOutcome::Skipped(_) => self.skipped_frames += 1,
        }
    }

    /// Returns FPS calculated from the last frame time.
    #[must_use]
    pub fn fps(&self) -> f32 {
        if self.frame_time_us > 0 {
            1.0 / Duration::from_micros(u64::from(self.frame_time_us)).as_secs_f32()
        } else {
            0.0
        }
    }
}
