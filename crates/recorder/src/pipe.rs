//! Feeds synchronized frames to a running encoder in strict slot order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use meetrec_encoder::{EncoderExit, EncoderInput, RawVideoSpec};
use meetrec_media_model::VideoFrame;
use meetrec_sync_engine::{fit_to_canvas, placeholder_frame, FrameIndex, SlotFrame};
use serde::Serialize;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// What happened while feeding the encoder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedReport {
    pub slots_total: u64,
    pub slots_written: u64,
    pub placeholder_slots: u64,
    pub held_slots: u64,
    /// The encoder stopped accepting input before every slot was written.
    pub broken_pipe: bool,
    /// The session was cancelled mid-feed.
    pub cancelled: bool,
    #[serde(skip)]
    pub exit: EncoderExit,
}

impl FeedReport {
    pub fn is_complete(&self) -> bool {
        self.slots_written == self.slots_total && !self.broken_pipe && !self.cancelled
    }
}

/// Converts slots into raw encoder input.
pub struct EncoderPipe {
    spec: RawVideoSpec,
    close_timeout: Duration,
    placeholder: VideoFrame,
}

impl EncoderPipe {
    pub fn new(spec: RawVideoSpec, close_timeout: Duration) -> Self {
        Self {
            placeholder: placeholder_frame(spec.width, spec.height),
            spec,
            close_timeout,
        }
    }

    pub fn spec(&self) -> &RawVideoSpec {
        &self.spec
    }

    /// Write every slot of a `duration_secs` recording, then close the input.
    ///
    /// A failed write ends the feed early; the encoder is still closed so
    /// that whatever it already produced can be finalized.
    pub async fn run(
        &self,
        mut input: Box<dyn EncoderInput>,
        index: &FrameIndex,
        duration_secs: f64,
        cancel: &AtomicBool,
        uploaded_bytes: impl Fn() -> u64,
    ) -> FeedReport {
        let mut report = FeedReport {
            slots_total: FrameIndex::slot_count(duration_secs, index.fps()),
            ..FeedReport::default()
        };
        tracing::info!(
            slots = report.slots_total,
            fps = index.fps(),
            duration_secs,
            "Feeding encoder"
        );

        let started = Instant::now();
        let mut last_log = Instant::now();
        let mut last_fit: Option<(&VideoFrame, VideoFrame)> = None;

        for slot in index.resolve_all(duration_secs) {
            if cancel.load(Ordering::SeqCst) {
                tracing::warn!(written = report.slots_written, "Feed cancelled");
                report.cancelled = true;
                break;
            }

            let frame = match slot {
                SlotFrame::Placeholder => {
                    report.placeholder_slots += 1;
                    &self.placeholder
                }
                SlotFrame::Real(source) | SlotFrame::Held(source) => {
                    if slot.is_held() {
                        report.held_slots += 1;
                    }
                    // Consecutive slots often reuse the same frame.
                    let reuse = matches!(&last_fit, Some((prev, _)) if std::ptr::eq(*prev, source));
                    if !reuse {
                        last_fit = Some((source, fit_to_canvas(source, self.spec.width, self.spec.height)));
                    }
                    match &last_fit {
                        Some((_, fitted)) => fitted,
                        None => &self.placeholder,
                    }
                }
            };

            if let Err(e) = input.feed(&frame.data).await {
                tracing::error!(
                    slot = report.slots_written,
                    error = %e,
                    "Encoder stopped accepting frames, finalizing what was written"
                );
                report.broken_pipe = true;
                break;
            }
            report.slots_written += 1;

            if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                last_log = Instant::now();
                let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    written = report.slots_written,
                    total = report.slots_total,
                    fps = report.slots_written as f64 / elapsed,
                    uploaded_bytes = uploaded_bytes(),
                    "Encoding progress"
                );
            }
        }

        report.exit = match input.close(self.close_timeout).await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::warn!(error = %e, "Closing encoder failed");
                EncoderExit::default()
            }
        };
        tracing::info!(
            written = report.slots_written,
            placeholders = report.placeholder_slots,
            held = report.held_slots,
            success = report.exit.success,
            "Encoder feed finished"
        );
        report
    }
}
