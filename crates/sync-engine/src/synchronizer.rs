//! Slot synchronization: mapping a fixed output frame rate onto frames that
//! arrived at irregular times.
//!
//! # Algorithm
//!
//! 1. **Index**: every real frame lands in slot `floor(timestamp * R)`; one
//!    frame is kept per slot according to the [`SlotPolicy`].
//! 2. **Lookup**: exact slot first, then a symmetric search outwards up to
//!    the tolerance window, nearest wins and ties go to the earlier slot.
//! 3. **Resolve**: a slot without a nearby frame repeats the most recent
//!    earlier frame while that frame is at most the hold window old, and
//!    becomes a placeholder otherwise. A source that goes silent therefore
//!    never freezes the output for longer than the hold window.

use std::collections::BTreeMap;

use meetrec_media_model::{slot_for, TimestampedFrame, VideoFrame};

/// Which frame is kept when several land in the same slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotPolicy {
    /// The first frame by capture time wins.
    #[default]
    EarliestArrival,
    /// The last frame by capture time wins.
    LatestArrival,
}

/// What to emit for one output slot.
#[derive(Debug, Clone, Copy)]
pub enum SlotFrame<'a> {
    Real(&'a VideoFrame),
    /// An earlier frame repeated across a short gap.
    Held(&'a VideoFrame),
    Placeholder,
}

impl<'a> SlotFrame<'a> {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SlotFrame::Placeholder)
    }

    pub fn is_held(&self) -> bool {
        matches!(self, SlotFrame::Held(_))
    }

    pub fn frame(&self) -> Option<&'a VideoFrame> {
        match *self {
            SlotFrame::Real(frame) | SlotFrame::Held(frame) => Some(frame),
            SlotFrame::Placeholder => None,
        }
    }
}

/// Read-only slot index, built once after capture stops.
#[derive(Debug, Clone)]
pub struct FrameIndex {
    fps: u32,
    tolerance: u64,
    hold: u64,
    slots: BTreeMap<u64, VideoFrame>,
}

impl FrameIndex {
    /// Index `frames` at `fps` output slots per second.
    ///
    /// Placeholder-sourced frames are never indexed. Frames are visited in
    /// ascending timestamp order; ties keep arrival order.
    pub fn build(frames: &[TimestampedFrame], fps: u32, policy: SlotPolicy) -> Self {
        let fps = fps.max(1);
        let mut order: Vec<&TimestampedFrame> =
            frames.iter().filter(|f| f.source.is_real()).collect();
        order.sort_by(|a, b| a.timestamp_secs.total_cmp(&b.timestamp_secs));

        let mut slots = BTreeMap::new();
        for frame in order {
            let slot = slot_for(frame.timestamp_secs, fps);
            match policy {
                SlotPolicy::EarliestArrival => {
                    slots.entry(slot).or_insert_with(|| frame.frame.clone());
                }
                SlotPolicy::LatestArrival => {
                    slots.insert(slot, frame.frame.clone());
                }
            }
        }

        tracing::debug!(
            frames = frames.len(),
            slots = slots.len(),
            fps,
            ?policy,
            "Frame index built"
        );

        Self {
            fps,
            tolerance: Self::tolerance_slots(fps),
            hold: 0,
            slots,
        }
    }

    /// Repeat the most recent frame into following empty slots for up to
    /// `secs` after its own slot.
    pub fn with_hold_secs(mut self, secs: f64) -> Self {
        self.hold = if secs.is_finite() && secs > 0.0 {
            (secs * self.fps as f64).floor() as u64
        } else {
            0
        };
        self
    }

    /// Search radius in slots: `max(3, floor(3 * R * frame_interval))`.
    pub fn tolerance_slots(fps: u32) -> u64 {
        let fps = fps.max(1) as f64;
        let frame_interval = 1.0 / fps;
        ((3.0 * fps * frame_interval).floor() as u64).max(3)
    }

    /// Number of output slots for a recording of `duration_secs`.
    pub fn slot_count(duration_secs: f64, fps: u32) -> u64 {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0;
        }
        (duration_secs * fps as f64).floor() as u64
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Hold window in slots.
    pub fn hold_slots(&self) -> u64 {
        self.hold
    }

    /// Number of slots holding a real frame.
    pub fn indexed_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Best frame for `slot`, or `None` if nothing lies within tolerance.
    pub fn lookup(&self, slot: u64) -> Option<&VideoFrame> {
        if let Some(frame) = self.slots.get(&slot) {
            return Some(frame);
        }
        for distance in 1..=self.tolerance {
            if let Some(frame) = slot
                .checked_sub(distance)
                .and_then(|earlier| self.slots.get(&earlier))
            {
                return Some(frame);
            }
            if let Some(frame) = self.slots.get(&(slot + distance)) {
                return Some(frame);
            }
        }
        None
    }

    /// Most recent frame before `slot` that is still inside the hold window.
    pub fn held(&self, slot: u64) -> Option<&VideoFrame> {
        if self.hold == 0 {
            return None;
        }
        self.slots
            .range(..slot)
            .next_back()
            .filter(|(indexed, _)| slot - **indexed <= self.hold)
            .map(|(_, frame)| frame)
    }

    pub fn resolve(&self, slot: u64) -> SlotFrame<'_> {
        if let Some(frame) = self.lookup(slot) {
            return SlotFrame::Real(frame);
        }
        match self.held(slot) {
            Some(frame) => SlotFrame::Held(frame),
            None => SlotFrame::Placeholder,
        }
    }

    /// Every slot of a recording of `duration_secs`, in order.
    pub fn resolve_all(&self, duration_secs: f64) -> impl Iterator<Item = SlotFrame<'_>> + '_ {
        let count = Self::slot_count(duration_secs, self.fps);
        (0..count).map(move |slot| self.resolve(slot))
    }
}
