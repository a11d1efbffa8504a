//! ADC oversampling and the raw-reading handoff.
//!
//! The periodic timer tick walks a four-state machine: start a hotend
//! conversion, read it, start a bed conversion, read it. Each full walk
//! accumulates one sample per sensor; after [`OVERSAMPLE`] walks the summed
//! pair is published. The publication cell keeps the pair coherent: the
//! consumer sees either the old pair or both fresh values, never a mix.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

/// Oversampling rounds per published pair. Raw values handed to the
/// thermistor tables are sums of this many 10-bit conversions.
pub const OVERSAMPLE: u16 = 16;

/// The two analog inputs the sampler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    Hotend,
    Bed,
}

/// Hardware access the sampler needs: kick off a conversion, collect its
/// result on the following tick.
pub trait AdcSource {
    fn start_conversion(&mut self, channel: AdcChannel);
    fn read(&mut self) -> u16;
}

/// One published pair of oversampled readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPair {
    pub hotend: u16,
    pub bed: u16,
}

#[derive(Debug, Clone, Copy)]
enum SampleState {
    PrepareHotend,
    ReadHotend,
    PrepareBed,
    ReadBed,
}

/// The ISR-side sampling state machine. Advance it once per timer tick;
/// roughly every `4 * OVERSAMPLE` ticks it yields a completed pair for
/// publication.
#[derive(Debug)]
pub struct AdcSampler {
    state: SampleState,
    hotend_acc: u32,
    bed_acc: u32,
    rounds: u16,
}

impl Default for AdcSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcSampler {
    pub fn new() -> Self {
        Self {
            state: SampleState::PrepareHotend,
            hotend_acc: 0,
            bed_acc: 0,
            rounds: 0,
        }
    }

    /// One timer tick. Returns the accumulated pair when an oversampling
    /// cycle completes.
    pub fn tick(&mut self, source: &mut impl AdcSource) -> Option<RawPair> {
        match self.state {
            SampleState::PrepareHotend => {
                source.start_conversion(AdcChannel::Hotend);
                self.state = SampleState::ReadHotend;
            }
            SampleState::ReadHotend => {
                self.hotend_acc += source.read() as u32;
                self.state = SampleState::PrepareBed;
            }
            SampleState::PrepareBed => {
                source.start_conversion(AdcChannel::Bed);
                self.state = SampleState::ReadBed;
            }
            SampleState::ReadBed => {
                self.bed_acc += source.read() as u32;
                self.state = SampleState::PrepareHotend;
                self.rounds += 1;
                if self.rounds == OVERSAMPLE {
                    let pair = RawPair {
                        hotend: self.hotend_acc as u16,
                        bed: self.bed_acc as u16,
                    };
                    self.hotend_acc = 0;
                    self.bed_acc = 0;
                    self.rounds = 0;
                    return Some(pair);
                }
            }
        }
        None
    }
}

/// Coherent single-slot exchange between the sampling tick and the
/// foreground heater manager. The writer stores both raws and then the
/// ready flag; the reader drains under a critical section, so it can never
/// observe half of an update.
#[derive(Debug, Default)]
pub struct RawExchange {
    hotend: AtomicU16,
    bed: AtomicU16,
    ready: AtomicBool,
}

impl RawExchange {
    pub const fn new() -> Self {
        Self {
            hotend: AtomicU16::new(0),
            bed: AtomicU16::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// ISR side: publish a completed pair, replacing any unconsumed one.
    pub fn publish(&self, pair: RawPair) {
        critical_section::with(|_| {
            self.hotend.store(pair.hotend, Ordering::Relaxed);
            self.bed.store(pair.bed, Ordering::Relaxed);
            self.ready.store(true, Ordering::Release);
        });
    }

    /// Foreground side: take the pending pair, if any, clearing readiness.
    pub fn take(&self) -> Option<RawPair> {
        critical_section::with(|_| {
            if self.ready.load(Ordering::Acquire) {
                let pair = RawPair {
                    hotend: self.hotend.load(Ordering::Relaxed),
                    bed: self.bed.load(Ordering::Relaxed),
                };
                self.ready.store(false, Ordering::Relaxed);
                Some(pair)
            } else {
                None
            }
        })
    }
}
