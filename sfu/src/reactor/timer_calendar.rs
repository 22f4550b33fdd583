use crate::constants::{TIMER_MAX_SLOT_COUNT, TIMER_SLOT_INTERVAL_MS};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Handle returned by [`TimerCalendar::schedule_from_now`] /
/// `schedule_every`. `cancel()` only flips a flag checked at fire time: a
/// task that has already been popped off its slot when cancelled still
/// runs its drain step but no-ops the callback.
#[derive(Clone)]
pub struct ScheduledTaskReference {
    live: Rc<Cell<bool>>,
}

impl ScheduledTaskReference {
    fn new() -> Self {
        Self {
            live: Rc::new(Cell::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.live.set(false);
    }

    pub fn is_cancelled(&self) -> bool {
        !self.live.get()
    }
}

struct Entry {
    token: ScheduledTaskReference,
    callback: Box<dyn FnMut(Instant)>,
    period: Option<Duration>,
}

/// A hashed timing wheel: `max_slot_count` slots of `slot_interval`
/// duration each. Scheduling `d` in the future places the entry in slot
/// `(current + ceil(d / slot_interval)) mod max_slot_count`; requests
/// beyond the wheel's horizon are clamped to the last slot with a logged
/// loss of precision.
pub struct TimerCalendar {
    slot_interval: Duration,
    slots: Vec<Vec<Entry>>,
    current: usize,
    jiffy: u64,
    last_tick: Instant,
}

impl TimerCalendar {
    pub fn new() -> Self {
        Self::with_params(
            Duration::from_millis(TIMER_SLOT_INTERVAL_MS),
            TIMER_MAX_SLOT_COUNT,
        )
    }

    pub fn with_params(slot_interval: Duration, max_slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(max_slot_count);
        slots.resize_with(max_slot_count, Vec::new);
        TimerCalendar {
            slot_interval,
            slots,
            current: 0,
            jiffy: 0,
            last_tick: Instant::now(),
        }
    }

    fn slots_ahead(&self, delay: Duration) -> usize {
        let millis = delay.as_millis() as u64;
        let slot_ms = self.slot_interval.as_millis().max(1) as u64;
        let ahead = millis.div_ceil(slot_ms).max(1) as usize;
        ahead.min(self.slots.len() - 1)
    }

    /// Schedules `callback` to fire once, `delay` from now.
    pub fn schedule_from_now<F>(&mut self, delay: Duration, callback: F) -> ScheduledTaskReference
    where
        F: FnMut(Instant) + 'static,
    {
        self.insert(delay, None, callback)
    }

    /// Schedules `callback` to fire every `period`, starting `period` from now.
    pub fn schedule_every<F>(&mut self, period: Duration, callback: F) -> ScheduledTaskReference
    where
        F: FnMut(Instant) + 'static,
    {
        self.insert(period, Some(period), callback)
    }

    fn insert<F>(
        &mut self,
        delay: Duration,
        period: Option<Duration>,
        callback: F,
    ) -> ScheduledTaskReference
    where
        F: FnMut(Instant) + 'static,
    {
        let ahead = self.slots_ahead(delay);
        if ahead == self.slots.len() - 1 && delay > self.slot_interval * (ahead as u32) {
            log::debug!(
                "TimerCalendar: delay {:?} exceeds wheel horizon, clamped with loss of precision",
                delay
            );
        }
        let slot = (self.current + ahead) % self.slots.len();
        let token = ScheduledTaskReference::new();
        self.slots[slot].push(Entry {
            token: token.clone(),
            callback: Box::new(callback),
            period,
        });
        token
    }

    /// Advances the wheel to `now`, draining every slot whose deadline has
    /// passed. A jiffy counter absorbs scheduler lag: if more than one
    /// slot-interval has elapsed since the last tick, every intervening
    /// slot is drained in order before returning.
    pub fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let slot_ms = self.slot_interval.as_millis().max(1) as u64;
        let mut ticks = elapsed.as_millis() as u64 / slot_ms;
        if ticks == 0 {
            return;
        }
        // Catch up on missed ticks one slot at a time so periodic timers
        // re-enqueue into the correct future slot rather than all firing
        // on the same drain.
        while ticks > 0 {
            self.jiffy += 1;
            self.drain_current();
            self.current = (self.current + 1) % self.slots.len();
            ticks -= 1;
        }
        self.last_tick = now;
    }

    fn drain_current(&mut self) {
        let due = std::mem::take(&mut self.slots[self.current]);
        for mut entry in due {
            if !entry.token.is_cancelled() {
                (entry.callback)(self.last_tick);
            }
            if let Some(period) = entry.period {
                if !entry.token.is_cancelled() {
                    self.insert_existing(period, entry);
                }
            }
        }
    }

    fn insert_existing(&mut self, period: Duration, entry: Entry) {
        let ahead = self.slots_ahead(period);
        let slot = (self.current + ahead) % self.slots.len();
        self.slots[slot].push(entry);
    }

    pub fn jiffy(&self) -> u64 {
        self.jiffy
    }
}

impl Default for TimerCalendar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn fires_after_delay() {
        let mut wheel = TimerCalendar::with_params(Duration::from_millis(10), 16);
        let fired = Rc::new(RefCell::new(0));
        let fired2 = fired.clone();
        wheel.schedule_from_now(Duration::from_millis(25), move |_now| {
            *fired2.borrow_mut() += 1;
        });
        let start = Instant::now();
        for i in 1..=4u32 {
            wheel.tick(start + Duration::from_millis(10 * i as u64));
        }
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn cancel_before_fire_is_noop() {
        let mut wheel = TimerCalendar::with_params(Duration::from_millis(10), 16);
        let fired = Rc::new(RefCell::new(0));
        let fired2 = fired.clone();
        let token = wheel.schedule_from_now(Duration::from_millis(20), move |_now| {
            *fired2.borrow_mut() += 1;
        });
        token.cancel();
        let start = Instant::now();
        for i in 1..=4u32 {
            wheel.tick(start + Duration::from_millis(10 * i as u64));
        }
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn periodic_reschedules() {
        let mut wheel = TimerCalendar::with_params(Duration::from_millis(10), 16);
        let fired = Rc::new(RefCell::new(0));
        let fired2 = fired.clone();
        wheel.schedule_every(Duration::from_millis(10), move |_now| {
            *fired2.borrow_mut() += 1;
        });
        let start = Instant::now();
        for i in 1..=5u32 {
            wheel.tick(start + Duration::from_millis(10 * i as u64));
        }
        assert_eq!(*fired.borrow(), 5);
    }

    #[test]
    fn clamps_beyond_horizon() {
        let mut wheel = TimerCalendar::with_params(Duration::from_millis(10), 4);
        let ahead = wheel.slots_ahead(Duration::from_secs(10));
        assert_eq!(ahead, 3);
    }
}
