// Implements the cooperative task scheduler driven by a master tick.

// Key Features:
// - Jobs declare a rate in Hz; the period in ticks is fixed at init
// - Rates must divide the master tick rate exactly
// - Phase-staggered counters so jobs with equal periods do not share a tick
// - Jobs run in declared order and receive the top-level object mutably

// Detailed Operation:
// Every claimed master tick increments each enabled job's counter; a job whose counter
// reaches its period is reset and called. Disabled jobs hold their counter at zero. The
// scheduler never preempts: an overrunning job delays the following ticks.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskError {
    /// Master tick rate is zero
    InvalidTick,
    /// Job rate is zero, above the master tick rate, or does not divide it
    InvalidFrequency,
}

/// Source of master ticks.
pub trait TickTimer {
    /// Claims one elapsed master tick; false when none is pending.
    fn tick(&mut self) -> bool;
}

/// Periodic job calling `callback` with the top-level object `T`.
pub struct Job<T> {
    pub enable: bool,
    freq: u32,    // Rate (Hz)
    period: u32,  // Period in master ticks
    counter: u32, // Ticks since the last call
    callback: fn(&mut T),
}

impl<T> Job<T> {
    pub const fn new(freq: u32, callback: fn(&mut T)) -> Self {
        Self {
            enable: true,
            freq,
            period: 0,
            counter: 0,
            callback,
        }
    }

    #[inline(always)]
    pub fn freq(&self) -> u32 {
        self.freq
    }

    #[inline(always)]
    pub fn period(&self) -> u32 {
        self.period
    }
}

pub struct Scheduler<T, const N: usize> {
    jobs: [Job<T>; N],
    tick_hz: u32,
    init: bool,
    ticks: u32, // Dispatched master ticks, wrapping
}

impl<T, const N: usize> Scheduler<T, N> {
    pub const fn new(jobs: [Job<T>; N]) -> Self {
        Self {
            jobs,
            tick_hz: 0,
            init: false,
            ticks: 0,
        }
    }

    /// Computes job periods for a master tick of `tick_hz`.
    pub fn init(&mut self, tick_hz: u32) -> Result<(), TaskError> {
        self.init = false;

        if tick_hz == 0 {
            return Err(TaskError::InvalidTick);
        }

        for (i, job) in self.jobs.iter_mut().enumerate() {
            if job.freq == 0 || job.freq > tick_hz || tick_hz % job.freq != 0 {
                warn!("Task {}: {} Hz does not divide {} Hz", i, job.freq, tick_hz);
                return Err(TaskError::InvalidFrequency);
            }
            job.period = tick_hz / job.freq;

            // Shift jobs in phase so equal periods do not run in the same tick
            job.counter = (i as u64 * job.period as u64 / N as u64) as u32;
        }

        self.tick_hz = tick_hz;
        self.ticks = 0;
        self.init = true;
        Ok(())
    }

    /// Runs one master tick worth of jobs.
    pub fn dispatch(&mut self, tlo: &mut T) {
        if !self.init {
            return;
        }

        self.ticks = self.ticks.wrapping_add(1);

        for job in self.jobs.iter_mut() {
            if !job.enable {
                job.counter = 0;
                continue;
            }
            job.counter += 1;
            if job.counter >= job.period {
                job.counter = 0;
                (job.callback)(tlo);
            }
        }
    }

    /// Dispatches if the timer has a pending tick. Returns whether a tick was consumed.
    pub fn poll<M: TickTimer>(&mut self, timer: &mut M, tlo: &mut T) -> bool {
        if !timer.tick() {
            return false;
        }
        self.dispatch(tlo);
        true
    }

    /// Main loop.
    pub fn run<M: TickTimer>(&mut self, timer: &mut M, tlo: &mut T) -> ! {
        loop {
            self.poll(timer, tlo);
        }
    }

    pub fn job_mut(&mut self, index: usize) -> Option<&mut Job<T>> {
        self.jobs.get_mut(index)
    }

    #[inline(always)]
    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Dispatched master ticks; drift against wall time shows overruns.
    #[inline(always)]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    #[inline(always)]
    pub fn is_init(&self) -> bool {
        self.init
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counts {
        a: u32,
        b: u32,
        c: u32,
        order: heapless::Vec<u8, 4>,
    }

    fn job_a(tlo: &mut Counts) {
        tlo.a += 1;
    }

    fn job_b(tlo: &mut Counts) {
        tlo.b += 1;
    }

    fn job_c(tlo: &mut Counts) {
        tlo.c += 1;
    }

    #[test]
    fn test_rates_over_one_second() {
        let mut task = Scheduler::new([Job::new(1000, job_a), Job::new(500, job_b), Job::new(1, job_c)]);
        assert!(task.init(10_000).is_ok());

        let mut tlo = Counts::default();
        for _ in 0..10_000 {
            task.dispatch(&mut tlo);
        }
        assert_eq!(tlo.a, 1000);
        assert_eq!(tlo.b, 500);
        assert_eq!(tlo.c, 1);
        assert_eq!(task.ticks(), 10_000);
    }

    #[test]
    fn test_init_rejects_bad_rates() {
        let mut task = Scheduler::new([Job::new(1000, job_a), Job::new(3, job_c)]);
        assert_eq!(task.init(10_000), Err(TaskError::InvalidFrequency));
        assert!(!task.is_init());

        let mut task = Scheduler::new([Job::new(20_000, job_a)]);
        assert_eq!(task.init(10_000), Err(TaskError::InvalidFrequency));

        let mut task = Scheduler::new([Job::new(0, job_a)]);
        assert_eq!(task.init(10_000), Err(TaskError::InvalidFrequency));

        let mut task: Scheduler<Counts, 0> = Scheduler::new([]);
        assert_eq!(task.init(0), Err(TaskError::InvalidTick));
    }

    #[test]
    fn test_equal_periods_are_staggered() {
        let mut task = Scheduler::new([Job::new(1000, job_a), Job::new(1000, job_b)]);
        assert!(task.init(10_000).is_ok());
        assert_eq!(task.job_mut(1).map(|job| job.period()), Some(10));

        let mut tlo = Counts::default();
        for _ in 0..10 {
            let (a, b) = (tlo.a, tlo.b);
            task.dispatch(&mut tlo);
            // Never both in the same tick
            assert!(!(tlo.a > a && tlo.b > b));
        }
        assert_eq!(tlo.a, 1);
        assert_eq!(tlo.b, 1);
    }

    #[test]
    fn test_disabled_job_holds_counter() {
        let mut task = Scheduler::new([Job::new(1000, job_a)]);
        assert!(task.init(10_000).is_ok());

        let mut tlo = Counts::default();
        for _ in 0..5 {
            task.dispatch(&mut tlo);
        }
        if let Some(job) = task.job_mut(0) {
            job.enable = false;
        }
        for _ in 0..100 {
            task.dispatch(&mut tlo);
        }
        assert_eq!(tlo.a, 0);

        // Re-enabled job waits a full period
        if let Some(job) = task.job_mut(0) {
            job.enable = true;
        }
        for _ in 0..9 {
            task.dispatch(&mut tlo);
        }
        assert_eq!(tlo.a, 0);
        task.dispatch(&mut tlo);
        assert_eq!(tlo.a, 1);
    }

    fn first(tlo: &mut Counts) {
        let _ = tlo.order.push(1);
    }

    fn second(tlo: &mut Counts) {
        let _ = tlo.order.push(2);
    }

    struct Timer {
        pending: u32,
    }

    impl TickTimer for Timer {
        fn tick(&mut self) -> bool {
            if self.pending == 0 {
                return false;
            }
            self.pending -= 1;
            true
        }
    }

    #[test]
    fn test_poll_claims_ticks_in_order() {
        // Same tick rate as the master tick: both jobs run on every tick
        let mut task = Scheduler::new([Job::new(100, first), Job::new(100, second)]);
        assert!(task.init(100).is_ok());

        let mut timer = Timer { pending: 1 };
        let mut tlo = Counts::default();
        assert!(task.poll(&mut timer, &mut tlo));
        assert!(!task.poll(&mut timer, &mut tlo));
        assert_eq!(tlo.order.as_slice(), &[1, 2]);
    }
}
