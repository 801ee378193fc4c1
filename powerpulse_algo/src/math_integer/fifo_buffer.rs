// Fixed-capacity ring buffer with a run-time length, used as the delay line of
// moving-average filters.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

pub struct BufferFIFO<T, const N: usize> {
    buffer: [T; N],

    idx: usize, // Slot holding the oldest sample
    len: usize, // Active length (1..=N)
}

impl<T, const N: usize> BufferFIFO<T, N>
where
    T: Default + Copy,
{
    pub fn new() -> Self {
        Self {
            buffer: [T::default(); N],
            idx: 0,
            len: N,
        }
    }

    /// Changes the active length; rejected when zero or above capacity.
    pub fn resize(&mut self, len: usize) -> bool {
        if len == 0 || len > N {
            return false;
        }
        self.len = len;
        self.idx = 0;
        true
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Overwrites every active slot with `value`.
    pub fn fill(&mut self, value: T) {
        self.buffer[..self.len].fill(value);
        self.idx = 0;
    }

    /// Oldest sample, the one the next `pop()` replaces.
    #[inline(always)]
    pub fn read(&self) -> T {
        self.buffer[self.idx]
    }

    /// Stores `value` in place of the oldest sample and returns the evicted one.
    pub fn pop(&mut self, value: T) -> T {
        let temp = self.buffer[self.idx];
        self.buffer[self.idx] = value;
        self.idx += 1;
        if self.idx >= self.len {
            self.idx = 0;
        }
        temp
    }
}

impl<T, const N: usize> Default for BufferFIFO<T, N>
where
    T: Default + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
