/// Services the driver needs from the board: which core is running,
/// a microsecond clock and busy-wait delays.
pub trait Platform: Sync {
    /// Identifies the calling execution context (the core number on
    /// hardware). Never `usize::MAX`.
    fn context_id(&self) -> usize;

    fn micros(&self) -> u64;

    fn millis(&self) -> u64 {
        self.micros() / 1000
    }

    fn delay_us(&self, us: u32);

    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }

    /// Called while spinning on another context.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}
