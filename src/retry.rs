use core::ops::ControlFlow;
use core::time::Duration;

use crate::clock::Clock;

/// Runs `op` until it breaks or `window_us` microseconds elapsed since the first attempt.
///
/// A window of 0 runs `op` exactly once. Never fails on its own: the last outcome is
/// returned either way and the caller decides whether it means a timeout.
pub fn retry<C, T>(ctx: &mut C, window_us: u32, mut op: impl FnMut(&mut C) -> ControlFlow<T, T>) -> T
where
    C: Clock + ?Sized,
{
    let start = ctx.now();
    let window = Duration::from_micros(window_us as u64);
    loop {
        let value = match op(ctx) {
            ControlFlow::Break(value) => return value,
            ControlFlow::Continue(value) => value,
        };
        if ctx.now().saturating_sub(start) >= window {
            return value;
        }
        ctx.relax();
    }
}

/// Busy waits for `us` microseconds
pub fn delay<C: Clock + ?Sized>(ctx: &mut C, us: u32) {
    retry(ctx, us, |_| ControlFlow::Continue(()))
}
