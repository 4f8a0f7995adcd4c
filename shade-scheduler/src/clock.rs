// 虚拟时钟（Virtual Clock）
//
// 沙箱内所有与时间相关的影子读取的都是这个时钟。时钟只会被调度器操作
// 显式推进，永远不会跟随墙钟时间，也不会后退。
//
// 时间以纳秒保存在u128中，任何u64毫秒值都可以表示；推进到上限后饱和。

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// 时钟的初始时间（毫秒）
pub const DEFAULT_START_MILLIS: u64 = 100;

const NANOS_PER_MILLI: u128 = 1_000_000;
const MAX_NANOS: u128 = u64::MAX as u128 * NANOS_PER_MILLI;

/// Called after the clock moves forward
pub type AdvanceListener = Arc<dyn Fn() + Send + Sync>;

fn to_nanos(millis: u64) -> u128 {
    u128::from(millis) * NANOS_PER_MILLI
}

fn to_millis(nanos: u128) -> u64 {
    u64::try_from(nanos / NANOS_PER_MILLI).unwrap_or(u64::MAX)
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Deterministic, test-driven time source
pub struct VirtualClock {
    start_millis: u64,
    nanos: Mutex<u128>,
    listeners: RwLock<Vec<Weak<dyn Fn() + Send + Sync>>>,
}

impl VirtualClock {
    /// 创建从[`DEFAULT_START_MILLIS`]开始的时钟
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_START_MILLIS)
    }

    /// 创建从`millis`开始的时钟
    pub fn starting_at(millis: u64) -> Self {
        Self {
            start_millis: millis,
            nanos: Mutex::new(to_nanos(millis)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// 当前时间（毫秒），等同于`SystemClock.uptimeMillis()`
    pub fn uptime_millis(&self) -> u64 {
        to_millis(*self.nanos.lock())
    }

    /// 等同于`SystemClock.elapsedRealtime()`
    pub fn elapsed_realtime(&self) -> u64 {
        self.uptime_millis()
    }

    /// 等同于`System.currentTimeMillis()`
    pub fn current_time_millis(&self) -> u64 {
        self.uptime_millis()
    }

    /// 等同于`System.nanoTime()`；超出u64范围时饱和
    pub fn nano_time(&self) -> u64 {
        u64::try_from(*self.nanos.lock()).unwrap_or(u64::MAX)
    }

    /// 设置当前时间
    ///
    /// 时钟不能后退：`millis`早于当前时间时返回`false`且时钟不变。
    pub fn set_current_time_millis(&self, millis: u64) -> bool {
        let target = to_nanos(millis);
        {
            let mut nanos = self.nanos.lock();
            if target < *nanos {
                log::debug!(
                    "Rejected moving the clock back from {}ms to {}ms",
                    to_millis(*nanos),
                    millis
                );
                return false;
            }
            if target == *nanos {
                return true;
            }
            *nanos = target;
        }
        self.notify_advanced();
        true
    }

    /// 推进到`millis`；已经过了该时间时不做任何事
    pub fn advance_to(&self, millis: u64) -> bool {
        let target = to_nanos(millis);
        {
            let mut nanos = self.nanos.lock();
            if target <= *nanos {
                return false;
            }
            *nanos = target;
        }
        self.notify_advanced();
        true
    }

    /// 推进`duration`
    pub fn advance_by(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        {
            let mut nanos = self.nanos.lock();
            *nanos = nanos.saturating_add(duration.as_nanos()).min(MAX_NANOS);
        }
        self.notify_advanced();
    }

    /// 回到初始时间
    pub fn reset(&self) {
        *self.nanos.lock() = to_nanos(self.start_millis);
    }

    /// 注册一个在时钟前进后调用的监听器
    ///
    /// 时钟只保存弱引用，调用方丢弃`listener`后它自动失效。
    pub fn add_advance_listener(&self, listener: &AdvanceListener) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(Arc::downgrade(listener));
    }

    fn notify_advanced(&self) {
        let live: Vec<AdvanceListener> = self.listeners.read().iter().filter_map(Weak::upgrade).collect();
        for listener in live {
            listener();
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("start_millis", &self.start_millis)
            .field("now_millis", &self.uptime_millis())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_default() {
        let clock = VirtualClock::new();
        assert_eq!(clock.uptime_millis(), 100);
        assert_eq!(clock.nano_time(), 100_000_000);
        assert_eq!(clock.current_time_millis(), clock.elapsed_realtime());
    }

    #[test]
    fn test_set_current_time_rejects_going_back() {
        let clock = VirtualClock::new();
        assert!(clock.set_current_time_millis(1_000));
        assert_eq!(clock.current_time_millis(), 1_000);
        assert!(!clock.set_current_time_millis(999));
        assert_eq!(clock.current_time_millis(), 1_000);
        assert!(clock.set_current_time_millis(1_000));
    }

    #[test]
    fn test_advance() {
        let clock = VirtualClock::new();
        clock.advance_by(Duration::from_millis(50));
        assert_eq!(clock.uptime_millis(), 150);
        assert!(clock.advance_to(200));
        assert!(!clock.advance_to(150));
        assert_eq!(clock.uptime_millis(), 200);
        clock.advance_by(Duration::from_nanos(1));
        assert_eq!(clock.nano_time(), 200_000_001);
    }

    #[test]
    fn test_reset() {
        let clock = VirtualClock::starting_at(5);
        clock.advance_by(Duration::from_secs(1));
        clock.reset();
        assert_eq!(clock.uptime_millis(), 5);
    }

    #[test]
    fn test_far_future_times_do_not_overflow() {
        let clock = VirtualClock::new();
        assert!(clock.set_current_time_millis(i64::MAX as u64));
        assert_eq!(clock.current_time_millis(), i64::MAX as u64);
        assert_eq!(clock.nano_time(), u64::MAX);
        assert!(!clock.set_current_time_millis(1_000));

        assert!(clock.advance_to(u64::MAX));
        clock.advance_by(Duration::MAX);
        assert_eq!(clock.uptime_millis(), u64::MAX);
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(42)), 42);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_advance_listeners() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let clock = VirtualClock::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let listener: AdvanceListener = Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        clock.add_advance_listener(&listener);

        clock.advance_by(Duration::from_millis(5));
        assert!(clock.advance_to(500));
        assert!(!clock.advance_to(400));
        assert!(clock.set_current_time_millis(500));
        clock.advance_by(Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(listener);
        clock.advance_by(Duration::from_millis(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
