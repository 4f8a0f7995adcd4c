//! 调度器属性测试
//!
//! 使用proptest验证任务按时间排序、同一时间按提交顺序执行

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use shade_scheduler::{IdleState, Runnable, Scheduler, VirtualClock};

fn paused_scheduler() -> Scheduler {
    Scheduler::new("prop", Arc::new(VirtualClock::new()), IdleState::Paused)
}

/// 属性测试: 执行顺序是(计划时间, 提交序号)的字典序
proptest! {
    #[test]
    fn prop_runs_in_time_then_post_order(delays in prop::collection::vec(0u64..50, 1..40)) {
        let scheduler = paused_scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (index, delay) in delays.iter().enumerate() {
            let order = Arc::clone(&order);
            scheduler.post_delayed(Runnable::new(move || order.lock().push(index)), Duration::from_millis(*delay));
        }

        let ran = scheduler.advance_by(Duration::from_millis(100));
        prop_assert_eq!(ran, delays.len());

        let mut expected: Vec<usize> = (0..delays.len()).collect();
        expected.sort_by_key(|&i| (delays[i], i));
        prop_assert_eq!(&*order.lock(), &expected);
    }
}

/// 属性测试: 任务执行时时钟等于其计划时间，且时钟从不后退
proptest! {
    #[test]
    fn prop_clock_matches_task_time(delays in prop::collection::vec(0u64..1_000, 1..20)) {
        let scheduler = Arc::new(paused_scheduler());
        let start = scheduler.current_time();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for delay in &delays {
            let seen = Arc::clone(&seen);
            let clock = Arc::clone(scheduler.clock());
            let due = start + delay;
            scheduler.post_delayed(
                Runnable::new(move || seen.lock().push((due, clock.uptime_millis()))),
                Duration::from_millis(*delay),
            );
        }

        scheduler.flush();
        let seen = seen.lock();
        prop_assert_eq!(seen.len(), delays.len());
        for window in seen.windows(2) {
            prop_assert!(window[0].1 <= window[1].1);
        }
        for (due, at) in seen.iter() {
            prop_assert_eq!(due, at);
        }
    }
}

/// 属性测试: advance_to只执行计划时间不晚于目标时间的任务
proptest! {
    #[test]
    fn prop_advance_to_runs_only_due(delays in prop::collection::vec(0u64..100, 0..30), target in 0u64..100) {
        let scheduler = paused_scheduler();
        let start = scheduler.current_time();
        for delay in &delays {
            scheduler.post_delayed(Runnable::new(|| {}), Duration::from_millis(*delay));
        }

        let ran = scheduler.advance_to(start + target);
        let due = delays.iter().filter(|d| **d <= target).count();
        prop_assert_eq!(ran, due);
        prop_assert_eq!(scheduler.size(), delays.len() - due);
        prop_assert_eq!(scheduler.current_time(), start + target);
    }
}
