//! 并发驱动与极端时间测试

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use shade_common::LooperMode;
use shade_scheduler::{IdleState, Runnable, Scheduler, Schedulers, VirtualClock};

#[test]
fn test_concurrent_idle_runs_one_task_at_a_time() {
    let scheduler = Arc::new(Scheduler::new("shared", Arc::new(VirtualClock::new()), IdleState::Paused));
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    for index in 0..200 {
        let running = Arc::clone(&running);
        let max_running = Arc::clone(&max_running);
        let order = Arc::clone(&order);
        scheduler.post(Runnable::new(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(50));
            order.lock().push(index);
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    let total = thread::scope(|s| {
        let first = s.spawn(|| scheduler.idle());
        let second = s.spawn(|| scheduler.idle());
        first.join().expect("first drain") + second.join().expect("second drain")
    });

    assert_eq!(total, 200);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock(), (0..200).collect::<Vec<_>>());
    assert!(scheduler.is_empty());
}

#[test]
fn test_direct_idle_races_looper_thread() {
    let schedulers = Schedulers::default();
    let worker = schedulers.start_looper_thread("racer").expect("start");
    let order = Arc::new(Mutex::new(Vec::new()));
    let handler = worker.handler();
    for index in 0..100 {
        let order = Arc::clone(&order);
        assert!(handler.post(Runnable::new(move || order.lock().push(index))));
    }

    worker.scheduler().idle();
    worker.idle().expect("idle");

    assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_clock_advance_runs_due_looper_thread_tasks() {
    let schedulers = Schedulers::default();
    let worker = schedulers.start_looper_thread("bg").expect("start");
    let count = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&count);
    worker.handler().post_delayed(
        Runnable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(100),
    );
    // 让Looper线程先进入等待
    thread::sleep(Duration::from_millis(200));

    schedulers.idle_main_looper_for(Duration::from_millis(500));
    assert_eq!(schedulers.clock().uptime_millis(), 600);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sleep_wakes_looper_threads_in_paused_mode() {
    let schedulers = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Paused, 1_000);
    let worker = schedulers.start_looper_thread("sleeper").expect("start");
    let count = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&count);
    worker.handler().post_delayed(
        Runnable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(50),
    );

    schedulers.sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_extreme_times() {
    let clock = Arc::new(VirtualClock::new());
    assert!(clock.set_current_time_millis(i64::MAX as u64));
    assert_eq!(clock.current_time_millis(), i64::MAX as u64);

    let scheduler = Scheduler::new("far", Arc::new(VirtualClock::new()), IdleState::Paused);
    let ran = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&ran);
    let task = Runnable::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.post_at_time(task.clone(), i64::MAX as u64);
    scheduler.post_delayed(task, Duration::MAX);

    assert!(scheduler.run_one_task());
    assert_eq!(scheduler.current_time(), i64::MAX as u64);
    assert_eq!(scheduler.flush(), 1);
    assert_eq!(scheduler.current_time(), u64::MAX);
    assert_eq!(ran.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.idle_for(Duration::MAX), 0);
}
