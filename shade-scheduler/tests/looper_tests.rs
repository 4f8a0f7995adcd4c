//! Looper与跨线程投递测试

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use shade_common::LooperMode;
use shade_scheduler::{Runnable, Schedulers, VirtualClock};

#[test]
fn test_concurrent_posts_to_main_looper() {
    let schedulers = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Legacy, 100_000);
    let handler = schedulers.main_handler();
    let count = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for _ in 0..2 {
            let handler = handler.clone();
            let count = Arc::clone(&count);
            s.spawn(move || {
                for _ in 0..10_000 {
                    let count = Arc::clone(&count);
                    assert!(handler.post(Runnable::new(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                    })));
                }
            });
        }
    });

    // 来自其他线程的任务排队等待主线程
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(schedulers.idle_main_looper(), 20_000);
    assert_eq!(count.load(Ordering::SeqCst), 20_000);
}

#[test]
fn test_looper_thread_posts_back_to_main() {
    let schedulers = Schedulers::default();
    let worker = schedulers.start_looper_thread("worker").expect("start");
    let main = schedulers.main_handler();
    let delivered = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = bounded(1);

    let delivered_in_task = Arc::clone(&delivered);
    worker.handler().post(Runnable::new(move || {
        let delivered = Arc::clone(&delivered_in_task);
        main.post(Runnable::new(move || {
            delivered.fetch_add(1, Ordering::SeqCst);
        }));
        let _ = tx.send(thread::current().name().map(str::to_string));
    }));

    let ran_on = rx.recv_timeout(Duration::from_secs(5)).expect("worker ran");
    assert_eq!(ran_on.as_deref(), Some("worker"));

    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(schedulers.idle_main_looper(), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_run_one_task_any_reaches_looper_thread() {
    let schedulers = Schedulers::default();
    let worker = schedulers.start_looper_thread("io").expect("start");
    let ran = Arc::new(AtomicUsize::new(0));

    let in_task = Arc::clone(&ran);
    worker.handler().post_delayed(
        Runnable::new(move || {
            in_task.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_secs(10),
    );

    assert!(schedulers.run_one_task_any().expect("run"));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(schedulers.clock().uptime_millis(), 10_100);
    assert!(!schedulers.run_one_task_any().expect("run"));
}

#[test]
fn test_reset_stops_looper_threads() {
    let schedulers = Schedulers::default();
    let worker = schedulers.start_looper_thread("io").expect("start");
    schedulers.reset();
    assert!(!worker.is_alive());
    assert!(!worker.handler().post(Runnable::new(|| {})));
}
