// 调度器集合（Schedulers）
//
// 每个沙箱有一个前台调度器（主Looper）、一个后台调度器和若干命名的
// Looper线程，它们共享同一个虚拟时钟。
//
// 跨队列的`run_one_task_any`：计划时间最早的任务先执行；时间相同时
// 前台优先于后台，后台优先于命名Looper线程（按创建顺序）；同一队列内
// 按提交顺序。

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use shade_common::LooperMode;
use shade_error::{SchedulerError, ShadeResult};

use crate::clock::VirtualClock;
use crate::looper::{Handler, Looper, LooperThread};
use crate::scheduler::{DEFAULT_MAX_FLUSH_TASKS, IdleState, Scheduler};

/// 调度器初始状态
pub fn initial_idle_state(mode: LooperMode) -> IdleState {
    match mode {
        LooperMode::Paused => IdleState::Paused,
        LooperMode::Legacy => IdleState::Unpaused,
    }
}

/// The schedulers of one sandbox
pub struct Schedulers {
    clock: Arc<VirtualClock>,
    mode: LooperMode,
    max_flush_tasks: usize,
    foreground: Arc<Scheduler>,
    background: Arc<Scheduler>,
    main_looper: Arc<Looper>,
    threads: Mutex<Vec<Arc<LooperThread>>>,
}

impl Schedulers {
    /// 创建调度器集合
    ///
    /// # 参数
    /// - `clock`: 共享的虚拟时钟
    /// - `mode`: Looper模式，决定前台和后台调度器的初始状态
    /// - `max_flush_tasks`: 每次`flush`最多执行的任务数
    ///
    /// 调用线程成为主线程。
    pub fn new(clock: Arc<VirtualClock>, mode: LooperMode, max_flush_tasks: usize) -> Self {
        let state = initial_idle_state(mode);
        let foreground = Arc::new(
            Scheduler::new("foreground", Arc::clone(&clock), state).with_max_flush_tasks(max_flush_tasks),
        );
        let background = Arc::new(
            Scheduler::new("background", Arc::clone(&clock), state).with_max_flush_tasks(max_flush_tasks),
        );
        let main_looper = Looper::main(Arc::clone(&foreground));
        log::debug!("Schedulers created in {:?} looper mode", mode);
        Self {
            clock,
            mode,
            max_flush_tasks,
            foreground,
            background,
            main_looper,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn looper_mode(&self) -> LooperMode {
        self.mode
    }

    /// 前台（主线程）调度器
    pub fn foreground(&self) -> &Arc<Scheduler> {
        &self.foreground
    }

    /// 后台调度器
    pub fn background(&self) -> &Arc<Scheduler> {
        &self.background
    }

    pub fn main_looper(&self) -> &Arc<Looper> {
        &self.main_looper
    }

    pub fn main_handler(&self) -> Handler {
        Handler::new(Arc::clone(&self.main_looper))
    }

    /// 把调用线程设为主线程
    ///
    /// 沙箱可能在不同的测试线程上运行测试，每个测试开始时调用。
    pub fn bind_to_current_thread(&self) {
        let current = std::thread::current().id();
        self.foreground.set_associated_thread(current);
        self.background.set_associated_thread(current);
    }

    /// 启动一个命名的Looper线程
    pub fn start_looper_thread(&self, name: &str) -> ShadeResult<Arc<LooperThread>> {
        let mut threads = self.threads.lock();
        if threads.iter().any(|t| t.name() == name && !t.looper().is_quitting()) {
            return Err(SchedulerError::DuplicateLooper(name.to_string()).into());
        }
        threads.retain(|t| !t.looper().is_quitting());
        let thread = LooperThread::start(name, Arc::clone(&self.clock), self.max_flush_tasks)?;
        threads.push(Arc::clone(&thread));
        Ok(thread)
    }

    pub fn looper_thread(&self, name: &str) -> Option<Arc<LooperThread>> {
        self.threads
            .lock()
            .iter()
            .find(|t| t.name() == name && !t.looper().is_quitting())
            .cloned()
    }

    /// 执行所有队列中最早的一个任务
    pub fn run_one_task_any(&self) -> ShadeResult<bool> {
        let threads: Vec<Arc<LooperThread>> = self
            .threads
            .lock()
            .iter()
            .filter(|t| !t.looper().is_quitting())
            .cloned()
            .collect();

        let mut earliest: Option<(u64, usize)> = None;
        let candidates = [&self.foreground, &self.background]
            .into_iter()
            .chain(threads.iter().map(|t| t.scheduler()));
        for (index, scheduler) in candidates.enumerate() {
            if let Some(time) = scheduler.next_task_time()
                && earliest.is_none_or(|(best, _)| time < best)
            {
                earliest = Some((time, index));
            }
        }

        match earliest {
            None => Ok(false),
            Some((_, 0)) => Ok(self.foreground.run_one_task()),
            Some((_, 1)) => Ok(self.background.run_one_task()),
            Some((_, index)) => threads[index - 2].run_one_task(),
        }
    }

    /// 执行前台所有任务
    pub fn flush_foreground(&self) -> usize {
        self.foreground.flush()
    }

    pub fn flush_background(&self) -> usize {
        self.background.flush()
    }

    /// 执行主Looper上已到期的任务
    pub fn idle_main_looper(&self) -> usize {
        self.foreground.idle()
    }

    /// 推进时钟`duration`，执行主Looper上到期的任务
    ///
    /// 返回前Looper线程也执行完到期的任务。返回值只计主Looper的任务。
    pub fn idle_main_looper_for(&self, duration: Duration) -> usize {
        let ran = self.foreground.idle_for(duration);
        self.idle_looper_threads();
        ran
    }

    /// `SystemClock.sleep`
    ///
    /// Legacy模式下等同于[`Self::idle_main_looper_for`]；Paused模式下只推进
    /// 时钟，主Looper的任务等测试显式驱动。
    pub fn sleep(&self, duration: Duration) -> usize {
        match self.mode {
            LooperMode::Legacy => self.idle_main_looper_for(duration),
            LooperMode::Paused => {
                self.clock.advance_by(duration);
                self.idle_looper_threads();
                0
            }
        }
    }

    /// 让每个存活的Looper线程执行已到期的任务并等待完成
    fn idle_looper_threads(&self) {
        let threads: Vec<Arc<LooperThread>> = self
            .threads
            .lock()
            .iter()
            .filter(|t| !t.looper().is_quitting())
            .cloned()
            .collect();
        for thread in threads {
            if let Err(e) = thread.idle() {
                log::warn!("Looper thread {} did not idle: {}", thread.name(), e);
            }
        }
    }

    /// 测试结束时调用：停止Looper线程，清空队列，时钟回到初始时间
    pub fn reset(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads {
            if let Err(e) = thread.quit() {
                log::warn!("Looper thread {} did not quit: {}", thread.name(), e);
            }
        }
        self.foreground.reset();
        self.background.reset();
        self.clock.reset();
    }
}

impl Default for Schedulers {
    fn default() -> Self {
        Self::new(
            Arc::new(VirtualClock::new()),
            LooperMode::default(),
            DEFAULT_MAX_FLUSH_TASKS,
        )
    }
}

impl Drop for Schedulers {
    fn drop(&mut self) {
        for thread in self.threads.get_mut().drain(..) {
            let _ = thread.quit();
        }
    }
}

impl fmt::Debug for Schedulers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedulers")
            .field("mode", &self.mode)
            .field("now", &self.clock.uptime_millis())
            .field("foreground", &self.foreground)
            .field("background", &self.background)
            .field("threads", &self.threads.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Runnable;

    fn log_task(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Runnable {
        let log = Arc::clone(log);
        Runnable::new(move || log.lock().push(name))
    }

    #[test]
    fn test_paused_mode_pauses_both_queues() {
        let s = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Paused, 100);
        assert!(s.foreground().is_paused());
        assert!(s.background().is_paused());

        let legacy = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Legacy, 100);
        assert_eq!(legacy.foreground().idle_state(), IdleState::Unpaused);
    }

    #[test]
    fn test_run_one_task_any_prefers_earliest_then_foreground() {
        let s = Schedulers::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        s.background().post(log_task(&log, "bg-now"));
        s.foreground().post_delayed(log_task(&log, "fg-later"), Duration::from_millis(5));
        s.foreground().post(log_task(&log, "fg-now"));

        assert!(s.run_one_task_any().expect("run"));
        assert!(s.run_one_task_any().expect("run"));
        assert!(s.run_one_task_any().expect("run"));
        assert!(!s.run_one_task_any().expect("run"));
        assert_eq!(*log.lock(), vec!["fg-now", "bg-now", "fg-later"]);
    }

    #[test]
    fn test_duplicate_looper_thread() {
        let s = Schedulers::default();
        let first = s.start_looper_thread("io").expect("start");
        assert!(s.start_looper_thread("io").is_err());
        assert!(s.looper_thread("io").is_some());

        first.quit().expect("quit");
        assert!(s.looper_thread("io").is_none());
        assert!(s.start_looper_thread("io").is_ok());
    }

    #[test]
    fn test_reset() {
        let s = Schedulers::default();
        s.foreground().post(Runnable::new(|| {}));
        s.idle_main_looper_for(Duration::from_secs(1));
        s.start_looper_thread("worker").expect("start");

        s.reset();
        assert!(s.foreground().is_empty());
        assert_eq!(s.clock().uptime_millis(), 100);
        assert!(s.looper_thread("worker").is_none());
    }

    #[test]
    fn test_idle_main_looper_for_drains_looper_threads() {
        let s = Schedulers::default();
        let worker = s.start_looper_thread("bg").expect("start");
        let log = Arc::new(Mutex::new(Vec::new()));
        worker.handler().post_delayed(log_task(&log, "bg"), Duration::from_millis(100));
        s.foreground().post_delayed(log_task(&log, "fg"), Duration::from_millis(50));

        assert_eq!(s.idle_main_looper_for(Duration::from_millis(500)), 1);
        assert_eq!(s.clock().uptime_millis(), 600);
        let mut ran = log.lock().clone();
        ran.sort_unstable();
        assert_eq!(ran, vec!["bg", "fg"]);
    }

    #[test]
    fn test_sleep_depends_on_looper_mode() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let paused = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Paused, 100);
        paused.foreground().post_delayed(log_task(&log, "paused"), Duration::from_millis(10));
        assert_eq!(paused.sleep(Duration::from_millis(20)), 0);
        assert_eq!(paused.clock().uptime_millis(), 120);
        assert!(log.lock().is_empty());

        let legacy = Schedulers::new(Arc::new(VirtualClock::new()), LooperMode::Legacy, 100);
        legacy.foreground().post_delayed(log_task(&log, "legacy"), Duration::from_millis(10));
        assert_eq!(legacy.sleep(Duration::from_millis(20)), 1);
        assert_eq!(legacy.clock().uptime_millis(), 120);
        assert_eq!(*log.lock(), vec!["legacy"]);
    }
}
