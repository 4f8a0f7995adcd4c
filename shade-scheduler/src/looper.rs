//! Loopers and handlers
//!
//! A [`Looper`] owns one [`Scheduler`]; a [`Handler`] posts to a looper.
//! The main looper is driven by the test thread. A [`LooperThread`] runs its
//! looper on a real OS thread that executes tasks as they fall due, the
//! equivalent of a `HandlerThread`. The thread is woken both by posts and by
//! the shared clock moving forward.

use crossbeam_channel::{Sender, bounded};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use shade_error::{SchedulerError, ShadeResult};

use crate::clock::VirtualClock;
use crate::scheduler::{IdleState, Runnable, Scheduler, Waker};

/// A message loop backed by a scheduler
pub struct Looper {
    name: String,
    scheduler: Arc<Scheduler>,
    main: bool,
    quitting: AtomicBool,
}

impl Looper {
    /// The main looper, driving `scheduler` from the test thread
    pub fn main(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            name: "main".to_string(),
            scheduler,
            main: true,
            quitting: AtomicBool::new(false),
        })
    }

    fn background(name: &str, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scheduler,
            main: false,
            quitting: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn is_main(&self) -> bool {
        self.main
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    /// Whether the calling thread is this looper's thread
    pub fn is_current_thread(&self) -> bool {
        self.scheduler.associated_thread() == thread::current().id()
    }

    /// Run every task that is due now
    pub fn idle(&self) -> usize {
        self.scheduler.idle()
    }

    pub fn idle_for(&self, duration: Duration) -> usize {
        self.scheduler.idle_for(duration)
    }

    fn mark_quitting(&self) -> Result<(), SchedulerError> {
        if self.main {
            return Err(SchedulerError::LooperQuit(format!(
                "{} (the main looper is not allowed to quit)",
                self.name
            )));
        }
        self.quitting.store(true, Ordering::Release);
        Ok(())
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("name", &self.name)
            .field("main", &self.main)
            .field("quitting", &self.is_quitting())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Posts work to a looper
///
/// Posting to a looper that has quit is refused and returns `false`.
#[derive(Clone, Debug)]
pub struct Handler {
    looper: Arc<Looper>,
}

impl Handler {
    pub fn new(looper: Arc<Looper>) -> Self {
        Self { looper }
    }

    pub fn looper(&self) -> &Arc<Looper> {
        &self.looper
    }

    pub fn post(&self, runnable: Runnable) -> bool {
        self.post_delayed(runnable, Duration::ZERO)
    }

    pub fn post_delayed(&self, runnable: Runnable, delay: Duration) -> bool {
        if self.refuse() {
            return false;
        }
        self.looper.scheduler.post_delayed(runnable, delay);
        true
    }

    /// Post for absolute uptime `uptime_millis`
    pub fn post_at_time(&self, runnable: Runnable, uptime_millis: u64) -> bool {
        if self.refuse() {
            return false;
        }
        self.looper.scheduler.post_at_time(runnable, uptime_millis);
        true
    }

    pub fn post_at_front_of_queue(&self, runnable: Runnable) -> bool {
        if self.refuse() {
            return false;
        }
        self.looper.scheduler.post_at_front_of_queue(runnable);
        true
    }

    pub fn remove_callbacks(&self, runnable: &Runnable) {
        self.looper.scheduler.remove(runnable);
    }

    pub fn has_callbacks(&self, runnable: &Runnable) -> bool {
        self.looper.scheduler.contains(runnable)
    }

    fn refuse(&self) -> bool {
        if self.looper.is_quitting() {
            log::warn!("Handler: post to looper {} which has quit", self.looper.name);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuitMode {
    /// Drop pending tasks
    Now,
    /// Run tasks that are already due first
    Safely,
}

enum Command {
    Idle(Duration, Sender<usize>),
    RunOne(Sender<bool>),
}

#[derive(Default)]
struct Control {
    wake: bool,
    quit: Option<QuitMode>,
    commands: VecDeque<Command>,
}

struct Shared {
    control: Mutex<Control>,
    signal: Condvar,
}

impl Shared {
    fn notify(&self, update: impl FnOnce(&mut Control)) {
        let mut control = self.control.lock();
        update(&mut control);
        self.signal.notify_one();
    }
}

/// A looper running on its own OS thread
pub struct LooperThread {
    looper: Arc<Looper>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl LooperThread {
    /// Spawn a thread named `name` and start its looper
    ///
    /// Tasks posted from other threads are executed on the looper thread as
    /// soon as they fall due on `clock`.
    pub fn start(name: &str, clock: Arc<VirtualClock>, max_flush_tasks: usize) -> ShadeResult<Arc<Self>> {
        let scheduler = Arc::new(
            Scheduler::new(name, Arc::clone(&clock), IdleState::Unpaused).with_max_flush_tasks(max_flush_tasks),
        );
        let looper = Looper::background(name, Arc::clone(&scheduler));
        let shared = Arc::new(Shared {
            control: Mutex::new(Control::default()),
            signal: Condvar::new(),
        });

        let waker_shared = Arc::downgrade(&shared);
        let waker: Waker = Arc::new(move || {
            if let Some(shared) = waker_shared.upgrade() {
                shared.notify(|control| control.wake = true);
            }
        });
        // 时钟只持有弱引用，监听器随调度器一起释放
        clock.add_advance_listener(&waker);
        scheduler.set_waker(Some(waker));

        let (ready_tx, ready_rx) = bounded::<ThreadId>(1);
        let loop_shared = Arc::clone(&shared);
        let loop_scheduler = Arc::clone(&scheduler);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let id = thread::current().id();
                loop_scheduler.set_associated_thread(id);
                let _ = ready_tx.send(id);
                run_loop(&thread_name, &loop_shared, &loop_scheduler);
            })
            .map_err(|e| SchedulerError::ThreadSpawn(name.to_string(), e.to_string()))?;

        let thread_id = ready_rx
            .recv()
            .map_err(|_| SchedulerError::ThreadPanicked(name.to_string()))?;
        log::info!("Looper thread {} started", name);

        Ok(Arc::new(Self {
            looper,
            shared,
            handle: Mutex::new(Some(handle)),
            thread_id,
        }))
    }

    pub fn name(&self) -> &str {
        self.looper.name()
    }

    pub fn looper(&self) -> &Arc<Looper> {
        &self.looper
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.looper.scheduler()
    }

    pub fn handler(&self) -> Handler {
        Handler::new(Arc::clone(&self.looper))
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_alive(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run due tasks on the looper thread and wait until they are done
    pub fn idle(&self) -> ShadeResult<usize> {
        self.idle_for(Duration::ZERO)
    }

    /// Advance the clock by `duration` on the looper thread, running the
    /// tasks that fall due, and wait until they are done
    pub fn idle_for(&self, duration: Duration) -> ShadeResult<usize> {
        if thread::current().id() == self.thread_id {
            return Ok(self.scheduler().idle_for(duration));
        }
        let (tx, rx) = bounded(1);
        self.shared
            .notify(|control| control.commands.push_back(Command::Idle(duration, tx)));
        rx.recv()
            .map_err(|_| SchedulerError::ThreadPanicked(self.name().to_string()).into())
    }

    /// Run the earliest pending task on the looper thread
    pub fn run_one_task(&self) -> ShadeResult<bool> {
        if thread::current().id() == self.thread_id {
            return Ok(self.scheduler().run_one_task());
        }
        let (tx, rx) = bounded(1);
        self.shared
            .notify(|control| control.commands.push_back(Command::RunOne(tx)));
        rx.recv()
            .map_err(|_| SchedulerError::ThreadPanicked(self.name().to_string()).into())
    }

    /// Stop the thread, dropping pending tasks
    pub fn quit(&self) -> ShadeResult<()> {
        self.stop(QuitMode::Now)
    }

    /// Stop the thread after running the tasks that are already due
    pub fn quit_safely(&self) -> ShadeResult<()> {
        self.stop(QuitMode::Safely)
    }

    fn stop(&self, mode: QuitMode) -> ShadeResult<()> {
        self.looper.mark_quitting()?;
        self.shared.notify(|control| {
            control.quit.get_or_insert(mode);
        });

        if thread::current().id() == self.thread_id {
            return Ok(());
        }
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| SchedulerError::ThreadPanicked(self.name().to_string()))?;
        log::info!("Looper thread {} quit ({:?})", self.name(), mode);
        Ok(())
    }
}

impl Drop for LooperThread {
    fn drop(&mut self) {
        let running = self.handle.lock().is_some();
        if running && let Err(e) = self.quit() {
            log::warn!("Looper thread {} did not stop cleanly: {}", self.name(), e);
        }
    }
}

impl fmt::Debug for LooperThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperThread")
            .field("looper", &self.looper)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn run_loop(name: &str, shared: &Shared, scheduler: &Scheduler) {
    loop {
        let (commands, quit) = {
            let mut control = shared.control.lock();
            while !control.wake && control.quit.is_none() && control.commands.is_empty() {
                shared.signal.wait(&mut control);
            }
            control.wake = false;
            (std::mem::take(&mut control.commands), control.quit)
        };

        if let Some(mode) = quit {
            if mode == QuitMode::Safely {
                scheduler.idle();
            }
            scheduler.reset();
            for command in commands {
                match command {
                    Command::Idle(_, reply) => {
                        let _ = reply.send(0);
                    }
                    Command::RunOne(reply) => {
                        let _ = reply.send(false);
                    }
                }
            }
            break;
        }

        scheduler.idle();
        for command in commands {
            match command {
                Command::Idle(duration, reply) => {
                    let ran = scheduler.idle_for(duration);
                    let _ = reply.send(ran);
                }
                Command::RunOne(reply) => {
                    let _ = reply.send(scheduler.run_one_task());
                }
            }
        }
    }
    log::debug!("Looper thread {} exiting", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Runnable) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Runnable::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_main_looper_cannot_quit() {
        let scheduler = Arc::new(Scheduler::new("fg", Arc::new(VirtualClock::new()), IdleState::Paused));
        let looper = Looper::main(scheduler);
        assert!(looper.mark_quitting().is_err());
        assert!(!looper.is_quitting());
    }

    #[test]
    fn test_handler_posts_to_scheduler() {
        let scheduler = Arc::new(Scheduler::new("fg", Arc::new(VirtualClock::new()), IdleState::Paused));
        let handler = Handler::new(Looper::main(Arc::clone(&scheduler)));
        let (count, task) = counter();

        assert!(handler.post_delayed(task.clone(), Duration::from_millis(10)));
        assert!(handler.has_callbacks(&task));
        handler.remove_callbacks(&task);
        assert!(!handler.has_callbacks(&task));

        assert!(handler.post_at_time(task, 150));
        scheduler.advance_to(150);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_looper_thread_runs_posted_tasks() {
        let thread = LooperThread::start("worker", Arc::new(VirtualClock::new()), 1_000).expect("start");
        let (count, task) = counter();
        let ran_on = Arc::new(Mutex::new(None));
        let ran_on_clone = Arc::clone(&ran_on);

        let handler = thread.handler();
        assert!(handler.post(task));
        assert!(handler.post(Runnable::new(move || {
            *ran_on_clone.lock() = Some(thread::current().id());
        })));
        thread.idle().expect("idle");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*ran_on.lock(), Some(thread.thread_id()));
        thread.quit().expect("quit");
        assert!(!thread.is_alive());
    }

    #[test]
    fn test_delayed_task_waits_for_clock() {
        let clock = Arc::new(VirtualClock::new());
        let thread = LooperThread::start("delayed", Arc::clone(&clock), 1_000).expect("start");
        let (count, task) = counter();
        thread.handler().post_delayed(task, Duration::from_millis(100));

        thread.idle().expect("idle");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(thread.idle_for(Duration::from_millis(100)).expect("idle"), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(clock.uptime_millis(), 200);
    }

    #[test]
    fn test_post_after_quit_is_refused() {
        let thread = LooperThread::start("quitter", Arc::new(VirtualClock::new()), 1_000).expect("start");
        let handler = thread.handler();
        thread.quit_safely().expect("quit");
        let (count, task) = counter();
        assert!(!handler.post(task));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // quitting twice is harmless
        thread.quit().expect("quit again");
    }

    #[test]
    fn test_quit_safely_runs_due_tasks() {
        let thread = LooperThread::start("safe", Arc::new(VirtualClock::new()), 1_000).expect("start");
        let (count, task) = counter();
        let (late_count, late) = counter();
        thread.handler().post(task);
        thread.handler().post_delayed(late, Duration::from_secs(1));
        thread.quit_safely().expect("quit");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clock_advance_wakes_looper_thread() {
        let clock = Arc::new(VirtualClock::new());
        let thread = LooperThread::start("woken", Arc::clone(&clock), 1_000).expect("start");
        let (count, task) = counter();
        thread.handler().post_delayed(task, Duration::from_millis(100));
        thread.idle().expect("idle");
        assert_eq!(count.load(Ordering::SeqCst), 0);

        clock.advance_by(Duration::from_millis(500));
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        thread.quit().expect("quit");
    }
}
