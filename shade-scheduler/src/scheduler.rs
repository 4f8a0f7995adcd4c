// 调度器（Scheduler）
//
// 一个调度器是一条按计划时间排序的任务队列，由测试显式驱动：
// - 同一计划时间的任务按提交顺序执行
// - 执行任务时不持有队列锁，任务可以继续提交任务
// - 正在执行任务时提交的任务，以及从其他线程提交的任务，总是排队
// - 时间只会被显式推进，推进时按时间顺序执行所有到期的任务
// - 同一时刻一个队列只有一个线程在执行任务；任务内重入同一队列是允许的

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::clock::{VirtualClock, duration_millis};

/// `flush`最多执行的任务数
pub const DEFAULT_MAX_FLUSH_TASKS: usize = 100_000;

/// A unit of work posted to a scheduler
///
/// Identity is by allocation: clones of one `Runnable` are the same task for
/// [`Scheduler::remove`].
#[derive(Clone)]
pub struct Runnable {
    inner: Arc<dyn Fn() + Send + Sync>,
}

impl Runnable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn run(&self) {
        (self.inner)()
    }

    pub fn ptr_eq(&self, other: &Runnable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runnable({:p})", Arc::as_ptr(&self.inner).cast::<()>())
    }
}

/// 调度器的空闲状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleState {
    /// 任务只排队，不执行
    #[default]
    Paused,
    /// 立即到期的任务在提交时直接执行
    Unpaused,
    /// 所有任务在提交时执行，必要时推进时钟
    ConstantIdle,
}

/// Called after a task is queued; looper threads use it to wake up
pub(crate) type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TaskKey {
    time: u64,
    seq: i64,
}

struct Queue {
    idle_state: IdleState,
    tasks: BTreeMap<TaskKey, Runnable>,
    next_seq: i64,
    front_seq: i64,
    executing: u32,
    associated_thread: ThreadId,
}

impl Queue {
    fn new(idle_state: IdleState) -> Self {
        Self {
            idle_state,
            tasks: BTreeMap::new(),
            next_seq: 0,
            front_seq: -1,
            executing: 0,
            associated_thread: thread::current().id(),
        }
    }

    fn push(&mut self, time: u64, runnable: Runnable) {
        let key = TaskKey {
            time,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.tasks.insert(key, runnable);
    }

    fn push_front(&mut self, runnable: Runnable) {
        let key = TaskKey {
            time: 0,
            seq: self.front_seq,
        };
        self.front_seq -= 1;
        self.tasks.insert(key, runnable);
    }

    fn on_associated_thread(&self) -> bool {
        thread::current().id() == self.associated_thread
    }
}

/// Deterministic task queue driven by the virtual clock
pub struct Scheduler {
    name: String,
    clock: Arc<VirtualClock>,
    initial_state: IdleState,
    max_flush_tasks: usize,
    queue: Mutex<Queue>,
    drain: ReentrantMutex<()>,
    waker: RwLock<Option<Waker>>,
    executed: AtomicU64,
}

impl Scheduler {
    /// 创建调度器
    ///
    /// # 参数
    /// - `name`: 调度器名称，用于日志
    /// - `clock`: 共享的虚拟时钟
    /// - `initial_state`: 初始状态，`reset()`也会恢复到这个状态
    ///
    /// 创建调度器的线程成为它的关联线程。
    pub fn new(name: impl Into<String>, clock: Arc<VirtualClock>, initial_state: IdleState) -> Self {
        Self {
            name: name.into(),
            clock,
            initial_state,
            max_flush_tasks: DEFAULT_MAX_FLUSH_TASKS,
            queue: Mutex::new(Queue::new(initial_state)),
            drain: ReentrantMutex::new(()),
            waker: RwLock::new(None),
            executed: AtomicU64::new(0),
        }
    }

    pub fn with_max_flush_tasks(mut self, max: usize) -> Self {
        self.max_flush_tasks = max.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// 当前虚拟时间（毫秒）
    pub fn current_time(&self) -> u64 {
        self.clock.uptime_millis()
    }

    pub fn idle_state(&self) -> IdleState {
        self.queue.lock().idle_state
    }

    pub fn is_paused(&self) -> bool {
        self.idle_state() == IdleState::Paused
    }

    /// 切换空闲状态
    ///
    /// 切换到`Unpaused`时执行已到期的任务；切换到`ConstantIdle`时执行
    /// 全部任务。
    pub fn set_idle_state(&self, state: IdleState) {
        let previous = std::mem::replace(&mut self.queue.lock().idle_state, state);
        if previous != state {
            log::debug!("Scheduler {}: {:?} -> {:?}", self.name, previous, state);
        }
        match state {
            IdleState::Paused => {}
            IdleState::Unpaused => {
                self.advance_by(Duration::ZERO);
            }
            IdleState::ConstantIdle => {
                self.advance_to_last_posted_runnable();
            }
        }
    }

    pub fn pause(&self) {
        self.set_idle_state(IdleState::Paused);
    }

    pub fn unpause(&self) {
        self.set_idle_state(IdleState::Unpaused);
    }

    pub fn idle_constantly(&self, constantly: bool) {
        self.set_idle_state(if constantly {
            IdleState::ConstantIdle
        } else {
            IdleState::Unpaused
        });
    }

    pub fn post(&self, runnable: Runnable) {
        self.post_delayed(runnable, Duration::ZERO);
    }

    /// 提交一个在`delay`之后到期的任务
    pub fn post_delayed(&self, runnable: Runnable, delay: Duration) {
        let time = self.current_time().saturating_add(duration_millis(delay));
        self.post_at_time(runnable, time);
    }

    /// 提交一个在绝对时间`time`（毫秒）到期的任务
    pub fn post_at_time(&self, runnable: Runnable, time: u64) {
        let now = self.current_time();
        let run_inline = {
            let mut queue = self.queue.lock();
            let inline = queue.executing == 0
                && queue.on_associated_thread()
                && match queue.idle_state {
                    IdleState::Paused => false,
                    IdleState::Unpaused => time <= now,
                    IdleState::ConstantIdle => true,
                };
            if !inline {
                queue.push(time, runnable.clone());
                log::trace!("Scheduler {}: queued task at {}ms ({} pending)", self.name, time, queue.tasks.len());
            }
            inline
        };

        if run_inline {
            self.run_inline(runnable, time);
        } else {
            self.wake();
        }
    }

    /// 提交到队首，排在所有已排队的任务之前
    pub fn post_at_front_of_queue(&self, runnable: Runnable) {
        let run_inline = {
            let mut queue = self.queue.lock();
            let inline = queue.executing == 0
                && queue.on_associated_thread()
                && queue.idle_state != IdleState::Paused;
            if !inline {
                queue.push_front(runnable.clone());
            }
            inline
        };

        if run_inline {
            let now = self.current_time();
            self.run_inline(runnable, now);
        } else {
            self.wake();
        }
    }

    /// 移除所有与`runnable`相同的待执行任务，返回移除的数量
    ///
    /// 对已经执行过或从未提交过的任务调用是安全的。
    pub fn remove(&self, runnable: &Runnable) -> usize {
        let mut queue = self.queue.lock();
        let before = queue.tasks.len();
        queue.tasks.retain(|_, task| !task.ptr_eq(runnable));
        before - queue.tasks.len()
    }

    pub fn contains(&self, runnable: &Runnable) -> bool {
        self.queue.lock().tasks.values().any(|task| task.ptr_eq(runnable))
    }

    /// 执行最早的一个任务，无论它是否到期；必要时把时钟推进到它的计划时间
    pub fn run_one_task(&self) -> bool {
        let _drain = self.drain.lock();
        let Some((key, runnable)) = self.queue.lock().tasks.pop_first() else {
            return false;
        };
        self.clock.advance_to(key.time);
        self.execute(&runnable);
        true
    }

    /// 推进时钟到`end`并按时间顺序执行所有到期任务，返回执行的任务数
    ///
    /// `end`早于当前时间时什么也不做。
    pub fn advance_to(&self, end: u64) -> usize {
        let _drain = self.drain.lock();
        if end < self.current_time() {
            return 0;
        }
        let mut ran = 0;
        while let Some((key, runnable)) = self.pop_due(end) {
            self.clock.advance_to(key.time);
            self.execute(&runnable);
            ran += 1;
        }
        self.clock.advance_to(end);
        ran
    }

    pub fn advance_by(&self, duration: Duration) -> usize {
        self.advance_to(self.current_time().saturating_add(duration_millis(duration)))
    }

    /// 执行当前已到期的任务
    pub fn idle(&self) -> usize {
        self.advance_by(Duration::ZERO)
    }

    /// 执行`duration`之内到期的任务
    pub fn idle_for(&self, duration: Duration) -> usize {
        self.advance_by(duration)
    }

    pub fn advance_to_next_posted_runnable(&self) -> usize {
        match self.next_task_time() {
            Some(time) => self.advance_to(time.max(self.current_time())),
            None => 0,
        }
    }

    pub fn advance_to_last_posted_runnable(&self) -> usize {
        match self.last_task_time() {
            Some(time) => self.advance_to(time.max(self.current_time())),
            None => 0,
        }
    }

    /// 反复执行最早的任务直到队列为空
    ///
    /// 任务可以继续提交任务。为了防止自我重复提交的任务无限循环，
    /// 最多执行`max_flush_tasks`个任务。
    pub fn flush(&self) -> usize {
        let _drain = self.drain.lock();
        let mut ran = 0;
        while ran < self.max_flush_tasks {
            if !self.run_one_task() {
                return ran;
            }
            ran += 1;
        }
        log::warn!(
            "Scheduler {}: flush stopped after {} tasks with {} still pending",
            self.name,
            ran,
            self.size()
        );
        ran
    }

    pub fn size(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn next_task_time(&self) -> Option<u64> {
        self.queue.lock().tasks.first_key_value().map(|(key, _)| key.time)
    }

    pub fn last_task_time(&self) -> Option<u64> {
        self.queue.lock().tasks.last_key_value().map(|(key, _)| key.time)
    }

    /// 是否有已到期的任务
    pub fn are_any_runnable(&self) -> bool {
        self.next_task_time()
            .is_some_and(|time| time <= self.current_time())
    }

    /// 已执行的任务总数
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn associated_thread(&self) -> ThreadId {
        self.queue.lock().associated_thread
    }

    pub fn set_associated_thread(&self, thread: ThreadId) {
        self.queue.lock().associated_thread = thread;
    }

    /// 清空队列并恢复初始状态
    pub fn reset(&self) {
        let mut queue = self.queue.lock();
        let dropped = queue.tasks.len();
        let thread = queue.associated_thread;
        *queue = Queue::new(self.initial_state);
        queue.associated_thread = thread;
        if dropped > 0 {
            log::debug!("Scheduler {}: reset dropped {} pending tasks", self.name, dropped);
        }
    }

    pub(crate) fn set_waker(&self, waker: Option<Waker>) {
        *self.waker.write() = waker;
    }

    fn wake(&self) {
        let waker = self.waker.read().clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    fn pop_due(&self, end: u64) -> Option<(TaskKey, Runnable)> {
        let mut queue = self.queue.lock();
        let (key, _) = queue.tasks.first_key_value()?;
        if key.time > end {
            return None;
        }
        queue.tasks.pop_first()
    }

    fn run_inline(&self, runnable: Runnable, time: u64) {
        let _drain = self.drain.lock();
        self.clock.advance_to(time);
        self.execute(&runnable);
        // 任务执行期间提交的任务
        match self.idle_state() {
            IdleState::Paused => {}
            IdleState::Unpaused => {
                self.idle();
            }
            IdleState::ConstantIdle => {
                self.advance_to_last_posted_runnable();
            }
        }
    }

    fn execute(&self, runnable: &Runnable) {
        self.queue.lock().executing += 1;
        let _guard = ExecutingGuard { queue: &self.queue };
        runnable.run();
        self.executed.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("idle_state", &queue.idle_state)
            .field("pending", &queue.tasks.len())
            .field("executing", &queue.executing)
            .finish()
    }
}

struct ExecutingGuard<'a> {
    queue: &'a Mutex<Queue>,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.queue.lock();
        queue.executing = queue.executing.saturating_sub(1);
    }
}
