//! shade调度库
//!
//! 虚拟时钟、调度器、Looper与Handler。
//!
//! Every sandbox owns one [`VirtualClock`] shared by a foreground scheduler
//! (the main looper), a background scheduler and any number of named
//! [`LooperThread`]s. Time only moves when a test drives it.

pub mod clock;
pub mod looper;
pub mod scheduler;
pub mod schedulers;

// 重新导出主要类型
pub use clock::{DEFAULT_START_MILLIS, VirtualClock};
pub use looper::{Handler, Looper, LooperThread};
pub use scheduler::{DEFAULT_MAX_FLUSH_TASKS, IdleState, Runnable, Scheduler};
pub use schedulers::{Schedulers, initial_idle_state};
