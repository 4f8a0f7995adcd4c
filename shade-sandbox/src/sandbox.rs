// 沙箱（Sandbox）
//
// 一个沙箱 = 一个运行时代（插桩类加载器、影子注册表、对象影子表）
// + 一组调度器 + 一个虚拟时钟。同一沙箱中的测试串行执行，每个测试结束后
// （包括测试体panic时）都会重置运行时状态、调度器和时钟。

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shade_common::SandboxConfig;
use shade_common::utils::IdGenerator;
use shade_core::class::SYSTEM_CLASS;
use shade_core::{InstrumentationConfiguration, Runtime, Value};
use shade_error::{ShadeResult, utils};
use shade_scheduler::{Handler, Schedulers, VirtualClock};

use crate::environment::Environment;

static SANDBOX_IDS: IdGenerator = IdGenerator::new(1);

/// An isolated runtime generation with its schedulers and clock
pub struct Sandbox {
    id: u64,
    config: SandboxConfig,
    runtime: Runtime,
    schedulers: Arc<Schedulers>,
    clock: Arc<VirtualClock>,
    run_lock: Mutex<()>,
    tests_run: AtomicU64,
}

impl Sandbox {
    /// 创建沙箱
    ///
    /// # 参数
    /// - `env`: 类路径与影子来源
    /// - `config`: 已合并的沙箱配置
    ///
    /// 配置无效、影子名称未知、影子重叠或影子目标类在该SDK下无法加载时
    /// 返回配置错误，此时不会运行任何测试。
    pub fn new(env: &Environment, config: SandboxConfig) -> ShadeResult<Self> {
        config.validate()?;
        let shadow_map = env.shadow_map_for(&config)?;

        let mut instrumentation = InstrumentationConfiguration::android_default().to_builder();
        for package in &config.instrumented_packages {
            instrumentation = instrumentation.add_instrumented_package(package.clone());
        }
        for class_name in &config.do_not_instrument {
            instrumentation = instrumentation.do_not_instrument_class(class_name.clone());
        }

        let clock = Arc::new(VirtualClock::new());
        let schedulers = Arc::new(Schedulers::new(
            Arc::clone(&clock),
            config.looper_mode,
            config.max_flush_tasks,
        ));

        let millis_clock = Arc::clone(&clock);
        let nanos_clock = Arc::clone(&clock);
        let runtime = Runtime::builder(Arc::clone(env.class_path()))
            .sdk(config.sdk)
            .shadow_map(shadow_map)
            .instrumentation(instrumentation.build())
            .interceptor(SYSTEM_CLASS, "currentTimeMillis", move |_| {
                Ok(Value::Long(i64::try_from(millis_clock.current_time_millis()).unwrap_or(i64::MAX)))
            })
            .interceptor(SYSTEM_CLASS, "nanoTime", move |_| {
                Ok(Value::Long(i64::try_from(nanos_clock.nano_time()).unwrap_or(i64::MAX)))
            })
            .service(Arc::clone(&schedulers))
            .service(Arc::clone(&clock))
            .service(Arc::new(config.clone()))
            .build()?;

        let id = SANDBOX_IDS.next_id();
        log::info!(
            "Sandbox {} created: SDK {}, {} looper mode, generation {}",
            id,
            config.sdk,
            config.looper_mode,
            runtime.generation()
        );

        Ok(Self {
            id,
            config,
            runtime,
            schedulers,
            clock,
            run_lock: Mutex::new(()),
            tests_run: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn sdk(&self) -> i32 {
        self.config.sdk
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn schedulers(&self) -> &Arc<Schedulers> {
        &self.schedulers
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// Number of tests that have run in this sandbox
    pub fn tests_run(&self) -> u64 {
        self.tests_run.load(Ordering::Relaxed)
    }

    /// 在沙箱中运行一个测试
    ///
    /// 同一沙箱的测试串行执行，不能嵌套调用。测试体返回后执行重置，
    /// 重置失败（例如某个resetter抛出异常）时返回错误。测试体panic时
    /// 同样会重置，然后继续传播panic。
    pub fn run_test<F, R>(&self, name: &str, body: F) -> ShadeResult<R>
    where
        F: FnOnce(&TestContext<'_>) -> R,
    {
        let _serial = self.run_lock.lock();
        self.schedulers.bind_to_current_thread();
        log::debug!("Sandbox {}: running {}", self.id, name);

        let mut guard = ResetGuard {
            sandbox: self,
            test: name,
            armed: true,
        };
        let ctx = TestContext { sandbox: self, name };
        let result = body(&ctx);
        guard.finish()?;
        Ok(result)
    }

    fn reset_after_test(&self, test: &str) -> ShadeResult<()> {
        self.tests_run.fetch_add(1, Ordering::Relaxed);
        self.schedulers.reset();
        let result = self.runtime.reset();
        log::debug!("Sandbox {}: reset after {}", self.id, test);
        result
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("sdk", &self.config.sdk)
            .field("looper_mode", &self.config.looper_mode)
            .field("generation", &self.runtime.generation())
            .field("tests_run", &self.tests_run())
            .finish()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        log::info!("Sandbox {} torn down after {} tests", self.id, self.tests_run());
    }
}

struct ResetGuard<'a> {
    sandbox: &'a Sandbox,
    test: &'a str,
    armed: bool,
}

impl ResetGuard<'_> {
    fn finish(&mut self) -> ShadeResult<()> {
        self.armed = false;
        self.sandbox.reset_after_test(self.test)
    }
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!("Sandbox {}: {} panicked, resetting", self.sandbox.id, self.test);
        if let Err(e) = self.sandbox.reset_after_test(self.test) {
            utils::log_error(&format!("Sandbox {}: reset after {}", self.sandbox.id, self.test), &e);
        }
    }
}

/// What a test body sees of its sandbox
pub struct TestContext<'a> {
    sandbox: &'a Sandbox,
    name: &'a str,
}

impl<'a> TestContext<'a> {
    pub fn test_name(&self) -> &str {
        self.name
    }

    pub fn sandbox(&self) -> &'a Sandbox {
        self.sandbox
    }

    pub fn runtime(&self) -> &'a Runtime {
        &self.sandbox.runtime
    }

    pub fn schedulers(&self) -> &'a Schedulers {
        &self.sandbox.schedulers
    }

    pub fn clock(&self) -> &'a VirtualClock {
        &self.sandbox.clock
    }

    pub fn sdk(&self) -> i32 {
        self.sandbox.sdk()
    }

    pub fn main_handler(&self) -> Handler {
        self.sandbox.schedulers.main_handler()
    }

    /// A typed runtime service
    pub fn service<T: std::any::Any + Send + Sync>(&self) -> ShadeResult<Arc<T>> {
        self.sandbox.runtime.service::<T>()
    }
}

impl fmt::Debug for TestContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("test", &self.name)
            .field("sandbox", &self.sandbox.id)
            .finish()
    }
}

