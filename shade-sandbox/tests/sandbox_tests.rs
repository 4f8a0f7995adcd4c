//! Sandbox lifecycle and reuse tests

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shade_common::{ConfigOverrides, LooperMode, SandboxConfig, SandboxReuse};
use shade_core::class::SYSTEM_CLASS;
use shade_core::{ApiRange, ClassDefinition, ShadowClass, ShadowMapping, Throwable, TypeDesc, Value};
use shade_error::{ConfigError, ShadeError};
use shade_sandbox::{Environment, EnvironmentBuilder, Sandbox, SandboxManager};
use shade_scheduler::{Runnable, Schedulers, VirtualClock};

const COUNTER: &str = "android.os.Counter";
const NEWER: &str = "android.media.Newer";

#[derive(Default)]
struct ShadowCounter;

#[derive(Default)]
struct ShadowNewer;

fn counter_class() -> ClassDefinition {
    ClassDefinition::builder(COUNTER)
        .static_field("value", TypeDesc::Int, Value::Int(0))
        .static_method("increment", &[], TypeDesc::Int, |inv| {
            let value = inv.get_static("value")?.as_int().unwrap_or(0) + 1;
            inv.set_static("value", value.into())?;
            Ok(value.into())
        })
        .build()
}

fn base_builder() -> EnvironmentBuilder {
    Environment::builder()
        .define(counter_class())
        .and_then(|b| b.define(ClassDefinition::builder(NEWER).since(30).build()))
        .expect("classes")
        .named_shadow(
            "ShadowNewer",
            ShadowMapping::shadow(NEWER, ShadowClass::builder::<ShadowNewer>("ShadowNewer").build()),
        )
}

fn environment() -> Environment {
    base_builder().build().expect("environment")
}

#[test]
fn test_unknown_named_shadow_is_configuration_error() {
    let env = environment();
    let config = SandboxConfig {
        shadows: vec!["ShadowNowhere".to_string()],
        ..SandboxConfig::default()
    };
    let err = Sandbox::new(&env, config).expect_err("unknown shadow");
    assert!(err.is_configuration_error());
    assert!(matches!(
        err,
        ShadeError::Configuration {
            source: ConfigError::UnknownShadow(_),
            ..
        }
    ));
}

#[test]
fn test_shadow_target_missing_at_sdk() {
    let env = environment();
    let config = SandboxConfig {
        sdk: 29,
        shadows: vec!["ShadowNewer".to_string()],
        ..SandboxConfig::default()
    };
    match Sandbox::new(&env, config) {
        Err(ShadeError::Configuration {
            source: ConfigError::MissingShadowTarget(class, sdk),
            ..
        }) => {
            assert_eq!(class, NEWER);
            assert_eq!(sdk, 29);
        }
        other => panic!("unexpected {:?}", other.map(|s| s.id())),
    }

    let config = SandboxConfig {
        sdk: 30,
        shadows: vec!["ShadowNewer".to_string()],
        ..SandboxConfig::default()
    };
    assert!(Sandbox::new(&env, config).is_ok());
}

#[test]
fn test_services_installed() {
    let sandbox = Sandbox::new(&environment(), SandboxConfig::default()).expect("sandbox");
    sandbox
        .run_test("services", |ctx| {
            let schedulers = ctx.service::<Schedulers>().expect("schedulers");
            assert!(std::ptr::eq(schedulers.as_ref(), ctx.schedulers()));
            let clock = ctx.service::<VirtualClock>().expect("clock");
            assert!(std::ptr::eq(clock.as_ref(), ctx.clock()));
            assert_eq!(ctx.service::<SandboxConfig>().expect("config").sdk, ctx.sdk());
            assert_eq!(ctx.test_name(), "services");
        })
        .expect("run");
}

#[test]
fn test_system_clock_interceptors_follow_virtual_clock() {
    let sandbox = Sandbox::new(&environment(), SandboxConfig::default()).expect("sandbox");
    sandbox
        .run_test("time", |ctx| {
            let rt = ctx.runtime();
            assert_eq!(
                rt.invoke_static(SYSTEM_CLASS, "currentTimeMillis", vec![]).expect("millis"),
                Value::Long(100)
            );
            ctx.schedulers().idle_main_looper_for(Duration::from_secs(1));
            assert_eq!(
                rt.invoke_static(SYSTEM_CLASS, "currentTimeMillis", vec![]).expect("millis"),
                Value::Long(1_100)
            );
            assert_eq!(
                rt.invoke_static(SYSTEM_CLASS, "nanoTime", vec![]).expect("nanos"),
                Value::Long(1_100_000_000)
            );
        })
        .expect("run");
}

#[test]
fn test_state_does_not_leak_between_tests() {
    let sandbox = Sandbox::new(&environment(), SandboxConfig::default()).expect("sandbox");
    let ran = Arc::new(AtomicUsize::new(0));

    let in_task = Arc::clone(&ran);
    sandbox
        .run_test("first", |ctx| {
            let rt = ctx.runtime();
            assert_eq!(rt.invoke_static(COUNTER, "increment", vec![]).expect("inc"), Value::Int(1));
            assert_eq!(rt.invoke_static(COUNTER, "increment", vec![]).expect("inc"), Value::Int(2));
            ctx.main_handler().post_delayed(
                Runnable::new(move || {
                    in_task.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(500),
            );
            ctx.schedulers().idle_main_looper_for(Duration::from_millis(100));
        })
        .expect("first");

    sandbox
        .run_test("second", |ctx| {
            assert_eq!(ctx.runtime().get_static(COUNTER, "value").expect("value"), Value::Int(0));
            assert!(ctx.schedulers().foreground().is_empty());
            assert_eq!(ctx.clock().uptime_millis(), 100);
        })
        .expect("second");

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(sandbox.tests_run(), 2);
}

#[test]
fn test_reset_runs_when_test_panics() {
    let sandbox = Sandbox::new(&environment(), SandboxConfig::default()).expect("sandbox");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        sandbox.run_test("boom", |ctx| {
            ctx.runtime()
                .set_static(COUNTER, "value", Value::Int(77))
                .expect("set");
            ctx.clock().advance_by(Duration::from_secs(5));
            panic!("test body failed");
        })
    }));
    assert!(outcome.is_err());

    sandbox
        .run_test("after", |ctx| {
            assert_eq!(ctx.runtime().get_static(COUNTER, "value").expect("value"), Value::Int(0));
            assert_eq!(ctx.clock().uptime_millis(), 100);
        })
        .expect("after");
}

#[test]
fn test_failing_resetter_reported_after_test() {
    let shadow = ShadowClass::builder::<ShadowCounter>("ShadowCounter")
        .resetter(|_| Err(Throwable::illegal_state("reset failed").into()))
        .build();
    let env = base_builder()
        .named_shadow("ShadowCounter", ShadowMapping::shadow(COUNTER, shadow))
        .build()
        .expect("env");
    let config = SandboxConfig {
        shadows: vec!["ShadowCounter".to_string()],
        ..SandboxConfig::default()
    };
    let sandbox = Sandbox::new(&env, config).expect("sandbox");

    assert!(sandbox.run_test("t", |_| ()).is_err());
    // the sandbox stays usable
    assert!(sandbox.run_test("t2", |ctx| ctx.sdk()).is_err());
    assert_eq!(sandbox.tests_run(), 2);
}

#[test]
fn test_tests_on_other_threads_drive_main_looper() {
    let sandbox = Arc::new(Sandbox::new(&environment(), SandboxConfig::default()).expect("sandbox"));
    let worker = Arc::clone(&sandbox);
    std::thread::spawn(move || {
        worker
            .run_test("on another thread", |ctx| {
                assert!(ctx.schedulers().main_looper().is_current_thread());
            })
            .expect("run");
    })
    .join()
    .expect("join");
}

#[test]
fn test_manager_reuses_sandbox_per_config() {
    let manager = SandboxManager::new(environment());
    let a = manager.sandbox_for(&ConfigOverrides::new()).expect("a");
    let b = manager.sandbox_for(&ConfigOverrides::new()).expect("b");
    assert!(Arc::ptr_eq(&a, &b));

    let c = manager.sandbox_for(&ConfigOverrides::new().sdk(28)).expect("c");
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(c.sdk(), 28);
    assert_ne!(a.runtime().generation(), c.runtime().generation());

    assert_eq!(manager.created(), 2);
    assert_eq!(manager.cached(), 2);
}

#[test]
fn test_manager_never_reuse_gives_fresh_sandbox() {
    let manager = SandboxManager::new(environment());
    let overrides = ConfigOverrides::new().reuse(SandboxReuse::Never);
    let a = manager.sandbox_for(&overrides).expect("a");
    let b = manager.sandbox_for(&overrides).expect("b");
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(manager.cached(), 0);
    assert_eq!(manager.created(), 2);
}

#[test]
fn test_manager_evicts_least_recently_used() {
    let config = SandboxConfig {
        sandbox_cache_size: 1,
        ..SandboxConfig::default()
    };
    let manager = SandboxManager::new(base_builder().config(config).build().expect("env"));

    let a = manager.sandbox_for(&ConfigOverrides::new()).expect("a");
    manager.sandbox_for(&ConfigOverrides::new().sdk(30)).expect("b");
    assert_eq!(manager.cached(), 1);

    let again = manager.sandbox_for(&ConfigOverrides::new()).expect("again");
    assert!(!Arc::ptr_eq(&a, &again));
    assert_eq!(manager.created(), 3);
}

#[test]
fn test_manager_run_applies_overrides() {
    let manager = SandboxManager::new(environment());
    let (sdk, paused) = manager
        .run(
            "legacy",
            &ConfigOverrides::new().sdk(31).looper_mode(LooperMode::Legacy),
            |ctx| (ctx.sdk(), ctx.schedulers().foreground().is_paused()),
        )
        .expect("run");
    assert_eq!(sdk, 31);
    assert!(!paused);

    let err = manager
        .run("bad", &ConfigOverrides::new().sdk(99), |_| ())
        .expect_err("unsupported sdk");
    assert!(err.is_configuration_error());
}

#[test]
fn test_environment_from_config_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".properties")
        .tempfile()
        .expect("tempfile");
    writeln!(file, "# per-project defaults").expect("write");
    writeln!(file, "sdk=33").expect("write");
    writeln!(file, "looperMode=legacy").expect("write");
    writeln!(file, "shadows=ShadowNewer").expect("write");

    let env = base_builder().config_file(file.path()).expect("config").build().expect("env");
    let config = env.base_config();
    assert_eq!(config.shadows, vec!["ShadowNewer".to_string()]);

    let sandbox = Sandbox::new(&env, config.clone()).expect("sandbox");
    assert!(sandbox.runtime().shadow_map().has_mapping(NEWER));
    let range = sandbox
        .runtime()
        .shadow_map()
        .lookup(NEWER, sandbox.sdk())
        .map(|m| m.api_range());
    assert_eq!(range, Some(ApiRange::ALL));
}
