// 沙箱配置管理（Sandbox Configuration）
//
// 配置按以下顺序层叠（后者覆盖前者）：
// - 内置默认值
// - 配置文件（shade.toml 或 shade.properties）
// - 环境变量（SHADE_SDK、SHADE_LOOPER_MODE）
// - 每个测试的覆盖项（ConfigOverrides）

use serde::{Deserialize, Serialize};
use shade_error::ConfigError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// 支持的最低SDK级别
pub const MIN_SDK: i32 = 21;
/// 支持的最高SDK级别
pub const MAX_SDK: i32 = 35;
/// 默认SDK级别
pub const DEFAULT_SDK: i32 = 34;

/// SDK级别环境变量
pub const SDK_ENV: &str = "SHADE_SDK";
/// Looper模式环境变量
pub const LOOPER_MODE_ENV: &str = "SHADE_LOOPER_MODE";

/// Looper模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LooperMode {
    /// 主线程队列默认暂停，必须由测试显式驱动
    #[default]
    Paused,
    /// 旧模式：前台和后台调度器默认不暂停，投递的任务立即执行
    Legacy,
}

impl FromStr for LooperMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paused" => Ok(LooperMode::Paused),
            "legacy" => Ok(LooperMode::Legacy),
            other => Err(ConfigError::InvalidValue(
                "looper_mode".to_string(),
                other.to_string(),
            )),
        }
    }
}

impl fmt::Display for LooperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LooperMode::Paused => write!(f, "PAUSED"),
            LooperMode::Legacy => write!(f, "LEGACY"),
        }
    }
}

/// 沙箱复用策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxReuse {
    /// 配置相同的测试共享同一个沙箱（每个测试结束后重置状态）
    #[default]
    PerConfig,
    /// 每个测试都使用全新的沙箱
    Never,
}

impl FromStr for SandboxReuse {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_config" | "perconfig" | "always" => Ok(SandboxReuse::PerConfig),
            "never" => Ok(SandboxReuse::Never),
            other => Err(ConfigError::InvalidValue(
                "reuse".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// 沙箱配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// 目标SDK级别
    pub sdk: i32,
    /// Looper模式
    pub looper_mode: LooperMode,
    /// 额外注册的影子类名称
    pub shadows: Vec<String>,
    /// 额外需要插桩的包前缀
    pub instrumented_packages: Vec<String>,
    /// 不插桩的类
    pub do_not_instrument: Vec<String>,
    /// 沙箱复用策略
    pub reuse: SandboxReuse,
    /// flush时最多执行的任务数（防止自我重投递的任务无限循环）
    pub max_flush_tasks: usize,
    /// 沙箱缓存容量
    pub sandbox_cache_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            sdk: DEFAULT_SDK,
            looper_mode: LooperMode::default(),
            shadows: Vec::new(),
            instrumented_packages: Vec::new(),
            do_not_instrument: Vec::new(),
            reuse: SandboxReuse::default(),
            max_flush_tasks: 100_000,
            sandbox_cache_size: 8,
        }
    }
}

impl SandboxConfig {
    /// 从TOML文本解析配置
    ///
    /// # 示例
    /// ```
    /// use shade_common::{LooperMode, SandboxConfig};
    ///
    /// let config = SandboxConfig::from_toml_str("sdk = 29\nlooper_mode = \"legacy\"").unwrap();
    /// assert_eq!(config.sdk, 29);
    /// assert_eq!(config.looper_mode, LooperMode::Legacy);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SandboxConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从`key=value`格式的properties文本解析配置
    ///
    /// 支持的键：`sdk`、`looperMode`、`shadows`、`instrumentedPackages`、
    /// `doNotInstrument`、`reuse`、`maxFlushTasks`、`sandboxCacheSize`。
    /// 列表值以逗号或空白分隔，`#`和`!`开头的行是注释。
    pub fn from_properties_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = SandboxConfig::default();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError(format!(
                    "line {}: expected key=value",
                    line_no + 1
                )));
            };
            config.apply_property(key.trim(), value.trim())?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "sdk" => self.sdk = parse_number(key, value)?,
            "looperMode" | "looper_mode" => self.looper_mode = value.parse()?,
            "shadows" => self.shadows.extend(split_list(value)),
            "instrumentedPackages" | "instrumented_packages" => {
                self.instrumented_packages.extend(split_list(value))
            }
            "doNotInstrument" | "do_not_instrument" => {
                self.do_not_instrument.extend(split_list(value))
            }
            "reuse" => self.reuse = value.parse()?,
            "maxFlushTasks" | "max_flush_tasks" => self.max_flush_tasks = parse_number(key, value)?,
            "sandboxCacheSize" | "sandbox_cache_size" => {
                self.sandbox_cache_size = parse_number(key, value)?
            }
            other => {
                return Err(ConfigError::InvalidValue(
                    other.to_string(),
                    value.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// 从文件加载配置，按扩展名选择格式
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.display().to_string()),
            _ => ConfigError::ParseError(format!("{}: {}", path.display(), e)),
        })?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("properties") => Self::from_properties_str(&text)?,
            _ => Self::from_toml_str(&text)?,
        };
        log::debug!("Loaded sandbox config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// 应用进程环境变量
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// 使用自定义查找函数应用环境变量（便于测试）
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sdk) = lookup(SDK_ENV) {
            self.sdk = parse_number(SDK_ENV, &sdk)?;
        }
        if let Some(mode) = lookup(LOOPER_MODE_ENV) {
            self.looper_mode = mode.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// 合并测试级覆盖项，返回新的配置
    pub fn merge(&self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut merged = self.clone();
        if let Some(sdk) = overrides.sdk {
            merged.sdk = sdk;
        }
        if let Some(mode) = overrides.looper_mode {
            merged.looper_mode = mode;
        }
        if let Some(reuse) = overrides.reuse {
            merged.reuse = reuse;
        }
        for shadow in &overrides.shadows {
            if !merged.shadows.contains(shadow) {
                merged.shadows.push(shadow.clone());
            }
        }
        for package in &overrides.instrumented_packages {
            if !merged.instrumented_packages.contains(package) {
                merged.instrumented_packages.push(package.clone());
            }
        }
        merged.validate()?;
        Ok(merged)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SDK..=MAX_SDK).contains(&self.sdk) {
            return Err(ConfigError::UnsupportedSdk(self.sdk, MIN_SDK, MAX_SDK));
        }
        if self.max_flush_tasks == 0 {
            return Err(ConfigError::InvalidValue(
                "max_flush_tasks".to_string(),
                "0".to_string(),
            ));
        }
        if self.sandbox_cache_size == 0 {
            return Err(ConfigError::InvalidValue(
                "sandbox_cache_size".to_string(),
                "0".to_string(),
            ));
        }
        Ok(())
    }

    /// 沙箱缓存键：决定两个配置能否共享同一个沙箱
    pub fn sandbox_key(&self) -> String {
        let mut shadows = self.shadows.clone();
        shadows.sort();
        let mut packages = self.instrumented_packages.clone();
        packages.sort();
        let mut excluded = self.do_not_instrument.clone();
        excluded.sort();
        format!(
            "sdk={};looper={};shadows={};packages={};excluded={}",
            self.sdk,
            self.looper_mode,
            shadows.join(","),
            packages.join(","),
            excluded.join(",")
        )
    }
}

/// 测试级配置覆盖项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub sdk: Option<i32>,
    pub looper_mode: Option<LooperMode>,
    pub reuse: Option<SandboxReuse>,
    pub shadows: Vec<String>,
    pub instrumented_packages: Vec<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sdk(mut self, sdk: i32) -> Self {
        self.sdk = Some(sdk);
        self
    }

    pub fn looper_mode(mut self, mode: LooperMode) -> Self {
        self.looper_mode = Some(mode);
        self
    }

    pub fn reuse(mut self, reuse: SandboxReuse) -> Self {
        self.reuse = Some(reuse);
        self
    }

    pub fn shadow(mut self, name: impl Into<String>) -> Self {
        self.shadows.push(name.into());
        self
    }

    pub fn instrument_package(mut self, package: impl Into<String>) -> Self {
        self.instrumented_packages.push(package.into());
        self
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.sdk, DEFAULT_SDK);
        assert_eq!(config.looper_mode, LooperMode::Paused);
        assert_eq!(config.reuse, SandboxReuse::PerConfig);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_properties_parsing() {
        let text = "# comment\nsdk=28\nlooperMode=LEGACY\nshadows=ShadowA, ShadowB\nreuse=never\n";
        let config = SandboxConfig::from_properties_str(text).expect("valid properties");

        assert_eq!(config.sdk, 28);
        assert_eq!(config.looper_mode, LooperMode::Legacy);
        assert_eq!(config.shadows, vec!["ShadowA", "ShadowB"]);
        assert_eq!(config.reuse, SandboxReuse::Never);
    }

    #[test]
    fn test_properties_rejects_unknown_key() {
        let result = SandboxConfig::from_properties_str("colour=blue");
        assert!(matches!(result, Err(ConfigError::InvalidValue(..))));
    }

    #[test]
    fn test_properties_rejects_missing_equals() {
        let result = SandboxConfig::from_properties_str("sdk 28");
        assert!(matches!(result, Err(ConfigError::ParseError(..))));
    }

    #[test]
    fn test_toml_parsing() {
        let config = SandboxConfig::from_toml_str(
            "sdk = 30\nlooper_mode = \"paused\"\nshadows = [\"ShadowFoo\"]\n",
        )
        .expect("valid toml");
        assert_eq!(config.sdk, 30);
        assert_eq!(config.shadows, vec!["ShadowFoo"]);
        assert_eq!(config.max_flush_tasks, 100_000);
    }

    #[test]
    fn test_unsupported_sdk() {
        let result = SandboxConfig::from_toml_str("sdk = 3");
        assert_eq!(result, Err(ConfigError::UnsupportedSdk(3, MIN_SDK, MAX_SDK)));
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [(SDK_ENV, "26"), (LOOPER_MODE_ENV, "legacy")].into();
        let config = SandboxConfig::default()
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()))
            .expect("valid env");
        assert_eq!(config.sdk, 26);
        assert_eq!(config.looper_mode, LooperMode::Legacy);
    }

    #[test]
    fn test_merge_overrides() {
        let base = SandboxConfig {
            shadows: vec!["ShadowA".to_string()],
            ..Default::default()
        };
        let merged = base
            .merge(&ConfigOverrides::new().sdk(29).shadow("ShadowA").shadow("ShadowB"))
            .expect("valid merge");
        assert_eq!(merged.sdk, 29);
        assert_eq!(merged.shadows, vec!["ShadowA", "ShadowB"]);

        let bad = base.merge(&ConfigOverrides::new().sdk(99));
        assert!(bad.is_err());
    }

    #[test]
    fn test_sandbox_key_ignores_order() {
        let a = SandboxConfig {
            shadows: vec!["B".to_string(), "A".to_string()],
            ..Default::default()
        };
        let b = SandboxConfig {
            shadows: vec!["A".to_string(), "B".to_string()],
            ..Default::default()
        };
        assert_eq!(a.sandbox_key(), b.sandbox_key());

        let c = SandboxConfig {
            sdk: 29,
            ..Default::default()
        };
        assert_ne!(a.sandbox_key(), c.sandbox_key());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shade.properties");
        std::fs::write(&path, "sdk=31\n").expect("write config");
        let config = SandboxConfig::load_file(&path).expect("load");
        assert_eq!(config.sdk, 31);

        let missing = SandboxConfig::load_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound(..))));
    }
}
