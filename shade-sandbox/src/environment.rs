// 沙箱环境（Environment）
//
// 注册入口：类路径、影子提供者、按名称启用的影子目录以及基础配置。
// 一个环境可以创建任意多个沙箱，每个沙箱由基础配置与测试级覆盖项
// 合并得到的配置决定。

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use shade_common::SandboxConfig;
use shade_core::{ClassDefinition, ClassPath, ShadowMap, ShadowMapBuilder, ShadowMapping, ShadowProvider};
use shade_error::{ConfigError, ShadeResult};

/// Everything a sandbox is built from
pub struct Environment {
    class_path: Arc<ClassPath>,
    providers: Vec<Arc<dyn ShadowProvider>>,
    named_shadows: BTreeMap<String, Vec<ShadowMapping>>,
    base_config: SandboxConfig,
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn class_path(&self) -> &Arc<ClassPath> {
        &self.class_path
    }

    pub fn base_config(&self) -> &SandboxConfig {
        &self.base_config
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name())
    }

    pub fn named_shadows(&self) -> impl Iterator<Item = &str> {
        self.named_shadows.keys().map(String::as_str)
    }

    /// 构建`config`对应的影子注册表
    ///
    /// 所有提供者的映射总是注册；`config.shadows`中列出的影子从目录中查找，
    /// 未知的名称是配置错误。
    pub fn shadow_map_for(&self, config: &SandboxConfig) -> ShadeResult<ShadowMap> {
        let mut builder = ShadowMapBuilder::new();
        for provider in &self.providers {
            builder = builder.add_provider(provider.as_ref());
        }
        for name in &config.shadows {
            let mappings = self
                .named_shadows
                .get(name)
                .ok_or_else(|| ConfigError::UnknownShadow(name.clone()))?;
            builder = builder.add_all(mappings.iter().cloned());
        }
        builder.build()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("classes", &self.class_path.len())
            .field("providers", &self.provider_names().collect::<Vec<_>>())
            .field("named_shadows", &self.named_shadows.len())
            .field("base_config", &self.base_config)
            .finish()
    }
}

/// Builder for [`Environment`]
#[derive(Default)]
pub struct EnvironmentBuilder {
    class_path: ClassPath,
    providers: Vec<Arc<dyn ShadowProvider>>,
    named_shadows: BTreeMap<String, Vec<ShadowMapping>>,
    base_config: SandboxConfig,
}

impl EnvironmentBuilder {
    /// 在类路径中定义一个类
    pub fn define(mut self, definition: ClassDefinition) -> ShadeResult<Self> {
        self.class_path.define(definition)?;
        Ok(self)
    }

    pub fn define_all(mut self, definitions: impl IntoIterator<Item = ClassDefinition>) -> ShadeResult<Self> {
        for definition in definitions {
            self.class_path.define(definition)?;
        }
        Ok(self)
    }

    /// 注册一个总是启用的影子提供者
    pub fn provider(mut self, provider: impl ShadowProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// 注册一个按名称启用的影子（`shadows`配置项）
    pub fn named_shadow(mut self, name: impl Into<String>, mapping: ShadowMapping) -> Self {
        self.named_shadows.entry(name.into()).or_default().push(mapping);
        self
    }

    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.base_config = config;
        self
    }

    /// 从文件加载基础配置，然后应用环境变量
    pub fn config_file(mut self, path: &Path) -> ShadeResult<Self> {
        self.base_config = SandboxConfig::load_file(path)?.apply_env()?;
        Ok(self)
    }

    /// 使用自定义查找函数在当前基础配置上应用环境变量
    pub fn env_with<F>(mut self, lookup: F) -> ShadeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.base_config = self.base_config.apply_env_with(lookup)?;
        Ok(self)
    }

    pub fn build(self) -> ShadeResult<Environment> {
        self.base_config.validate()?;
        log::debug!(
            "Environment: {} classes, {} providers, {} named shadows",
            self.class_path.len(),
            self.providers.len(),
            self.named_shadows.len()
        );
        Ok(Environment {
            class_path: Arc::new(self.class_path),
            providers: self.providers,
            named_shadows: self.named_shadows,
            base_config: self.base_config,
        })
    }
}
