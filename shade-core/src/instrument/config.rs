//! Instrumentation configuration
//!
//! Decides which classes the loader rewrites so that their calls route
//! through dispatch. Everything else is loaded as-is and runs its original
//! bodies directly.

use serde::{Deserialize, Serialize};
use shade_common::utils::in_package;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationConfiguration {
    instrumented_packages: BTreeSet<String>,
    instrumented_classes: BTreeSet<String>,
    excluded_packages: BTreeSet<String>,
    do_not_instrument: BTreeSet<String>,
}

impl InstrumentationConfiguration {
    pub fn builder() -> InstrumentationConfigurationBuilder {
        InstrumentationConfigurationBuilder::default()
    }

    /// The framework packages plus the usual JDK exclusions
    pub fn android_default() -> Self {
        Self::builder()
            .add_instrumented_package("android")
            .add_instrumented_package("com.android.internal")
            .add_instrumented_package("libcore")
            .add_instrumented_package("dalvik")
            .add_excluded_package("java")
            .add_excluded_package("javax")
            .add_excluded_package("jdk")
            .add_excluded_package("sun")
            .build()
    }

    /// Whether `class_name` is rewritten by the loader
    pub fn should_instrument(&self, class_name: &str) -> bool {
        if self.is_excluded(class_name) {
            return false;
        }
        self.instrumented_classes.contains(class_name)
            || self
                .instrumented_packages
                .iter()
                .any(|pkg| in_package(class_name, pkg))
    }

    /// Whether `class_name` must never be instrumented, even when shadowed
    pub fn is_excluded(&self, class_name: &str) -> bool {
        self.do_not_instrument.contains(class_name)
            || self
                .excluded_packages
                .iter()
                .any(|pkg| in_package(class_name, pkg))
    }

    pub fn instrumented_packages(&self) -> impl Iterator<Item = &str> {
        self.instrumented_packages.iter().map(String::as_str)
    }

    pub fn to_builder(&self) -> InstrumentationConfigurationBuilder {
        InstrumentationConfigurationBuilder {
            config: self.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct InstrumentationConfigurationBuilder {
    config: InstrumentationConfiguration,
}

impl InstrumentationConfigurationBuilder {
    pub fn add_instrumented_package(mut self, package: impl Into<String>) -> Self {
        self.config
            .instrumented_packages
            .insert(package.into().trim_end_matches('.').to_string());
        self
    }

    pub fn add_instrumented_class(mut self, class_name: impl Into<String>) -> Self {
        self.config.instrumented_classes.insert(class_name.into());
        self
    }

    pub fn add_excluded_package(mut self, package: impl Into<String>) -> Self {
        self.config
            .excluded_packages
            .insert(package.into().trim_end_matches('.').to_string());
        self
    }

    pub fn do_not_instrument_class(mut self, class_name: impl Into<String>) -> Self {
        self.config.do_not_instrument.insert(class_name.into());
        self
    }

    pub fn build(self) -> InstrumentationConfiguration {
        self.config
    }
}
