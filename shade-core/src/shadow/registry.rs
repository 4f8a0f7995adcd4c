//! Shadow Registry
//!
//! Maps real framework classes to the shadow classes that replace their
//! behaviour. Mappings are collected with a [`ShadowMapBuilder`] during
//! sandbox bring-up and frozen into an immutable [`ShadowMap`]; conflicting
//! registrations are configuration errors reported at that point, never at
//! call time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use shade_error::{ConfigError, ShadeResult};

use super::shadow_class::ShadowClass;
use crate::api::ApiRange;
use crate::instrument::InstrumentedClass;

const PASSTHROUGH: &str = "<passthrough>";

/// Association between a real class and its shadow for a range of SDKs
#[derive(Clone)]
pub struct ShadowMapping {
    real_class: String,
    shadow: Option<Arc<ShadowClass>>,
    api_range: ApiRange,
}

impl ShadowMapping {
    /// Shadow `real_class` with `shadow` on every SDK
    pub fn shadow(real_class: impl Into<String>, shadow: Arc<ShadowClass>) -> Self {
        Self {
            real_class: real_class.into(),
            shadow: Some(shadow),
            api_range: ApiRange::ALL,
        }
    }

    /// Instrument `real_class` but always run its original code
    pub fn passthrough(real_class: impl Into<String>) -> Self {
        Self {
            real_class: real_class.into(),
            shadow: None,
            api_range: ApiRange::ALL,
        }
    }

    pub fn with_api_range(mut self, api_range: ApiRange) -> Self {
        self.api_range = api_range;
        self
    }

    pub fn real_class(&self) -> &str {
        &self.real_class
    }

    pub fn shadow_class(&self) -> Option<&Arc<ShadowClass>> {
        self.shadow.as_ref()
    }

    pub fn shadow_name(&self) -> &str {
        self.shadow.as_ref().map_or(PASSTHROUGH, |s| s.name())
    }

    pub fn is_passthrough(&self) -> bool {
        self.shadow.is_none()
    }

    pub fn api_range(&self) -> ApiRange {
        self.api_range
    }

    pub fn applies_to(&self, sdk: i32) -> bool {
        self.api_range.contains(sdk)
    }

    fn same_as(&self, other: &ShadowMapping) -> bool {
        self.real_class == other.real_class
            && self.shadow_name() == other.shadow_name()
            && self.api_range == other.api_range
    }
}

impl fmt::Debug for ShadowMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}]",
            self.real_class,
            self.shadow_name(),
            self.api_range
        )
    }
}

/// A bundle of shadow mappings, typically one per framework area
pub trait ShadowProvider: Send + Sync {
    fn name(&self) -> &str;

    fn mappings(&self) -> Vec<ShadowMapping>;

    /// Package prefixes that must be instrumented for these shadows to apply
    fn instrumented_packages(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Collects mappings before they are frozen into a [`ShadowMap`]
#[derive(Default, Clone)]
pub struct ShadowMapBuilder {
    mappings: Vec<ShadowMapping>,
    packages: BTreeSet<String>,
    providers: Vec<String>,
}

impl ShadowMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, mapping: ShadowMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn add_all(mut self, mappings: impl IntoIterator<Item = ShadowMapping>) -> Self {
        self.mappings.extend(mappings);
        self
    }

    pub fn add_provider(mut self, provider: &dyn ShadowProvider) -> Self {
        log::debug!("Registering shadow provider {}", provider.name());
        self.providers.push(provider.name().to_string());
        self.packages.extend(provider.instrumented_packages());
        self.mappings.extend(provider.mappings());
        self
    }

    /// Freeze the registry
    ///
    /// Two different shadows for one class with overlapping SDK ranges are
    /// rejected. Registering the same mapping twice is harmless.
    pub fn build(self) -> ShadeResult<ShadowMap> {
        let mut by_class: HashMap<String, Vec<ShadowMapping>> = HashMap::new();
        for mapping in self.mappings {
            let existing = by_class.entry(mapping.real_class.clone()).or_default();
            if existing.iter().any(|m| m.same_as(&mapping)) {
                continue;
            }
            if let Some(conflict) = existing
                .iter()
                .find(|m| m.api_range.overlaps(&mapping.api_range))
            {
                return Err(ConfigError::DuplicateShadow(
                    mapping.real_class.clone(),
                    mapping.shadow_name().to_string(),
                    conflict.shadow_name().to_string(),
                )
                .into());
            }
            log::trace!("Registered shadow mapping {:?}", mapping);
            existing.push(mapping);
        }
        log::debug!(
            "Shadow map built: {} classes from {} providers",
            by_class.len(),
            self.providers.len()
        );
        Ok(ShadowMap {
            mappings: by_class,
            packages: self.packages,
            providers: self.providers,
        })
    }
}

/// Immutable registry of shadow mappings for one sandbox
#[derive(Clone, Default)]
pub struct ShadowMap {
    mappings: HashMap<String, Vec<ShadowMapping>>,
    packages: BTreeSet<String>,
    providers: Vec<String>,
}

impl ShadowMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mapping registered for exactly `class_name` at `sdk`
    pub fn lookup(&self, class_name: &str, sdk: i32) -> Option<&ShadowMapping> {
        self.mappings
            .get(class_name)?
            .iter()
            .find(|m| m.applies_to(sdk))
    }

    /// Mapping of the nearest ancestor of `class` (itself included) that has
    /// one at `sdk`
    pub fn lookup_nearest(&self, class: &InstrumentedClass, sdk: i32) -> Option<&ShadowMapping> {
        class
            .lineage()
            .find_map(|ancestor| self.lookup(ancestor.name(), sdk))
    }

    /// Whether `class_name` is mapped on any SDK
    pub fn has_mapping(&self, class_name: &str) -> bool {
        self.mappings.contains_key(class_name)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &ShadowMapping> {
        self.mappings.values().flatten()
    }

    /// Shadow classes with a resetter applying at `sdk`, ordered by name
    pub fn resetters(&self, sdk: i32) -> Vec<Arc<ShadowClass>> {
        let mut by_name: BTreeMap<&str, Arc<ShadowClass>> = BTreeMap::new();
        for mapping in self.mappings().filter(|m| m.applies_to(sdk)) {
            if let Some(shadow) = mapping.shadow_class().filter(|s| s.resetter().is_some()) {
                by_name.entry(shadow.name()).or_insert_with(|| Arc::clone(shadow));
            }
        }
        by_name.into_values().collect()
    }

    /// Real classes whose shadowing differs between `self` and `other`
    pub fn invalidated_classes(&self, other: &ShadowMap) -> BTreeSet<String> {
        let describe = |map: &ShadowMap, class: &str| -> Vec<String> {
            let mut entries: Vec<String> = map
                .mappings
                .get(class)
                .map(|ms| ms.iter().map(|m| format!("{:?}", m)).collect())
                .unwrap_or_default();
            entries.sort();
            entries
        };

        self.mappings
            .keys()
            .chain(other.mappings.keys())
            .filter(|class| describe(self, class) != describe(other, class))
            .cloned()
            .collect()
    }

    /// Package prefixes contributed by providers
    pub fn instrumented_packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Reopen the registry to derive a new one
    pub fn to_builder(&self) -> ShadowMapBuilder {
        ShadowMapBuilder {
            mappings: self.mappings().cloned().collect(),
            packages: self.packages.clone(),
            providers: self.providers.clone(),
        }
    }

    /// Number of mapped real classes
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl fmt::Debug for ShadowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mappings: Vec<&ShadowMapping> = self.mappings().collect();
        mappings.sort_by(|a, b| a.real_class.cmp(&b.real_class));
        f.debug_struct("ShadowMap")
            .field("mappings", &mappings)
            .field("providers", &self.providers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_error::ShadeError;

    fn shadow(name: &str) -> Arc<ShadowClass> {
        ShadowClass::builder::<()>(name).build()
    }

    struct TelephonyShadows;

    impl ShadowProvider for TelephonyShadows {
        fn name(&self) -> &str {
            "telephony"
        }

        fn mappings(&self) -> Vec<ShadowMapping> {
            vec![ShadowMapping::shadow(
                "android.telephony.SignalStrength",
                shadow("ShadowSignalStrength"),
            )]
        }

        fn instrumented_packages(&self) -> Vec<String> {
            vec!["android.telephony".to_string()]
        }
    }

    #[test]
    fn test_lookup_by_sdk() {
        let map = ShadowMapBuilder::new()
            .add(
                ShadowMapping::shadow("android.os.Foo", shadow("ShadowFooOld"))
                    .with_api_range(ApiRange::up_to(28)),
            )
            .add(
                ShadowMapping::shadow("android.os.Foo", shadow("ShadowFooNew"))
                    .with_api_range(ApiRange::since(29)),
            )
            .build()
            .expect("build");

        assert_eq!(map.lookup("android.os.Foo", 28).map(|m| m.shadow_name()), Some("ShadowFooOld"));
        assert_eq!(map.lookup("android.os.Foo", 34).map(|m| m.shadow_name()), Some("ShadowFooNew"));
        assert!(map.lookup("android.os.Bar", 34).is_none());
        assert!(map.has_mapping("android.os.Foo"));
    }

    #[test]
    fn test_overlap_is_configuration_error() {
        let result = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.os.Build", shadow("ShadowBuild")))
            .add(
                ShadowMapping::shadow("android.os.Build", shadow("OtherShadowBuild"))
                    .with_api_range(ApiRange::since(30)),
            )
            .build();

        match result {
            Err(err @ ShadeError::Configuration { .. }) => {
                assert!(err.is_configuration_error());
                assert!(err.to_string().contains("android.os.Build"));
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_same_mapping_twice_is_fine() {
        let build = shadow("ShadowBuild");
        let map = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.os.Build", Arc::clone(&build)))
            .add(ShadowMapping::shadow("android.os.Build", build))
            .build()
            .expect("idempotent");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_provider() {
        let map = ShadowMapBuilder::new()
            .add_provider(&TelephonyShadows)
            .build()
            .expect("build");
        assert!(map.has_mapping("android.telephony.SignalStrength"));
        assert_eq!(map.instrumented_packages().collect::<Vec<_>>(), vec!["android.telephony"]);
        assert_eq!(map.providers(), ["telephony".to_string()]);
    }

    #[test]
    fn test_resetters_sorted() {
        let with_resetter = |name: &str| {
            ShadowClass::builder::<()>(name)
                .resetter(|_| Ok(()))
                .build()
        };
        let map = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.z.Zed", with_resetter("ShadowZed")))
            .add(ShadowMapping::shadow("android.a.Alpha", with_resetter("ShadowAlpha")))
            .add(ShadowMapping::shadow("android.m.Mid", shadow("ShadowMid")))
            .add(
                ShadowMapping::shadow("android.o.Old", with_resetter("ShadowOld"))
                    .with_api_range(ApiRange::up_to(21)),
            )
            .build()
            .expect("build");

        let names: Vec<String> = map.resetters(34).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["ShadowAlpha", "ShadowZed"]);
    }

    #[test]
    fn test_invalidated_classes() {
        let base = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.os.Build", shadow("ShadowBuild")))
            .add(ShadowMapping::passthrough("android.os.Parcel"))
            .build()
            .expect("base");
        let changed = base
            .to_builder()
            .add(ShadowMapping::shadow("android.os.Binder", shadow("ShadowBinder")))
            .build()
            .expect("changed");

        let invalid = base.invalidated_classes(&changed);
        assert_eq!(invalid.into_iter().collect::<Vec<_>>(), vec!["android.os.Binder".to_string()]);
        assert!(base.invalidated_classes(&base).is_empty());
    }

    #[test]
    fn test_passthrough_mapping() {
        let mapping = ShadowMapping::passthrough("android.os.Parcel");
        assert!(mapping.is_passthrough());
        assert_eq!(mapping.shadow_name(), "<passthrough>");
        assert!(mapping.shadow_class().is_none());
    }
}
