//! shade核心属性测试
//!
//! 使用proptest验证影子注册表的重叠检测和SDK选择

use std::sync::Arc;

use proptest::prelude::*;
use shade_core::{ApiRange, ShadowClass, ShadowMapBuilder, ShadowMapping};

#[derive(Default)]
struct ShadowThing;

fn shadow(name: &str) -> Arc<ShadowClass> {
    ShadowClass::builder::<ShadowThing>(name.to_string()).build()
}

fn range() -> impl Strategy<Value = ApiRange> {
    (21i32..=35, 0i32..=14).prop_map(|(min, len)| ApiRange::new(min, (min + len).min(35)).expect("range"))
}

/// 属性测试: 注册表接受映射当且仅当范围不重叠
proptest! {
    #[test]
    fn prop_overlap_detection(a in range(), b in range()) {
        let result = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.os.Thing", shadow("ShadowA")).with_api_range(a))
            .add(ShadowMapping::shadow("android.os.Thing", shadow("ShadowB")).with_api_range(b))
            .build();
        prop_assert_eq!(result.is_err(), a.overlaps(&b));
    }
}

/// 属性测试: 查找结果的范围总是包含当前SDK
proptest! {
    #[test]
    fn prop_lookup_respects_range(split in 22i32..=35, sdk in 21i32..=35) {
        let old = ApiRange::new(21, split - 1).expect("old");
        let new = ApiRange::new(split, 35).expect("new");
        let map = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("android.os.Thing", shadow("ShadowOld")).with_api_range(old))
            .add(ShadowMapping::shadow("android.os.Thing", shadow("ShadowNew")).with_api_range(new))
            .build()
            .expect("disjoint");

        let found = map.lookup("android.os.Thing", sdk).expect("covered");
        prop_assert!(found.api_range().contains(sdk));
        let expected = if sdk < split { "ShadowOld" } else { "ShadowNew" };
        prop_assert_eq!(found.shadow_name(), expected);
    }
}

/// 属性测试: 重叠判断是对称的
proptest! {
    #[test]
    fn prop_overlap_symmetric(a in range(), b in range()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }
}
