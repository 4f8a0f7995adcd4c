//! 通用工具函数
//!
//! 类名处理和ID生成等跨crate共享的小工具

use std::sync::atomic::{AtomicU64, Ordering};

/// 获取类名的包名部分
///
/// # 示例
/// ```
/// assert_eq!(shade_common::utils::package_name("android.os.Build"), "android.os");
/// assert_eq!(shade_common::utils::package_name("Build"), "");
/// ```
pub fn package_name(class_name: &str) -> &str {
    match class_name.rfind('.') {
        Some(idx) => &class_name[..idx],
        None => "",
    }
}

/// 获取类名的简单名称（去掉包名和外部类）
///
/// # 示例
/// ```
/// assert_eq!(shade_common::utils::simple_name("android.os.Build$VERSION"), "VERSION");
/// assert_eq!(shade_common::utils::simple_name("android.os.Build"), "Build");
/// ```
pub fn simple_name(class_name: &str) -> &str {
    let start = class_name
        .rfind(['.', '$'])
        .map(|idx| idx + 1)
        .unwrap_or(0);
    &class_name[start..]
}

/// 检查类名是否属于某个包前缀
///
/// 前缀可以带或不带结尾的`.`，`"android"`匹配`"android.os.Build"`但不匹配`"androidx.core.X"`。
pub fn in_package(class_name: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('.');
    if prefix.is_empty() {
        return true;
    }
    class_name == prefix
        || (class_name.starts_with(prefix) && class_name[prefix.len()..].starts_with(['.', '$']))
}

/// 单调递增的ID生成器
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// 创建从`start`开始的生成器
    pub const fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// 分配下一个ID
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// 查看下一个将被分配的ID
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("android.telephony.SignalStrength"), "android.telephony");
        assert_eq!(package_name("Foo"), "");
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("android.os.Build$VERSION"), "VERSION");
        assert_eq!(simple_name("Foo"), "Foo");
    }

    #[test]
    fn test_in_package() {
        assert!(in_package("android.os.Build", "android."));
        assert!(in_package("android.os.Build", "android"));
        assert!(in_package("android.os.Build$VERSION", "android.os.Build"));
        assert!(!in_package("androidx.core.Foo", "android"));
        assert!(in_package("anything", ""));
    }

    #[test]
    fn test_id_generator() {
        let ids = IdGenerator::new(10);
        assert_eq!(ids.next_id(), 10);
        assert_eq!(ids.next_id(), 11);
        assert_eq!(ids.peek(), 12);
    }
}
