//! Vesta 工具集
//!
//! 提供日志初始化与引擎配置文件加载等通用工具。
//!
//! # EngineConfig
//! 基于 TOML 的引擎配置，所有字段都有默认值，缺省的配置文件等价于 `EngineConfig::default()`。

pub mod config;
pub mod init_log;

#[cfg(test)]
mod tests {
    /// worker 上的 panic 依赖 unwind 才能被隔离在单个 job 内
    #[test]
    fn test_workspace_profiles_keep_unwinding() {
        let manifest = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/../Cargo.toml")).unwrap();
        let manifest: toml::Table = toml::from_str(&manifest).unwrap();
        let profiles = manifest["profile"].as_table().unwrap();
        for (name, profile) in profiles {
            let panic = profile.get("panic").and_then(|v| v.as_str()).unwrap_or("unwind");
            assert_eq!(panic, "unwind", "profile.{name} must not abort on panic");
        }
    }
}
