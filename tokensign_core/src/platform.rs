//! PKCS#11 模块默认路径探测（仅用于 meta）

use std::path::Path;

/// 支持探测的平台
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Darwin,
    Windows,
    Linux,
}

impl Platform {
    /// 按操作系统名称的子串粗分类
    pub fn classify(os_name: &str) -> Option<Self> {
        let os_name = os_name.to_lowercase();
        if os_name.contains("mac") || os_name.contains("darwin") {
            Some(Platform::Darwin)
        } else if os_name.contains("win") {
            Some(Platform::Windows)
        } else if os_name.contains("nux") {
            Some(Platform::Linux)
        } else {
            None
        }
    }

    pub fn current() -> Option<Self> {
        Self::classify(std::env::consts::OS)
    }

    /// 已知的安装路径（斯洛伐克 eID 客户端默认目录）
    pub fn module_paths(&self) -> &'static [&'static str] {
        match self {
            Platform::Darwin => &["/Applications/Aplikacia_pre_eID.app/Contents/pkcs11/libPkcs11.dylib"],
            Platform::Windows => &["C:\\Program Files (x86)\\EAC MW klient\\pkcs11_x64.dll"],
            Platform::Linux => &["/usr/lib/eac_mw_klient/libpkcs11_x64.so"],
        }
    }

    /// 返回表中第一个存在的路径
    pub fn detect_module_path(&self) -> Option<&'static str> {
        self.module_paths()
            .iter()
            .copied()
            .find(|path| Path::new(path).exists())
    }
}

/// 探测当前平台的默认模块路径
pub fn detect_module_path() -> Option<&'static str> {
    Platform::current().and_then(|p| p.detect_module_path())
}
