//! 远程主机目录约定
//!
//! ```text
//! <root>/<app>/<tag>/                         解包后的发布
//! <root>/<app>/active -> <tag>                当前生效的发布
//! <root>/<app>/server-init-marker             首次初始化标记
//! <root>/<app>/logs/                          部署期间写出的容器日志
//! <root>/<app>/deploy-keycloak-backup.sql     Keycloak 数据库备份
//! <root>/<app>/keycloak-export/               导出的 Keycloak 用户
//! ```

use crate::domain::tag::DeployTag;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLayout {
    app_dir: String,
}

impl RemoteLayout {
    pub fn new(root: &str, app_name: &str) -> Self {
        Self {
            app_dir: format!("{}/{}", root.trim_end_matches('/'), app_name),
        }
    }

    pub fn app_dir(&self) -> &str {
        &self.app_dir
    }

    pub fn release_dir(&self, tag: &DeployTag) -> String {
        self.release_dir_named(tag.as_str())
    }

    pub fn release_dir_named(&self, name: &str) -> String {
        format!("{}/{}", self.app_dir, name)
    }

    /// 上传中的发布包
    pub fn upload_archive(&self, tag: &DeployTag) -> String {
        format!("{}/{}.tar.gz", self.app_dir, tag)
    }

    pub fn active_link(&self) -> String {
        format!("{}/active", self.app_dir)
    }

    pub fn init_marker(&self) -> String {
        format!("{}/server-init-marker", self.app_dir)
    }

    pub fn logs_dir(&self) -> String {
        format!("{}/logs", self.app_dir)
    }

    pub fn keycloak_backup(&self) -> String {
        format!("{}/deploy-keycloak-backup.sql", self.app_dir)
    }

    pub fn keycloak_export_dir(&self) -> String {
        format!("{}/keycloak-export", self.app_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = RemoteLayout::new("/opt/deploy/", "shop");
        let tag = DeployTag::parse("25.0615.1000.00").unwrap();

        assert_eq!(layout.app_dir(), "/opt/deploy/shop");
        assert_eq!(layout.release_dir(&tag), "/opt/deploy/shop/25.0615.1000.00");
        assert_eq!(layout.upload_archive(&tag), "/opt/deploy/shop/25.0615.1000.00.tar.gz");
        assert_eq!(layout.active_link(), "/opt/deploy/shop/active");
        assert_eq!(layout.init_marker(), "/opt/deploy/shop/server-init-marker");
        assert_eq!(layout.logs_dir(), "/opt/deploy/shop/logs");
        assert_eq!(layout.keycloak_backup(), "/opt/deploy/shop/deploy-keycloak-backup.sql");
    }
}
