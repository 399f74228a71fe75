//! 配置加载器实现
//!
//! 提供TOML配置文件解析、环境变量替换和错误处理功能

use crate::config::types::{validate_config, ServerConfig};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<ServerConfig>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ServerConfig>;

    /// 从字符串加载配置
    async fn load_from_string(&self, content: &str) -> Result<ServerConfig>;

    /// 验证配置
    fn validate(&self, config: &ServerConfig) -> Result<()>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用 `${VAR}` 环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的环境变量，未定义的变量视为错误
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut missing = None;
        let result = env_var_regex.replace_all(content, |captures: &regex::Captures| {
            let var_name = &captures[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(var) => Err(ConfigError::EnvVarError { var }.into()),
            None => Ok(result.into_owned()),
        }
    }

    fn parse_toml(&self, content: &str) -> Result<ServerConfig> {
        let processed_content = self.substitute_env_vars(content)?;

        let config: ServerConfig = toml::from_str(&processed_content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(config)
    }
}

impl Default for TomlConfigLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ServerConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {}", e)))?;

        let config = self.parse_toml(&content)?;
        self.validate(&config)?;

        log::info!("成功加载配置文件: {}", path.display());
        log::debug!("配置内容: {:?}", config);

        Ok(config)
    }

    async fn load_from_string(&self, content: &str) -> Result<ServerConfig> {
        let config = self.parse_toml(content)?;
        self.validate(&config)?;

        log::debug!("成功解析配置字符串");

        Ok(config)
    }

    fn validate(&self, config: &ServerConfig) -> Result<()> {
        validate_config(config).map_err(|e| ConfigError::ValidationError(e).into())
    }
}

/// 获取默认配置文件路径
///
/// 当前目录存在 `mgmt-controller.toml` 时优先使用，否则为用户配置目录下的
/// `mgmt-controller/config.toml`。
pub fn get_default_config_path() -> PathBuf {
    let local = PathBuf::from("mgmt-controller.toml");
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|config_dir| config_dir.join("mgmt-controller").join("config.toml"))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManagementError;
    use std::env;
    use tempfile::TempDir;

    const TEST_CONFIG_TOML: &str = r#"
[persistence]
snapshot_path = "/var/lib/mgmt/configuration.json"

[reload]
timeout_ms = 30000
poll_interval_ms = 50

[logging]
level = "debug"
json = true

[logging.module_levels]
"mgmt_controller::controller" = "trace"

[watch]
enabled = true
debounce_ms = 250
"#;

    #[tokio::test]
    async fn test_toml_parsing() {
        let loader = TomlConfigLoader::new(false);
        let config = loader.load_from_string(TEST_CONFIG_TOML).await.unwrap();

        assert_eq!(
            config.persistence.snapshot_path,
            PathBuf::from("/var/lib/mgmt/configuration.json")
        );
        assert_eq!(config.reload.timeout_ms, 30000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.logging.module_levels.len(), 1);
        assert!(config.watch.enabled);
        assert_eq!(config.watch.debounce_ms, 250);
    }

    #[tokio::test]
    async fn test_empty_config_uses_defaults() {
        let loader = TomlConfigLoader::new(false);
        let config = loader.load_from_string("").await.unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[tokio::test]
    async fn test_env_var_substitution() {
        env::set_var("MGMT_TEST_DATA_DIR", "/srv/mgmt");

        let loader = TomlConfigLoader::new(true);
        let config = loader
            .load_from_string(
                r#"
[persistence]
snapshot_path = "${MGMT_TEST_DATA_DIR}/configuration.json"
"#,
            )
            .await
            .unwrap();

        assert_eq!(
            config.persistence.snapshot_path,
            PathBuf::from("/srv/mgmt/configuration.json")
        );

        env::remove_var("MGMT_TEST_DATA_DIR");
    }

    #[tokio::test]
    async fn test_env_var_substitution_missing_var() {
        let loader = TomlConfigLoader::new(true);
        let result = loader
            .load_from_string(
                r#"
[persistence]
snapshot_path = "${MGMT_TEST_MISSING_VAR}/configuration.json"
"#,
            )
            .await;

        assert!(result.unwrap_err().to_string().contains("MGMT_TEST_MISSING_VAR"));
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let loader = TomlConfigLoader::new(false);
        let result = loader.load_from_string("[reload]\ntimeout_ms = 0\n").await;
        assert!(matches!(result, Err(ManagementError::Config(ConfigError::ValidationError(_)))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, TEST_CONFIG_TOML).await.unwrap();

        let loader = TomlConfigLoader::new(false);
        let config = loader.load_from_file(&path).await.unwrap();
        assert_eq!(config.reload.poll_interval_ms, 50);

        let missing = loader.load_from_file(dir.path().join("missing.toml")).await;
        assert!(matches!(
            missing,
            Err(ManagementError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_substitute_env_vars_disabled() {
        let loader = TomlConfigLoader::new(false);
        let content = "test ${VAR} content";
        assert_eq!(loader.substitute_env_vars(content).unwrap(), content);
    }

    #[test]
    fn test_get_default_config_path() {
        let path = get_default_config_path();
        assert!(path.to_string_lossy().contains("mgmt-controller"));
    }
}
