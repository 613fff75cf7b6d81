//! 网关配置
//! toml 文件加载，账号表可被环境外的管理接口在运行期补充

use tokio::{fs, io::AsyncReadExt};

use crate::auth::Account;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GatewayConfig {
    /// 主链路监听地址，host:port
    pub main_listen: String,
    /// 连接空闲超时秒数，0 表示不超时
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let mut file = fs::File::open(path).await?;
        let mut s = String::new();
        file.read_to_string(&mut s).await?;
        Ok(toml::from_str::<Config>(&s)?)
    }

    pub fn new(main_listen: &str, accounts: Vec<Account>) -> Self {
        Self {
            gateway: GatewayConfig {
                main_listen: main_listen.to_string(),
                idle_timeout_secs: default_idle_timeout_secs(),
            },
            accounts,
        }
    }
}
