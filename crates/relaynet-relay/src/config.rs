//! # 转发配置
//!
//! 配置文件是一张 TOML 表：每个应用组一节，记录后端主机、候选端口、对外端口、
//! 后端启动命令，以及上一次选中的端口下标与后端进程号。端口轮换与后端启动后
//! 整个文件会被写回。
//!
//! ```toml
//! [default]
//! host = "127.0.0.1"
//! ports = [16379, 16389]
//! outport = 16380
//! prog = "$dir/backend.sh"
//! args = "--host $host --port $port"
//! curr = 0
//! pid = 0
//! ```

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("section `{0}` not found")]
    MissingSection(String),
}

/// 单个应用组。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub host: String,
    pub ports: Vec<u16>,
    pub outport: u16,
    pub prog: String,
    pub args: String,
    pub curr: usize,
    pub pid: i32,
}

impl AppSection {
    /// 选择后端端口，端口列表为空时返回 0。
    ///
    /// `curr` 优先：使用当前下标；其次 `next`：使用下一个下标并记录下来；
    /// 否则使用 `number` 指定的下标。下标一律对列表长度取模。
    pub fn in_port(&mut self, curr: bool, next: bool, number: usize) -> u16 {
        let size = self.ports.len();
        if size == 0 {
            return 0;
        }
        let index = if curr {
            self.curr % size
        } else if next {
            self.curr = (self.curr + 1) % size;
            self.curr
        } else {
            number % size
        };
        self.ports[index]
    }
}

/// 全部应用组，按名称排序以保证写回结果稳定。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelaySetting {
    apps: BTreeMap<String, AppSection>,
}

impl RelaySetting {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string(self)?;
        fs::write(path, encoded).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn section(&self, name: &str) -> Option<&AppSection> {
        self.apps.get(name)
    }

    pub fn section_mut(&mut self, name: &str) -> Result<&mut AppSection, ConfigError> {
        self.apps
            .get_mut(name)
            .ok_or_else(|| ConfigError::MissingSection(name.to_owned()))
    }
}
