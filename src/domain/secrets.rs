//! 密钥格式解析
//!
//! - 后端 / Keycloak 密钥：JSON，必须包含 `knex.connection`
//! - Docker 密钥：`KEY=value` 行文本
//!
//! 错误信息只引用键名，不回显密钥内容。

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// 数据库连接参数（knex.connection）
#[derive(Clone, PartialEq, Eq)]
pub struct KnexConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for KnexConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnexConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

fn parse_json(label: &str, text: &str) -> Result<Value, String> {
    if text.trim().is_empty() {
        return Err(format!("{} is required", label));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| format!("{} is not valid JSON: {}", label, e))?;
    if !value.is_object() {
        return Err(format!("{} must be a JSON object", label));
    }
    Ok(value)
}

fn non_empty_string(connection: &Value, label: &str, key: &str) -> Result<String, String> {
    match connection.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(format!(
            "{} 'knex.connection.{}' must be a non-empty string",
            label, key
        )),
    }
}

fn parse_port(value: Option<&Value>) -> Option<u16> {
    let port = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u16::try_from(port).ok().filter(|p| *p > 0)
}

impl KnexConnection {
    /// 从 `{"knex":{"connection":{...}}}` 中解析
    pub fn from_knex_json(label: &str, value: &Value) -> Result<Self, String> {
        let connection = value
            .get("knex")
            .and_then(|knex| knex.get("connection"))
            .filter(|c| c.is_object())
            .ok_or_else(|| format!("{} must contain a 'knex.connection' property", label))?;

        let port = parse_port(connection.get("port")).ok_or_else(|| {
            format!(
                "{} 'knex.connection.port' must be a valid port (1-65535)",
                label
            )
        })?;

        Ok(Self {
            host: non_empty_string(connection, label, "host")?,
            port,
            user: non_empty_string(connection, label, "user")?,
            password: non_empty_string(connection, label, "password")?,
            database: non_empty_string(connection, label, "database")?,
        })
    }

    pub fn parse(label: &str, text: &str) -> Result<Self, String> {
        Self::from_knex_json(label, &parse_json(label, text)?)
    }
}

/// Keycloak 密钥
#[derive(Clone, Debug)]
pub struct KeycloakSecrets {
    pub connection: KnexConnection,
    pub realm: Option<String>,
}

impl KeycloakSecrets {
    pub fn parse(label: &str, text: &str) -> Result<Self, String> {
        let value = parse_json(label, text)?;
        let connection = KnexConnection::from_knex_json(label, &value)?;
        let realm = match value.get("realm") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(_) => return Err(format!("{} 'realm' must be a non-empty string", label)),
        };
        Ok(Self { connection, realm })
    }
}

/// Docker 环境密钥中必须存在且非空的键
pub const REQUIRED_DOCKER_KEYS: &[&str] = &[
    "KC_DB_URL",
    "KC_DB_USERNAME",
    "KC_DB_PASSWORD",
    "KEYCLOAK_ADMIN",
    "KEYCLOAK_ADMIN_PASSWORD",
];

/// Docker 环境密钥（KEY=value）
#[derive(Clone, Default)]
pub struct DockerSecrets {
    entries: BTreeMap<String, String>,
}

impl fmt::Debug for DockerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl DockerSecrets {
    pub fn parse(label: &str, text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Err(format!("{} is required", label));
        }

        let mut entries = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("{} line {} is not KEY=value", label, index + 1))?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return Err(format!("{} line {} has an empty key", label, index + 1));
            }
            entries.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        for key in REQUIRED_DOCKER_KEYS {
            match entries.get(*key) {
                Some(v) if !v.is_empty() => {}
                _ => return Err(format!("{} must contain a non-empty {}", label, key)),
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 必需键的取值（解析时已保证存在）
    pub fn required(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Keycloak 数据库 JDBC URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JdbcUrl {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl JdbcUrl {
    /// 解析 `jdbc:postgresql://host[:port]/database[?params]`
    pub fn parse(url: &str) -> Result<Self, String> {
        let invalid = || {
            format!(
                "KC_DB_URL must look like jdbc:postgresql://<host>[:<port>]/<database>, got '{}'",
                url
            )
        };

        let rest = url.strip_prefix("jdbc:postgresql://").ok_or_else(invalid)?;
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
        let database = path.split('?').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok().filter(|p| *p > 0);
                (host, port.ok_or_else(invalid)?)
            }
            None => (authority, 5432),
        };

        let valid_name = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        };
        if !valid_name(host) || !valid_name(database) {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
        })
    }
}
