// Connection Configuration
// The key/value configuration a Database is built from

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::traits::{DatabaseError, DbResult, HandlerKind};

/// Connection configuration.
///
/// `handler` selects the engine (`mysql`, `sqlite` or `mssql`). For SQLite,
/// `db_name` is the database file path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub handler: Option<String>,
    #[serde(default)]
    pub db_host: String,
    #[serde(default)]
    pub db_port: Option<u16>,
    #[serde(default)]
    pub db_user: String,
    #[serde(default, skip_serializing)]
    pub db_pass: String,
    #[serde(default)]
    pub db_name: String,
}

impl ConnectionConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            handler: Some(HandlerKind::Sqlite.key().to_string()),
            db_name: path.into(),
            ..Self::default()
        }
    }

    pub fn mysql(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            handler: Some(HandlerKind::Mysql.key().to_string()),
            db_host: host.into(),
            db_user: user.into(),
            db_pass: password.into(),
            db_name: name.into(),
            ..Self::default()
        }
    }

    pub fn mssql() -> Self {
        Self {
            handler: Some(HandlerKind::Mssql.key().to_string()),
            ..Self::default()
        }
    }

    /// Parse a configuration from a JSON object
    pub fn from_json(json: &str) -> DbResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DatabaseError::Configuration(format!("Invalid configuration: {}", e)))
    }

    /// Build a configuration from string key/value pairs
    pub fn from_map(map: &HashMap<String, String>) -> DbResult<Self> {
        let db_port = match map.get("db_port") {
            Some(port) => Some(port.trim().parse::<u16>().map_err(|_| {
                DatabaseError::Configuration(format!("Invalid db_port: {}", port))
            })?),
            None => None,
        };

        Ok(Self {
            handler: map.get("handler").cloned(),
            db_host: map.get("db_host").cloned().unwrap_or_default(),
            db_port,
            db_user: map.get("db_user").cloned().unwrap_or_default(),
            db_pass: map.get("db_pass").cloned().unwrap_or_default(),
            db_name: map.get("db_name").cloned().unwrap_or_default(),
        })
    }

    /// Resolve the handler key. A missing key is an error; an unknown key
    /// falls back to MySQL.
    pub fn handler_kind(&self) -> DbResult<HandlerKind> {
        let key = self.handler.as_deref().ok_or_else(|| {
            DatabaseError::Configuration("Missing 'handler' configuration.".to_string())
        })?;

        Ok(HandlerKind::from_key(key).unwrap_or_else(|| {
            tracing::warn!(handler = key, "Unknown handler, falling back to MySQL");
            HandlerKind::Mysql
        }))
    }

    pub fn validate(&self) -> DbResult<()> {
        match self.handler_kind()? {
            HandlerKind::Sqlite => {
                if self.db_name.trim().is_empty() {
                    return Err(DatabaseError::Configuration(
                        "SQLite database path is required".to_string(),
                    ));
                }
            }
            HandlerKind::Mysql => {
                if self.db_host.trim().is_empty() {
                    return Err(DatabaseError::Configuration("Host is required".to_string()));
                }
                if self.db_name.trim().is_empty() {
                    return Err(DatabaseError::Configuration(
                        "Database name is required".to_string(),
                    ));
                }
            }
            HandlerKind::Mssql => {}
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        match self.handler_kind() {
            Ok(kind) => self.db_port.unwrap_or_else(|| kind.default_port()),
            Err(_) => self.db_port.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_handler_is_configuration_error() {
        let config = ConnectionConfig::default();
        assert!(matches!(config.handler_kind(), Err(DatabaseError::Configuration(_))));
    }

    #[test]
    fn test_unknown_handler_falls_back_to_mysql() {
        let mut config = ConnectionConfig::sqlite("/tmp/x.db");
        config.handler = Some("postgres".to_string());
        assert_eq!(config.handler_kind().unwrap(), HandlerKind::Mysql);
    }

    #[test]
    fn test_from_json() {
        let config = ConnectionConfig::from_json(
            r#"{"handler": "mysql", "db_host": "localhost", "db_user": "root",
                "db_pass": "secret", "db_name": "app", "db_port": 3307}"#,
        )
        .unwrap();
        assert_eq!(config.handler_kind().unwrap(), HandlerKind::Mysql);
        assert_eq!(config.db_pass, "secret");
        assert_eq!(config.get_port(), 3307);
        assert!(config.validate().is_ok());

        let serialized = serde_json::to_string(&config).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            ConnectionConfig::from_json("not json"),
            Err(DatabaseError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("handler".to_string(), "sqlite".to_string());
        map.insert("db_name".to_string(), "/tmp/test.db".to_string());
        let config = ConnectionConfig::from_map(&map).unwrap();
        assert_eq!(config.handler_kind().unwrap(), HandlerKind::Sqlite);
        assert_eq!(config.get_port(), 0);

        map.insert("db_port".to_string(), "abc".to_string());
        assert!(ConnectionConfig::from_map(&map).is_err());
    }

    #[test]
    fn test_sqlite_requires_path() {
        let config = ConnectionConfig::sqlite("");
        assert!(matches!(config.validate(), Err(DatabaseError::Configuration(_))));
        assert!(ConnectionConfig::sqlite("/tmp/test.db").validate().is_ok());
    }

    #[test]
    fn test_mysql_default_port() {
        let config = ConnectionConfig::mysql("localhost", "root", "", "app");
        assert_eq!(config.get_port(), 3306);
    }
}
