//! Session configuration
//!
//! Property-based configuration for headless sessions: typed property
//! values, change listeners, and JSON serialization support. Each session
//! owns its own configuration instance; there is no process-wide
//! configuration state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    pub property_name: String,
    pub old_value: Option<ConfigValue>,
    pub new_value: ConfigValue,
}

/// Configuration change listener trait
pub trait ConfigChangeListener: Send + Sync {
    fn on_config_changed(&self, event: &ConfigChangeEvent);
}

/// Supported configuration value types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl ConfigValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

/// Per-session configuration properties
pub struct SessionConfig {
    properties: HashMap<String, ConfigValue>,
    listeners: Vec<Box<dyn ConfigChangeListener>>,
    session_name: String,
    config_resource: String,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_name", &self.session_name)
            .field("config_resource", &self.config_resource)
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl SessionConfig {
    pub fn new(config_resource: impl Into<String>, session_name: impl Into<String>) -> Self {
        let mut config = Self {
            properties: HashMap::new(),
            listeners: Vec::new(),
            session_name: session_name.into(),
            config_resource: config_resource.into(),
        };
        config.set_defaults();
        config
    }

    fn set_defaults(&mut self) {
        // Connection settings
        self.properties.insert("connection.host".to_string(), "".into());
        self.properties.insert("connection.port".to_string(), 23i64.into());
        self.properties.insert("connection.ssl".to_string(), false.into());
        self.properties.insert("connection.deviceName".to_string(), "IBM-3179-2".into());

        // Session settings
        self.properties.insert("session.autoConnect".to_string(), false.into());
        self.properties.insert("session.timeout".to_string(), 30i64.into());

        // Screen settings
        self.properties.insert("screen.size".to_string(), "24x80".into());
        self.properties.insert("screen.saveDepth".to_string(), 16i64.into());
        self.properties.insert("screen.rejectResave".to_string(), false.into());
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn config_resource(&self) -> &str {
        &self.config_resource
    }

    /// Screen geometry from "screen.size" ("24x80" or "27x132"); falls back
    /// to 24x80 on anything unparseable or zero-sized
    pub fn screen_size(&self) -> (usize, usize) {
        let value = self.get_string_property_or("screen.size", "24x80");
        let mut parts = value.splitn(2, 'x');
        match (
            parts.next().and_then(|p| p.parse().ok()),
            parts.next().and_then(|p| p.parse().ok()),
        ) {
            (Some(rows), Some(cols)) if rows > 0 && cols > 0 => (rows, cols),
            _ => (crate::screen::TERMINAL_ROWS, crate::screen::TERMINAL_COLS),
        }
    }

    pub fn get_property(&self, key: &str) -> Option<&ConfigValue> {
        self.properties.get(key)
    }

    pub fn get_string_property(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(|v| v.as_string().map(|s| s.to_string()))
    }

    pub fn get_string_property_or(&self, key: &str, default: &str) -> String {
        self.get_string_property(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_int_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_integer())
    }

    pub fn get_int_property_or(&self, key: &str, default: i64) -> i64 {
        self.get_int_property(key).unwrap_or(default)
    }

    pub fn get_bool_property(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(|v| v.as_boolean())
    }

    pub fn get_bool_property_or(&self, key: &str, default: bool) -> bool {
        self.get_bool_property(key).unwrap_or(default)
    }

    /// Set a property and notify listeners of the change
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        let old_value = self.properties.insert(key.clone(), value.clone());
        if old_value.as_ref() == Some(&value) {
            return;
        }
        let event = ConfigChangeEvent {
            property_name: key,
            old_value,
            new_value: value,
        };
        for listener in &self.listeners {
            listener.on_config_changed(&event);
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn ConfigChangeListener>) {
        self.listeners.push(listener);
    }

    /// Serialize the property map to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.properties)
    }

    /// Replace the property map from JSON (listeners are not fired; this is
    /// bulk initialization, not a change stream)
    pub fn load_json(&mut self, json: &str) -> serde_json::Result<()> {
        self.properties = serde_json::from_str(json)?;
        Ok(())
    }
}
