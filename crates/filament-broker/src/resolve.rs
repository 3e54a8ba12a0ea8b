//! Configuration resolution.
//!
//! Each pluggable facility — transporter, cacher, serializer, strategy — is
//! configured by a [`ConfigDescriptor`]: a bare adapter name, a connection
//! URI, a descriptor object or an already-constructed instance.
//! [`ConfigResolver`] normalizes a descriptor into one concrete adapter.
//! Resolution is pure, runs once per facility per configuration load, and
//! fails closed on anything it does not recognize.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use filament_common::cache::{Cacher, MemoryCacher, MemorySettings, NullCacher};
use filament_common::protocol::error::{FilamentError, Result};
use filament_common::serializer::Serializer;
use filament_common::transport::{NullTransporter, TcpSettings, TcpTransporter, Transporter};

use crate::strategy::Strategy;

/// Heterogeneous configuration value for one pluggable facility.
///
/// Exactly one variant is active per facility. `Instance` carries an adapter
/// constructed in code and can never appear in a deserialized configuration.
#[derive(Clone)]
pub enum ConfigDescriptor<A> {
    /// Bare adapter-type name with default settings, e.g. `"TCP"`
    Name(String),
    /// Connection URI, e.g. `"tcp://10.0.0.5:7100"`
    Uri(String),
    /// Adapter type plus settings merged over that adapter's defaults
    Object {
        kind: String,
        settings: Map<String, Value>,
    },
    /// Already-constructed adapter, returned unchanged by resolution
    Instance(A),
}

pub type TransporterDescriptor = ConfigDescriptor<Arc<dyn Transporter>>;
pub type CacherDescriptor = ConfigDescriptor<Arc<dyn Cacher>>;
pub type SerializerDescriptor = ConfigDescriptor<Arc<Serializer>>;
pub type StrategyDescriptor = ConfigDescriptor<Strategy>;

impl<A> ConfigDescriptor<A> {
    pub fn name(name: impl Into<String>) -> Self {
        ConfigDescriptor::Name(name.into())
    }

    /// Classifies a raw configuration value. A string containing `://` is a
    /// URI, any other string is a bare name, an object must carry a `type`
    /// field and may carry a `settings` map.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) if text.contains("://") => {
                Ok(ConfigDescriptor::Uri(text.clone()))
            }
            Value::String(text) => Ok(ConfigDescriptor::Name(text.clone())),
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        FilamentError::ConfigResolution(
                            "adapter descriptor object requires a string 'type' field".to_string(),
                        )
                    })?
                    .to_string();
                let settings = match map.get("settings") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(settings)) => settings.clone(),
                    Some(_) => {
                        return Err(FilamentError::ConfigResolution(
                            "adapter 'settings' must be an object".to_string(),
                        ))
                    }
                };
                Ok(ConfigDescriptor::Object { kind, settings })
            }
            other => Err(FilamentError::ConfigResolution(format!(
                "adapter descriptor must be a string or object, got {}",
                other
            ))),
        }
    }
}

impl<'de, A> Deserialize<'de> for ConfigDescriptor<A> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ConfigDescriptor::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl<A> fmt::Debug for ConfigDescriptor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigDescriptor::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ConfigDescriptor::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            ConfigDescriptor::Object { kind, settings } => f
                .debug_struct("Object")
                .field("kind", kind)
                .field("settings", settings)
                .finish(),
            ConfigDescriptor::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// Normalizes descriptors into concrete adapters.
///
/// Adapter-type names are matched case-insensitively against a closed
/// registration table per facility; unknown names fail with
/// [`FilamentError::ConfigResolution`].
pub struct ConfigResolver;

impl ConfigResolver {
    pub fn transporter(
        descriptor: &TransporterDescriptor,
        serializer: &Arc<Serializer>,
    ) -> Result<Arc<dyn Transporter>> {
        match descriptor {
            ConfigDescriptor::Instance(transporter) => Ok(transporter.clone()),
            ConfigDescriptor::Uri(uri) => match scheme_of(uri) {
                "tcp" => Ok(Arc::new(TcpTransporter::from_uri(serializer.clone(), uri)?)),
                "null" => Ok(Arc::new(NullTransporter)),
                other => Err(unknown("transporter URI scheme", other)),
            },
            ConfigDescriptor::Name(name) => match normalize(name).as_str() {
                "tcp" => Ok(Arc::new(TcpTransporter::new(
                    serializer.clone(),
                    TcpSettings::default(),
                ))),
                "null" | "fake" => Ok(Arc::new(NullTransporter)),
                other => Err(unknown("transporter type", other)),
            },
            ConfigDescriptor::Object { kind, settings } => match normalize(kind).as_str() {
                "tcp" => {
                    let settings = merge_settings::<TcpSettings>("TCP transporter", settings)?;
                    Ok(Arc::new(TcpTransporter::new(serializer.clone(), settings)))
                }
                "null" | "fake" => Ok(Arc::new(NullTransporter)),
                other => Err(unknown("transporter type", other)),
            },
        }
    }

    pub fn cacher(descriptor: &CacherDescriptor) -> Result<Arc<dyn Cacher>> {
        match descriptor {
            ConfigDescriptor::Instance(cacher) => Ok(cacher.clone()),
            ConfigDescriptor::Uri(uri) => match scheme_of(uri) {
                "memory" => Ok(Arc::new(MemoryCacher::default())),
                other => Err(unknown("cacher URI scheme", other)),
            },
            ConfigDescriptor::Name(name) => match normalize(name).as_str() {
                "memory" | "mem" => Ok(Arc::new(MemoryCacher::default())),
                "null" => Ok(Arc::new(NullCacher)),
                other => Err(unknown("cacher type", other)),
            },
            ConfigDescriptor::Object { kind, settings } => match normalize(kind).as_str() {
                "memory" | "mem" => {
                    let settings = merge_settings::<MemorySettings>("memory cacher", settings)?;
                    Ok(Arc::new(MemoryCacher::new(settings)))
                }
                "null" => Ok(Arc::new(NullCacher)),
                other => Err(unknown("cacher type", other)),
            },
        }
    }

    /// The serializer facility accepts a name or an instance only.
    pub fn serializer(descriptor: &SerializerDescriptor) -> Result<Arc<Serializer>> {
        match descriptor {
            ConfigDescriptor::Instance(serializer) => Ok(serializer.clone()),
            ConfigDescriptor::Name(name) => match normalize(name).as_str() {
                "json" => Ok(Arc::new(Serializer::json())),
                other => Err(unknown("serializer type", other)),
            },
            ConfigDescriptor::Uri(_) | ConfigDescriptor::Object { .. } => {
                Err(FilamentError::ConfigResolution(
                    "serializer accepts an adapter name or instance, not a URI or object"
                        .to_string(),
                ))
            }
        }
    }

    pub fn strategy(descriptor: &StrategyDescriptor) -> Result<Strategy> {
        match descriptor {
            ConfigDescriptor::Instance(strategy) => Ok(strategy.clone()),
            ConfigDescriptor::Name(name) => strategy_by_name(name),
            ConfigDescriptor::Object { kind, settings } => {
                // Built-in strategies carry no settings
                if !settings.is_empty() {
                    return Err(FilamentError::ConfigResolution(format!(
                        "strategy '{}' accepts no settings",
                        kind
                    )));
                }
                strategy_by_name(kind)
            }
            ConfigDescriptor::Uri(uri) => Err(FilamentError::ConfigResolution(format!(
                "strategy cannot be configured from a URI ('{}')",
                uri
            ))),
        }
    }
}

fn strategy_by_name(name: &str) -> Result<Strategy> {
    match normalize(name).as_str() {
        "roundrobin" | "round-robin" | "round_robin" => Ok(Strategy::round_robin()),
        "random" => Ok(Strategy::random()),
        other => Err(unknown("strategy", other)),
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn scheme_of(uri: &str) -> &str {
    uri.split("://").next().unwrap_or_default()
}

fn unknown(what: &str, name: &str) -> FilamentError {
    FilamentError::ConfigResolution(format!("unknown {} '{}'", what, name))
}

/// Deserializes a settings map into the adapter's settings struct; absent
/// keys keep the struct defaults, unknown keys are rejected by the adapter.
fn merge_settings<S: serde::de::DeserializeOwned>(
    adapter: &str,
    settings: &Map<String, Value>,
) -> Result<S> {
    serde_json::from_value(Value::Object(settings.clone())).map_err(|e| {
        FilamentError::ConfigResolution(format!("invalid {} settings: {}", adapter, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_serializer() -> Arc<Serializer> {
        Arc::new(Serializer::json())
    }

    #[test]
    fn test_descriptor_from_bare_name() {
        let descriptor = TransporterDescriptor::from_value(&json!("TCP")).unwrap();
        assert!(matches!(descriptor, ConfigDescriptor::Name(ref n) if n == "TCP"));
    }

    #[test]
    fn test_descriptor_from_uri() {
        let descriptor = TransporterDescriptor::from_value(&json!("tcp://10.0.0.5:7100")).unwrap();
        assert!(matches!(descriptor, ConfigDescriptor::Uri(_)));
    }

    #[test]
    fn test_descriptor_from_object() {
        let descriptor = TransporterDescriptor::from_value(
            &json!({"type": "TCP", "settings": {"connectTimeoutMs": 300}}),
        )
        .unwrap();
        match descriptor {
            ConfigDescriptor::Object { kind, settings } => {
                assert_eq!(kind, "TCP");
                assert_eq!(settings.get("connectTimeoutMs"), Some(&json!(300)));
            }
            other => panic!("expected object descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_object_requires_type() {
        assert!(TransporterDescriptor::from_value(&json!({"settings": {}})).is_err());
    }

    #[test]
    fn test_descriptor_rejects_other_shapes() {
        assert!(TransporterDescriptor::from_value(&json!(42)).is_err());
        assert!(TransporterDescriptor::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_all_shapes_resolve_equivalent_tcp_adapters() {
        // Name, URI, object and instance forms of the same adapter type all
        // resolve to a working TCP transporter
        let serializer = json_serializer();

        let by_name =
            ConfigResolver::transporter(&ConfigDescriptor::name("TCP"), &serializer).unwrap();
        let by_uri = ConfigResolver::transporter(
            &ConfigDescriptor::Uri("tcp://10.0.0.5:7100".to_string()),
            &serializer,
        )
        .unwrap();
        let by_object = ConfigResolver::transporter(
            &TransporterDescriptor::from_value(&json!({"type": "tcp", "settings": {}})).unwrap(),
            &serializer,
        )
        .unwrap();
        let by_instance = ConfigResolver::transporter(
            &ConfigDescriptor::Instance(by_name.clone()),
            &serializer,
        )
        .unwrap();

        for transporter in [&by_name, &by_uri, &by_object, &by_instance] {
            assert_eq!(transporter.name(), "TCP");
        }
        // Scheme-derived settings survive resolution
        assert_eq!(by_uri.seed(), Some("10.0.0.5:7100".to_string()));
        // The instance came back unchanged
        assert!(Arc::ptr_eq(&by_name, &by_instance));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let serializer = json_serializer();
        let descriptor = ConfigDescriptor::name("TCP");
        let first = ConfigResolver::transporter(&descriptor, &serializer).unwrap();
        let second = ConfigResolver::transporter(&descriptor, &serializer).unwrap();
        assert_eq!(first.name(), second.name());
        assert_eq!(first.seed(), second.seed());
    }

    #[test]
    fn test_unknown_transporter_fails_closed() {
        let serializer = json_serializer();
        assert!(matches!(
            ConfigResolver::transporter(&ConfigDescriptor::name("NATS"), &serializer),
            Err(FilamentError::ConfigResolution(_))
        ));
        assert!(ConfigResolver::transporter(
            &ConfigDescriptor::Uri("nats://localhost:4222".to_string()),
            &serializer
        )
        .is_err());
    }

    #[test]
    fn test_invalid_settings_fail_resolution() {
        let serializer = json_serializer();
        let descriptor =
            TransporterDescriptor::from_value(&json!({"type": "tcp", "settings": {"bogus": 1}}))
                .unwrap();
        assert!(matches!(
            ConfigResolver::transporter(&descriptor, &serializer),
            Err(FilamentError::ConfigResolution(_))
        ));
    }

    #[test]
    fn test_cacher_resolution() {
        let memory = ConfigResolver::cacher(&ConfigDescriptor::name("Memory")).unwrap();
        assert_eq!(memory.name(), "Memory");
        let null = ConfigResolver::cacher(&ConfigDescriptor::name("Null")).unwrap();
        assert_eq!(null.name(), "Null");
        assert!(ConfigResolver::cacher(&ConfigDescriptor::name("Redis")).is_err());

        let tuned = ConfigResolver::cacher(
            &CacherDescriptor::from_value(&json!({"type": "Memory", "settings": {"ttlSecs": 30}}))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(tuned.name(), "Memory");
    }

    #[test]
    fn test_serializer_resolution() {
        let json = ConfigResolver::serializer(&ConfigDescriptor::name("JSON")).unwrap();
        assert_eq!(json.name(), "JSON");
        assert!(ConfigResolver::serializer(&ConfigDescriptor::name("XML")).is_err());
        // Names and URIs/objects are not interchangeable for the serializer
        assert!(ConfigResolver::serializer(&ConfigDescriptor::Uri(
            "json://whatever".to_string()
        ))
        .is_err());
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(
            ConfigResolver::strategy(&ConfigDescriptor::name("RoundRobin"))
                .unwrap()
                .name(),
            "RoundRobin"
        );
        assert_eq!(
            ConfigResolver::strategy(&ConfigDescriptor::name("random"))
                .unwrap()
                .name(),
            "Random"
        );
        assert!(ConfigResolver::strategy(&ConfigDescriptor::name("CpuUsage")).is_err());

        let with_settings = StrategyDescriptor::from_value(
            &json!({"type": "Random", "settings": {"seed": 42}}),
        )
        .unwrap();
        assert!(ConfigResolver::strategy(&with_settings).is_err());
    }
}
