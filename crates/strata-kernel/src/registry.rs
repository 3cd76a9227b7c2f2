//! Driver registry.
//!
//! Drivers are registered once at startup, before any storage is mounted.
//! Registration records a constructor plus a self-describing list of the
//! configuration fields the driver accepts, derived from the JSON Schema
//! of its addition type. The field list is what a settings UI renders.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::debug;

use crate::vfs::backends::{LocalDriver, MemoryDriver};
use crate::vfs::{Driver, DriverConfig, FsError, FsResult};

/// Builds a fresh, uninitialised driver instance.
pub type DriverConstructor = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// A driver type that can register itself.
pub trait DriverFactory: 'static {
    /// Driver-specific configuration, deserialized from the storage record.
    type Addition: JsonSchema;

    fn driver_config() -> DriverConfig;

    fn create() -> Box<dyn Driver>;
}

/// Input widget type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemType {
    String,
    Number,
    Bool,
    Select,
    Text,
}

/// One configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub default: String,
    /// Comma-separated choices for [`ItemType::Select`].
    pub options: String,
    pub required: bool,
    pub help: String,
}

impl Item {
    fn new(name: &str, kind: ItemType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: String::new(),
            options: String::new(),
            required: false,
            help: String::new(),
        }
    }

    fn default_value(mut self, default: &str) -> Self {
        self.default = default.to_string();
        self
    }

    fn options(mut self, options: &str) -> Self {
        self.options = options.to_string();
        self
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }
}

/// Everything a caller needs to configure a driver.
#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
    /// Fields every storage has, filtered by the driver's config flags.
    pub common: Vec<Item>,
    /// Fields declared by the driver's addition type.
    pub additional: Vec<Item>,
    pub config: DriverConfig,
}

struct Registered {
    constructor: DriverConstructor,
    info: DriverInfo,
}

/// Maps driver names to constructors and configuration metadata.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Registered>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in memory and local drivers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<MemoryDriver>();
        registry.register::<LocalDriver>();
        registry
    }

    /// Register a driver type through its [`DriverFactory`] impl.
    pub fn register<F: DriverFactory>(&mut self) {
        self.register_with::<F::Addition>(F::driver_config(), F::create);
    }

    /// Register a constructor under `config.name`, describing its
    /// configuration with the schema of `A`. Re-registering a name
    /// replaces the previous entry.
    pub fn register_with<A: JsonSchema>(
        &mut self,
        config: DriverConfig,
        constructor: impl Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    ) {
        let schema = serde_json::to_value(schemars::schema_for!(A)).unwrap_or(Value::Null);
        let info = DriverInfo {
            common: main_items(&config),
            additional: additional_items(&schema, &config),
            config,
        };
        debug!(driver = %info.config.name, fields = info.additional.len(), "registered driver");
        self.drivers.insert(
            info.config.name.clone(),
            Registered {
                constructor: Arc::new(constructor),
                info,
            },
        );
    }

    /// Look up the constructor for a driver name.
    pub fn constructor(&self, name: &str) -> FsResult<DriverConstructor> {
        self.drivers
            .get(name)
            .map(|r| Arc::clone(&r.constructor))
            .ok_or_else(|| FsError::UnknownDriver(name.to_string()))
    }

    pub fn driver_info(&self, name: &str) -> Option<&DriverInfo> {
        self.drivers.get(name).map(|r| &r.info)
    }

    pub fn driver_info_map(&self) -> BTreeMap<String, DriverInfo> {
        self.drivers
            .iter()
            .map(|(name, r)| (name.clone(), r.info.clone()))
            .collect()
    }

    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

fn main_items(config: &DriverConfig) -> Vec<Item> {
    let mut items = vec![
        Item::new("mount_path", ItemType::String)
            .required()
            .help("Unique virtual path the storage is mounted at"),
        Item::new("order", ItemType::Number).help("Sort position among sibling mounts"),
        Item::new("remark", ItemType::Text),
    ];
    if !config.no_cache {
        items.push(
            Item::new("cache_expiration", ItemType::Number)
                .default_value("30")
                .required()
                .help("Listing cache lifetime in minutes"),
        );
    }
    if !config.only_proxy && !config.only_local {
        items.push(Item::new("web_proxy", ItemType::Bool));
        items.push(
            Item::new("webdav_policy", ItemType::Select)
                .options("redirect,use_proxy_url,native_proxy")
                .default_value("redirect")
                .required(),
        );
        if config.proxy_range_option {
            items.push(Item::new("proxy_range", ItemType::Bool).help("Requires web proxy"));
        }
    } else {
        items.push(
            Item::new("webdav_policy", ItemType::Select)
                .options("use_proxy_url,native_proxy")
                .default_value("native_proxy")
                .required(),
        );
    }
    items.push(Item::new("down_proxy_url", ItemType::Text));
    if config.local_sort {
        items.push(Item::new("order_by", ItemType::Select).options("name,size,modified"));
        items.push(Item::new("order_direction", ItemType::Select).options("asc,desc"));
    }
    items.push(Item::new("extract_folder", ItemType::Select).options("front,back"));
    items.push(
        Item::new("enable_sign", ItemType::Bool)
            .default_value("false")
            .required(),
    );
    items
}

fn additional_items(schema: &Value, config: &DriverConfig) -> Vec<Item> {
    let defs = schema.get("$defs").unwrap_or(&Value::Null);
    let mut items = Vec::new();
    collect_items(schema, defs, config, &mut items, 0);
    items
}

/// Walk an object schema's properties, flattening nested objects.
fn collect_items(schema: &Value, defs: &Value, config: &DriverConfig, out: &mut Vec<Item>, depth: usize) {
    // Guards against self-referential definitions.
    if depth > 8 {
        return;
    }
    let schema = resolve(schema, defs);
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, prop) in props {
        let target = resolve(non_null(prop, defs), defs);
        if target.get("properties").is_some() {
            collect_items(target, defs, config, out, depth + 1);
            continue;
        }

        let options = enum_options(target);
        let kind = if !options.is_empty() {
            ItemType::Select
        } else {
            match first_type(target) {
                Some("integer" | "number") => ItemType::Number,
                Some("boolean") => ItemType::Bool,
                _ => ItemType::String,
            }
        };
        let help = prop
            .get("description")
            .or_else(|| target.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut item = Item::new(name, kind).help(help).options(&options.join(","));
        item.required = required.contains(&name.as_str());
        item.default = prop.get("default").map(default_string).unwrap_or_default();

        if matches!(name.as_str(), "root_folder_id" | "root_folder_path") {
            item.default = config.default_root.clone();
            if !config.default_root.is_empty() {
                item.required = true;
            }
        }
        out.push(item);
    }
}

/// Follow a local `$ref` into `$defs`.
fn resolve<'a>(schema: &'a Value, defs: &'a Value) -> &'a Value {
    schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix("#/$defs/"))
        .and_then(|name| defs.get(name))
        .unwrap_or(schema)
}

/// For `Option<T>` schemas (`anyOf: [T, null]`), pick `T`.
fn non_null<'a>(schema: &'a Value, defs: &'a Value) -> &'a Value {
    let variants = schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array);
    match variants {
        Some(vs) if vs.iter().all(|v| v.get("const").is_none()) => vs
            .iter()
            .find(|v| resolve(v, defs).get("type").and_then(Value::as_str) != Some("null"))
            .unwrap_or(schema),
        _ => schema,
    }
}

fn first_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(ts) => ts.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

/// Choices of a string enum, whether spelled `enum` or `oneOf` of `const`s.
fn enum_options(schema: &Value) -> Vec<String> {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return values.iter().filter_map(Value::as_str).map(String::from).collect();
    }
    let variants = schema
        .get("oneOf")
        .or_else(|| schema.get("anyOf"))
        .and_then(Value::as_array);
    match variants {
        Some(vs) if !vs.is_empty() && vs.iter().all(|v| v.get("const").is_some()) => vs
            .iter()
            .filter_map(|v| v.get("const").and_then(Value::as_str))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn default_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
