// ── YAML seed ──
//
// Templates and device configurations pre-loaded into an empty store.
// Templates are keyed by an alias in the file and by the `NAME` inside
// their definition in the store; device entries refer to templates by
// alias and are keyed by topic in the file.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use tasmo_core::model::{COMMON_CONFIGURATION_ID, normalize_id};
use tasmo_core::{CoreError, DeviceConfiguration, DeviceStore, Template};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seed file must have a 'templates' section")]
    MissingTemplates,

    #[error("template definition ({definition}) has no \"NAME\" property")]
    TemplateName { definition: String },

    #[error("invalid template definition ({definition})")]
    InvalidTemplate { definition: String },

    #[error("template '{template}' for device '{device}' not found in 'templates' section")]
    UnknownTemplate { template: String, device: String },

    #[error("device '{device}' has no 'mac'")]
    MissingMac { device: String },

    #[error("malformed seed file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
}

// ── File shape ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    templates: Option<IndexMap<String, TemplateEntry>>,
    #[serde(default)]
    devices: IndexMap<String, DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateEntry {
    definition: String,
    image_url: Option<String>,
    thumbnail_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEntry {
    mac: Option<String>,
    friendly_names: Option<Vec<String>>,
    setup_commands: Option<String>,
    template_name: Option<String>,
    disabled: Option<bool>,
}

// ── Seed ────────────────────────────────────────────────────────────

/// Validated seed contents, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub templates: Vec<Template>,
    pub configurations: Vec<DeviceConfiguration>,
}

/// How many records [`Seed::apply`] actually inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedOutcome {
    pub templates: usize,
    pub configurations: usize,
}

impl Seed {
    /// Insert every template and configuration not already stored.
    /// Existing records win, so operator edits survive restarts.
    pub async fn apply(&self, store: &dyn DeviceStore) -> Result<SeedOutcome, CoreError> {
        let templates = store.insert_templates(self.templates.clone()).await?;
        let configurations = store
            .insert_configurations(self.configurations.clone())
            .await?;
        Ok(SeedOutcome {
            templates,
            configurations,
        })
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == name)
    }

    pub fn configuration(&self, id: &str) -> Option<&DeviceConfiguration> {
        self.configurations.iter().find(|c| c.id == id)
    }
}

pub fn load_seed(path: &Path) -> Result<Seed, SeedError> {
    let text = std::fs::read_to_string(path)?;
    parse_seed(&text)
}

pub fn parse_seed(text: &str) -> Result<Seed, SeedError> {
    let file: SeedFile = serde_yaml::from_str(text)?;
    let entries = file.templates.ok_or(SeedError::MissingTemplates)?;

    // alias → NAME
    let mut names = IndexMap::with_capacity(entries.len());
    let mut templates = Vec::with_capacity(entries.len());
    for (alias, entry) in entries {
        let name = template_name(&entry.definition)?;
        names.insert(alias, name.clone());
        templates.push(Template {
            id: name,
            definition: entry.definition,
            image_url: entry.image_url,
            thumbnail_url: entry.thumbnail_url,
        });
    }

    let mut configurations = Vec::with_capacity(file.devices.len());
    for (key, entry) in file.devices {
        let configuration = if key == COMMON_CONFIGURATION_ID {
            DeviceConfiguration {
                id: COMMON_CONFIGURATION_ID.to_owned(),
                friendly_names: entry.friendly_names,
                setup_commands: entry.setup_commands,
                disabled: entry.disabled,
                ..DeviceConfiguration::default()
            }
        } else {
            let Some(mac) = entry.mac.as_deref() else {
                return Err(SeedError::MissingMac { device: key });
            };
            let template_name = match entry.template_name {
                Some(alias) => match names.get(&alias) {
                    Some(name) => Some(name.clone()),
                    None => {
                        return Err(SeedError::UnknownTemplate {
                            template: alias,
                            device: key,
                        });
                    }
                },
                None => None,
            };
            DeviceConfiguration {
                id: normalize_id(mac),
                disabled: entry.disabled,
                friendly_names: entry.friendly_names,
                setup_commands: entry.setup_commands,
                template_name,
                topic_name: Some(key),
            }
        };
        configurations.push(configuration);
    }

    Ok(Seed {
        templates,
        configurations,
    })
}

/// The `NAME` inside a template definition.
fn template_name(definition: &str) -> Result<String, SeedError> {
    let parsed: Value =
        serde_json::from_str(definition).map_err(|_| SeedError::InvalidTemplate {
            definition: definition.to_owned(),
        })?;
    parsed
        .get("NAME")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| SeedError::TemplateName {
            definition: definition.to_owned(),
        })
}
