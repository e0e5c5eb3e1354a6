use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

pub const DEFAULT_TEXT_MODEL: &str = "yorickvp/llava-13b";
pub const DEFAULT_IMAGE_MODEL: &str = "stability-ai/sdxl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Text,
    Vision,
    Image,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vision => "vision",
            Self::Image => "image",
        }
    }

    /// Capabilities that may stand in when this one has no model.
    pub(crate) fn fallbacks(&self) -> &'static [Capability] {
        match self {
            Self::Text => &[Capability::Vision],
            Self::Vision => &[Capability::Text],
            Self::Image => &[],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hosted model reference, `owner/name` with an optional pinned `:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
    pub version: Option<String>,
}

impl ModelRef {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("Model reference is empty.".to_string());
        }
        let (path, version) = match trimmed.split_once(':') {
            Some((path, version)) => (path.trim(), Some(version.trim())),
            None => (trimmed, None),
        };
        let Some((owner, name)) = path.split_once('/') else {
            return Err(format!(
                "Model reference '{trimmed}' must look like owner/name[:version]."
            ));
        };
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(format!(
                "Model reference '{trimmed}' must look like owner/name[:version]."
            ));
        }
        if version.is_some_and(str::is_empty) {
            return Err(format!("Model reference '{trimmed}' has an empty version."));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    /// Pins `version` unless the reference already carries one.
    pub fn with_default_version(mut self, version: Option<&str>) -> Self {
        if self.version.is_none() {
            self.version = version
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
        }
        self
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}:{}", self.owner, self.name, version),
            None => write!(f, "{}/{}", self.owner, self.name),
        }
    }
}

impl FromStr for ModelRef {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

/// Which model serves which capability for a session.
#[derive(Debug, Clone, Default)]
pub struct ModelRoster {
    models: IndexMap<Capability, ModelRef>,
}

impl ModelRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        let mut roster = Self::new();
        if let Ok(model) = ModelRef::parse(DEFAULT_TEXT_MODEL) {
            roster.insert(Capability::Text, model);
        }
        if let Ok(model) = ModelRef::parse(DEFAULT_IMAGE_MODEL) {
            roster.insert(Capability::Image, model);
        }
        roster
    }

    pub fn insert(&mut self, capability: Capability, model: ModelRef) -> Option<ModelRef> {
        self.models.insert(capability, model)
    }

    pub fn get(&self, capability: Capability) -> Option<&ModelRef> {
        self.models.get(&capability)
    }

    pub fn list(&self) -> impl Iterator<Item = (&Capability, &ModelRef)> {
        self.models.iter()
    }

    /// Models without a version; Replicate serves those only for official models.
    pub fn unpinned(&self) -> impl Iterator<Item = (Capability, &ModelRef)> {
        self.models
            .iter()
            .filter(|(_, model)| model.version.is_none())
            .map(|(capability, model)| (*capability, model))
    }
}
