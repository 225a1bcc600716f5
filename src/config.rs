//! Configuration for index building and rendering.
//!
//! Configuration is always passed explicitly: to the [`crate::DatasetBuilder`], the
//! indexer and the renderer. There are no process-wide switches.
use serde::de::Error;

/// Spatial index variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Depth-bounded quad-tree with lowest-common-ancestor placement.
    #[default]
    Quad,
    /// Sort-tile-recursive packed R-tree.
    RTree,
    /// In-memory R*-tree; nothing is written to disk.
    Memory,
}

impl IndexKind {
    /// Conventional file extension for the on-disk variants.
    pub fn extension(self) -> &'static str {
        match self {
            IndexKind::Quad => "qix",
            IndexKind::RTree | IndexKind::Memory => "sidx",
        }
    }
}

/// Spatial index build options.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    #[serde(default)]
    pub kind: IndexKind,

    /// Entries per leaf before a quad-tree leaf splits; leaf size for the R-tree.
    #[serde(default = "IndexConfig::default_node_capacity")]
    pub node_capacity: usize,

    /// Maximum quad-tree depth (root is depth 0). Ignored by the R-tree.
    #[serde(default = "IndexConfig::default_max_depth")]
    pub max_depth: usize,
}

impl IndexConfig {
    const fn default_node_capacity() -> usize {
        16
    }

    const fn default_max_depth() -> usize {
        10
    }

    pub fn quad() -> Self {
        Self::default()
    }

    pub fn rtree() -> Self {
        Self::default().with_kind(IndexKind::RTree)
    }

    pub fn with_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Node capacity must be greater than zero");
        self.node_capacity = capacity;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node_capacity == 0 {
            return Err("Node capacity must be greater than zero".to_string());
        }
        if self.kind == IndexKind::RTree && self.node_capacity < 2 {
            return Err("R-tree node capacity must be at least 2".to_string());
        }
        if self.max_depth > 32 {
            return Err(format!(
                "Max depth {} is too large (limit 32)",
                self.max_depth
            ));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::default(),
            node_capacity: Self::default_node_capacity(),
            max_depth: Self::default_max_depth(),
        }
    }
}

/// Render pipeline switches.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Query the spatial index when one is available.
    #[serde(default = "RenderConfig::default_true")]
    pub use_index: bool,

    /// Elide sub-pixel features whose pixel has already been painted.
    #[serde(default = "RenderConfig::default_true")]
    pub use_screen_map: bool,

    /// Drop screen-space vertices closer than `generalization_distance` pixels.
    #[serde(default = "RenderConfig::default_true")]
    pub decimate: bool,

    #[serde(default = "RenderConfig::default_generalization_distance")]
    pub generalization_distance: f64,

    /// Compare spatial index and `.shx` record counts before trusting the index.
    #[serde(default = "RenderConfig::default_true")]
    pub check_index_staleness: bool,
}

impl RenderConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_generalization_distance() -> f64 {
        1.0
    }

    pub fn with_index(mut self, enabled: bool) -> Self {
        self.use_index = enabled;
        self
    }

    pub fn with_screen_map(mut self, enabled: bool) -> Self {
        self.use_screen_map = enabled;
        self
    }

    pub fn with_decimation(mut self, enabled: bool) -> Self {
        self.decimate = enabled;
        self
    }

    pub fn with_generalization_distance(mut self, pixels: f64) -> Self {
        assert!(
            pixels.is_finite() && pixels > 0.0,
            "Generalization distance must be positive"
        );
        self.generalization_distance = pixels;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.generalization_distance.is_finite() && self.generalization_distance > 0.0) {
            return Err(format!(
                "Generalization distance must be positive, got {}",
                self.generalization_distance
            ));
        }
        Ok(())
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            use_index: true,
            use_screen_map: true,
            decimate: true,
            generalization_distance: Self::default_generalization_distance(),
            check_index_staleness: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

impl Config {
    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.index.validate()?;
        self.render.validate()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
