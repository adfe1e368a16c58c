//! Layout templates and their registry.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::InjectionError;
use crate::config::LayoutsConfig;
use crate::error::ConfigError;

/// Layout used when no configured layout overrides the `default` id.
pub const DEFAULT_LAYOUT_HTML: &str = r##"<article class="angle">
  <header>
    <p class="angle-label" data-slot="angle"></p>
    <h1 data-slot="headline"></h1>
    <h2 data-slot="subheadline"></h2>
  </header>
  <section data-slot="body"></section>
  <footer><a class="cta" data-slot="cta" href="#">Learn more</a></footer>
</article>
"##;

/// An HTML layout with named slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTemplate {
    pub id: String,
    pub html: String,
}

/// Every layout known to the process, by id.
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    layouts: BTreeMap<String, LayoutTemplate>,
    default_id: String,
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        let mut registry = Self {
            layouts: BTreeMap::new(),
            default_id: crate::config::schema::default_layout(),
        };
        registry.insert(LayoutTemplate {
            id: registry.default_id.clone(),
            html: DEFAULT_LAYOUT_HTML.to_string(),
        });
        registry
    }
}

impl LayoutRegistry {
    /// Builds the registry from configuration: the built-in layout first,
    /// then the layout directory, then inline templates. Later sources win
    /// on id clashes.
    pub fn from_config(config: &LayoutsConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        registry.default_id = config.default_layout.clone();

        if let Some(dir) = &config.directory {
            registry.load_directory(dir)?;
        }

        for (id, html) in &config.templates {
            registry.insert(LayoutTemplate {
                id: id.clone(),
                html: html.clone(),
            });
        }

        if !registry.layouts.contains_key(&registry.default_id) {
            return Err(ConfigError::validation(format!(
                "layouts.default_layout '{}' is not a known layout",
                registry.default_id
            )));
        }

        info!(
            "Loaded {} layout template(s), default '{}'",
            registry.layouts.len(),
            registry.default_id
        );
        Ok(registry)
    }

    fn load_directory(&mut self, dir: &Path) -> Result<(), ConfigError> {
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| ConfigError::ScanLayouts {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_html = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("html"));
            if !is_html {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping layout with non UTF-8 name: {}", path.display());
                continue;
            };
            if id.starts_with('.') {
                continue;
            }

            let html = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadLayout {
                path: path.to_path_buf(),
                source: e,
            })?;
            debug!("Loaded layout '{}' from {}", id, path.display());
            self.insert(LayoutTemplate {
                id: id.to_string(),
                html,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, layout: LayoutTemplate) {
        if self.layouts.contains_key(&layout.id) {
            debug!("Layout '{}' replaced", layout.id);
        }
        self.layouts.insert(layout.id.clone(), layout);
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// The layout named by `id`, or the default layout when `id` is `None`.
    pub fn resolve(&self, id: Option<&str>) -> Result<&LayoutTemplate, InjectionError> {
        let id = id.unwrap_or(self.default_id.as_str());
        self.layouts
            .get(id)
            .ok_or_else(|| InjectionError::UnknownLayout(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.layouts.keys().map(String::as_str)
    }
}
