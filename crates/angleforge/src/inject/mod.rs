//! Template injection: content variant + layout → renderable HTML.
//!
//! Layouts mark slots with a `data-slot="<name>"` attribute. The element's
//! inner content is replaced by the variant's value for that name; slots
//! without a value keep their authored content.

mod layout;

use std::cell::Cell;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use thiserror::Error;

use crate::extract::ContentVariant;

pub use layout::{LayoutRegistry, LayoutTemplate, DEFAULT_LAYOUT_HTML};

/// Attribute naming a slot in a layout.
pub const SLOT_ATTRIBUTE: &str = "data-slot";

/// Reserved slot filled with the angle label when the variant has no value
/// of its own for it.
pub const ANGLE_SLOT: &str = "angle";

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("Unknown layout template '{0}'")]
    UnknownLayout(String),

    #[error("Failed to rewrite layout '{layout_id}': {message}")]
    Rewrite { layout_id: String, message: String },

    #[error("Layout '{layout_id}' has no slot for any content of angle '{angle_label}'")]
    NoMatchingSlots {
        layout_id: String,
        angle_label: String,
    },
}

/// Stitches variant content into layouts.
#[derive(Debug, Clone, Copy)]
pub struct TemplateInjector {
    sanitize: bool,
}

impl Default for TemplateInjector {
    fn default() -> Self {
        Self { sanitize: true }
    }
}

impl TemplateInjector {
    pub fn new(sanitize: bool) -> Self {
        Self { sanitize }
    }

    /// Renders `variant` into `layout`.
    ///
    /// Fails with [`InjectionError::NoMatchingSlots`] when none of the
    /// variant's content found a slot, since the output would then carry
    /// nothing of the variant beyond its label.
    pub fn inject(
        &self,
        variant: &ContentVariant,
        layout: &LayoutTemplate,
    ) -> Result<String, InjectionError> {
        let filled = Rc::new(Cell::new(0usize));
        let sanitize = self.sanitize;

        let html = rewrite_str(
            &layout.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("[data-slot]", {
                    let filled = Rc::clone(&filled);
                    move |el| {
                        let Some(name) = el.get_attribute(SLOT_ATTRIBUTE) else {
                            return Ok(());
                        };
                        let name = name.trim();
                        if !el.can_have_content() {
                            return Ok(());
                        }
                        if let Some(value) = lookup(variant, name) {
                            let value = if sanitize {
                                ammonia::clean(value)
                            } else {
                                value.to_string()
                            };
                            el.set_inner_content(&value, ContentType::Html);
                            filled.set(filled.get() + 1);
                        } else if name == ANGLE_SLOT {
                            el.set_inner_content(&variant.angle_label, ContentType::Text);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| InjectionError::Rewrite {
            layout_id: layout.id.clone(),
            message: err.to_string(),
        })?;

        if filled.get() == 0 && !variant.content.is_empty() {
            return Err(InjectionError::NoMatchingSlots {
                layout_id: layout.id.clone(),
                angle_label: variant.angle_label.clone(),
            });
        }

        Ok(html)
    }
}

/// Value for slot `name`: the exact key, otherwise the first flattened key
/// whose last segment is `name` (so `hero.headline` fills `headline`).
fn lookup<'a>(variant: &'a ContentVariant, name: &str) -> Option<&'a str> {
    if let Some(value) = variant.content.get(name) {
        return Some(value);
    }
    let suffix = format!(".{}", name);
    variant
        .content
        .iter()
        .find(|(key, _)| key.ends_with(&suffix))
        .map(|(_, value)| value.as_str())
}

/// Renders with the default (sanitizing) injector.
pub fn inject(variant: &ContentVariant, layout: &LayoutTemplate) -> Result<String, InjectionError> {
    TemplateInjector::default().inject(variant, layout)
}
