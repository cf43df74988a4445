//! Command renderer.
//!
//! Fills a parsed [`Template`] with [`Bindings`]:
//! - references become their engine-side placeholder (via the reference table)
//! - sequences and mappings are rendered recursively, preserving order
//! - primitives use the target engine's literal syntax
//!
//! Rendering is pure apart from read access to the reference table.

mod template;
mod value;

use std::fmt;
use std::sync::Arc;

pub use template::{Template, is_identifier};
pub use value::{Bindable, Bindings, Literal, LiteralSyntax, ScriptSyntax};

use crate::error::{BridgeError, Result};
use crate::reference::ReferenceTable;
use template::Segment;

/// A fully rendered command, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Command(String);

impl Command {
    /// Wrap pre-rendered engine code (no placeholder substitution).
    pub fn raw(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct Renderer {
    syntax: Arc<dyn LiteralSyntax>,
}

impl Renderer {
    pub fn new(syntax: Arc<dyn LiteralSyntax>) -> Self {
        Self { syntax }
    }

    pub fn render(
        &self,
        template: &Template,
        bindings: &Bindings,
        refs: &ReferenceTable,
    ) -> Result<Command> {
        let mut out = String::with_capacity(template.source().len());
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| BridgeError::MissingBinding { name: name.clone() })?;
                    self.render_value(value, refs, &mut out)?;
                }
            }
        }
        Ok(Command(out))
    }

    fn render_value(&self, value: &Bindable, refs: &ReferenceTable, out: &mut String) -> Result<()> {
        match value {
            Bindable::Literal(literal) => self.syntax.literal(literal, out),
            Bindable::Reference(reference) => {
                out.push_str(&refs.placeholder_for(reference)?);
                Ok(())
            }
            Bindable::Sequence(items) => {
                let rendered = items
                    .iter()
                    .map(|item| self.render_to_string(item, refs))
                    .collect::<Result<Vec<_>>>()?;
                self.syntax.sequence(rendered, out);
                Ok(())
            }
            Bindable::Mapping(entries) => {
                let rendered = entries
                    .iter()
                    .map(|(key, item)| Ok((key.as_str(), self.render_to_string(item, refs)?)))
                    .collect::<Result<Vec<_>>>()?;
                self.syntax.mapping(rendered, out);
                Ok(())
            }
        }
    }

    fn render_to_string(&self, value: &Bindable, refs: &ReferenceTable) -> Result<String> {
        let mut out = String::new();
        self.render_value(value, refs, &mut out)?;
        Ok(out)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Arc::new(ScriptSyntax))
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer").finish_non_exhaustive()
    }
}

/// Render with the default script syntax.
pub fn render(template: &Template, bindings: &Bindings, refs: &ReferenceTable) -> Result<Command> {
    Renderer::default().render(template, bindings, refs)
}
