//! The document's color palette.

use crate::error::{ModelError, Result};
use std::sync::Arc;
use tracing::debug;
use weft_bind::{CrdtMappedList, SequenceEvent, ValueMapper};
use weft_store::{CrdtRoot, Subscription};

/// Name of the root list holding the palette.
pub const PALETTE_ROOT: &str = "palette";

/// Colors a fresh document starts with.
pub const DEFAULT_COLORS: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
];

/// `#rgb` or `#rrggbb`, lower-cased.
fn normalize(color: &str) -> Result<String> {
    let color = color.trim().to_ascii_lowercase();
    let digits = color.strip_prefix('#').unwrap_or("");
    let valid = matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ModelError::InvalidColor(color));
    }
    Ok(color)
}

/// An ordered list of colors.
#[derive(Clone)]
pub struct DiagramPalette {
    colors: CrdtMappedList<String>,
}

impl DiagramPalette {
    pub fn new(root: &dyn CrdtRoot) -> Result<Self> {
        let list = root.get_list(PALETTE_ROOT)?;
        Ok(Self {
            colors: CrdtMappedList::new(list, Arc::new(ValueMapper::<String>::new())),
        })
    }

    pub fn colors(&self) -> Vec<String> {
        self.colors.to_vec()
    }

    pub fn color(&self, index: usize) -> Option<String> {
        self.colors.get(index)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn add_color(&self, color: &str) -> Result<()> {
        self.colors.push(normalize(color)?)?;
        Ok(())
    }

    pub fn set_color(&self, index: usize, color: &str) -> Result<()> {
        self.colors.set(index, normalize(color)?)?;
        Ok(())
    }

    /// Remove the color at `index`, returning it.
    pub fn remove_color(&self, index: usize) -> Result<Option<String>> {
        Ok(self.colors.remove(index)?)
    }

    /// Replace the whole palette.
    pub fn set_colors<I, S>(&self, colors: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let colors = colors
            .into_iter()
            .map(|c| normalize(c.as_ref()))
            .collect::<Result<Vec<String>>>()?;
        self.colors.set_all(colors)?;
        Ok(())
    }

    /// Seed [`DEFAULT_COLORS`] if the palette is empty. Returns whether it
    /// wrote.
    pub fn init_defaults(&self) -> Result<bool> {
        if !self.colors.is_empty() {
            return Ok(false);
        }
        debug!(count = DEFAULT_COLORS.len(), "Seeding default palette");
        self.set_colors(DEFAULT_COLORS)?;
        Ok(true)
    }

    /// Called for every remote palette change.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SequenceEvent<String>) + Send + Sync + 'static,
    {
        self.colors.on_change(listener)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.colors.to_json()
    }
}

impl std::fmt::Debug for DiagramPalette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.colors()).finish()
    }
}
