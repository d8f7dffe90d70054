// ============================================================================
// MULTI-SURFACE SELECTOR — which catalog masks (or the custom raster) are active
// ============================================================================
//
//   Idle ──load──▶ MasksLoaded ──toggle──▶ SingleSelected ⇄ MultiSelected
//                       │                         │
//                       └──── drawing tool ───────┴──▶ CustomDrawn
//
// Catalog selection and the custom raster are mutually exclusive: entering
// CustomDrawn clears the catalog selection, and selecting a catalog mask (the
// select tool) leaves CustomDrawn.

use serde::{Deserialize, Serialize};

use crate::canvas::MaskError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorState {
    Idle,
    MasksLoaded,
    SingleSelected,
    MultiSelected,
    CustomDrawn,
}

impl SelectorState {
    pub fn label(&self) -> &'static str {
        match self {
            SelectorState::Idle => "Idle",
            SelectorState::MasksLoaded => "MasksLoaded",
            SelectorState::SingleSelected => "SingleSelected",
            SelectorState::MultiSelected => "MultiSelected",
            SelectorState::CustomDrawn => "CustomDrawn",
        }
    }
}

/// The active region: an ordered set of catalog indices or the custom raster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    Catalog(Vec<usize>),
    Custom,
}

#[derive(Clone, Debug, Default)]
pub struct Selector {
    catalog_len: Option<usize>,
    /// Insertion-ordered, no duplicates.
    selected: Vec<usize>,
    custom: bool,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh catalog arrived; any previous selection is dropped.
    pub fn load(&mut self, catalog_len: usize) {
        self.catalog_len = Some(catalog_len);
        self.selected.clear();
        self.custom = false;
    }

    pub fn state(&self) -> SelectorState {
        if self.custom {
            return SelectorState::CustomDrawn;
        }
        match (self.catalog_len, self.selected.len()) {
            (None, _) => SelectorState::Idle,
            (Some(_), 0) => SelectorState::MasksLoaded,
            (Some(_), 1) => SelectorState::SingleSelected,
            (Some(_), _) => SelectorState::MultiSelected,
        }
    }

    fn check(&self, index: usize) -> Result<(), MaskError> {
        let len = self.catalog_len.unwrap_or(0);
        if index < len {
            Ok(())
        } else {
            Err(MaskError::InvalidIndex { index, len })
        }
    }

    /// Add `index` to the selection (leaves CustomDrawn).  Returns `false`
    /// when it was already selected.
    pub fn select(&mut self, index: usize) -> Result<bool, MaskError> {
        self.check(index)?;
        self.custom = false;
        if self.selected.contains(&index) {
            return Ok(false);
        }
        self.selected.push(index);
        Ok(true)
    }

    /// Remove `index` from the selection.  Returns `false` when it was not
    /// selected.
    pub fn deselect(&mut self, index: usize) -> Result<bool, MaskError> {
        self.check(index)?;
        let before = self.selected.len();
        self.selected.retain(|&i| i != index);
        Ok(self.selected.len() != before)
    }

    /// Click semantics: unselected → selected, selected → unselected.
    /// Returns the new membership of `index`.
    pub fn toggle(&mut self, index: usize) -> Result<bool, MaskError> {
        self.check(index)?;
        if !self.custom && self.selected.contains(&index) {
            self.deselect(index)?;
            Ok(false)
        } else {
            self.select(index)
        }
    }

    /// A drawing tool was invoked: the catalog selection is cleared and
    /// handed back so the caller can seed the working raster from it.
    pub fn enter_custom(&mut self) -> Vec<usize> {
        self.custom = true;
        std::mem::take(&mut self.selected)
    }

    /// The select tool came back: CustomDrawn is cleared.
    pub fn leave_custom(&mut self) {
        self.custom = false;
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    pub fn selection(&self) -> Selection {
        if self.custom {
            Selection::Custom
        } else {
            Selection::Catalog(self.selected.clone())
        }
    }

    /// Restore a previously captured selection (snapshot load).  Indices that
    /// no longer exist are dropped.
    pub fn restore(&mut self, selection: &Selection) {
        match selection {
            Selection::Custom => {
                self.selected.clear();
                self.custom = true;
            }
            Selection::Catalog(indices) => {
                self.custom = false;
                self.selected.clear();
                let len = self.catalog_len.unwrap_or(0);
                for &i in indices {
                    if i < len && !self.selected.contains(&i) {
                        self.selected.push(i);
                    }
                }
            }
        }
    }

    /// Drop every selection but keep the loaded catalog.
    pub fn clear(&mut self) {
        self.selected.clear();
        self.custom = false;
    }

    /// Composite is enabled only with something selected.  In CustomDrawn
    /// the caller still has to check the raster is non-empty.
    pub fn has_selection(&self) -> bool {
        self.custom || !self.selected.is_empty()
    }
}
