use once_cell::sync::OnceCell;

use super::EngineError;

/// Slot for a lazily loaded model.
///
/// Two states only: empty, then filled. The first caller runs the loader while
/// concurrent callers wait on it; a failed load leaves the slot empty so the
/// next caller tries again. Nothing ever empties a filled slot.
pub struct EngineHandle<T> {
    cell: OnceCell<T>,
}

impl<T> EngineHandle<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub fn get_or_load<F>(&self, load: F) -> Result<&T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError>,
    {
        self.cell.get_or_try_init(load)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}
