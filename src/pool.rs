//! Fixed-size pool of display compositors
//!
//! The pool holds exactly one [`DisplayCompositor`] per display slot. Its size is fixed at
//! compile time and every access is bounds checked.

use std::fmt;

use crate::display::DisplayCompositor;

/// One display compositor per display slot, indexed by display
pub struct DisplayPool<D, const N: usize> {
    slots: [D; N],
}

impl<D, const N: usize> DisplayPool<D, N> {
    /// Create a pool from already constructed slots
    pub fn new(slots: [D; N]) -> Self {
        DisplayPool { slots }
    }

    /// Amount of display slots
    pub const fn len(&self) -> usize {
        N
    }

    /// Returns `true` if the pool has no slots
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Display compositor of `display`
    pub fn get(&self, display: usize) -> Option<&D> {
        self.slots.get(display)
    }

    /// Mutable access to the display compositor of `display`
    pub fn get_mut(&mut self, display: usize) -> Option<&mut D> {
        self.slots.get_mut(display)
    }

    /// Iterate the slots in display order
    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.slots.iter()
    }

    /// Iterate the slots mutably in display order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.slots.iter_mut()
    }
}

impl<D: Default, const N: usize> Default for DisplayPool<D, N> {
    fn default() -> Self {
        DisplayPool {
            slots: std::array::from_fn(|_| D::default()),
        }
    }
}

impl<D: DisplayCompositor, const N: usize> DisplayPool<D, N> {
    /// Write the diagnostics of every slot, in display order
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.slots.iter().try_for_each(|slot| slot.dump(out))
    }
}

impl<D: fmt::Debug, const N: usize> fmt::Debug for DisplayPool<D, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}
