use crate::closure::Trampoline;
use crate::context::GlueContext;
use crate::error::Result;
use crate::heap::HandleTable;
use crate::memory::{BufferId, LeElement, TypedView, TypedViewMut};

/// Everything the marshalling layer needs from the other side of the
/// boundary.
///
/// Implemented by the wasmtime embedding and by the in-process
/// `Sandbox` (behind the `sandbox` feature). Every method borrows `self` afresh,
/// so callers interleave host state, memory and guest calls sequentially
/// rather than holding one borrow across another.
pub trait Guest {
    fn glue(&mut self) -> &mut GlueContext;

    /// The current linear memory.
    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// `__wbindgen_malloc(size, align)`.
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32>;

    /// Whether the guest exports `__wbindgen_realloc`.
    fn has_realloc(&self) -> bool;

    /// `__wbindgen_realloc(ptr, old_size, new_size, align)`.
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32>;

    /// `__wbindgen_exn_store(idx)`.
    fn exn_store(&mut self, handle: u32) -> Result<()>;

    /// Call a closure trampoline with `(a, b, args...)`.
    fn call_trampoline(
        &mut self,
        trampoline: &Trampoline,
        a: u32,
        b: u32,
        args: &[u32],
    ) -> Result<()>;

    /// Call the destructor stored at `dtor` in the guest's function table.
    fn call_destructor(&mut self, dtor: u32, a: u32, b: u32) -> Result<()>;

    fn heap(&mut self) -> &mut HandleTable {
        &mut self.glue().heap
    }

    fn uint8(&mut self) -> TypedView<'_, u8> {
        refresh::<u8, Self>(self);
        TypedView::new(self.memory())
    }

    fn int32(&mut self) -> TypedView<'_, i32> {
        refresh::<i32, Self>(self);
        TypedView::new(self.memory())
    }

    fn float32(&mut self) -> TypedView<'_, f32> {
        refresh::<f32, Self>(self);
        TypedView::new(self.memory())
    }

    fn float64(&mut self) -> TypedView<'_, f64> {
        refresh::<f64, Self>(self);
        TypedView::new(self.memory())
    }

    fn uint8_mut(&mut self) -> TypedViewMut<'_, u8> {
        refresh::<u8, Self>(self);
        TypedViewMut::new(self.memory_mut())
    }

    fn int32_mut(&mut self) -> TypedViewMut<'_, i32> {
        refresh::<i32, Self>(self);
        TypedViewMut::new(self.memory_mut())
    }

    fn float64_mut(&mut self) -> TypedViewMut<'_, f64> {
        refresh::<f64, Self>(self);
        TypedViewMut::new(self.memory_mut())
    }
}

fn refresh<T: LeElement, G: Guest + ?Sized>(g: &mut G) {
    let id = BufferId::of(g.memory());
    g.glue().views.refresh_id(T::KIND, id);
}
