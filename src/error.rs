use std::alloc::Layout;

/// Returned when invoking a [`Function`](crate::Function) that holds no callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("empty function call")]
pub struct EmptyCallError;

/// Returned when the heap allocation backing a [boxed] value fails.
///
/// [boxed]: crate::Policy::Boxed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("memory allocation of {} bytes failed", .layout.size())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout of the allocation that failed.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Diverges through the global allocation error handler.
    pub(crate) fn handle(self) -> ! {
        std::alloc::handle_alloc_error(self.layout)
    }
}
