//! Pooled item and component types used across benchmarks.

use std::any::{Any, TypeId};

use rusty_pool::pool::Pooled;

/// The pooled entity record used by the tenant benchmarks.
pub type BenchItem = Pooled<u64>;

macro_rules! components {
    ($($name:ident),*) => {
        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $name(pub f32);
        )*
    };
}

components!(C1, C2, C3, C4, C5, C6, C7, C8);

/// The first `n` component types, `n <= 8`.
pub fn component_types(n: usize) -> Vec<TypeId> {
    [
        TypeId::of::<C1>(),
        TypeId::of::<C2>(),
        TypeId::of::<C3>(),
        TypeId::of::<C4>(),
        TypeId::of::<C5>(),
        TypeId::of::<C6>(),
        TypeId::of::<C7>(),
        TypeId::of::<C8>(),
    ]
    .into_iter()
    .take(n)
    .collect()
}

/// One instance of each of the first `n` component types, in reverse order so the
/// array always needs sorting.
pub fn components(n: usize) -> Vec<Box<dyn Any + Send + Sync>> {
    let all: [Box<dyn Any + Send + Sync>; 8] = [
        Box::new(C1(1.0)),
        Box::new(C2(2.0)),
        Box::new(C3(3.0)),
        Box::new(C4(4.0)),
        Box::new(C5(5.0)),
        Box::new(C6(6.0)),
        Box::new(C7(7.0)),
        Box::new(C8(8.0)),
    ];
    let mut components: Vec<_> = all.into_iter().take(n).collect();
    components.reverse();
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_sets_have_requested_size() {
        assert_eq!(component_types(4).len(), 4);
        assert_eq!(components(8).len(), 8);
        assert!(components(2)[0].is::<C2>());
    }
}
