//! Ordered fan-out over independent units.
//!
//! With the `parallel` feature the map runs on the rayon pool; otherwise it is
//! a plain sequential map. Both preserve input order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
pub(crate) fn map_ordered<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    items.par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_ordered<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    F: Fn(&T) -> R,
{
    items.iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_input_order() {
        let items: Vec<u32> = (0..257).collect();
        let out = map_ordered(&items, |v| v * 2);
        assert_eq!(out, items.iter().map(|v| v * 2).collect::<Vec<_>>());
    }
}
