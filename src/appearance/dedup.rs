//! Deduplication of appearance coordinates.

pub use super::*;

use std::collections::{hash_map::Entry, HashMap};

/// The distinct coordinates of a ray batch and where each ray finds its own.
///
/// `uniques[inverse[i]] == coordinates[i]` for every ray `i`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UvDeduplication {
    /// Ray index to slot index in [`Self::uniques`].
    pub inverse: Vec<u32>,
    /// Distinct coordinates in first-seen order.
    pub uniques: Vec<Uv>,
}

impl UvDeduplication {
    /// Builds the distinct set in first-seen order with its inverse map.
    pub fn new(coordinates: &[Uv]) -> Self {
        let mut slots = HashMap::<Uv, u32>::with_capacity(coordinates.len());
        let mut uniques = Vec::new();
        let inverse = coordinates
            .iter()
            .map(|&uv| match slots.entry(uv) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    let slot = uniques.len() as u32;
                    uniques.push(uv);
                    *entry.insert(slot)
                },
            })
            .collect();

        Self { inverse, uniques }
    }

    /// The number of rays.
    #[inline]
    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    /// The number of distinct coordinates.
    #[inline]
    pub fn unique_count(&self) -> usize {
        self.uniques.len()
    }

    /// The inverse map as an index tensor.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[B]`
    pub fn inverse_tensor<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Tensor<B, 1, Int> {
        let inverse = self.inverse.iter().map(|&i| i as i64).collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(inverse, [self.len()]), device)
    }

    /// Gathers per-slot rows back to every ray.
    ///
    /// ## Shapes
    ///
    /// * `values` - `[U, S]`
    /// * `output` - `[B, S]`
    pub fn scatter<B: Backend>(
        &self,
        values: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let device = values.device();
        values.select(0, self.inverse_tensor(&device))
    }
}
