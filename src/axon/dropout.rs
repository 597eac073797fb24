use crate::{context::AxonContext, error::AxonError};
use anyhow::{bail, Error, Result};
use ndarray::{Array2, ArrayView2};
use rand::{
    distributions::{Bernoulli, Distribution},
    rngs::StdRng,
    Rng, SeedableRng,
};

fn sample_mask<R: Rng>(
    rng: &mut R,
    bernoulli: &Bernoulli,
    dim: (usize, usize),
) -> Array2<f32> {
    Array2::from_shape_simple_fn(dim, || {
        if bernoulli.sample(rng) {
            1.
        } else {
            0.
        }
    })
}

/// A binary mask where each cell is 1 with the keep probability of `context`.
pub(crate) fn mask(dim: (usize, usize), context: &AxonContext) -> Result<Array2<f32>> {
    let keep_probability = context.keep_probability();
    // A deserialized context skips the builder check.
    if !(keep_probability > 0. && keep_probability <= 1.) {
        bail!(AxonError::InvalidProbability(keep_probability));
    }
    let bernoulli = Bernoulli::new(keep_probability.into())
        .map_err(|_| Error::new(AxonError::InvalidProbability(keep_probability)))?;
    let mask = match context.seed() {
        Some(seed) => sample_mask(&mut StdRng::seed_from_u64(seed), &bernoulli, dim),
        None => sample_mask(&mut rand::thread_rng(), &bernoulli, dim),
    };
    Ok(mask)
}

/// Masks `input` and scales the survivors by the inverse keep probability.
///
/// Returns the post dropout input and the binary mask.
pub(crate) fn apply(
    input: ArrayView2<f32>,
    context: &AxonContext,
) -> Result<(Array2<f32>, Array2<f32>)> {
    let mask = mask(input.dim(), context)?;
    let scale = context.keep_probability().recip();
    let mut output = input.to_owned();
    output.zip_mut_with(&mask, |x, m| *x *= m * scale);
    Ok((output, mask))
}
