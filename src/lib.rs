/*!
# axon

Transport of activation batches through the connections of a neural network.

An [`Axon`](axon::Axon) connects a group of left neurons to a group of right neurons. Pushing left
to right is inference, pushing right to left propagates gradients (or reconstructs the input)
and, for trainable axons, computes the weight gradients an optimizer applies through the
`adjust_*` methods.

Spatial axons (convolution and pooling) expand their input into window columns with the
[`reformat`] module so that they reduce to dense matrix products.

# Example
```
# use anyhow::Result;
# fn main() -> Result<()> {
use axon::{
    activation::ActivationBatch,
    axon::{Axon, FullyConnectedAxon},
    context::AxonContext,
    neurons::Neurons,
};
use ndarray::array;

let axon = Axon::from(FullyConnectedAxon::from_parts(
    Neurons::new(3, true),
    Neurons::new(2, false),
    Some(array![[1., 0., 1.], [0., 1., 1.]]),
    Some(array![1., 0.]),
    None,
)?);
let context = AxonContext::new();
let input = ActivationBatch::new(array![[2.], [3.], [1.]]).with_bias_row();
let forward = axon.push_left_to_right(&input, None, &context)?;
assert_eq!(forward.output().data(), array![[4.], [4.]]);
let backward = axon.push_right_to_left(forward.output(), Some(&forward), &context)?;
assert_eq!(backward.output().feature_count(), 3);
assert!(backward.gradients().is_some());
# Ok(())
# }
```
*/
#![warn(missing_docs)]

pub mod activation;
pub mod axon;
pub mod context;
/// Errors.
pub mod error;
pub mod neurons;
pub mod reformat;
pub mod weights;

pub use axon::{Axon, AxonActivation, AxonKind, SharedAxon};
pub use error::AxonError;
