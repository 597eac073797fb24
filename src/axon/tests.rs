use super::*;
use crate::{
    activation::FeatureOrientation,
    neurons::{Neurons, Neurons3D},
    reformat::{Padding, SpatialConfig},
};
use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};

fn values(rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        ((i * 7 + j * 3) % 11) as f32 * 0.25 - 1.
    })
}

fn sequence(rows: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, 1), |(i, _)| i as f32 + 1.)
}

fn error(err: &anyhow::Error) -> &AxonError {
    err.downcast_ref::<AxonError>().unwrap()
}

fn scenario_axon(left_to_right_biases: Array1<f32>) -> Axon {
    FullyConnectedAxon::from_parts(
        Neurons::new(3, true),
        Neurons::new(2, false),
        Some(array![[1., 0., 1.], [0., 1., 1.]]),
        Some(left_to_right_biases),
        None,
    )
    .unwrap()
    .into()
}

#[test]
fn fully_connected_scenario() {
    let context = AxonContext::new();
    let input = ActivationBatch::new(array![[2.], [3.], [1.]]).with_bias_row();
    let axon = scenario_axon(array![1., 0.]);
    let activation = axon.push_left_to_right(&input, None, &context).unwrap();
    assert_eq!(activation.output().data(), array![[4.], [4.]]);
    assert_eq!(activation.direction(), Direction::LeftToRight);
    assert_eq!(activation.kind(), AxonKind::FullyConnected);
    let axon = scenario_axon(array![0., 0.]);
    let activation = axon.push_left_to_right(&input, None, &context).unwrap();
    assert_eq!(activation.output().data(), array![[3.], [4.]]);
}

#[test]
fn fully_connected_right_to_left_adds_biases() {
    let axon = Axon::from(
        FullyConnectedAxon::from_parts(
            Neurons::new(3, false),
            Neurons::new(2, true),
            Some(array![[1., 0., 1.], [0., 1., 1.]]),
            None,
            Some(array![1., 2., 3.]),
        )
        .unwrap(),
    );
    let activation = axon
        .push_right_to_left(
            &ActivationBatch::new(array![[1.], [2.]]),
            None,
            &AxonContext::new(),
        )
        .unwrap();
    assert_eq!(activation.output().data(), array![[2.], [4.], [6.]]);
    assert!(activation.gradients().is_none());
}

fn round_trip_axons() -> Vec<Axon> {
    vec![
        FullyConnectedAxon::new(Neurons::new(6, true), Neurons::new(4, true))
            .unwrap()
            .into(),
        ConvolutionalAxon::new(
            Neurons3D::new(5, 5, 2, true),
            Neurons3D::new(3, 3, 4, false),
            SpatialConfig::new()
                .with_filter([3, 3])
                .with_strides([2, 2])
                .with_padding(Padding::explicit(1, 1)),
        )
        .unwrap()
        .into(),
        ConvolutionalAxon::new(
            Neurons3D::new(3, 3, 2, false),
            Neurons3D::new(3, 3, 5, true),
            SpatialConfig::new(),
        )
        .unwrap()
        .into(),
        MaxPoolingAxon::new(
            Neurons3D::new(4, 4, 2, false),
            Neurons3D::new(2, 2, 2, false),
            SpatialConfig::new().with_strides([2, 2]),
        )
        .unwrap()
        .into(),
        AveragePoolingAxon::new(
            Neurons3D::new(5, 5, 3, false),
            Neurons3D::new(5, 5, 3, false),
            SpatialConfig::new()
                .with_filter([3, 3])
                .with_padding(Padding::Same),
        )
        .unwrap()
        .into(),
        ScaleAndShiftAxon::spatial(
            Neurons3D::new(3, 3, 2, true),
            Neurons3D::new(3, 3, 2, false),
            ScaleAndShiftConfig::new(),
        )
        .unwrap()
        .into(),
        PassThroughAxon::new(Neurons::new(7, false), Neurons::new(7, false))
            .unwrap()
            .into(),
    ]
}

#[test]
fn shape_round_trip() {
    let context = AxonContext::new();
    for axon in round_trip_axons() {
        let input = ActivationBatch::new(values(axon.left_neuron_count(), 3));
        let forward = axon.push_left_to_right(&input, None, &context).unwrap();
        assert_eq!(
            forward.output().data().dim(),
            (axon.right_neuron_count(), 3),
            "{:?}",
            axon.kind()
        );
        let backward = axon
            .push_right_to_left(forward.output(), Some(&forward), &context)
            .unwrap();
        assert_eq!(
            backward.output().data().dim(),
            input.data().dim(),
            "{:?}",
            axon.kind()
        );
        assert_eq!(
            backward.gradients().is_some(),
            axon.is_trainable(&context),
            "{:?}",
            axon.kind()
        );
    }
}

#[test]
fn convolution_matches_direct_windows() {
    let (id, od) = (2, 3);
    let kernel = values(od, id * 9);
    let biases = array![0.5, -1., 2.];
    let axon = Axon::from(
        ConvolutionalAxon::from_parts(
            Neurons3D::new(4, 4, id, true),
            Neurons3D::new(2, 2, od, false),
            SpatialConfig::new()
                .with_filter([3, 3])
                .with_strides([2, 2])
                .with_padding(Padding::explicit(1, 1)),
            Some(kernel.clone()),
            Some(biases.clone()),
            None,
        )
        .unwrap(),
    );
    let input = values(id * 16, 2);
    let activation = axon
        .push_left_to_right(&ActivationBatch::new(input.clone()), None, &AxonContext::new())
        .unwrap();
    let mut expected = Array2::<f32>::zeros((od * 4, 2));
    for o in 0..od {
        for (or, oc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            for e in 0..2 {
                let mut sum = biases[o];
                for i in 0..id {
                    for sr in 0..3 {
                        for sc in 0..3 {
                            let (ir, ic) = (or * 2 + sr, oc * 2 + sc);
                            if ir < 1 || ic < 1 || ir > 4 || ic > 4 {
                                continue;
                            }
                            let (ir, ic) = (ir - 1, ic - 1);
                            sum += kernel[(o, i * 9 + sr * 3 + sc)] * input[(i * 16 + ir * 4 + ic, e)];
                        }
                    }
                }
                expected[(o * 4 + or * 2 + oc, e)] = sum;
            }
        }
    }
    assert_relative_eq!(activation.output().data(), expected.view(), epsilon = 1e-4);
}

#[test]
fn convolution_right_to_left_is_adjoint() {
    let axon = Axon::from(
        ConvolutionalAxon::new(
            Neurons3D::new(5, 5, 2, false),
            Neurons3D::new(3, 3, 2, false),
            SpatialConfig::new()
                .with_filter([3, 3])
                .with_strides([2, 2])
                .with_padding(Padding::explicit(1, 1)),
        )
        .unwrap(),
    );
    let context = AxonContext::new();
    let x = values(50, 2);
    let g = values(18, 2).mapv(|v| v * 0.5 + 0.25);
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(x.clone()), None, &context)
        .unwrap();
    let backward = axon
        .push_right_to_left(&ActivationBatch::new(g.clone()), None, &context)
        .unwrap();
    let lhs = (&forward.output().data() * &g).sum();
    let rhs = (&backward.output().data() * &x).sum();
    assert_relative_eq!(lhs, rhs, epsilon = 1e-4, max_relative = 1e-4);
}

#[test]
fn one_by_one_convolution_mixes_channels() {
    let kernel = array![[1., 2.], [0., -1.], [3., 0.5]];
    let axon = Axon::from(
        ConvolutionalAxon::from_parts(
            Neurons3D::new(2, 2, 2, false),
            Neurons3D::new(2, 2, 3, false),
            SpatialConfig::new(),
            Some(kernel.clone()),
            None,
            None,
        )
        .unwrap(),
    );
    let input = values(8, 2);
    let output = axon
        .push_left_to_right(&ActivationBatch::new(input.clone()), None, &AxonContext::new())
        .unwrap()
        .into_output()
        .into_data();
    for o in 0..3 {
        for p in 0..4 {
            for e in 0..2 {
                let expected = kernel[(o, 0)] * input[(p, e)] + kernel[(o, 1)] * input[(4 + p, e)];
                assert_relative_eq!(output[(o * 4 + p, e)], expected);
            }
        }
    }
}

#[test]
fn reversed_kernel_matches_right_to_left() {
    let context = AxonContext::new();
    let configs = [
        (
            Neurons3D::new(4, 4, 2, true),
            Neurons3D::new(4, 4, 3, true),
            SpatialConfig::new()
                .with_filter([3, 3])
                .with_padding(Padding::explicit(1, 1)),
        ),
        (
            Neurons3D::new(5, 5, 1, false),
            Neurons3D::new(3, 3, 2, false),
            SpatialConfig::new(),
        ),
        (
            Neurons3D::new(4, 3, 2, false),
            Neurons3D::new(3, 2, 2, false),
            SpatialConfig::new().with_filter([2, 2]),
        ),
    ];
    for (left, right, spatial) in configs {
        let axon = ConvolutionalAxon::from_parts(
            left,
            right,
            spatial,
            None,
            left.has_bias_unit()
                .then(|| Array1::from_shape_fn(right.depth(), |o| o as f32 - 0.5)),
            right
                .has_bias_unit()
                .then(|| Array1::from_shape_fn(left.depth(), |i| 0.25 * i as f32 + 1.)),
        )
        .unwrap();
        let reversed = axon.reversed().unwrap();
        assert_eq!(reversed.left_neurons(), right);
        assert_eq!(reversed.right_neurons(), left);
        let g = ActivationBatch::new(values(right.count(), 2));
        let expected = Axon::from(axon)
            .push_right_to_left(&g, None, &context)
            .unwrap();
        let output = Axon::from(reversed)
            .push_left_to_right(&g, None, &context)
            .unwrap();
        assert_relative_eq!(
            output.output().data(),
            expected.output().data(),
            epsilon = 1e-4
        );
    }
}

#[test]
fn reversed_kernel_requires_unit_strides() {
    let axon = ConvolutionalAxon::new(
        Neurons3D::new(4, 4, 1, false),
        Neurons3D::new(2, 2, 1, false),
        SpatialConfig::new().with_strides([2, 2]),
    )
    .unwrap();
    let err = axon.reversed().unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let axon = ConvolutionalAxon::new(
        Neurons3D::new(2, 2, 1, false),
        Neurons3D::new(4, 4, 1, false),
        SpatialConfig::new()
            .with_filter([1, 1])
            .with_padding(Padding::explicit(1, 1)),
    )
    .unwrap();
    let err = axon.reversed().unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
}

fn max_pooling() -> Axon {
    MaxPoolingAxon::new(
        Neurons3D::new(4, 4, 1, false),
        Neurons3D::new(2, 2, 1, false),
        SpatialConfig::new().with_strides([2, 2]),
    )
    .unwrap()
    .into()
}

#[test]
fn max_pooling_selects_unique_max() {
    let axon = max_pooling();
    let context = AxonContext::new();
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(sequence(16)), None, &context)
        .unwrap();
    assert_eq!(forward.output().data(), array![[6.], [8.], [14.], [16.]]);
    let selection_mask = forward.selection_mask().unwrap();
    assert_eq!(selection_mask.ncols(), 4);
    assert_eq!(selection_mask.row(3), array![1., 1., 1., 1.]);
    assert_eq!(selection_mask.sum(), 4.);
    assert!(forward.input_dropout_mask().is_none());
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(array![[1.], [2.], [3.], [4.]]),
            Some(&forward),
            &context,
        )
        .unwrap();
    let mut expected = Array2::zeros((16, 1));
    expected[(5, 0)] = 1.;
    expected[(7, 0)] = 2.;
    expected[(13, 0)] = 3.;
    expected[(15, 0)] = 4.;
    assert_eq!(backward.output().data(), expected);
}

#[test]
fn max_pooling_ties_pick_first_cell() {
    let axon = max_pooling();
    let forward = axon
        .push_left_to_right(
            &ActivationBatch::new(Array2::ones((16, 2))),
            None,
            &AxonContext::new(),
        )
        .unwrap();
    let selection_mask = forward.selection_mask().unwrap();
    assert_eq!(selection_mask.ncols(), 8);
    assert_eq!(selection_mask.row(0), Array1::<f32>::ones(8));
    assert_eq!(selection_mask.sum(), 8.);
}

#[test]
fn max_pooling_right_to_left_requires_forward() {
    let axon = max_pooling();
    let err = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            None,
            &AxonContext::new(),
        )
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::MissingActivation(_)));
    let forward = scenario_axon(array![0., 0.])
        .push_left_to_right(
            &ActivationBatch::new(Array2::ones((3, 1))),
            None,
            &AxonContext::new(),
        )
        .unwrap();
    let err = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            Some(&forward),
            &AxonContext::new(),
        )
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::MissingActivation(_)));
}

fn average_pooling(scale_outputs: bool) -> Axon {
    AveragePoolingAxon::new(
        Neurons3D::new(4, 4, 1, false),
        Neurons3D::new(2, 2, 1, false),
        SpatialConfig::new().with_strides([2, 2]),
    )
    .unwrap()
    .with_scale_outputs(scale_outputs)
    .into()
}

#[test]
fn average_pooling_means() {
    let context = AxonContext::new();
    let axon = average_pooling(false);
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(sequence(16)), None, &context)
        .unwrap();
    let means: Array2<f32> = array![[3.5], [5.5], [11.5], [13.5]];
    assert_relative_eq!(forward.output().data(), means);
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            Some(&forward),
            &context,
        )
        .unwrap();
    let spread = Array2::<f32>::from_elem((16, 1), 0.25);
    assert_relative_eq!(backward.output().data(), spread);
}

#[test]
fn average_pooling_scales_outputs() {
    let context = AxonContext::new();
    let axon = average_pooling(true);
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(sequence(16)), None, &context)
        .unwrap();
    let scaled: Array2<f32> = array![[14.], [22.], [46.], [54.]];
    assert_relative_eq!(forward.output().data(), scaled);
    let backward = axon
        .push_right_to_left(&ActivationBatch::new(Array2::ones((4, 1))), None, &context)
        .unwrap();
    let spread = Array2::<f32>::from_elem((16, 1), 0.0625);
    assert_relative_eq!(backward.output().data(), spread);
}

#[test]
fn average_pooling_all_padding_window_is_zero() {
    let axon = Axon::from(
        AveragePoolingAxon::new(
            Neurons3D::new(1, 1, 1, false),
            Neurons3D::new(3, 3, 1, false),
            SpatialConfig::new()
                .with_filter([1, 1])
                .with_padding(Padding::explicit(1, 1)),
        )
        .unwrap(),
    );
    let output = axon
        .push_left_to_right(&ActivationBatch::new(array![[5.]]), None, &AxonContext::new())
        .unwrap()
        .into_output()
        .into_data();
    assert!(output.iter().all(|x| x.is_finite()));
    assert_eq!(
        output,
        array![[0.], [0.], [0.], [0.], [5.], [0.], [0.], [0.], [0.]]
    );
}

fn identity(n: usize) -> Axon {
    FullyConnectedAxon::from_parts(
        Neurons::new(n, false),
        Neurons::new(n, false),
        Some(Array2::eye(n)),
        None,
        None,
    )
    .unwrap()
    .into()
}

#[test]
fn dropout_scales_survivors() {
    let axon = identity(4);
    let context = AxonContext::new()
        .with_keep_probability(0.5)
        .unwrap()
        .with_seed(42);
    let input = ActivationBatch::new(Array2::from_elem((4, 8), 3.));
    let forward = axon.push_left_to_right(&input, None, &context).unwrap();
    let mask = forward.input_dropout_mask().unwrap();
    assert_eq!(mask.dim(), (4, 8));
    assert!(mask.iter().all(|m| *m == 0. || *m == 1.));
    assert_eq!(forward.keep_probability(), 0.5);
    assert_eq!(forward.output().data(), mask.mapv(|m| m * 6.));
    assert_eq!(forward.post_dropout_input().data(), forward.output().data());
    assert!(forward.post_dropout_input().is_immutable());
    assert!(!forward.output().is_immutable());
    let again = axon.push_left_to_right(&input, None, &context).unwrap();
    assert_eq!(again.input_dropout_mask(), forward.input_dropout_mask());
}

#[test]
fn paired_dropout_masks_right_to_left_output() {
    let axon = identity(4);
    let dropout = AxonContext::new()
        .with_keep_probability(0.5)
        .unwrap()
        .with_seed(7);
    let forward = axon
        .push_left_to_right(
            &ActivationBatch::new(Array2::ones((4, 8))),
            None,
            &dropout,
        )
        .unwrap();
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 8))),
            Some(&forward),
            &AxonContext::new(),
        )
        .unwrap();
    let mask = forward.input_dropout_mask().unwrap();
    assert_eq!(backward.output().data(), mask.mapv(|m| m * 2.));
}

#[test]
fn right_to_left_reuses_forward_mask() {
    let axon = identity(4);
    let dropout = AxonContext::new()
        .with_keep_probability(0.5)
        .unwrap()
        .with_seed(7);
    let forward = axon
        .push_left_to_right(
            &ActivationBatch::new(Array2::ones((4, 8))),
            None,
            &dropout,
        )
        .unwrap();
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 8))),
            Some(&forward),
            &dropout,
        )
        .unwrap();
    assert!(backward.input_dropout_mask().is_none());
    assert_eq!(backward.keep_probability(), 1.);
    assert_eq!(
        backward.post_dropout_input().data(),
        Array2::<f32>::ones((4, 8))
    );
    let mask = forward.input_dropout_mask().unwrap();
    assert_eq!(backward.output().data(), mask.mapv(|m| m * 2.));
}

#[test]
fn pooling_right_to_left_accepts_dropout_context() {
    let dropout = AxonContext::new().with_keep_probability(0.5).unwrap();
    for axon in [max_pooling(), average_pooling(false)] {
        let forward = axon
            .push_left_to_right(
                &ActivationBatch::new(sequence(16)),
                None,
                &AxonContext::new(),
            )
            .unwrap();
        let backward = axon
            .push_right_to_left(
                &ActivationBatch::new(Array2::ones((4, 1))),
                Some(&forward),
                &dropout,
            )
            .unwrap();
        assert_eq!(backward.output().feature_count(), 16);
        assert!(backward.input_dropout_mask().is_none());
    }
}

// Gradients after forward dropout must match an undropped push of the post dropout input.
fn assert_gradients_follow_dropout(axon: &Axon, input: Array2<f32>, upstream: Array2<f32>) {
    let dropout = AxonContext::new()
        .with_keep_probability(0.5)
        .unwrap()
        .with_seed(5);
    let plain = AxonContext::new();
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(input.clone()), None, &dropout)
        .unwrap();
    let mask = forward.input_dropout_mask().unwrap();
    assert_eq!(
        forward.post_dropout_input().data(),
        &input * &mask.mapv(|m| m * 2.)
    );
    let upstream = ActivationBatch::new(upstream);
    let backward = axon
        .push_right_to_left(&upstream, Some(&forward), &dropout)
        .unwrap();
    let undropped = axon
        .push_left_to_right(
            &ActivationBatch::new(forward.post_dropout_input().data().to_owned()),
            None,
            &plain,
        )
        .unwrap();
    let reference = axon
        .push_right_to_left(&upstream, Some(&undropped), &plain)
        .unwrap();
    let gradients = backward.gradients().unwrap();
    let expected = reference.gradients().unwrap();
    assert_relative_eq!(
        gradients.connection_weights(),
        expected.connection_weights(),
        epsilon = 1e-4
    );
    assert_relative_eq!(
        gradients.left_to_right_biases().unwrap(),
        expected.left_to_right_biases().unwrap(),
        epsilon = 1e-4
    );
    // Right to left only masks the output with the forward mask.
    let masked = reference.output().data().to_owned() * &mask.mapv(|m| m * 2.);
    assert_relative_eq!(backward.output().data(), masked, epsilon = 1e-4);
}

#[test]
fn fully_connected_gradients_use_post_dropout_input() {
    let axon = Axon::from(
        FullyConnectedAxon::new(Neurons::new(6, true), Neurons::new(3, false)).unwrap(),
    );
    let input = values(6, 4);
    let upstream = values(3, 4);
    assert_gradients_follow_dropout(&axon, input, upstream);
}

#[test]
fn convolution_gradients_use_post_dropout_input() {
    let axon = Axon::from(
        ConvolutionalAxon::new(
            Neurons3D::new(3, 3, 2, true),
            Neurons3D::new(2, 2, 3, false),
            SpatialConfig::new(),
        )
        .unwrap(),
    );
    assert_gradients_follow_dropout(&axon, values(18, 3), values(12, 3));
}

#[test]
fn max_pooling_padding_cells_take_part() {
    let axon = Axon::from(
        MaxPoolingAxon::new(
            Neurons3D::new(2, 2, 1, false),
            Neurons3D::new(2, 2, 1, false),
            SpatialConfig::new()
                .with_filter([2, 2])
                .with_strides([2, 2])
                .with_padding(Padding::explicit(1, 1)),
        )
        .unwrap(),
    );
    let context = AxonContext::new();
    // Each window holds one input cell and three padding zeros.
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(sequence(4)), None, &context)
        .unwrap();
    assert_eq!(forward.output().data(), sequence(4));
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            Some(&forward),
            &context,
        )
        .unwrap();
    assert_eq!(backward.output().data(), Array2::<f32>::ones((4, 1)));
    let negative = sequence(4).mapv(|x| -x);
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(negative), None, &context)
        .unwrap();
    assert_eq!(forward.output().data(), Array2::<f32>::zeros((4, 1)));
    assert_eq!(forward.selection_mask().unwrap().sum(), 4.);
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            Some(&forward),
            &context,
        )
        .unwrap();
    assert_eq!(backward.output().data(), Array2::<f32>::zeros((4, 1)));
}

#[test]
fn pooling_rejects_dropout() {
    let context = AxonContext::new().with_keep_probability(0.5).unwrap();
    for axon in [max_pooling(), average_pooling(false)] {
        let err = axon
            .push_left_to_right(&ActivationBatch::new(sequence(16)), None, &context)
            .unwrap_err();
        assert!(matches!(error(&err), AxonError::UnsupportedOperation(_)));
    }
}

#[test]
fn fully_connected_gradients() {
    let axon = Axon::from(
        FullyConnectedAxon::from_parts(
            Neurons::new(3, true),
            Neurons::new(2, false),
            Some(array![[1., 0., 1.], [0., 1., 1.]]),
            None,
            None,
        )
        .unwrap(),
    );
    let input = ActivationBatch::new(array![[2., 1.], [3., 0.], [1., -1.]]);
    let upstream = ActivationBatch::new(array![[1., 2.], [0., 1.]]);
    let context = AxonContext::new();
    let forward = axon.push_left_to_right(&input, None, &context).unwrap();
    let backward = axon
        .push_right_to_left(&upstream, Some(&forward), &context)
        .unwrap();
    let gradients = backward.gradients().unwrap();
    let expected: Array2<f32> = array![[4., 3., -1.], [1., 0., -1.]];
    assert_relative_eq!(gradients.connection_weights(), expected);
    assert_eq!(gradients.left_to_right_biases().unwrap(), array![3., 1.]);
    let regularised = context.clone().with_regularisation_lambda(0.5);
    let backward = axon
        .push_right_to_left(&upstream, Some(&forward), &regularised)
        .unwrap();
    let expected: Array2<f32> = array![[4.5, 3., -0.5], [1., 0.5, -0.5]];
    assert_relative_eq!(backward.gradients().unwrap().connection_weights(), expected);
    let frozen = context.with_freeze_out(true);
    assert!(!axon.is_trainable(&frozen));
    let backward = axon
        .push_right_to_left(&upstream, Some(&forward), &frozen)
        .unwrap();
    assert!(backward.gradients().is_none());
}

#[test]
fn scale_and_shift_per_channel() {
    let axon = Axon::from(
        ScaleAndShiftAxon::spatial(
            Neurons3D::new(2, 1, 2, true),
            Neurons3D::new(2, 1, 2, false),
            ScaleAndShiftConfig::new()
                .with_scale(array![2., 3.])
                .with_shift(array![1., -1.]),
        )
        .unwrap(),
    );
    let context = AxonContext::new();
    let forward = axon
        .push_left_to_right(&ActivationBatch::new(sequence(4)), None, &context)
        .unwrap();
    assert_eq!(forward.output().data(), array![[3.], [5.], [8.], [11.]]);
    let backward = axon
        .push_right_to_left(
            &ActivationBatch::new(Array2::ones((4, 1))),
            Some(&forward),
            &context,
        )
        .unwrap();
    assert_eq!(backward.output().data(), array![[2.], [2.], [3.], [3.]]);
    let gradients = backward.gradients().unwrap();
    assert_eq!(gradients.connection_weights(), array![[3.], [7.]]);
    assert_eq!(gradients.left_to_right_biases().unwrap(), array![2., 2.]);
}

#[test]
fn scale_and_shift_construction() {
    let err = ScaleAndShiftAxon::new(
        Neurons::new(3, false),
        Neurons::new(3, false),
        ScaleAndShiftConfig::new(),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = ScaleAndShiftAxon::new(
        Neurons::new(3, true),
        Neurons::new(4, false),
        ScaleAndShiftConfig::new(),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = ScaleAndShiftAxon::new(
        Neurons::new(3, true),
        Neurons::new(3, false),
        ScaleAndShiftConfig::new().with_scale(array![1., 2.]),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::ShapeMismatch { .. }));
    let axon = ScaleAndShiftAxon::new(
        Neurons::new(3, true),
        Neurons::new(3, false),
        ScaleAndShiftConfig::new(),
    )
    .unwrap();
    assert_eq!(axon.channels(), 3);
    assert_eq!(axon.scale(), Array1::<f32>::ones(3));
}

#[test]
fn pass_through_is_identity() {
    let axon = Axon::from(
        PassThroughAxon::new(Neurons::new(3, true), Neurons::new(3, true)).unwrap(),
    );
    let input = ActivationBatch::new(values(3, 2)).with_bias_row();
    let context = AxonContext::new();
    let forward = axon.push_left_to_right(&input, None, &context).unwrap();
    assert_eq!(forward.output().data(), input.features());
    let backward = axon
        .push_right_to_left(forward.output(), Some(&forward), &context)
        .unwrap();
    assert_eq!(backward.output().data(), input.features());
    assert!(!axon.is_trainable(&context));
    let err = PassThroughAxon::new(Neurons::new(3, true), Neurons::new(3, false)).unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = PassThroughAxon::new(Neurons::new(3, false), Neurons::new(2, false)).unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
}

#[test]
fn construction_errors() {
    let err = FullyConnectedAxon::new(Neurons::new(0, false), Neurons::new(2, false)).unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = FullyConnectedAxon::from_parts(
        Neurons::new(3, false),
        Neurons::new(2, false),
        None,
        None,
        Some(Array1::zeros(3)),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = FullyConnectedAxon::from_parts(
        Neurons::new(3, false),
        Neurons::new(2, false),
        Some(Array2::zeros((3, 2))),
        None,
        None,
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::ShapeMismatch { .. }));
    let err = ConvolutionalAxon::new(
        Neurons3D::new(5, 5, 1, false),
        Neurons3D::new(3, 3, 1, false),
        SpatialConfig::new().with_filter([2, 2]),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = MaxPoolingAxon::new(
        Neurons3D::new(4, 4, 2, false),
        Neurons3D::new(2, 2, 1, false),
        SpatialConfig::new().with_strides([2, 2]),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
    let err = AveragePoolingAxon::new(
        Neurons3D::new(4, 4, 1, true),
        Neurons3D::new(2, 2, 1, false),
        SpatialConfig::new().with_strides([2, 2]),
    )
    .unwrap_err();
    assert!(matches!(error(&err), AxonError::Configuration(_)));
}

#[test]
fn push_rejects_malformed_batches() {
    let axon = scenario_axon(array![0., 0.]);
    let context = AxonContext::new();
    let columns = ActivationBatch::from_parts(
        Array2::ones((1, 3)),
        FeatureOrientation::ColumnsSpanFeatures,
        false,
    )
    .unwrap();
    let err = axon.push_left_to_right(&columns, None, &context).unwrap_err();
    assert!(matches!(error(&err), AxonError::Orientation(_)));
    let err = axon
        .push_left_to_right(&ActivationBatch::new(Array2::ones((4, 1))), None, &context)
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::ShapeMismatch { .. }));
    let err = axon
        .push_right_to_left(&ActivationBatch::new(Array2::ones((3, 1))), None, &context)
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::ShapeMismatch { .. }));
}

#[test]
fn adjustments() {
    let mut axon = scenario_axon(array![0., 0.]);
    let copy = axon.dup();
    axon.adjust_connection_weights(
        Array2::ones((2, 3)).view(),
        AdjustmentDirection::Subtraction,
    )
    .unwrap();
    axon.adjust_left_to_right_biases(array![1., 2.].view(), AdjustmentDirection::Addition)
        .unwrap();
    assert_eq!(
        axon.detached_connection_weights().unwrap(),
        array![[0., -1., 0.], [-1., 0., 0.]]
    );
    assert_eq!(axon.detached_left_to_right_biases().unwrap(), array![1., 2.]);
    assert_eq!(axon.weights().unwrap().version(), 2);
    assert_eq!(
        copy.detached_connection_weights().unwrap(),
        array![[1., 0., 1.], [0., 1., 1.]]
    );
    let err = axon
        .adjust_right_to_left_biases(Array1::zeros(3).view(), AdjustmentDirection::Addition)
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::UnsupportedOperation(_)));
    let mut pooling = max_pooling();
    assert!(pooling.detached_connection_weights().is_none());
    let err = pooling
        .adjust_right_to_left_biases(Array1::zeros(1).view(), AdjustmentDirection::Addition)
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::UnsupportedOperation(_)));
}

#[test]
fn output_dropout_mask_shape() {
    let mut activation = scenario_axon(array![0., 0.])
        .push_left_to_right(
            &ActivationBatch::new(Array2::ones((3, 2))),
            None,
            &AxonContext::new(),
        )
        .unwrap();
    let err = activation
        .apply_output_dropout_mask(Array2::ones((3, 2)).view())
        .unwrap_err();
    assert!(matches!(error(&err), AxonError::ShapeMismatch { .. }));
    activation
        .apply_output_dropout_mask(array![[1., 0.], [0., 1.]].view())
        .unwrap();
    assert_eq!(activation.output().data(), array![[2., 0.], [0., 2.]]);
}
