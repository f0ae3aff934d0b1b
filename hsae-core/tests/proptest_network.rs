//! Property-based tests for architecture planning.

use hsae_core::network::{DataShape, plan_cnn, plan_mlp};
use hsae_core::{Padding, conv_output_shape};
use proptest::prelude::*;

proptest! {
    #[test]
    fn mlp_trace_is_a_palindrome(
        input in 1usize..200,
        encoder in prop::collection::vec(1usize..100, 1..6),
    ) {
        let plan = plan_mlp(Some(input), &encoder).unwrap();
        let n = encoder.len();
        prop_assert_eq!(plan.trace.len(), 2 * n + 1);
        prop_assert_eq!(plan.num_layers(), 2 * n);
        prop_assert_eq!(plan.tieable.len(), n);
        let reversed: Vec<DataShape> = plan.trace.iter().rev().copied().collect();
        prop_assert_eq!(&plan.trace, &reversed);
        prop_assert_eq!(plan.latent(), Some(DataShape::Flat(encoder[n - 1])));
    }

    #[test]
    fn mirrored_layers_have_transposed_shapes(
        input in 1usize..64,
        encoder in prop::collection::vec(1usize..32, 1..5),
    ) {
        let plan = plan_mlp(Some(input), &encoder).unwrap();
        for &k in &plan.tieable {
            let mirror = plan.mirror_of(k).unwrap();
            let mut expected = plan.layer(mirror).unwrap().weight_shape();
            expected.reverse();
            prop_assert_eq!(plan.layer(k).unwrap().weight_shape(), expected);
        }
    }

    #[test]
    fn same_padding_is_ceil_division(width in 1usize..500, filter in 1usize..20, stride in 1usize..5) {
        let out = conv_output_shape(width, filter, Padding::Same, stride).unwrap();
        prop_assert_eq!(out, width.div_ceil(stride));
    }

    #[test]
    fn cnn_decoder_retraces_encoder(
        width in 30usize..120,
        filters in prop::collection::vec((1usize..6, 1usize..5, 1usize..3), 1..4),
        z_dim in 1usize..8,
    ) {
        let filter_size: Vec<usize> = filters.iter().map(|f| f.0).collect();
        let num_filters: Vec<usize> = filters.iter().map(|f| f.1).collect();
        let stride: Vec<usize> = filters.iter().map(|f| f.2).collect();
        let plan = plan_cnn(Some(width), &filter_size, &num_filters, &stride, Padding::Valid, z_dim).unwrap();
        let e = plan.num_encoder_layers;
        prop_assert_eq!(e, filters.len() + 1);
        prop_assert_eq!(plan.trace.len(), 2 * e + 1);
        for depth in 0..e {
            prop_assert_eq!(plan.trace[depth].size(), plan.trace[2 * e - depth].size());
        }
        prop_assert_eq!(plan.tieable.len(), filters.len());
    }
}
