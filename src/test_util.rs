#![cfg(test)]
use crate::affine::Affine2;
use crate::bounds::Bounds1;
use crate::dnn::{Dense, ReLU, DNN};
use crate::NNVFloat;
use ndarray::{Array1, Array2, Array3, Array4, Zip};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;
use rand::Rng;
use std::mem;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<NNVFloat> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(rows * cols..=rows * cols))) -> Array2<NNVFloat> {
        Array2::from_shape_vec((rows, cols), v).unwrap()
    }
}

prop_compose! {
    pub fn array4(d0: usize, d1: usize, d2: usize, d3: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(d0 * d1 * d2 * d3..=d0 * d1 * d2 * d3))) -> Array4<NNVFloat> {
        Array4::from_shape_vec((d0, d1, d2, d3), v).unwrap()
    }
}

prop_compose! {
    /// C×H×W image with pixels in [0, 1].
    pub fn unit_image(channels: usize, height: usize, width: usize)(v in Vec::lift1_with(0. ..=1., SizeRange::new(channels * height * width..=channels * height * width))) -> Array3<NNVFloat> {
        Array3::from_shape_vec((channels, height, width), v).unwrap()
    }
}

prop_compose! {
    pub fn affine2(in_dim: usize, out_dim: usize)(basis in array2(out_dim, in_dim), shift in array1(out_dim)) -> Affine2 {
        Affine2::new(basis, shift)
    }
}

prop_compose! {
    pub fn bounds1(len: usize)(mut lower in array1(len), mut upper in array1(len)) -> Bounds1 {
        Zip::from(&mut lower).and(&mut upper).for_each(|l, u| if *l > *u {mem::swap(l, u)});
        Bounds1::new(lower.view(), upper.view()).unwrap()
    }
}

prop_compose! {
    /// One hidden ReLU layer over a `channels`×1×`pixels` image.
    pub fn fc_model_and_image(channels: usize, pixels: usize, num_classes: usize)(
        hidden in affine2(channels * pixels, 2 * num_classes),
        head in affine2(2 * num_classes, num_classes),
        image in unit_image(channels, 1, pixels),
    ) -> (DNN, Array3<NNVFloat>) {
        let dnn = DNN::new(vec![
            Box::new(Dense::new(hidden)),
            Box::new(ReLU::new(2 * num_classes)),
            Box::new(Dense::new(head)),
        ]);
        (dnn, image)
    }
}

/// Fully connected ReLU network with standard normal weights.
pub fn random_fc_dnn<R: Rng>(input: usize, output: usize, hidden: &[usize], rng: &mut R) -> DNN {
    let normal = Normal::new(0., 1.).unwrap();
    let mut widths = vec![input];
    widths.extend_from_slice(hidden);
    widths.push(output);
    let mut dnn = DNN::default();
    for (idx, (&fan_in, &fan_out)) in widths.iter().zip(widths.iter().skip(1)).enumerate() {
        let basis = Array2::random_using((fan_out, fan_in), normal, rng);
        let shift = Array1::random_using(fan_out, normal, rng);
        dnn.add_layer(Box::new(Dense::from_parts(basis, shift)));
        if idx + 2 < widths.len() {
            dnn.add_layer(Box::new(ReLU::new(fan_out)));
        }
    }
    dnn
}

pub fn random_array1<R: Rng>(len: usize, rng: &mut R) -> Array1<NNVFloat> {
    Array1::random_using(len, Normal::new(0., 1.).unwrap(), rng)
}
