#![allow(clippy::module_name_repetitions)]
//! Two-dimensional convolution over channel-major flattened data
use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::error::{PropGenError, Result};
use crate::tensorshape::TensorShape;
use crate::NNVFloat;
use itertools::Itertools;
use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assumes that data is always in a flattened (C, H, W) state.
/// Weights are of the shape: (`channels_out`, `channels_in`, `kernel_h`, `kernel_w`)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Conv {
    kernel: Array4<NNVFloat>, // (C_out, C_in, K_h, K_w) following torch convention
    bias: Array1<NNVFloat>,   // (C_out)
    input_shape: TensorShape, // (C_in, H, W)
    strides: (usize, usize),  // (y, x)
    padding: ((usize, usize), (usize, usize)), // ((top, bottom), (left, right))
}

impl Conv {
    /// # Errors
    /// If improper shapes are passed in
    pub fn new(
        kernel: Array4<NNVFloat>,
        bias: Array1<NNVFloat>,
        input_shape: TensorShape,
        strides: (usize, usize),
        padding: ((usize, usize), (usize, usize)),
    ) -> Result<Self> {
        let conv = Self {
            kernel,
            bias,
            input_shape,
            strides,
            padding,
        };
        conv.check_shapes()?;
        Ok(conv)
    }

    /// # Errors
    pub fn check_shapes(&self) -> Result<()> {
        let mismatch = |context: &str, expected: usize, found: usize| {
            Err(PropGenError::ShapeMismatch {
                context: format!("conv {}", context),
                expected,
                found,
            })
        };
        if self.input_shape.rank() != 3 {
            return mismatch("input rank", 3, self.input_shape.rank());
        }
        if self.kernel.shape()[1] != self.input_shape[0] {
            return mismatch("input channels", self.kernel.shape()[1], self.input_shape[0]);
        }
        if self.kernel.shape()[0] != self.bias.len() {
            return mismatch("bias length", self.kernel.shape()[0], self.bias.len());
        }
        if self.strides.0 == 0 || self.strides.1 == 0 {
            return Err(PropGenError::InvalidConfig(
                "conv strides must be positive".to_string(),
            ));
        }
        let padded_h = self.input_shape[1] + self.padding.0 .0 + self.padding.0 .1;
        let padded_w = self.input_shape[2] + self.padding.1 .0 + self.padding.1 .1;
        if padded_h < self.kernel.shape()[2] || padded_w < self.kernel.shape()[3] {
            return Err(PropGenError::InvalidConfig(format!(
                "conv kernel {}x{} does not fit padded input {}x{}",
                self.kernel.shape()[2],
                self.kernel.shape()[3],
                padded_h,
                padded_w
            )));
        }
        Ok(())
    }

    pub const fn input_shape(&self) -> &TensorShape {
        &self.input_shape
    }

    pub fn output_shape(&self) -> TensorShape {
        let k_h = self.kernel.shape()[2];
        let k_w = self.kernel.shape()[3];
        let h_out = (self.input_shape[1] + self.padding.0 .0 + self.padding.0 .1 - k_h)
            / self.strides.0
            + 1;
        let w_out = (self.input_shape[2] + self.padding.1 .0 + self.padding.1 .1 - k_w)
            / self.strides.1
            + 1;

        TensorShape::new(vec![self.kernel.shape()[0], h_out, w_out])
    }

    /// Visits every `(output_idx, input_idx, weight)` connection of the layer.
    fn for_each_tap<F: FnMut(usize, usize, NNVFloat)>(&self, mut f: F) {
        let c_in = self.input_shape[0];
        let h_in = self.input_shape[1];
        let w_in = self.input_shape[2];
        let output_shape = self.output_shape();
        let c_out = output_shape[0];
        let h_out = output_shape[1];
        let w_out = output_shape[2];
        let k_h = self.kernel.shape()[2];
        let k_w = self.kernel.shape()[3];

        for (y_out, x_out) in (0..h_out).cartesian_product(0..w_out) {
            let y_0 = y_out * self.strides.0;
            let x_0 = x_out * self.strides.1;

            for k_y in 0..k_h {
                if y_0 + k_y < self.padding.0 .0 || y_0 + k_y >= h_in + self.padding.0 .0 {
                    // Padding value is 0
                    continue;
                }
                let y_in = y_0 + k_y - self.padding.0 .0;
                for k_x in 0..k_w {
                    if x_0 + k_x < self.padding.1 .0 || x_0 + k_x >= w_in + self.padding.1 .0 {
                        continue;
                    }
                    let x_in = x_0 + k_x - self.padding.1 .0;

                    for f_in in 0..c_in {
                        let input_idx = f_in * (h_in * w_in) + y_in * w_in + x_in;
                        for f_out in 0..c_out {
                            let output_idx = f_out * (h_out * w_out) + y_out * w_out + x_out;
                            f(output_idx, input_idx, self.kernel[[f_out, f_in, k_y, k_x]]);
                        }
                    }
                }
            }
        }
    }

    fn broadcast_bias(&self) -> Array1<NNVFloat> {
        let output_shape = self.output_shape();
        let plane = output_shape[1] * output_shape[2];
        self.bias
            .iter()
            .flat_map(|&b| std::iter::repeat(b).take(plane))
            .collect()
    }

    /// Dense equivalent of the convolution. Quadratic in the data size.
    pub fn to_affine(&self) -> Affine2 {
        let mut weight = Array2::<NNVFloat>::zeros((self.output_dims(), self.input_dims()));
        self.for_each_tap(|output_idx, input_idx, w| weight[[output_idx, input_idx]] += w);
        Affine2::new(weight, self.broadcast_bias())
    }
}

#[typetag::serde]
impl Layer for Conv {
    fn input_dims(&self) -> usize {
        self.input_shape.dims()
    }

    fn output_dims(&self) -> usize {
        self.output_shape().dims()
    }

    fn forward1(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        debug_assert_eq!(input.len(), self.input_dims());
        let mut output = self.broadcast_bias();
        self.for_each_tap(|output_idx, input_idx, w| output[output_idx] += input[input_idx] * w);
        output
    }

    fn backward1(
        &self,
        _input: &Array1<NNVFloat>,
        grad_output: &Array1<NNVFloat>,
    ) -> Array1<NNVFloat> {
        let mut grad_input = Array1::zeros(self.input_dims());
        self.for_each_tap(|output_idx, input_idx, w| {
            grad_input[input_idx] += grad_output[output_idx] * w;
        });
        grad_input
    }

    fn check(&self) -> Result<()> {
        self.check_shapes()
    }
}

impl fmt::Display for Conv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv {}x{}, {}",
            self.kernel.shape()[3],
            self.kernel.shape()[2],
            self.kernel.shape()[0]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use approx::AbsDiffEq;
    use ndarray::{arr1, Array};
    use proptest::prelude::*;

    #[must_use = "strategies do nothing unless used"]
    pub fn conv_test_inputs(
        max_k: usize,
        max_hw: usize,
        max_c_in: usize,
        max_c_out: usize,
        max_stride: usize,
    ) -> impl Strategy<Value = (Conv, Array1<NNVFloat>, Array1<NNVFloat>)> {
        let strat = (1..(max_k + 1), 1..(max_k + 1), 1..(max_c_in + 1), 1..(max_c_out + 1));
        let strat = Strategy::prop_flat_map(strat, move |(k_h, k_w, c_in, c_out)| {
            (
                Just((k_h, k_w, c_in, c_out)),
                k_h..(max_hw + 1),
                k_w..(max_hw + 1),
                0..(k_h / 2 + 1),
                0..(k_h / 2 + 1),
                0..(k_w / 2 + 1),
                0..(k_w / 2 + 1),
                1..(max_stride + 1),
                1..(max_stride + 1),
            )
        });
        let strat = Strategy::prop_map(
            strat,
            |((k_h, k_w, c_in, c_out), h_in, w_in, pt, pb, pl, pr, sy, sx)| {
                (k_h, k_w, c_in, c_out, h_in, w_in, ((pt, pb), (pl, pr)), (sy, sx))
            },
        );
        Strategy::prop_flat_map(
            strat,
            |(k_h, k_w, c_in, c_out, h_in, w_in, padding, strides)| {
                let out_h = (h_in + padding.0 .0 + padding.0 .1 - k_h) / strides.0 + 1;
                let out_w = (w_in + padding.1 .0 + padding.1 .1 - k_w) / strides.1 + 1;
                (
                    array4(c_out, c_in, k_h, k_w),
                    array1(c_out),
                    array1(c_in * h_in * w_in),
                    array1(c_out * out_h * out_w),
                    Just((TensorShape::new(vec![c_in, h_in, w_in]), strides, padding)),
                )
                    .prop_map(|(kernel, bias, data, cotangent, (shape, strides, padding))| {
                        let conv = Conv::new(kernel, bias, shape, strides, padding).unwrap();
                        (conv, data, cotangent)
                    })
            },
        )
    }

    proptest! {
        #[test]
        fn test_conv_equality((conv_layer, data, _) in conv_test_inputs(4, 9, 3, 3, 2)) {
            let convolve_result = conv_layer.forward1(&data);
            let affine = conv_layer.to_affine();
            let affine_result = affine.apply(&data.view());
            prop_assert!(
                convolve_result.abs_diff_eq(&affine_result, 1e-10),
                "Unequal results. Convolve: {:?} Affine: {:?}, Output Shape: {}",
                convolve_result,
                affine_result,
                conv_layer.output_shape(),
            );
        }

        #[test]
        fn test_conv_backward_is_adjoint((conv_layer, data, cotangent) in conv_test_inputs(4, 9, 3, 3, 2)) {
            let grad = conv_layer.backward1(&data, &cotangent);
            let expected = conv_layer.to_affine().apply_transpose(&cotangent.view());
            prop_assert!(grad.abs_diff_eq(&expected, 1e-10));
        }
    }

    #[test]
    fn test_known_convolution() {
        // 1x3x3 input, identity-diagonal 2x2 kernel
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1., 0., 0., 1.]).unwrap();
        let conv = Conv::new(
            kernel,
            arr1(&[0.5]),
            TensorShape::new(vec![1, 3, 3]),
            (1, 1),
            ((0, 0), (0, 0)),
        )
        .unwrap();
        let input = Array1::range(1., 10., 1.);
        assert_eq!(conv.output_shape(), TensorShape::new(vec![1, 2, 2]));
        assert_eq!(conv.forward1(&input), arr1(&[6.5, 8.5, 12.5, 14.5]));
    }

    #[test]
    fn test_padding_and_stride() {
        let kernel = Array4::ones((2, 1, 3, 3));
        let conv = Conv::new(
            kernel,
            arr1(&[0., 1.]),
            TensorShape::new(vec![1, 4, 4]),
            (2, 2),
            ((1, 1), (1, 1)),
        )
        .unwrap();
        assert_eq!(conv.output_shape(), TensorShape::new(vec![2, 2, 2]));
        let output = conv.forward1(&Array1::ones(16));
        // The top-left window overlaps the padded border on two sides
        assert_eq!(output[0], 4.);
        assert_eq!(output[3], 9.);
        assert_eq!(output[4], 5.);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let conv = Conv::new(
            Array4::zeros((1, 2, 1, 1)),
            arr1(&[0.]),
            TensorShape::new(vec![3, 2, 2]),
            (1, 1),
            ((0, 0), (0, 0)),
        );
        assert!(conv.is_err());
    }
}
