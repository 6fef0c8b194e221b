use crate::classifier::Classifier;
use crate::dnn::Layer;
use crate::error::{PropGenError, Result};
use crate::loss::Objective;
use crate::NNVFloat;
use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Sequential feed-forward network over flattened inputs.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct DNN {
    layers: Vec<Box<dyn Layer>>,
}

impl DNN {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn get_layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn input_dims(&self) -> Option<usize> {
        self.layers.first().map(|layer| layer.input_dims())
    }

    pub fn output_dims(&self) -> Option<usize> {
        self.layers.last().map(|layer| layer.output_dims())
    }

    /// Checks every layer and that consecutive layers agree on their widths.
    ///
    /// # Errors
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(PropGenError::InvalidConfig(
                "network has no layers".to_string(),
            ));
        }
        for layer in &self.layers {
            layer.check()?;
        }
        for (idx, (prev, next)) in self.layers.iter().zip(self.layers.iter().skip(1)).enumerate() {
            if prev.output_dims() != next.input_dims() {
                return Err(PropGenError::ShapeMismatch {
                    context: format!("layer {} ({}) input", idx + 1, next),
                    expected: next.input_dims(),
                    found: prev.output_dims(),
                });
            }
        }
        Ok(())
    }

    pub fn forward1(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward1(&x))
    }

    /// The input followed by every layer's output, in order.
    pub fn forward_trace(&self, input: &Array1<NNVFloat>) -> Vec<Array1<NNVFloat>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward1(&activations[activations.len() - 1]);
            activations.push(next);
        }
        activations
    }

    fn backward_from_trace(
        &self,
        activations: &[Array1<NNVFloat>],
        grad_output: Array1<NNVFloat>,
    ) -> Array1<NNVFloat> {
        self.layers
            .iter()
            .zip(activations.iter())
            .rev()
            .fold(grad_output, |grad, (layer, input)| {
                layer.backward1(input, &grad)
            })
    }

    /// Gradient of `<grad_output, f(input)>` with respect to `input`.
    pub fn backward1(
        &self,
        input: &Array1<NNVFloat>,
        grad_output: &Array1<NNVFloat>,
    ) -> Array1<NNVFloat> {
        let activations = self.forward_trace(input);
        self.backward_from_trace(&activations, grad_output.clone())
    }

    /// # Errors
    /// If the file cannot be read, is not a serialized network, or the network is inconsistent
    pub fn load_json(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| PropGenError::io(path, err))?;
        let dnn: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| PropGenError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        dnn.validate()?;
        debug!("loaded network {} from {}", dnn, path.display());
        Ok(dnn)
    }

    /// # Errors
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|err| PropGenError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| PropGenError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|err| PropGenError::io(path, err))
    }
}

impl Classifier for DNN {
    fn input_dims(&self) -> usize {
        DNN::input_dims(self).unwrap_or(0)
    }

    fn num_classes(&self) -> usize {
        self.output_dims().unwrap_or(0)
    }

    fn logits(&self, input: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        self.forward1(input)
    }

    fn pullback(&self, input: &Array1<NNVFloat>, cotangent: &Array1<NNVFloat>) -> Array1<NNVFloat> {
        self.backward1(input, cotangent)
    }

    fn objective_and_grad(
        &self,
        input: &Array1<NNVFloat>,
        objective: &Objective,
    ) -> (NNVFloat, Array1<NNVFloat>) {
        let mut activations = self.forward_trace(input);
        let logits = activations.pop().unwrap_or_else(|| input.clone());
        let (value, cotangent) = objective.value_and_grad(&logits.view());
        (value, self.backward_from_trace(&activations, cotangent))
    }
}

impl fmt::Display for DNN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layers: Vec<String> = self.layers.iter().map(|x| format!("{}", x)).collect();
        match self.input_dims() {
            Some(dims) => write!(f, "Input {} => {}", dims, layers.join(" => ")),
            None => write!(f, "Empty network"),
        }
    }
}
