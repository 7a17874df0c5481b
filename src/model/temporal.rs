//! Bidirectional LSTM classifier over keypoint sequences
//!
//! Parameter names follow the exported layout so checkpoints load without
//! remapping: `lstm.weight_ih_l{k}[_reverse]` etc. for the encoder and
//! `classifier.1.*` for the head (slot 0 is the dropout).

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::rnn::Direction;
use candle_nn::{lstm, Dropout, LSTMConfig, Linear, VarBuilder, LSTM, RNN};

/// One stacked layer: a forward and a time-reversed LSTM
struct BiLstmLayer {
    forward: LSTM,
    backward: LSTM,
}

impl BiLstmLayer {
    fn new(in_dim: usize, hidden_dim: usize, layer_idx: usize, vb: VarBuilder) -> Result<Self> {
        let forward = lstm(
            in_dim,
            hidden_dim,
            LSTMConfig {
                layer_idx,
                direction: Direction::Forward,
                ..Default::default()
            },
            vb.clone(),
        )?;
        let backward = lstm(
            in_dim,
            hidden_dim,
            LSTMConfig {
                layer_idx,
                direction: Direction::Backward,
                ..Default::default()
            },
            vb,
        )?;
        Ok(Self { forward, backward })
    }

    /// (batch, seq, in) → (batch, seq, 2 * hidden)
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let fwd_states = self.forward.seq(xs)?;
        let fwd = self.forward.states_to_tensor(&fwd_states)?;

        let reversed = reverse_time(xs)?;
        let bwd_states = self.backward.seq(&reversed)?;
        let bwd = reverse_time(&self.backward.states_to_tensor(&bwd_states)?)?;

        Tensor::cat(&[&fwd, &bwd], 2)
    }
}

fn reverse_time(xs: &Tensor) -> Result<Tensor> {
    let steps = xs.dim(1)? as u32;
    let idx: Vec<u32> = (0..steps).rev().collect();
    let idx = Tensor::from_vec(idx, steps as usize, xs.device())?;
    xs.index_select(&idx, 1)
}

/// Recurrent encoder + last-step projection head
pub struct TemporalClassifier {
    layers: Vec<BiLstmLayer>,
    /// Between stacked layers; zero when there is a single layer
    layer_dropout: Dropout,
    head_dropout: Dropout,
    head: Linear,
}

impl TemporalClassifier {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        num_layers: usize,
        num_classes: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let lstm_vb = vb.pp("lstm");
        let mut layers = Vec::with_capacity(num_layers);
        for layer_idx in 0..num_layers {
            let in_dim = if layer_idx == 0 {
                input_dim
            } else {
                hidden_dim * 2
            };
            layers.push(BiLstmLayer::new(
                in_dim,
                hidden_dim,
                layer_idx,
                lstm_vb.clone(),
            )?);
        }

        let layer_dropout = if num_layers > 1 { dropout } else { 0.0 };
        let head = candle_nn::linear(hidden_dim * 2, num_classes, vb.pp("classifier").pp("1"))?;

        Ok(Self {
            layers,
            layer_dropout: Dropout::new(layer_dropout),
            head_dropout: Dropout::new(dropout),
            head,
        })
    }
}

impl Module for TemporalClassifier {
    /// (batch, seq, features) → (batch, num_classes)
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut hidden = xs.clone();
        for (idx, layer) in self.layers.iter().enumerate() {
            if idx > 0 {
                hidden = self.layer_dropout.forward(&hidden, false)?;
            }
            hidden = layer.forward(&hidden)?;
        }

        // Only the final time step feeds the head
        let steps = hidden.dim(1)?;
        let last = hidden.i((.., steps - 1, ..))?.contiguous()?;
        let last = self.head_dropout.forward(&last, false)?;
        self.head.forward(&last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(num_layers: usize) -> (VarMap, TemporalClassifier) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = TemporalClassifier::new(126, 64, num_layers, 5, 0.3, vb).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_forward_shape() {
        let (_varmap, model) = build(1);
        let xs = Tensor::zeros((1, 8, 126), DType::F32, &Device::Cpu).unwrap();
        let logits = model.forward(&xs).unwrap();
        assert_eq!(logits.dims(), &[1, 5]);
    }

    #[test]
    fn test_stacked_forward_shape() {
        let (_varmap, model) = build(2);
        let xs = Tensor::randn(0f32, 1f32, (2, 8, 126), &Device::Cpu).unwrap();
        let logits = model.forward(&xs).unwrap();
        assert_eq!(logits.dims(), &[2, 5]);
        let values = logits.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_parameter_names_match_exported_layout() {
        let (varmap, _model) = build(2);
        let data = varmap.data().lock().unwrap();
        for name in [
            "lstm.weight_ih_l0",
            "lstm.weight_hh_l0_reverse",
            "lstm.bias_ih_l1",
            "lstm.bias_hh_l1_reverse",
            "classifier.1.weight",
            "classifier.1.bias",
        ] {
            assert!(data.contains_key(name), "missing {}", name);
        }
        // Second layer consumes both directions
        assert_eq!(data["lstm.weight_ih_l1"].dims(), &[256, 128]);
        assert_eq!(data["classifier.1.weight"].dims(), &[5, 128]);
    }

    #[test]
    fn test_wrong_width_fails_in_forward() {
        let (_varmap, model) = build(1);
        let xs = Tensor::zeros((1, 8, 10), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&xs).is_err());
    }

    #[test]
    fn test_reverse_time() {
        let xs = Tensor::arange(0f32, 6f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 3, 2))
            .unwrap();
        let rev = reverse_time(&xs).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(rev[0], vec![vec![4.0, 5.0], vec![2.0, 3.0], vec![0.0, 1.0]]);
    }
}
