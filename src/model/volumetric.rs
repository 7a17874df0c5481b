//! 3-D convolutional classifier over stacked image volumes
//!
//! Input is `(batch, channels, frames, height, width)`. Candle has no 3-D
//! convolution, so each block folds the frame axis into the batch and sums
//! one 2-D convolution per temporal kernel slice.

use candle_core::{bail, Module, Result, Tensor};
use candle_nn::{init, Linear, VarBuilder};

const KERNEL: usize = 3;
const PADDING: usize = 1;

/// Stride-1 3-D convolution with symmetric zero padding
struct Conv3d {
    /// (out, in, kd, kh, kw)
    weight: Tensor,
    bias: Tensor,
    padding: usize,
}

impl Conv3d {
    fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, KERNEL, KERNEL, KERNEL),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", init::ZERO)?;
        Ok(Self {
            weight,
            bias,
            padding: PADDING,
        })
    }

    /// One depth slice of the kernel applied to every output frame at once
    fn slice_conv(&self, padded: &Tensor, k: usize, out_frames: usize) -> Result<Tensor> {
        let (batch, channels, _, height, width) = padded.dims5()?;
        let slab = padded
            .narrow(2, k, out_frames)?
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?
            .reshape((batch * out_frames, channels, height, width))?;
        let kernel = self.weight.narrow(2, k, 1)?.squeeze(2)?.contiguous()?;
        slab.conv2d(&kernel, self.padding, 1, 1, 1)
    }
}

impl Module for Conv3d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, _, frames, _, _) = xs.dims5()?;
        let (out_channels, _, depth, _, _) = self.weight.dims5()?;
        let padded = xs.pad_with_zeros(2, self.padding, self.padding)?;
        let out_frames = frames + 2 * self.padding + 1 - depth;

        let mut acc = self.slice_conv(&padded, 0, out_frames)?;
        for k in 1..depth {
            acc = (acc + self.slice_conv(&padded, k, out_frames)?)?;
        }

        let (_, _, height, width) = acc.dims4()?;
        acc.reshape((batch, out_frames, out_channels, height, width))?
            .permute((0, 2, 1, 3, 4))?
            .broadcast_add(&self.bias.reshape((1, out_channels, 1, 1, 1))?)
    }
}

/// Spatial max pooling applied to every frame
fn max_pool_spatial(xs: &Tensor, size: usize) -> Result<Tensor> {
    let (batch, channels, frames, height, width) = xs.dims5()?;
    let folded = xs
        .permute((0, 2, 1, 3, 4))?
        .contiguous()?
        .reshape((batch * frames, channels, height, width))?
        .max_pool2d(size)?;
    let (_, _, height, width) = folded.dims4()?;
    folded
        .reshape((batch, frames, channels, height, width))?
        .permute((0, 2, 1, 3, 4))?
        .contiguous()
}

/// Max pooling over non-overlapping frame windows; a trailing partial
/// window is dropped
fn max_pool_temporal(xs: &Tensor, size: usize) -> Result<Tensor> {
    let (batch, channels, frames, height, width) = xs.dims5()?;
    let pooled = frames / size;
    xs.narrow(2, 0, pooled * size)?
        .contiguous()?
        .reshape((batch, channels, pooled, size, height * width))?
        .max(3)?
        .reshape((batch, channels, pooled, height, width))
}

pub struct VolumetricClassifier {
    blocks: [Conv3d; 3],
    head: Linear,
}

impl VolumetricClassifier {
    pub fn new(in_channels: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");
        let blocks = [
            Conv3d::new(in_channels, 16, features.pp("0"))?,
            Conv3d::new(16, 32, features.pp("3"))?,
            Conv3d::new(32, 64, features.pp("6"))?,
        ];
        let head = candle_nn::linear(64, num_classes, vb.pp("classifier"))?;
        Ok(Self { blocks, head })
    }
}

impl Module for VolumetricClassifier {
    /// (batch, channels, frames, H, W) → (batch, num_classes)
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, _, frames, height, width) = xs.dims5()?;
        if frames < 2 || height < 4 || width < 4 {
            bail!(
                "volume of {} frames at {}x{} is too small for the pooling stages",
                frames,
                height,
                width
            );
        }

        let [first, second, third] = &self.blocks;
        let h = max_pool_spatial(&first.forward(xs)?.relu()?, 2)?;
        let h = second.forward(&h)?.relu()?;
        let h = max_pool_temporal(&max_pool_spatial(&h, 2)?, 2)?;
        let h = third.forward(&h)?.relu()?;

        // Adaptive average pool to 1x1x1
        let pooled = h.flatten_from(2)?.mean(2)?;
        self.head.forward(&pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_forward_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = VolumetricClassifier::new(3, 5, vb).unwrap();

        let xs = Tensor::randn(0f32, 1f32, (2, 3, 4, 16, 16), &Device::Cpu).unwrap();
        let logits = model.forward(&xs).unwrap();
        assert_eq!(logits.dims(), &[2, 5]);
    }

    #[test]
    fn test_parameter_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _model = VolumetricClassifier::new(3, 5, vb).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["features.0.weight"].dims(), &[16, 3, 3, 3, 3]);
        assert_eq!(data["features.3.weight"].dims(), &[32, 16, 3, 3, 3]);
        assert_eq!(data["features.6.bias"].dims(), &[64]);
        assert_eq!(data["classifier.weight"].dims(), &[5, 64]);
    }

    #[test]
    fn test_conv3d_preserves_volume() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = Conv3d::new(3, 8, vb).unwrap();

        let xs = Tensor::ones((1, 3, 5, 6, 7), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(conv.forward(&xs).unwrap().dims(), &[1, 8, 5, 6, 7]);
    }

    #[test]
    fn test_temporal_pool_takes_window_max() {
        let xs = Tensor::arange(0f32, 5f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 5, 1, 1))
            .unwrap();
        let pooled = max_pool_temporal(&xs, 2).unwrap();
        assert_eq!(pooled.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_rejects_single_frame_volume() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = VolumetricClassifier::new(3, 5, vb).unwrap();

        let xs = Tensor::zeros((1, 3, 1, 16, 16), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&xs).is_err());
    }
}
