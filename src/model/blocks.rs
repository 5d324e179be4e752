//! Convolution building blocks shared by the generators and critics
//!
//! `DeconvBlock` upsamples by a factor of `stride`, `ConvBlock` downsamples.
//! All weights start from N(0, 0.02), the usual DCGAN initialisation.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

/// Negative slope used by the WGAN critic
pub const CRITIC_LEAK: f64 = 0.2;

/// DCGAN weight initialisation
pub fn dcgan_init() -> nn::Init {
    nn::Init::Randn {
        mean: 0.0,
        stdev: 0.02,
    }
}

/// LeakyReLU with a configurable negative slope (`slope` < 1)
pub fn leaky_relu(xs: &Tensor, slope: f64) -> Tensor {
    xs.maximum(&(xs * slope))
}

/// Padding used when a block is built without an explicit one
pub fn default_padding(kernel_size: i64, stride: i64) -> i64 {
    kernel_size / 2 / stride
}

/// Transposed convolution followed by ReLU and batch norm
///
/// ReLU is applied before normalisation, so the block output is centred
/// rather than non-negative.
#[derive(Debug)]
pub struct DeconvBlock {
    conv: nn::ConvTranspose2D,
    bn: Option<nn::BatchNorm>,
}

impl DeconvBlock {
    pub fn new(
        vs: &nn::Path,
        n_in: i64,
        n_out: i64,
        kernel_size: i64,
        stride: i64,
        padding: i64,
        bn: bool,
    ) -> Self {
        let config = nn::ConvTransposeConfig {
            stride,
            padding,
            bias: false,
            ws_init: dcgan_init(),
            ..Default::default()
        };
        let conv = nn::conv_transpose2d(vs / "conv", n_in, n_out, kernel_size, config);
        let bn = bn.then(|| nn::batch_norm2d(vs / "bn", n_out, Default::default()));

        Self { conv, bn }
    }
}

impl ModuleT for DeconvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = self.conv.forward(xs).relu();
        match &self.bn {
            Some(bn) => bn.forward_t(&x, train),
            None => x,
        }
    }
}

/// Strided convolution, optional batch norm, LeakyReLU(0.2)
#[derive(Debug)]
pub struct ConvBlock {
    conv: nn::Conv2D,
    bn: Option<nn::BatchNorm>,
}

impl ConvBlock {
    pub fn new(
        vs: &nn::Path,
        n_in: i64,
        n_out: i64,
        kernel_size: i64,
        stride: i64,
        padding: Option<i64>,
        bn: bool,
    ) -> Self {
        let config = nn::ConvConfig {
            stride,
            padding: padding.unwrap_or_else(|| default_padding(kernel_size, stride)),
            bias: false,
            ws_init: dcgan_init(),
            ..Default::default()
        };
        let conv = nn::conv2d(vs / "conv", n_in, n_out, kernel_size, config);
        let bn = bn.then(|| nn::batch_norm2d(vs / "bn", n_out, Default::default()));

        Self { conv, bn }
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = self.conv.forward(xs);
        let x = match &self.bn {
            Some(bn) => bn.forward_t(&x, train),
            None => x,
        };
        leaky_relu(&x, CRITIC_LEAK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn test_default_padding() {
        assert_eq!(default_padding(4, 2), 1);
        assert_eq!(default_padding(3, 1), 1);
        assert_eq!(default_padding(4, 1), 2);
    }

    #[test]
    fn test_leaky_relu() {
        let xs = Tensor::from_slice(&[-1.0f32, 0.0, 2.0]);
        let ys = leaky_relu(&xs, 0.2);
        let ys: Vec<f32> = Vec::<f32>::try_from(&ys).unwrap();
        assert!((ys[0] + 0.2).abs() < 1e-6);
        assert_eq!(ys[1], 0.0);
        assert_eq!(ys[2], 2.0);
    }

    #[test]
    fn test_deconv_block_doubles_resolution() {
        let vs = VarStore::new(Device::Cpu);
        let block = DeconvBlock::new(&vs.root(), 16, 8, 4, 2, 1, true);

        let xs = Tensor::randn([2, 16, 4, 4], (Kind::Float, Device::Cpu));
        let ys = block.forward_t(&xs, true);
        assert_eq!(ys.size(), vec![2, 8, 8, 8]);
    }

    #[test]
    fn test_conv_block_halves_resolution() {
        let vs = VarStore::new(Device::Cpu);
        let block = ConvBlock::new(&vs.root(), 3, 8, 4, 2, None, false);

        let xs = Tensor::randn([2, 3, 16, 16], (Kind::Float, Device::Cpu));
        let ys = block.forward_t(&xs, false);
        assert_eq!(ys.size(), vec![2, 8, 8, 8]);
    }
}
