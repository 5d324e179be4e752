//! Self-attention and spectral normalisation layers for the SAGAN
//!
//! Spectral normalisation keeps a non-trainable left singular vector `u`
//! in the var store. Every training forward runs one power-iteration step,
//! writes the new `u` back in place and divides the weight by the
//! estimated largest singular value. Gradients flow through sigma but not
//! through the power iteration itself.

use tch::{nn, nn::ModuleT, Kind, Tensor};

use super::blocks::dcgan_init;

const SN_EPS: f64 = 1e-12;

fn l2_normalize(v: &Tensor) -> Tensor {
    v / (v.norm() + SN_EPS)
}

/// Spectrally normalised weight
#[derive(Debug)]
pub struct SpectralNorm {
    weight: Tensor,
    u: Tensor,
    /// Dimension holding the output channels (1 for transposed convs)
    dim: i64,
}

impl SpectralNorm {
    pub fn new(vs: &nn::Path, weight: Tensor, dim: i64) -> Self {
        let rows = weight.size()[dim as usize];
        let u = vs.ones_no_train("sn_u", &[rows]);
        Self { weight, u, dim }
    }

    fn weight_matrix(&self) -> Tensor {
        let w = if self.dim == 0 {
            self.weight.shallow_clone()
        } else {
            self.weight.transpose(0, self.dim)
        };
        let rows = w.size()[0];
        w.reshape([rows, -1])
    }

    /// Largest singular value estimate for the current weight
    pub fn sigma(&self, train: bool) -> Tensor {
        let w_mat = self.weight_matrix();

        let (u, v) = tch::no_grad(|| {
            let v = l2_normalize(&w_mat.tr().mv(&self.u));
            let u = l2_normalize(&w_mat.mv(&v));
            (u, v)
        });

        if train {
            let mut state = self.u.shallow_clone();
            tch::no_grad(|| state.copy_(&u));
        }

        u.dot(&w_mat.mv(&v))
    }

    /// Weight divided by its spectral norm
    pub fn normalized(&self, train: bool) -> Tensor {
        &self.weight / self.sigma(train)
    }

    pub fn raw_weight(&self) -> &Tensor {
        &self.weight
    }
}

/// 2D convolution with a spectrally normalised kernel
#[derive(Debug)]
pub struct SnConv2d {
    sn: SpectralNorm,
    bias: Option<Tensor>,
    stride: i64,
    padding: i64,
}

impl SnConv2d {
    pub fn new(
        vs: &nn::Path,
        n_in: i64,
        n_out: i64,
        kernel_size: i64,
        stride: i64,
        padding: i64,
        bias: bool,
    ) -> Self {
        let weight = vs.var("weight", &[n_out, n_in, kernel_size, kernel_size], dcgan_init());
        let bias = bias.then(|| vs.zeros("bias", &[n_out]));
        let sn = SpectralNorm::new(vs, weight, 0);

        Self {
            sn,
            bias,
            stride,
            padding,
        }
    }

    pub fn spectral_norm(&self) -> &SpectralNorm {
        &self.sn
    }
}

impl ModuleT for SnConv2d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.conv2d(
            &self.sn.normalized(train),
            self.bias.as_ref(),
            [self.stride, self.stride],
            [self.padding, self.padding],
            [1, 1],
            1,
        )
    }
}

/// Transposed 2D convolution with a spectrally normalised kernel
#[derive(Debug)]
pub struct SnConvTranspose2d {
    sn: SpectralNorm,
    bias: Option<Tensor>,
    stride: i64,
    padding: i64,
}

impl SnConvTranspose2d {
    pub fn new(
        vs: &nn::Path,
        n_in: i64,
        n_out: i64,
        kernel_size: i64,
        stride: i64,
        padding: i64,
        bias: bool,
    ) -> Self {
        // Transposed kernels are laid out (in, out, k, k)
        let weight = vs.var("weight", &[n_in, n_out, kernel_size, kernel_size], dcgan_init());
        let bias = bias.then(|| vs.zeros("bias", &[n_out]));
        let sn = SpectralNorm::new(vs, weight, 1);

        Self {
            sn,
            bias,
            stride,
            padding,
        }
    }
}

impl ModuleT for SnConvTranspose2d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.conv_transpose2d(
            &self.sn.normalized(train),
            self.bias.as_ref(),
            [self.stride, self.stride],
            [self.padding, self.padding],
            [0, 0],
            1,
            [1, 1],
        )
    }
}

/// Self-attention over all spatial positions of a feature map
///
/// out = gamma * attention(x) + x, with gamma starting at zero so the
/// layer is an identity until training decides otherwise.
#[derive(Debug)]
pub struct SelfAttention {
    query: SnConv2d,
    key: SnConv2d,
    value: SnConv2d,
    gamma: Tensor,
}

impl SelfAttention {
    pub fn new(vs: &nn::Path, channels: i64) -> Self {
        let reduced = (channels / 8).max(1);
        Self {
            query: SnConv2d::new(&(vs / "query"), channels, reduced, 1, 1, 0, true),
            key: SnConv2d::new(&(vs / "key"), channels, reduced, 1, 1, 0, true),
            value: SnConv2d::new(&(vs / "value"), channels, channels, 1, 1, 0, true),
            gamma: vs.zeros("gamma", &[1]),
        }
    }

    /// Forward pass that also returns the attention map
    ///
    /// # Returns
    ///
    /// Tuple of (output with the input's shape, attention of shape
    /// (batch, positions, positions)) where row `i` holds the weights
    /// position `i` assigns to every other position.
    pub fn forward_with_attention(&self, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let size = xs.size();
        let (batch, channels, height, width) = (size[0], size[1], size[2], size[3]);
        let positions = height * width;

        let query = self
            .query
            .forward_t(xs, train)
            .view([batch, -1, positions])
            .permute([0, 2, 1]);
        let key = self.key.forward_t(xs, train).view([batch, -1, positions]);
        let attention = query.bmm(&key).softmax(-1, Kind::Float);

        let value = self.value.forward_t(xs, train).view([batch, -1, positions]);
        let out = value
            .bmm(&attention.permute([0, 2, 1]))
            .view([batch, channels, height, width]);

        (&self.gamma * out + xs, attention)
    }

    pub fn gamma(&self) -> f64 {
        self.gamma.double_value(&[0])
    }
}

impl ModuleT for SelfAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward_with_attention(xs, train).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    #[test]
    fn test_spectral_norm_bounds_singular_value() {
        let vs = VarStore::new(Device::Cpu);
        let conv = SnConv2d::new(&vs.root(), 4, 8, 3, 1, 1, false);

        // Power iteration converges after a handful of training forwards
        let xs = Tensor::randn([1, 4, 8, 8], (Kind::Float, Device::Cpu));
        for _ in 0..30 {
            let _ = conv.forward_t(&xs, true);
        }

        let w = conv.spectral_norm().normalized(false).detach();
        let w_mat = w.reshape([8, -1]);

        // Independent estimate: dominant eigenvalue of W W^T
        let gram = w_mat.matmul(&w_mat.tr());
        let mut v = Tensor::ones([8], (Kind::Float, Device::Cpu));
        for _ in 0..200 {
            v = l2_normalize(&gram.mv(&v));
        }
        let top = v.dot(&gram.mv(&v)).double_value(&[]).sqrt();
        assert!((top - 1.0).abs() < 0.05, "largest singular value {}", top);
    }

    #[test]
    fn test_spectral_norm_state_only_moves_in_training() {
        let vs = VarStore::new(Device::Cpu);
        let conv = SnConv2d::new(&vs.root(), 3, 6, 3, 1, 1, true);
        let xs = Tensor::randn([2, 3, 8, 8], (Kind::Float, Device::Cpu));

        let initial = conv.sn.u.copy();
        let eval_a = conv.forward_t(&xs, false);
        let eval_b = conv.forward_t(&xs, false);
        assert!(conv.sn.u.equal(&initial));
        assert!(eval_a.equal(&eval_b));

        let _ = conv.forward_t(&xs, true);
        assert!(!conv.sn.u.equal(&initial));

        // Eval reuses the stored vector left by the last training step
        let stored = conv.sn.u.copy();
        let _ = conv.forward_t(&xs, false);
        assert!(conv.sn.u.equal(&stored));
        assert_eq!(vs.trainable_variables().len(), 2);
    }

    #[test]
    fn test_sn_conv_transpose_shape() {
        let vs = VarStore::new(Device::Cpu);
        let deconv = SnConvTranspose2d::new(&vs.root(), 8, 4, 4, 2, 1, false);

        let xs = Tensor::randn([2, 8, 4, 4], (Kind::Float, Device::Cpu));
        assert_eq!(deconv.forward_t(&xs, true).size(), vec![2, 4, 8, 8]);
    }

    #[test]
    fn test_self_attention_starts_as_identity() {
        let vs = VarStore::new(Device::Cpu);
        let attn = SelfAttention::new(&vs.root(), 16);

        let xs = Tensor::randn([2, 16, 4, 4], (Kind::Float, Device::Cpu));
        let (out, map) = attn.forward_with_attention(&xs, false);

        assert_eq!(out.size(), xs.size());
        assert_eq!(map.size(), vec![2, 16, 16]);
        assert_eq!(attn.gamma(), 0.0);

        let diff = (&out - &xs).abs().max().double_value(&[]);
        assert!(diff < 1e-6);

        // Every row of the attention map is a distribution
        let row_sums = map.sum_dim_intlist([-1i64].as_slice(), false, Kind::Float);
        let max_err = (row_sums - 1.0).abs().max().double_value(&[]);
        assert!(max_err < 1e-5);
    }
}
