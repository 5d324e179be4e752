//! Self-Attention GAN generator and discriminator
//!
//! Same resolution ladder as the WGAN networks, but every convolution is
//! spectrally normalised and self-attention layers sit at the mid-level
//! feature maps where long-range structure (symmetry of faces, fur
//! patterns across the body) becomes visible.

use tch::{nn, nn::ModuleT, Kind, Tensor};

use super::attention::{SelfAttention, SnConv2d, SnConvTranspose2d};
use super::blocks::leaky_relu;
use super::gan::ImageSize;

/// Negative slope used by the SAGAN discriminator
pub const DISCRIMINATOR_LEAK: f64 = 0.1;

/// Resolutions after which the generator applies self-attention
const GENERATOR_ATTENTION_AT: [i64; 2] = [32, 64];

/// Resolutions after which the discriminator applies self-attention
const DISCRIMINATOR_ATTENTION_AT: [i64; 2] = [16, 8];

/// Spectrally normalised upsampling stage: ConvT -> BN -> ReLU
#[derive(Debug)]
struct UpStage {
    conv: SnConvTranspose2d,
    bn: nn::BatchNorm,
}

impl ModuleT for UpStage {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = self.conv.forward_t(xs, train);
        self.bn.forward_t(&x, train).relu()
    }
}

/// Spectrally normalised downsampling stage: Conv -> LeakyReLU(0.1)
#[derive(Debug)]
struct DownStage {
    conv: SnConv2d,
}

impl ModuleT for DownStage {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        leaky_relu(&self.conv.forward_t(xs, train), DISCRIMINATOR_LEAK)
    }
}

/// SAGAN generator
#[derive(Debug)]
pub struct SaganGenerator {
    image_size: ImageSize,
    latent_dim: i64,
    main: nn::SequentialT,
}

impl SaganGenerator {
    pub fn new(
        vs: &nn::Path,
        image_size: ImageSize,
        kernel_size: i64,
        latent_dim: i64,
        ngf: i64,
        channels: i64,
    ) -> Self {
        let mults = image_size.generator_multipliers();
        let mut main = nn::seq_t();
        let mut resolution = 4;

        for (i, &mult) in mults.iter().enumerate() {
            let stage_vs = vs / format!("up{}", i);
            let (n_in, stride, padding) = if i == 0 {
                (latent_dim, 1, 0)
            } else {
                (ngf * mults[i - 1], 2, 1)
            };
            let n_out = ngf * mult;

            main = main.add(UpStage {
                conv: SnConvTranspose2d::new(
                    &(&stage_vs / "conv"),
                    n_in,
                    n_out,
                    kernel_size,
                    stride,
                    padding,
                    true,
                ),
                bn: nn::batch_norm2d(&stage_vs / "bn", n_out, Default::default()),
            });

            if i > 0 {
                resolution *= 2;
            }
            if GENERATOR_ATTENTION_AT.contains(&resolution) {
                main = main.add(SelfAttention::new(
                    &(vs / format!("attn{}", resolution)),
                    n_out,
                ));
            }
        }

        main = main
            .add(SnConvTranspose2d::new(
                &(vs / "to_image"),
                ngf,
                channels,
                kernel_size,
                2,
                1,
                true,
            ))
            .add_fn(|x| x.tanh());

        Self {
            image_size,
            latent_dim,
            main,
        }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }
}

impl ModuleT for SaganGenerator {
    fn forward_t(&self, noise: &Tensor, train: bool) -> Tensor {
        let batch_size = noise.size()[0];
        let z = noise.view([batch_size, self.latent_dim, 1, 1]);
        self.main.forward_t(&z, train)
    }
}

/// SAGAN discriminator, one hinge-loss score per image
#[derive(Debug)]
pub struct SaganDiscriminator {
    image_size: ImageSize,
    main: nn::SequentialT,
}

impl SaganDiscriminator {
    pub fn new(
        vs: &nn::Path,
        image_size: ImageSize,
        kernel_size: i64,
        ndf: i64,
        channels: i64,
    ) -> Self {
        let mults = image_size.critic_multipliers();
        let mut main = nn::seq_t();
        let mut resolution = image_size.pixels();

        for (i, &mult) in mults.iter().enumerate() {
            let n_in = if i == 0 { channels } else { ndf * mults[i - 1] };
            let n_out = ndf * mult;

            main = main.add(DownStage {
                conv: SnConv2d::new(
                    &(vs / format!("down{}", i)),
                    n_in,
                    n_out,
                    kernel_size,
                    2,
                    1,
                    true,
                ),
            });
            resolution /= 2;

            if DISCRIMINATOR_ATTENTION_AT.contains(&resolution) {
                main = main.add(SelfAttention::new(
                    &(vs / format!("attn{}", resolution)),
                    n_out,
                ));
            }
        }

        let last = mults[mults.len() - 1];
        main = main.add(SnConv2d::new(
            &(vs / "score"),
            ndf * last,
            1,
            kernel_size,
            1,
            0,
            true,
        ));

        Self { image_size, main }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }
}

impl ModuleT for SaganDiscriminator {
    fn forward_t(&self, images: &Tensor, train: bool) -> Tensor {
        self.main
            .forward_t(images, train)
            .mean_dim(Some([1i64, 2, 3].as_slice()), false, Kind::Float)
    }
}
