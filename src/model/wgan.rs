//! Wasserstein GAN generator and critic for 64x64 or 128x128 images
//!
//! Both networks are plain DCGAN stacks. The generator starts from a 1x1
//! latent map and doubles the resolution at every stage; the critic
//! halves it until a 4x4 map remains, which the last convolution turns
//! into a single unbounded score.

use tch::{nn, nn::ModuleT, Kind, Tensor};

use super::blocks::{dcgan_init, ConvBlock, DeconvBlock};
use super::gan::ImageSize;

/// Generator network
///
/// Input: noise of shape (batch, latent_dim) or (batch, latent_dim, 1, 1).
/// Output: images of shape (batch, channels, size, size) in [-1, 1].
#[derive(Debug)]
pub struct WganGenerator {
    image_size: ImageSize,
    latent_dim: i64,
    main: nn::SequentialT,
}

impl WganGenerator {
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

        // latent_dim x 1 x 1 -> (ngf * mults[0]) x 4 x 4
        main = main.add(DeconvBlock::new(
            &(vs / "deconv0"),
            latent_dim,
            ngf * mults[0],
            kernel_size,
            1,
            0,
            true,
        ));

        for (i, pair) in mults.windows(2).enumerate() {
            main = main.add(DeconvBlock::new(
                &(vs / format!("deconv{}", i + 1)),
                ngf * pair[0],
                ngf * pair[1],
                kernel_size,
                2,
                1,
                true,
            ));
        }

        let to_image = nn::conv_transpose2d(
            vs / "to_image",
            ngf,
            channels,
            kernel_size,
            nn::ConvTransposeConfig {
                stride: 2,
                padding: 1,
                bias: false,
                ws_init: dcgan_init(),
                ..Default::default()
            },
        );
        main = main.add(to_image).add_fn(|x| x.tanh());

        Self {
            image_size,
            latent_dim,
            main,
        }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn latent_dim(&self) -> i64 {
        self.latent_dim
    }
}

impl ModuleT for WganGenerator {
    fn forward_t(&self, noise: &Tensor, train: bool) -> Tensor {
        let batch_size = noise.size()[0];
        let z = noise.view([batch_size, self.latent_dim, 1, 1]);
        self.main.forward_t(&z, train)
    }
}

/// Critic network
///
/// Returns one score per image, shape (batch,). Scores are not
/// probabilities; the Wasserstein losses only compare their means.
#[derive(Debug)]
pub struct WganCritic {
    image_size: ImageSize,
    main: nn::SequentialT,
}

impl WganCritic {
    pub fn new(
        vs: &nn::Path,
        image_size: ImageSize,
        kernel_size: i64,
        ndf: i64,
        channels: i64,
    ) -> Self {
        let mults = image_size.critic_multipliers();
        let mut main = nn::seq_t();

        // The first block sees raw pixels and skips batch norm
        main = main.add(ConvBlock::new(
            &(vs / "conv0"),
            channels,
            ndf * mults[0],
            kernel_size,
            2,
            Some(1),
            false,
        ));

        for (i, pair) in mults.windows(2).enumerate() {
            main = main.add(ConvBlock::new(
                &(vs / format!("conv{}", i + 1)),
                ndf * pair[0],
                ndf * pair[1],
                kernel_size,
                2,
                Some(1),
                true,
            ));
        }

        let last = mults[mults.len() - 1];
        let score = nn::conv2d(
            vs / "score",
            ndf * last,
            1,
            kernel_size,
            nn::ConvConfig {
                stride: 1,
                padding: 0,
                bias: false,
                ws_init: dcgan_init(),
                ..Default::default()
            },
        );
        main = main.add(score);

        Self { image_size, main }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }
}

impl ModuleT for WganCritic {
    fn forward_t(&self, images: &Tensor, train: bool) -> Tensor {
        self.main
            .forward_t(images, train)
            .mean_dim(Some([1i64, 2, 3].as_slice()), false, Kind::Float)
    }
}
