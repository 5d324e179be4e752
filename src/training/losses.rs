//! Loss functions for GAN training
//!
//! Wasserstein losses for the WGAN critic, hinge losses for the SAGAN
//! discriminator and the gradient penalty used by the WGAN-GP variant.
//! All functions take per-sample critic scores of shape (batch,).

use tch::{nn::ModuleT, Kind, Tensor};

/// Wasserstein loss for the critic
///
/// Critic loss: E[D(G(z))] - E[D(x)]
pub fn critic_loss_wasserstein(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    fake_output.mean(Kind::Float) - real_output.mean(Kind::Float)
}

/// Wasserstein loss for the generator
///
/// Generator loss: -E[D(G(z))]
pub fn generator_loss_wasserstein(fake_output: &Tensor) -> Tensor {
    -fake_output.mean(Kind::Float)
}

/// Estimated Wasserstein distance: E[D(x)] - E[D(G(z))]
///
/// The negated critic loss; it should shrink as the generator improves.
pub fn wasserstein_estimate(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    real_output.mean(Kind::Float) - fake_output.mean(Kind::Float)
}

/// Hinge loss for the discriminator
///
/// E[relu(1 - D(x))] + E[relu(1 + D(G(z)))]
pub fn discriminator_loss_hinge(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    let real_loss = (Tensor::ones_like(real_output) - real_output)
        .relu()
        .mean(Kind::Float);
    let fake_loss = (fake_output + 1.0).relu().mean(Kind::Float);
    real_loss + fake_loss
}

/// Hinge loss for the generator: -E[D(G(z))]
pub fn generator_loss_hinge(fake_output: &Tensor) -> Tensor {
    -fake_output.mean(Kind::Float)
}

/// Gradient penalty of WGAN-GP
///
/// Evaluates the critic on random points between real and generated
/// images and penalises gradient norms that differ from 1:
/// E[(||grad D(x_hat)||_2 - 1)^2]
///
/// # Arguments
///
/// * `critic` - Critic network, evaluated in training mode
/// * `real` - Real images (batch, channels, height, width)
/// * `fake` - Generated images of the same shape; gradients are not
///   propagated into the generator
pub fn gradient_penalty(critic: &dyn ModuleT, real: &Tensor, fake: &Tensor) -> Tensor {
    let batch_size = real.size()[0];
    let alpha = Tensor::rand([batch_size, 1, 1, 1], (Kind::Float, real.device()));
    let one_minus_alpha = Tensor::ones_like(&alpha) - &alpha;

    let interpolates = (real * &alpha + fake.detach() * one_minus_alpha)
        .detach()
        .set_requires_grad(true);
    let scores = critic.forward_t(&interpolates, true);

    let grads = Tensor::run_backward(&[scores.sum(Kind::Float)], &[&interpolates], true, true);
    let grad_norm = (grads[0]
        .view([batch_size, -1])
        .square()
        .sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
        + 1e-12)
        .sqrt();

    (grad_norm - 1.0).square().mean(Kind::Float)
}
