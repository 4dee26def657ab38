//! Neural building blocks: tensor helpers, MLPs, distributions and the
//! message-passing encoder.

pub mod distributions;
pub mod encoder;
pub mod mlp;
pub mod ops;

pub use distributions::{Categorical, Normal, Sampler};
pub use encoder::{EdgeUpdater, MessagePassingEncoder};
pub use mlp::Mlp;
pub use ops::{gaussian_expansion, masked_softmax, to_one_hot};
