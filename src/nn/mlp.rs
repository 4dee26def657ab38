//! Feed-forward networks used by the action heads and the critic.

use tch::{nn, nn::Module, Tensor};

/// Multi-layer perceptron: linear layers with ReLU between them and a linear
/// output layer.
pub struct Mlp {
    net: nn::Sequential,
    input_dim: i64,
    output_dim: i64,
}

impl Mlp {
    /// Creates `input_dim → output_dims[0] → ... → output_dims[last]`.
    ///
    /// `output_dims` must not be empty.
    pub fn new(p: &nn::Path, input_dim: i64, output_dims: &[i64]) -> Self {
        let mut net = nn::seq();
        let mut in_dim = input_dim;
        for (i, &out_dim) in output_dims.iter().enumerate() {
            net = net.add(nn::linear(
                p / format!("l{}", i + 1),
                in_dim,
                out_dim,
                Default::default(),
            ));
            if i + 1 < output_dims.len() {
                net = net.add_fn(|x| x.relu());
            }
            in_dim = out_dim;
        }
        Self {
            net,
            input_dim,
            output_dim: in_dim,
        }
    }

    pub fn input_dim(&self) -> i64 {
        self.input_dim
    }

    pub fn output_dim(&self) -> i64 {
        self.output_dim
    }

    /// Applies the network over the last dimension of `xs`.
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        self.net.forward(xs)
    }
}
