use tch::{nn, Tensor};

/// Residual block of the network trunk: two 3x3 convolutions with batch
/// norm and a skip connection. The trunk keeps a constant channel width.
pub struct ResNetBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
}

impl ResNetBlock {
    pub fn new(path: &nn::Path, channels: i64) -> Self {
        let conv_config = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        let bn_config = nn::BatchNormConfig {
            ws_init: nn::Init::Const(1.0),
            bs_init: nn::Init::Const(0.0),
            ..Default::default()
        };
        let conv1 = nn::conv2d(path / "conv1", channels, channels, 3, conv_config);
        let bn1 = nn::batch_norm2d(path / "bn1", channels, bn_config);
        let conv2 = nn::conv2d(path / "conv2", channels, channels, 3, conv_config);
        let bn2 = nn::batch_norm2d(path / "bn2", channels, bn_config);
        Self {
            conv1,
            bn1,
            conv2,
            bn2,
        }
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        let h = x
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        (h + x).relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device};

    #[test]
    fn block_preserves_the_tensor_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = ResNetBlock::new(&vs.root(), 32);

        let input = Tensor::rand(&[1, 32, 15, 15], tch::kind::FLOAT_CPU);
        let output = block.forward(&input, true);

        assert_eq!(output.size(), vec![1, 32, 15, 15]);
    }
}
