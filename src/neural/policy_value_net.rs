//! The policy/value residual network and its evaluator wrapper.
//!
//! The architecture follows the classic two-headed layout: a convolutional
//! trunk of residual blocks, a 2-channel policy head projecting to one logit
//! per cell, and a 1-channel value head squashed through tanh. Checkpoints
//! are plain `VarStore` blobs; the registry only ever treats them as opaque
//! files.

use std::path::Path;

use tch::{nn, Device, Kind, Tensor};

use crate::config::{Config, CHESSBOARD_SIZE, NUM_CELLS};
use crate::game::Chessboard;
use crate::neural::evaluator::{Evaluation, Evaluator};
use crate::neural::res_net_block::ResNetBlock;
use crate::{Error, Result};

pub struct PolicyValueNet {
    conv_in: nn::Conv2D,
    bn_in: nn::BatchNorm,
    res_blocks: Vec<ResNetBlock>,
    policy_conv: nn::Conv2D,
    policy_bn: nn::BatchNorm,
    policy_fc: nn::Linear,
    value_conv: nn::Conv2D,
    value_bn: nn::BatchNorm,
    value_fc1: nn::Linear,
    value_fc2: nn::Linear,
}

impl PolicyValueNet {
    pub fn new(vs: &nn::VarStore, config: &Config) -> Self {
        let p = vs.root();
        let filters = config.num_filters;
        let cells = NUM_CELLS as i64;

        let conv_in = nn::conv2d(
            &p / "conv_in",
            2,
            filters,
            3,
            nn::ConvConfig {
                padding: 1,
                ..Default::default()
            },
        );
        let bn_in = nn::batch_norm2d(&p / "bn_in", filters, Default::default());

        let res_blocks = (0..config.num_residual_blocks)
            .map(|i| ResNetBlock::new(&(&p / format!("res{i}")), filters))
            .collect();

        let policy_conv = nn::conv2d(&p / "policy_conv", filters, 2, 1, Default::default());
        let policy_bn = nn::batch_norm2d(&p / "policy_bn", 2, Default::default());
        let policy_fc = nn::linear(&p / "policy_fc", 2 * cells, cells, Default::default());

        let value_conv = nn::conv2d(&p / "value_conv", filters, 1, 1, Default::default());
        let value_bn = nn::batch_norm2d(&p / "value_bn", 1, Default::default());
        let value_fc1 = nn::linear(
            &p / "value_fc1",
            cells,
            config.value_head_hidden_units,
            Default::default(),
        );
        let value_fc2 = nn::linear(
            &p / "value_fc2",
            config.value_head_hidden_units,
            1,
            Default::default(),
        );

        Self {
            conv_in,
            bn_in,
            res_blocks,
            policy_conv,
            policy_bn,
            policy_fc,
            value_conv,
            value_bn,
            value_fc1,
            value_fc2,
        }
    }

    /// Forward pass over a `(B, 2, S, S)` batch. Returns policy logits of
    /// shape `(B, S*S)` and values of shape `(B,)` in `[-1, 1]`.
    pub fn forward(&self, x: &Tensor, train: bool) -> (Tensor, Tensor) {
        let mut trunk = x
            .apply(&self.conv_in)
            .apply_t(&self.bn_in, train)
            .relu();
        for block in &self.res_blocks {
            trunk = block.forward(&trunk, train);
        }

        let policy = trunk
            .apply(&self.policy_conv)
            .apply_t(&self.policy_bn, train)
            .relu()
            .flatten(1, -1)
            .apply(&self.policy_fc);

        let value = trunk
            .apply(&self.value_conv)
            .apply_t(&self.value_bn, train)
            .relu()
            .flatten(1, -1)
            .apply(&self.value_fc1)
            .relu()
            .apply(&self.value_fc2)
            .tanh()
            .squeeze_dim(-1);

        (policy, value)
    }
}

/// Network plus the var store it lives in, bound to one device.
///
/// This is the [`Evaluator`] the search sees: it packs canonical boards into
/// a feature batch, runs a no-grad forward pass and hands back softmaxed
/// policies with scalar values.
pub struct NetEvaluator {
    vs: nn::VarStore,
    net: PolicyValueNet,
    device: Device,
}

impl NetEvaluator {
    /// Freshly initialized network.
    pub fn new(config: &Config, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = PolicyValueNet::new(&vs, config);
        NetEvaluator { vs, net, device }
    }

    /// Load weights from a checkpoint file. Failures are transient from the
    /// caller's point of view: the trainer may be mid-promotion.
    pub fn load(config: &Config, device: Device, path: &Path) -> Result<Self> {
        let mut evaluator = NetEvaluator::new(config, device);
        evaluator.vs.load(path).map_err(|e| {
            Error::CheckpointUnavailable(format!("loading weights from {path:?}: {e}"))
        })?;
        Ok(evaluator)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.vs.save(path)?;
        Ok(())
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn net(&self) -> &PolicyValueNet {
        &self.net
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Stack boards into the `(B, 2, S, S)` float input the network expects.
    pub fn input_tensor(&self, batch: &[Chessboard]) -> Tensor {
        let size = CHESSBOARD_SIZE as i64;
        let mut features = Vec::with_capacity(batch.len() * 2 * NUM_CELLS);
        for board in batch {
            features.extend(board.to_features());
        }
        Tensor::from_slice(&features)
            .view([batch.len() as i64, 2, size, size])
            .to_device(self.device)
    }
}

impl Evaluator for NetEvaluator {
    fn evaluate(&self, batch: &[Chessboard]) -> Result<Vec<Evaluation>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.input_tensor(batch);
        let (policies, values) = tch::no_grad(|| {
            let (logits, values) = self.net.forward(&input, false);
            (
                logits.softmax(-1, Kind::Float).to_device(Device::Cpu),
                values.to_device(Device::Cpu),
            )
        });

        let mut evaluations = Vec::with_capacity(batch.len());
        for i in 0..batch.len() as i64 {
            let policy = Vec::<f32>::try_from(&policies.get(i))
                .map_err(|e| Error::Evaluator(format!("reading policy row: {e}")))?;
            let value = values.double_value(&[i]) as f32;
            evaluations.push(Evaluation { policy, value });
        }
        Ok(evaluations)
    }
}
