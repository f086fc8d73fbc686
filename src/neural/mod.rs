pub mod evaluator;
pub mod policy_value_net;
pub mod res_net_block;

pub use evaluator::{Evaluation, Evaluator, HashEvaluator, UniformEvaluator};
pub use policy_value_net::{NetEvaluator, PolicyValueNet};

use crate::{Error, Result};

/// Map a configured device identifier onto a torch device.
///
/// Accepts `cpu`, `cuda` and `cuda:<n>`.
pub fn parse_device(identifier: &str) -> Result<tch::Device> {
    match identifier {
        "cpu" => Ok(tch::Device::Cpu),
        "cuda" => Ok(tch::Device::Cuda(0)),
        other => match other.strip_prefix("cuda:").and_then(|n| n.parse().ok()) {
            Some(ordinal) => Ok(tch::Device::Cuda(ordinal)),
            None => Err(Error::Config(format!("unknown device identifier {other:?}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_identifiers_parse() {
        assert_eq!(parse_device("cpu").unwrap(), tch::Device::Cpu);
        assert_eq!(parse_device("cuda").unwrap(), tch::Device::Cuda(0));
        assert_eq!(parse_device("cuda:2").unwrap(), tch::Device::Cuda(2));
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());
    }
}
