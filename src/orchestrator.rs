//! Lifecycle of the background training master.
//!
//! `start` bootstraps the checkpoint directory, detaches a single `run`
//! process and records its PID in a hidden file under the checkpoint dir.
//! `kill` signals the recorded PIDs and removes the record. `run` hosts the
//! actual pipeline: one self-play worker thread per configured device plus
//! the trainer thread, wired together by the bounded game queue. There is no
//! supervision and no graceful-shutdown protocol; workers die with the
//! process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use sysinfo::{Pid, System};

use crate::checkpoint::CheckpointRegistry;
use crate::config::Config;
use crate::data::trajectory_channel;
use crate::neural::{parse_device, NetEvaluator};
use crate::training::{self_play_worker, Trainer};
use crate::{Error, Result};

const MASTER_FILE: &str = ".master";

fn master_file(config: &Config) -> PathBuf {
    config.ckpt_dir.join(MASTER_FILE)
}

/// Make sure the registry has a `best` index to serve: adopt the largest
/// numbered checkpoint, or save a freshly initialized network as `0.pt`.
fn bootstrap_registry(config: &Config, registry: &CheckpointRegistry) -> Result<()> {
    registry.ensure_dir()?;
    if registry.read_best().is_ok() {
        return Ok(());
    }
    log::info!("best index not found");
    let best_idx = match registry.latest_ckpt()? {
        Some(idx) => idx,
        None => {
            log::info!("no ckpt available in the ckpt directory");
            let device = parse_device(&config.train_device)?;
            let network = NetEvaluator::new(config, device);
            network.save(&registry.ckpt_path(0))?;
            log::info!("creating 0.pt as the default best ckpt");
            0
        }
    };
    registry.write_best(best_idx)?;
    Ok(())
}

/// Detach the background training process and record its PID.
pub fn start(config: &Config, config_path: Option<&Path>) -> Result<()> {
    if master_file(config).exists() {
        return Err(Error::AlreadyRunning);
    }
    let registry = CheckpointRegistry::new(&config.ckpt_dir);
    bootstrap_registry(config, &registry)?;

    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = command.spawn()?;

    let pids = vec![child.id()];
    fs::write(master_file(config), serde_json::to_string(&pids)?)?;
    log::info!("started background training, pid {}", child.id());
    // the child is left to outlive us, like any detached daemon
    Ok(())
}

/// Signal every recorded PID and drop the record file.
pub fn kill(config: &Config) -> Result<()> {
    let path = master_file(config);
    let text = fs::read_to_string(&path).map_err(|_| Error::NotRunning)?;
    let pids: Vec<u32> = serde_json::from_str(&text)?;

    log::info!("killing background processes");
    let system = System::new_all();
    for pid in pids {
        match system.process(Pid::from_u32(pid)) {
            Some(process) => {
                process.kill();
            }
            None => log::warn!("process {pid} is already gone"),
        }
    }
    fs::remove_file(&path)?;
    Ok(())
}

/// Foreground supervisor: worker threads plus the trainer, joined forever.
pub fn run(config: &Config) -> Result<()> {
    let registry = CheckpointRegistry::new(&config.ckpt_dir);
    let init_idx = registry.wait_best();
    let (sender, receiver) = trajectory_channel(config.queue_capacity);

    let mut handles = Vec::new();
    for (worker, identifier) in config.self_play_devices.iter().enumerate() {
        let device = parse_device(identifier)?;
        let worker_registry = registry.clone();
        let worker_sender = sender.clone();
        let worker_config = config.clone();
        handles.push(
            thread::Builder::new()
                .name(format!("selfplay-{worker}"))
                .spawn(move || {
                    if let Err(e) =
                        self_play_worker(device, worker_registry, worker_sender, worker_config)
                    {
                        log::error!("self-play worker {worker} stopped: {e}");
                    }
                })?,
        );
    }
    // the workers hold the only remaining senders; when they go, the
    // trainer's recv unblocks with a closed channel
    drop(sender);

    let train_device = parse_device(&config.train_device)?;
    let trainer_registry = registry.clone();
    let trainer_config = config.clone();
    handles.push(thread::Builder::new().name("trainer".into()).spawn(move || {
        match Trainer::new(
            trainer_config,
            trainer_registry,
            receiver,
            train_device,
            init_idx,
        ) {
            Ok(mut trainer) => {
                if let Err(e) = trainer.run() {
                    log::error!("trainer stopped: {e}");
                }
            }
            Err(e) => log::error!("trainer failed to start: {e}"),
        }
    })?);

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_refuses_a_second_master() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ckpt_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        fs::write(master_file(&config), "[1]").unwrap();
        assert!(matches!(
            start(&config, None),
            Err(Error::AlreadyRunning)
        ));
    }

    #[test]
    fn kill_without_a_record_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ckpt_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(matches!(kill(&config), Err(Error::NotRunning)));
    }

    #[test]
    fn kill_tolerates_dead_pids_and_removes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ckpt_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        // a PID that certainly is not alive
        fs::write(master_file(&config), "[4294967294]").unwrap();
        kill(&config).unwrap();
        assert!(!master_file(&config).exists());
    }

    #[test]
    fn bootstrap_adopts_the_largest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ckpt_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let registry = CheckpointRegistry::new(&config.ckpt_dir);
        registry.ensure_dir().unwrap();
        fs::write(registry.ckpt_path(4), b"w").unwrap();
        fs::write(registry.ckpt_path(9), b"w").unwrap();

        bootstrap_registry(&config, &registry).unwrap();
        assert_eq!(registry.read_best().unwrap(), 9);
    }
}
