use std::path::Path;

use flexi_logger::{opt_format, Cleanup, Criterion, FileSpec, Logger, Naming};

/// Initialize logging once, at process start.
///
/// The CLI front-end logs to stderr; the detached background process writes
/// rotated files into the given directory instead, since its standard
/// streams point at /dev/null.
pub fn setup_logging(file_dir: Option<&Path>) {
    let logger = Logger::try_with_env_or_str("info").unwrap();
    match file_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("training"))
            .format(opt_format)
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Numbers,
                Cleanup::KeepLogFiles(7),
            )
            .start()
            .unwrap(),
        None => logger.start().unwrap(),
    };
}
