use std::path::PathBuf;

/// Initialize logging for a setup session.
///
/// Prefer appending to a stable log file so a failed setup leaves a trail
/// the operator can inspect after the console exits. If the file cannot be
/// created (permissions, readonly FS, etc.), fall back to stderr.
pub fn init(log_file: Option<PathBuf>) {
    use env_logger::Target;
    use std::fs;
    use std::io;

    let path = log_file.unwrap_or_else(|| PathBuf::from("/var/log/nest/setup.log"));

    let target = (|| -> io::Result<Target> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Target::Pipe(Box::new(file)))
    })()
    .unwrap_or(Target::Stderr);

    env_logger::Builder::from_default_env()
        .target(target)
        .filter_level(log::LevelFilter::Info)
        .init();
}
