use std::path::PathBuf;

// System locations used when not running in dev mode

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/facecheck")
}

pub fn system_enrollment_dir() -> PathBuf {
    PathBuf::from("/var/lib/facecheck/enrollment")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/facecheck/facecheck.toml")
}
