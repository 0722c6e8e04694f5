use crate::common::config::StorageConfig;
use crate::common::{system_data_dir, system_enrollment_dir, CaptureError, DevMode, Result};
use crate::core::angle::Angle;
use crate::core::capture::Capture;
use crate::core::payload::RegistrationPayload;
use crate::service::{RegistrationSink, SubmissionReceipt};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STORAGE_VERSION: u32 = 1;

/// What is kept on disk for one subject. Images live next to it as JPEGs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollmentRecord {
    pub version: u32,
    pub subject_id: String,
    pub payload_id: Uuid,
    pub session_id: Uuid,
    pub representative: Option<Angle>,
    pub captures: Vec<Capture>,
    pub average_quality: f32,
    pub average_confidence: f32,
    pub created_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    pub fn angles(&self) -> Vec<Angle> {
        self.captures.iter().map(|c| c.angle).collect()
    }
}

/// Offline registration backend: one bincode record plus one JPEG per angle.
pub struct EnrollmentStore {
    records_dir: PathBuf,
    images_dir: PathBuf,
}

impl EnrollmentStore {
    pub fn new_with_paths(records_dir: PathBuf, images_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&records_dir)?;
        fs::create_dir_all(&images_dir)?;
        Ok(Self { records_dir, images_dir })
    }

    /// Per-user data directory, or the system one when no home is available.
    pub fn new() -> Result<Self> {
        match ProjectDirs::from("com", "facecheck", "FaceCheck") {
            Some(dirs) => {
                let data_dir = dirs.data_dir().to_path_buf();
                Self::new_with_paths(data_dir.join("records"), data_dir.join("enrollment"))
            }
            None => Self::new_with_paths(system_data_dir().join("records"), system_enrollment_dir()),
        }
    }

    /// Dev mode wins, then `storage.data_dir`, then [`new`](Self::new).
    pub fn new_with_dev_mode(dev_mode: &DevMode, config: &StorageConfig) -> Result<Self> {
        if let (Some(records), Some(images)) = (dev_mode.records_dir(), dev_mode.enrollment_images_dir()) {
            tracing::debug!("EnrollmentStore using dev directories: {:?}", records);
            return Self::new_with_paths(records, images);
        }
        match &config.data_dir {
            Some(dir) => Self::new_with_paths(dir.join("records"), dir.join("enrollment")),
            None => Self::new(),
        }
    }

    fn record_path(&self, subject_id: &str) -> PathBuf {
        self.records_dir.join(format!("{}.bincode", subject_id))
    }

    pub fn images_dir(&self, subject_id: &str) -> PathBuf {
        self.images_dir.join(subject_id)
    }

    /// Stages images and record beside the live ones, then swaps them in.
    /// An existing record for the subject is replaced; a failed save leaves
    /// it and its images untouched.
    pub fn save(&self, payload: &RegistrationPayload) -> Result<EnrollmentRecord> {
        validate_subject_id(payload.subject_id())?;
        let subject_id = payload.subject_id();

        let record = EnrollmentRecord {
            version: STORAGE_VERSION,
            subject_id: subject_id.to_string(),
            payload_id: payload.payload_id(),
            session_id: payload.session_id(),
            representative: payload.representative().map(|c| c.angle),
            captures: payload.captures().to_vec(),
            average_quality: payload.average_quality(),
            average_confidence: payload.average_confidence(),
            created_at: payload.created_at(),
            stored_at: Utc::now(),
        };

        // Subject ids never start with '.', so staging names cannot collide.
        let staging = self.images_dir.join(format!(".staging-{}", record.payload_id));
        let record_tmp = self.records_dir.join(format!(".{}.bincode.tmp", subject_id));
        if let Err(e) = stage(&staging, &record_tmp, &record) {
            fs::remove_dir_all(&staging).ok();
            fs::remove_file(&record_tmp).ok();
            return Err(e);
        }

        let image_dir = self.images_dir(subject_id);
        let retired = self.images_dir.join(format!(".retired-{}", record.payload_id));
        if image_dir.exists() {
            fs::rename(&image_dir, &retired)?;
        }
        if let Err(e) = fs::rename(&staging, &image_dir) {
            if retired.exists() {
                fs::rename(&retired, &image_dir).ok();
            }
            fs::remove_file(&record_tmp).ok();
            return Err(e.into());
        }
        fs::rename(&record_tmp, self.record_path(subject_id))?;
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }

        tracing::info!("Stored {} captures for {} in {}", record.captures.len(), record.subject_id, image_dir.display());
        Ok(record)
    }

    /// Loads the record and re-attaches each capture's JPEG from disk.
    pub fn get(&self, subject_id: &str) -> Result<EnrollmentRecord> {
        validate_subject_id(subject_id)?;
        let path = self.record_path(subject_id);
        if !path.exists() {
            return Err(CaptureError::Storage(format!("No enrollment for {}", subject_id)));
        }

        let data = fs::read(path)?;
        let mut record: EnrollmentRecord = bincode::deserialize(&data)
            .map_err(|e| CaptureError::Storage(format!("Failed to deserialize: {}", e)))?;

        let image_dir = self.images_dir(subject_id);
        for capture in &mut record.captures {
            capture.jpeg = fs::read(image_dir.join(format!("{}.jpg", capture.angle.label())))?;
        }
        Ok(record)
    }

    pub fn exists(&self, subject_id: &str) -> bool {
        self.record_path(subject_id).exists()
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut subjects = Vec::new();
        for entry in fs::read_dir(&self.records_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "bincode") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    subjects.push(stem.to_string());
                }
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    pub fn delete(&self, subject_id: &str) -> Result<()> {
        validate_subject_id(subject_id)?;
        let path = self.record_path(subject_id);
        if !path.exists() {
            return Err(CaptureError::Storage(format!("No enrollment for {}", subject_id)));
        }
        fs::remove_file(path)?;
        let image_dir = self.images_dir(subject_id);
        if image_dir.exists() {
            fs::remove_dir_all(image_dir)?;
        }
        Ok(())
    }
}

fn stage(image_dir: &Path, record_path: &Path, record: &EnrollmentRecord) -> Result<()> {
    fs::create_dir_all(image_dir)?;
    for capture in &record.captures {
        fs::write(image_dir.join(format!("{}.jpg", capture.angle.label())), &capture.jpeg)?;
    }
    let encoded = bincode::serialize(record)
        .map_err(|e| CaptureError::Storage(format!("Failed to serialize: {}", e)))?;
    fs::write(record_path, encoded)?;
    Ok(())
}

// Subject ids become file names.
fn validate_subject_id(subject_id: &str) -> Result<()> {
    let valid = !subject_id.is_empty()
        && subject_id.len() <= 128
        && subject_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !subject_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CaptureError::Storage(format!("Invalid subject id: {:?}", subject_id)))
    }
}

impl RegistrationSink for EnrollmentStore {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(&self, payload: &RegistrationPayload) -> Result<SubmissionReceipt> {
        let record = self
            .save(payload)
            .map_err(|e| CaptureError::SubmissionFailed(format!("local store: {}", e)))?;
        Ok(SubmissionReceipt::new(
            self.name(),
            payload,
            Some(record.payload_id.to_string()),
            format!("Stored {} angles in {}", record.captures.len(), self.images_dir(&record.subject_id).display()),
        ))
    }
}
